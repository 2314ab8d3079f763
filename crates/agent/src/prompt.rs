use intentbot_core::{ConversationTurn, IntentCatalog};

const RULES: &str = r#"ПРАВИЛА КЛАССИФИКАЦИИ:
1. Сопоставь запрос пользователя с одним из доступных намерений
2. Если намерение определено, извлеки данные согласно структуре намерения
3. Проверь наличие всех обязательных полей (required: true)
4. Верни результат в формате JSON

ФОРМАТ ОТВЕТА:
Ответ должен быть валидным JSON объектом со следующей структурой:
{
  "status": "<статус>",
  "intent": "<идентификатор_намерения>",
  "data": { ... }
}

СТАТУСЫ:
- "success": намерение определено и все обязательные данные присутствуют
- "insufficient_data": намерение определено, но отсутствуют обязательные поля
- "unknown_intent": намерение не может быть определено (используй дефолтное намерение)

ПРАВИЛА:
- Используй только намерения из предоставленного списка
- Если намерение не найдено, используй дефолтное намерение (intent: "default_intent")
- Если намерение найдено, но не хватает обязательных полей, верни status: "insufficient_data" и укажи недостающие поля в data.missing_required_fields
- Типы данных определяй из описания полей
- Возвращай только валидный JSON, без дополнительных комментариев
- Если запрос содержит контекст предыдущих реплик, учитывай его при классификации"#;

const UNKNOWN_SENDER: &str = "Пользователь";

/// Renders the two-turn classifier prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptBuilder {
    pub compact: bool,
    pub max_examples: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self { compact: false, max_examples: 2 }
    }
}

impl PromptBuilder {
    pub fn new(compact: bool, max_examples: usize) -> Self {
        Self { compact, max_examples }
    }

    pub fn system_prompt(&self, catalog: &IntentCatalog) -> String {
        format!(
            "Ты - ассистент для классификации намерений пользователя. Твоя задача - проанализировать запрос пользователя и определить его намерение из списка доступных намерений.\n\nСПИСОК ДОСТУПНЫХ НАМЕРЕНИЙ:\n{}\n\n{RULES}",
            catalog.prompt_json(self.compact, self.max_examples)
        )
    }

    pub fn user_message(&self, utterance: &str, context: &[ConversationTurn]) -> String {
        if context.is_empty() {
            return format!("Запрос пользователя: \"{utterance}\"");
        }

        let lines = context.iter().map(context_line).collect::<Vec<_>>().join("\n");
        format!("Контекст диалога:\n{lines}\n\nТекущий запрос пользователя: \"{utterance}\"")
    }
}

fn context_line(turn: &ConversationTurn) -> String {
    let sender = if turn.sender_id.trim().is_empty() { UNKNOWN_SENDER } else { &turn.sender_id };
    match turn.created_at {
        Some(at) => format!("- {sender}: \"{}\" ({})", turn.content, at.format("%d.%m.%Y, %H:%M:%S")),
        None => format!("- {sender}: \"{}\"", turn.content),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use intentbot_core::{ConversationTurn, IntentCatalog, MessageId, TurnTags};

    use super::PromptBuilder;

    fn turn(sender: &str, content: &str, second: Option<u32>) -> ConversationTurn {
        ConversationTurn {
            message_id: MessageId(format!("msg_{content}")),
            sender_id: sender.to_owned(),
            content: content.to_owned(),
            created_at: second.map(|second| {
                Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, second).single().expect("valid time")
            }),
            tags: TurnTags::default(),
        }
    }

    #[test]
    fn message_without_context_is_a_bare_request() {
        let text = PromptBuilder::default().user_message("Не работает приложение", &[]);

        assert_eq!(text, "Запрос пользователя: \"Не работает приложение\"");
    }

    #[test]
    fn context_lines_carry_sender_and_timestamp() {
        let context = [turn("bot_helper", "На каком устройстве?", Some(5)), turn("", "iPhone", None)];
        let text = PromptBuilder::default().user_message("ошибка входа", &context);

        assert!(text.starts_with("Контекст диалога:\n"));
        assert!(text.contains("- bot_helper: \"На каком устройстве?\" (15.01.2025, 10:00:05)"));
        assert!(text.contains("- Пользователь: \"iPhone\"\n"));
        assert!(text.ends_with("Текущий запрос пользователя: \"ошибка входа\""));
    }

    #[test]
    fn system_prompt_embeds_every_intent() {
        let catalog = IntentCatalog::builtin();
        let prompt = PromptBuilder::new(true, 1).system_prompt(&catalog);

        for intent in catalog.intents() {
            assert!(prompt.contains(&intent.id), "missing {}", intent.id);
        }
        assert!(prompt.contains("missing_required_fields"));
    }
}
