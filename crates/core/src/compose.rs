use std::collections::HashMap;

use crate::catalog::DEFAULT_INTENT_ID;
use crate::domain::classification::{ClassificationData, ClassificationResult, ClassificationStatus};

pub const FALLBACK_REPLY: &str =
    "Извините, я не понял ваш запрос. Пожалуйста, уточните, чем я могу помочь.";
const GENERIC_QUESTION: &str = "Мне нужна дополнительная информация. Пожалуйста, уточните ваш запрос.";

#[derive(Clone, Debug, PartialEq, Eq)]
struct ReplyTemplate {
    text: String,
    /// Used instead of `text` when the named field was extracted.
    variants: Vec<(String, String)>,
}

impl ReplyTemplate {
    fn plain(text: &str) -> Self {
        Self { text: text.to_owned(), variants: Vec::new() }
    }

    fn with_variant(mut self, field: &str, template: &str) -> Self {
        self.variants.push((field.to_owned(), template.to_owned()));
        self
    }

    fn render(&self, data: &ClassificationData) -> String {
        let template = self
            .variants
            .iter()
            .find(|(field, _)| data.has_value(field))
            .map_or(self.text.as_str(), |(_, template)| template.as_str());
        interpolate(template, data)
    }
}

fn interpolate(template: &str, data: &ClassificationData) -> String {
    data.fields.keys().fold(template.to_owned(), |text, name| match data.text(name) {
        Some(value) => text.replace(&format!("{{{name}}}"), &value),
        None => text,
    })
}

/// Maps classification outcomes to the text sent to the user. Never fails.
#[derive(Clone, Debug)]
pub struct ResponseComposer {
    templates: HashMap<String, ReplyTemplate>,
}

impl Default for ResponseComposer {
    fn default() -> Self {
        let templates = [
            (
                "support_technical",
                ReplyTemplate::plain("Понял, проблема с технической поддержкой. Сейчас разберусь."),
            ),
            (
                "support_billing",
                ReplyTemplate::plain("Понял, вопрос по оплате. Обрабатываю ваш запрос.")
                    .with_variant("order_id", "Понял, вопрос по оплате. Оформляю возврат по заказу {order_id}."),
            ),
            ("support_account", ReplyTemplate::plain("Понял, вопрос по аккаунту. Помогу вам.")),
            ("support_general", ReplyTemplate::plain("Понял ваш вопрос. Сейчас помогу.")),
            (DEFAULT_INTENT_ID, ReplyTemplate::plain("Понял ваш запрос. Обрабатываю.")),
        ]
        .into_iter()
        .map(|(intent, template)| (intent.to_owned(), template))
        .collect();

        Self { templates }
    }
}

impl ResponseComposer {
    pub fn compose(&self, result: &ClassificationResult) -> String {
        match result.status {
            ClassificationStatus::Success => self.success_reply(&result.intent, &result.data),
            ClassificationStatus::InsufficientData => self.question(&result.data),
            ClassificationStatus::UnknownIntent => self.fallback_reply(),
        }
    }

    /// Confirmation for a resolved intent; unknown ids use the default template.
    pub fn success_reply(&self, intent: &str, data: &ClassificationData) -> String {
        self.templates
            .get(intent)
            .or_else(|| self.templates.get(DEFAULT_INTENT_ID))
            .map_or_else(|| FALLBACK_REPLY.to_owned(), |template| template.render(data))
    }

    /// Follow-up question: the classifier's comment if it gave one, else the missing field list.
    pub fn question(&self, data: &ClassificationData) -> String {
        if let Some(comment) = data.comment.as_deref().map(str::trim).filter(|text| !text.is_empty()) {
            return comment.to_owned();
        }
        if data.missing_required_fields.is_empty() {
            return GENERIC_QUESTION.to_owned();
        }
        format!(
            "Для обработки вашего запроса мне нужна дополнительная информация: {}. Пожалуйста, предоставьте эти данные.",
            data.missing_required_fields.join(", ")
        )
    }

    pub fn fallback_reply(&self) -> String {
        FALLBACK_REPLY.to_owned()
    }
}
