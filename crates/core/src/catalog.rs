use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_INTENT_ID: &str = "default_intent";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "field")]
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDefinition {
    #[serde(rename = "intent")]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default, rename = "data")]
    pub fields: Vec<FieldSpec>,
}

impl IntentDefinition {
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|field| field.required)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not read intent catalog `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse intent catalog `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("intent catalog must contain exactly one `{DEFAULT_INTENT_ID}` entry (found {0})")]
    DefaultIntentCount(usize),
    #[error("`{DEFAULT_INTENT_ID}` must not declare data fields")]
    DefaultIntentHasFields,
    #[error("intent id must not be empty")]
    EmptyIntentId,
    #[error("duplicate intent id `{0}`")]
    DuplicateIntent(String),
    #[error("intent `{intent}` declares field `{field}` more than once")]
    DuplicateField { intent: String, field: String },
}

/// Closed vocabulary of classification outcomes. Immutable after load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntentCatalog {
    intents: Vec<IntentDefinition>,
    #[serde(skip)]
    default_index: usize,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    intents: Vec<IntentDefinition>,
}

impl IntentCatalog {
    pub fn new(intents: Vec<IntentDefinition>) -> Result<Self, CatalogError> {
        let default_index = validate(&intents)?;
        Ok(Self { intents, default_index })
    }

    /// Loads `[[intents]]` tables from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| CatalogError::ReadFile { path: path.to_path_buf(), source })?;
        let file = toml::from_str::<CatalogFile>(&raw)
            .map_err(|source| CatalogError::ParseFile { path: path.to_path_buf(), source })?;
        Self::new(file.intents)
    }

    /// Built-in catalog when the file path is unset.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => Self::from_toml_file(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn builtin() -> Self {
        let intents = builtin_intents();
        let default_index =
            intents.iter().position(|intent| intent.id == DEFAULT_INTENT_ID).unwrap_or_default();
        Self { intents, default_index }
    }

    pub fn get(&self, intent_id: &str) -> Option<&IntentDefinition> {
        self.intents.iter().find(|intent| intent.id == intent_id)
    }

    pub fn contains(&self, intent_id: &str) -> bool {
        self.get(intent_id).is_some()
    }

    pub fn default_intent(&self) -> &IntentDefinition {
        &self.intents[self.default_index]
    }

    pub fn intents(&self) -> &[IntentDefinition] {
        &self.intents
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Catalog as rendered into the classifier prompt.
    ///
    /// `compact` trims examples to `max_examples` per intent and per field and
    /// emits single-line JSON.
    pub fn prompt_json(&self, compact: bool, max_examples: usize) -> String {
        if !compact {
            return serde_json::to_string_pretty(&self.intents).unwrap_or_default();
        }

        let trimmed = self
            .intents
            .iter()
            .map(|intent| IntentDefinition {
                id: intent.id.clone(),
                description: intent.description.clone(),
                examples: intent.examples.iter().take(max_examples).cloned().collect(),
                fields: intent
                    .fields
                    .iter()
                    .map(|field| FieldSpec {
                        examples: field.examples.iter().take(max_examples).cloned().collect(),
                        ..field.clone()
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();
        serde_json::to_string(&trimmed).unwrap_or_default()
    }
}

impl Default for IntentCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Returns the position of the single default intent.
fn validate(intents: &[IntentDefinition]) -> Result<usize, CatalogError> {
    let defaults = intents
        .iter()
        .enumerate()
        .filter(|(_, intent)| intent.id == DEFAULT_INTENT_ID)
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    let [default_index] = defaults.as_slice() else {
        return Err(CatalogError::DefaultIntentCount(defaults.len()));
    };

    let mut ids = BTreeSet::new();
    for intent in intents {
        if intent.id.trim().is_empty() {
            return Err(CatalogError::EmptyIntentId);
        }
        if !ids.insert(intent.id.as_str()) {
            return Err(CatalogError::DuplicateIntent(intent.id.clone()));
        }
        if intent.id == DEFAULT_INTENT_ID && !intent.fields.is_empty() {
            return Err(CatalogError::DefaultIntentHasFields);
        }

        let mut fields = BTreeSet::new();
        for field in &intent.fields {
            if !fields.insert(field.name.as_str()) {
                return Err(CatalogError::DuplicateField {
                    intent: intent.id.clone(),
                    field: field.name.clone(),
                });
            }
        }
    }

    Ok(*default_index)
}

fn field(name: &str, description: &str, required: bool, examples: &[&str]) -> FieldSpec {
    FieldSpec {
        name: name.to_owned(),
        description: description.to_owned(),
        required,
        examples: examples.iter().map(|example| (*example).to_owned()).collect(),
    }
}

fn intent(id: &str, description: &str, examples: &[&str], fields: Vec<FieldSpec>) -> IntentDefinition {
    IntentDefinition {
        id: id.to_owned(),
        description: description.to_owned(),
        examples: examples.iter().map(|example| (*example).to_owned()).collect(),
        fields,
    }
}

fn builtin_intents() -> Vec<IntentDefinition> {
    vec![
        intent(
            "support_technical",
            "Техническая поддержка: сбои, ошибки и неполадки в работе системы",
            &["не работает", "ошибка", "не могу войти", "система зависла", "не открывается", "баг", "сломалось"],
            vec![
                field(
                    "issue_type",
                    "Тип проблемы: авторизация, производительность, функциональность, другое",
                    true,
                    &["авторизация", "производительность", "функциональность", "другое"],
                ),
                field(
                    "device",
                    "Устройство или платформа, на которой возникла проблема",
                    true,
                    &["мобильное приложение", "веб-сайт", "API"],
                ),
                field(
                    "error_message",
                    "Текст ошибки, если пользователь его привёл",
                    false,
                    &["Ошибка 404", "Connection timeout"],
                ),
            ],
        ),
        intent(
            "support_billing",
            "Оплата, счета, возвраты и подписки",
            &["оплата", "счет", "возврат", "подписка", "платеж", "деньги", "биллинг"],
            vec![
                field("order_id", "Номер заказа или транзакции", true, &["12345", "ORD-2024-001"]),
                field(
                    "reason",
                    "Причина обращения: возврат, вопрос по счету, отмена подписки, другое",
                    true,
                    &["возврат", "вопрос по счету", "отмена подписки", "другое"],
                ),
                field("amount", "Сумма, если указана", false, &["1000", "5000 руб"]),
            ],
        ),
        intent(
            "support_account",
            "Аккаунт, настройки профиля и доступ",
            &["аккаунт", "профиль", "настройки", "пароль", "доступ", "регистрация"],
            vec![
                field(
                    "action_type",
                    "Что нужно сделать: смена пароля, восстановление доступа, изменение данных, другое",
                    true,
                    &["изменение пароля", "восстановление доступа", "изменение данных", "другое"],
                ),
                field("user_id", "Идентификатор пользователя, если указан", false, &["user123", "user@example.com"]),
            ],
        ),
        intent(
            "support_general",
            "Общие вопросы, информация о продукте, документация",
            &["как использовать", "документация", "инструкция", "помощь", "вопрос", "информация"],
            vec![field("topic", "Тема вопроса", false, &["функциональность", "интеграция", "API", "другое"])],
        ),
        intent(
            DEFAULT_INTENT_ID,
            "Намерение не определено или не совпадает ни с одним из доступных",
            &[],
            Vec::new(),
        ),
    ]
}
