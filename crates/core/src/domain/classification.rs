use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::catalog::{IntentCatalog, DEFAULT_INTENT_ID};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    Success,
    InsufficientData,
    UnknownIntent,
}

impl ClassificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InsufficientData => "insufficient_data",
            Self::UnknownIntent => "unknown_intent",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationData {
    #[serde(
        default,
        alias = "missingRequiredFields",
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub missing_required_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl ClassificationData {
    /// Extracted value rendered as text; blank and null values count as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::Null => None,
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn has_value(&self, name: &str) -> bool {
        self.text(name).is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub status: ClassificationStatus,
    pub intent: String,
    #[serde(default)]
    pub data: ClassificationData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassificationResult {
    /// Result every gateway or parse failure collapses into.
    pub fn unknown_fallback(comment: impl Into<String>, error: Option<String>) -> Self {
        Self {
            status: ClassificationStatus::UnknownIntent,
            intent: DEFAULT_INTENT_ID.to_owned(),
            data: ClassificationData { comment: Some(comment.into()), ..Default::default() },
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ClassificationStatus::Success
    }

    /// Re-checks a gateway answer against the catalog.
    ///
    /// Unknown intent ids become the unknown-intent fallback, and a `success`
    /// lacking any required field is downgraded to `insufficient_data` with
    /// the missing names listed.
    pub fn enforce_catalog(mut self, catalog: &IntentCatalog) -> Self {
        let Some(definition) = catalog.get(&self.intent) else {
            let error = format!("intent `{}` is not in the catalog", self.intent);
            return Self::unknown_fallback("Некорректный формат ответа AI", Some(error));
        };

        match self.status {
            ClassificationStatus::UnknownIntent => {
                self.intent = DEFAULT_INTENT_ID.to_owned();
            }
            ClassificationStatus::Success => {
                let missing = definition
                    .required_fields()
                    .filter(|field| !self.data.has_value(&field.name))
                    .map(|field| field.name.clone())
                    .collect::<Vec<_>>();
                if !missing.is_empty() {
                    self.status = ClassificationStatus::InsufficientData;
                    self.data.missing_required_fields = missing;
                }
            }
            ClassificationStatus::InsufficientData => {}
        }

        self
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ClassificationResult, ClassificationStatus};
    use crate::catalog::IntentCatalog;

    fn parse(value: serde_json::Value) -> ClassificationResult {
        serde_json::from_value(value).expect("valid classification json")
    }

    #[test]
    fn camel_case_missing_fields_are_accepted() {
        let result = parse(json!({
            "status": "insufficient_data",
            "intent": "support_technical",
            "data": { "missingRequiredFields": ["device"], "comment": "На каком устройстве?" }
        }));

        assert_eq!(result.data.missing_required_fields, vec!["device"]);
        assert_eq!(result.data.comment.as_deref(), Some("На каком устройстве?"));
        assert!(result.data.fields.is_empty());
    }

    #[test]
    fn success_with_all_required_fields_is_kept() {
        let catalog = IntentCatalog::builtin();
        let result = parse(json!({
            "status": "success",
            "intent": "support_technical",
            "data": { "device": "мобильное приложение", "issue_type": "авторизация" }
        }))
        .enforce_catalog(&catalog);

        assert_eq!(result.status, ClassificationStatus::Success);
        assert_eq!(result.data.text("device").as_deref(), Some("мобильное приложение"));
    }

    #[test]
    fn success_missing_required_fields_is_downgraded() {
        let catalog = IntentCatalog::builtin();
        let result = parse(json!({
            "status": "success",
            "intent": "support_technical",
            "data": { "device": null, "issue_type": "  " }
        }))
        .enforce_catalog(&catalog);

        assert_eq!(result.status, ClassificationStatus::InsufficientData);
        assert_eq!(result.data.missing_required_fields, vec!["issue_type", "device"]);
    }

    #[test]
    fn every_success_after_enforcement_carries_required_fields() {
        let catalog = IntentCatalog::builtin();
        for definition in catalog.intents() {
            let result = parse(json!({ "status": "success", "intent": definition.id }))
                .enforce_catalog(&catalog);
            if result.is_success() {
                assert!(definition.required_fields().all(|field| result.data.has_value(&field.name)));
            } else {
                assert_eq!(result.status, ClassificationStatus::InsufficientData);
            }
        }
    }

    #[test]
    fn intent_outside_catalog_becomes_unknown_fallback() {
        let catalog = IntentCatalog::builtin();
        let result = parse(json!({ "status": "success", "intent": "order_pizza" }))
            .enforce_catalog(&catalog);

        assert_eq!(result.status, ClassificationStatus::UnknownIntent);
        assert_eq!(result.intent, "default_intent");
        assert!(result.error.is_some());
    }

    #[test]
    fn unknown_status_is_normalised_to_default_intent() {
        let catalog = IntentCatalog::builtin();
        let result = parse(json!({ "status": "unknown_intent", "intent": "support_general" }))
            .enforce_catalog(&catalog);

        assert_eq!(result.intent, "default_intent");
    }

    #[test]
    fn invalid_status_value_does_not_deserialize() {
        let parsed = serde_json::from_value::<ClassificationResult>(json!({
            "status": "maybe",
            "intent": "support_general"
        }));

        assert!(parsed.is_err());
    }
}
