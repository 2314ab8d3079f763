//! Ports onto the conversation platform.
//!
//! The core only depends on these traits; the HTTP adapter lives in the
//! platform crate and [`memory::InMemoryPlatform`] backs tests and dry runs.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::dialog::{DialogId, MessageId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaScope {
    Dialog,
    Message,
}

impl MetaScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dialog => "dialog",
            Self::Message => "message",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaDataType {
    #[default]
    String,
    Boolean,
    Number,
    Object,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub value: Value,
    #[serde(default, rename = "dataType", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<MetaDataType>,
}

impl MetaEntry {
    pub fn string(value: impl Into<String>) -> Self {
        Self { value: Value::String(value.into()), data_type: Some(MetaDataType::String) }
    }

    pub fn boolean(value: bool) -> Self {
        Self { value: Value::Bool(value), data_type: Some(MetaDataType::Boolean) }
    }

    /// Scalar value as text, the form used by metadata filters.
    pub fn as_text(&self) -> Option<String> {
        match &self.value {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            Value::Bool(flag) => Some(flag.to_string()),
            Value::Number(number) => Some(number.to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn as_bool(&self) -> bool {
        match &self.value {
            Value::Bool(flag) => *flag,
            Value::String(text) => text.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

pub type MetaMap = BTreeMap<String, MetaEntry>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Transport(String),
    #[error("platform returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("platform response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DialogMessage {
    pub message_id: MessageId,
    pub dialog_id: DialogId,
    pub sender_id: String,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    pub message_type: Option<String>,
    #[serde(default)]
    pub meta: MetaMap,
}

/// Equality conditions on message metadata, all of which must hold.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaFilter {
    conditions: Vec<(String, String)>,
}

impl MetaFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    pub fn matches(&self, meta: &MetaMap) -> bool {
        self.conditions.iter().all(|(key, expected)| {
            meta.get(key).and_then(MetaEntry::as_text).as_deref() == Some(expected.as_str())
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SentMessage {
    /// Absent when the platform acknowledged the send without echoing the message.
    pub message_id: Option<MessageId>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_meta(&self, scope: MetaScope, entity_id: &str) -> Result<MetaMap, PlatformError>;

    async fn set_meta(
        &self,
        scope: MetaScope,
        entity_id: &str,
        key: &str,
        entry: MetaEntry,
    ) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait DialogPlatform: MetadataStore {
    /// Newest `limit` messages of a dialog, in whatever order the platform returns.
    async fn recent_messages(
        &self,
        dialog_id: &DialogId,
        limit: usize,
    ) -> Result<Vec<DialogMessage>, PlatformError>;

    async fn messages_by_meta(
        &self,
        dialog_id: &DialogId,
        filter: &MetaFilter,
        limit: usize,
    ) -> Result<Vec<DialogMessage>, PlatformError>;

    async fn send_message(
        &self,
        dialog_id: &DialogId,
        sender_id: &UserId,
        content: &str,
    ) -> Result<SentMessage, PlatformError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserLookup {
    Found,
    Created,
    Failed(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_or_create_user(&self, user_id: &UserId, display_name: &str) -> UserLookup;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{MetaEntry, MetaFilter, MetaMap};

    #[test]
    fn filter_matches_booleans_and_strings_as_text() {
        let mut meta = MetaMap::new();
        meta.insert("botQuestion".to_owned(), MetaEntry::boolean(true));
        meta.insert("botConversationId".to_owned(), MetaEntry::string("conv_1"));

        assert!(MetaFilter::new()
            .with("botQuestion", "true")
            .with("botConversationId", "conv_1")
            .matches(&meta));
        assert!(!MetaFilter::new().with("botConversationId", "conv_2").matches(&meta));
        assert!(!MetaFilter::new().with("relatedIntent", "support_billing").matches(&meta));
    }

    #[test]
    fn string_flags_are_read_as_booleans() {
        let entry: MetaEntry =
            serde_json::from_value(json!({ "value": "true" })).expect("entry without data type");

        assert!(entry.as_bool());
        assert_eq!(entry.data_type, None);
        assert!(!MetaEntry::string("no").as_bool());
    }
}
