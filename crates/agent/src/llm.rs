use async_trait::async_trait;
use intentbot_core::ApplicationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm credentials are not configured")]
    NotConfigured,
    #[error("llm authentication failed: {0}")]
    Unauthorized(String),
    #[error("llm request failed: {0}")]
    Transport(String),
    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Errors cured by dropping the cached token and trying again.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<LlmError> for ApplicationError {
    fn from(value: LlmError) -> Self {
        match value {
            error @ LlmError::NotConfigured => Self::Configuration(error.to_string()),
            other => Self::Classifier(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Completion normalised from whatever envelope the backend used.
#[derive(Clone, Debug, PartialEq)]
pub enum CompletionPayload {
    /// Model text, possibly fenced JSON.
    Text(String),
    /// Backend already returned a structured object.
    Structured(Value),
}

impl CompletionPayload {
    /// Accepts a bare string, `choices[0].message.content`, `choices[0].text`,
    /// top-level `content` or `message`, and a `data` object.
    pub fn from_response(response: Value) -> Result<Self, LlmError> {
        if let Value::String(text) = &response {
            return Ok(Self::Text(text.clone()));
        }

        let first_choice = response.pointer("/choices/0");
        let candidates = [
            first_choice.and_then(|choice| choice.pointer("/message/content")),
            first_choice.and_then(|choice| choice.get("text")),
            response.get("content"),
            response.get("message").and_then(|message| match message {
                Value::Object(_) => message.get("content"),
                other => Some(other),
            }),
        ];
        if let Some(text) = candidates.into_iter().flatten().find_map(Value::as_str) {
            return Ok(Self::Text(text.to_owned()));
        }

        match response.get("data") {
            Some(Value::String(text)) => Ok(Self::Text(text.clone())),
            Some(data @ Value::Object(_)) => Ok(Self::Structured(data.clone())),
            _ => Err(LlmError::InvalidResponse(
                "no completion text found in response envelope".to_owned(),
            )),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<CompletionPayload, LlmError>;

    /// Drops cached credentials so the next call re-authenticates.
    async fn invalidate_credentials(&self) {}
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use intentbot_core::ApplicationError;

    use super::{CompletionPayload, LlmError};

    #[test]
    fn openai_style_envelope_yields_message_content() {
        let payload = CompletionPayload::from_response(json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"status\":\"success\"}" } }]
        }))
        .expect("payload");

        assert_eq!(payload, CompletionPayload::Text("{\"status\":\"success\"}".to_owned()));
    }

    #[test]
    fn alternative_envelopes_are_normalised() {
        let shapes = [
            json!("raw text"),
            json!({ "choices": [{ "text": "raw text" }] }),
            json!({ "content": "raw text" }),
            json!({ "message": "raw text" }),
            json!({ "message": { "content": "raw text" } }),
            json!({ "data": "raw text" }),
        ];

        for shape in shapes {
            assert_eq!(
                CompletionPayload::from_response(shape).expect("payload"),
                CompletionPayload::Text("raw text".to_owned())
            );
        }
    }

    #[test]
    fn data_object_is_passed_through_structured() {
        let payload =
            CompletionPayload::from_response(json!({ "data": { "status": "unknown_intent" } }))
                .expect("payload");

        assert_eq!(payload, CompletionPayload::Structured(json!({ "status": "unknown_intent" })));
    }

    #[test]
    fn envelope_without_text_is_rejected() {
        let error = CompletionPayload::from_response(json!({ "choices": [] })).expect_err("no text");

        assert!(matches!(error, LlmError::InvalidResponse(_)));
        assert!(!error.is_auth());
        assert!(LlmError::Unauthorized("expired".to_owned()).is_auth());
    }

    #[test]
    fn missing_credentials_are_configuration_not_outage() {
        let missing = ApplicationError::from(LlmError::NotConfigured);
        let outage = ApplicationError::from(LlmError::Status { status: 502, body: String::new() });

        assert_eq!(missing.class(), "configuration");
        assert!(!missing.is_transient());
        assert_eq!(outage.class(), "classifier");
        assert!(outage.is_transient());
    }
}
