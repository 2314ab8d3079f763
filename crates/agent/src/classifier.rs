use std::sync::Arc;

use async_trait::async_trait;
use intentbot_core::config::LlmConfig;
use intentbot_core::{ClassificationResult, ConversationTurn, IntentCatalog};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::gigachat::{GigaChatClient, GigaChatConfig};
use crate::llm::{ChatMessage, ChatRequest, CompletionPayload, LlmClient, LlmError};
use crate::prompt::PromptBuilder;
use crate::retry::{retry_with, RetryPolicy};

const MALFORMED_RESPONSE: &str = "Некорректный формат ответа AI";
const INVALID_STATUS: &str = "Некорректный статус ответа";
const UNPARSEABLE_RESPONSE: &str = "Ошибка при обработке ответа AI";
const GATEWAY_FAILURE: &str = "Ошибка при классификации намерения";

const VALID_STATUSES: [&str; 3] = ["success", "insufficient_data", "unknown_intent"];

/// `classify(utterance, context, catalog)`. Failures never escape: every
/// error path yields the unknown-intent fallback with an error annotation.
#[async_trait]
pub trait ClassificationGateway: Send + Sync {
    async fn classify(
        &self,
        utterance: &str,
        context: &[ConversationTurn],
        catalog: &IntentCatalog,
    ) -> ClassificationResult;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SamplingOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl SamplingOptions {
    pub fn from_llm_config(llm: &LlmConfig) -> Self {
        Self {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            top_p: llm.top_p,
        }
    }
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self { model: "GigaChat-2".to_owned(), temperature: 0.1, max_tokens: 1500, top_p: 0.1 }
    }
}

/// Gateway backed by a chat-completions model.
pub struct LlmClassifier<C> {
    client: Arc<C>,
    prompts: PromptBuilder,
    sampling: SamplingOptions,
    retry: RetryPolicy,
}

impl<C> LlmClassifier<C>
where
    C: LlmClient,
{
    pub fn new(client: Arc<C>, prompts: PromptBuilder, sampling: SamplingOptions) -> Self {
        Self { client, prompts, sampling, retry: RetryPolicy::once() }
    }

    fn request(
        &self,
        utterance: &str,
        context: &[ConversationTurn],
        catalog: &IntentCatalog,
    ) -> ChatRequest {
        ChatRequest {
            model: self.sampling.model.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.system_prompt(catalog)),
                ChatMessage::user(self.prompts.user_message(utterance, context)),
            ],
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
            top_p: self.sampling.top_p,
        }
    }
}

#[async_trait]
impl<C> ClassificationGateway for LlmClassifier<C>
where
    C: LlmClient + 'static,
{
    async fn classify(
        &self,
        utterance: &str,
        context: &[ConversationTurn],
        catalog: &IntentCatalog,
    ) -> ClassificationResult {
        let request = self.request(utterance, context, catalog);
        let client = &self.client;

        let completion = retry_with(
            self.retry,
            |attempt| {
                let request = &request;
                async move {
                    debug!(event_name = "classifier.attempt", attempt, "requesting classification");
                    client.complete(request).await
                }
            },
            LlmError::is_auth,
            |error| {
                warn!(
                    event_name = "classifier.reauthenticating",
                    error = %error,
                    "auth failure, refreshing credentials and retrying once"
                );
                client.invalidate_credentials()
            },
        )
        .await;

        match completion {
            Ok(payload) => parse_classification(payload, catalog),
            Err(error) => {
                warn!(event_name = "classifier.failed", error = %error, "classification request failed");
                ClassificationResult::unknown_fallback(GATEWAY_FAILURE, Some(error.to_string()))
            }
        }
    }
}

/// Gateway used when no model credentials are configured.
#[derive(Clone, Debug, Default)]
pub struct UnavailableClassifier {
    reason: String,
}

impl UnavailableClassifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl ClassificationGateway for UnavailableClassifier {
    async fn classify(
        &self,
        _utterance: &str,
        _context: &[ConversationTurn],
        _catalog: &IntentCatalog,
    ) -> ClassificationResult {
        ClassificationResult::unknown_fallback(GATEWAY_FAILURE, Some(self.reason.clone()))
    }
}

/// GigaChat-backed gateway when credentials are present, otherwise the
/// unavailable gateway.
pub fn gateway_from_config(llm: &LlmConfig) -> Result<Arc<dyn ClassificationGateway>, LlmError> {
    if !llm.has_credentials() {
        return Ok(Arc::new(UnavailableClassifier::new("llm credentials are not configured")));
    }

    let client = GigaChatClient::new(GigaChatConfig::from_llm_config(llm)?)?;
    let prompts = PromptBuilder::new(llm.compact_catalog, llm.max_prompt_examples as usize);
    Ok(Arc::new(LlmClassifier::new(
        Arc::new(client),
        prompts,
        SamplingOptions::from_llm_config(llm),
    )))
}

/// Turns a model completion into a catalog-checked result.
pub fn parse_classification(payload: CompletionPayload, catalog: &IntentCatalog) -> ClassificationResult {
    let value = match payload {
        CompletionPayload::Structured(value) => value,
        CompletionPayload::Text(text) => match serde_json::from_str::<Value>(strip_fences(&text)) {
            Ok(value) => value,
            Err(error) => {
                return ClassificationResult::unknown_fallback(
                    UNPARSEABLE_RESPONSE,
                    Some(error.to_string()),
                )
            }
        },
    };

    let Value::Object(mut object) = value else {
        return ClassificationResult::unknown_fallback(
            UNPARSEABLE_RESPONSE,
            Some("classifier response is not a JSON object".to_owned()),
        );
    };

    let status = object.get("status").and_then(Value::as_str).filter(|text| !text.is_empty());
    let intent = object.get("intent").and_then(Value::as_str).filter(|text| !text.is_empty());
    let (Some(status), Some(_)) = (status, intent) else {
        return ClassificationResult::unknown_fallback(
            MALFORMED_RESPONSE,
            Some("response lacks status or intent".to_owned()),
        );
    };
    if !VALID_STATUSES.contains(&status) {
        let error = format!("unknown status `{status}`");
        return ClassificationResult::unknown_fallback(INVALID_STATUS, Some(error));
    }

    let data = match object.remove("data") {
        Some(Value::Object(data)) => sanitize_data(data),
        _ => Map::new(),
    };
    object.insert("data".to_owned(), Value::Object(data));
    object.remove("error");

    match serde_json::from_value::<ClassificationResult>(Value::Object(object)) {
        Ok(result) => result.enforce_catalog(catalog),
        Err(error) => ClassificationResult::unknown_fallback(UNPARSEABLE_RESPONSE, Some(error.to_string())),
    }
}

fn sanitize_data(mut data: Map<String, Value>) -> Map<String, Value> {
    let missing = ["missing_required_fields", "missingRequiredFields"]
        .iter()
        .filter_map(|key| data.remove(*key))
        .find_map(|value| match value {
            Value::Array(items) => Some(items),
            _ => None,
        })
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| item.as_str().map(str::to_owned))
        .map(Value::String)
        .collect::<Vec<_>>();
    data.insert("missing_required_fields".to_owned(), Value::Array(missing));

    match data.remove("comment") {
        Some(Value::String(comment)) => {
            data.insert("comment".to_owned(), Value::String(comment));
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            data.insert("comment".to_owned(), Value::String(other.to_string()));
        }
    }
    data
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
