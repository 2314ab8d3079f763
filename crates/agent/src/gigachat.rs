use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use intentbot_core::config::LlmConfig;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::llm::{ChatRequest, CompletionPayload, LlmClient, LlmError};

#[derive(Clone, Debug)]
pub struct GigaChatConfig {
    pub auth_url: String,
    pub base_url: String,
    pub client_id: SecretString,
    pub client_secret: SecretString,
    pub scope: String,
    pub timeout: Duration,
    pub token_ttl: Duration,
}

impl GigaChatConfig {
    pub fn from_llm_config(llm: &LlmConfig) -> Result<Self, LlmError> {
        let (Some(client_id), Some(client_secret)) = (&llm.client_id, &llm.client_secret) else {
            return Err(LlmError::NotConfigured);
        };
        if !llm.has_credentials() {
            return Err(LlmError::NotConfigured);
        }

        Ok(Self {
            auth_url: llm.auth_url.clone(),
            base_url: llm.base_url.clone(),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            scope: llm.scope.clone(),
            timeout: Duration::from_secs(llm.timeout_secs),
            token_ttl: Duration::from_secs(llm.token_ttl_secs),
        })
    }
}

struct CachedToken {
    value: SecretString,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Unix epoch milliseconds.
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Chat-completions client authenticating with client credentials.
///
/// The access token is cached until the earlier of the configured TTL and the
/// expiry reported by the auth server.
pub struct GigaChatClient {
    http: reqwest::Client,
    config: GigaChatConfig,
    token: Mutex<Option<CachedToken>>,
}

impl GigaChatClient {
    pub fn new(config: GigaChatConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config, token: Mutex::new(None) })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn access_token(&self) -> Result<SecretString, LlmError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| Instant::now() < token.expires_at) {
            return Ok(token.value.clone());
        }

        let request_id = Uuid::new_v4().to_string();
        let response = self
            .http
            .post(&self.config.auth_url)
            .basic_auth(
                self.config.client_id.expose_secret(),
                Some(self.config.client_secret.expose_secret()),
            )
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header("RqUID", request_id.as_str())
            .form(&[("scope", self.config.scope.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Unauthorized(format!("token exchange returned {status}: {body}")));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|error| LlmError::InvalidResponse(format!("token response: {error}")))?;

        let mut lifetime = self.config.token_ttl;
        if let Some(server_expiry) = token.expires_at {
            let remaining_ms = server_expiry.saturating_sub(Utc::now().timestamp_millis());
            let remaining = Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0));
            lifetime = lifetime.min(remaining);
        }

        info!(
            event_name = "llm.token.refreshed",
            request_id = %request_id,
            lifetime_secs = lifetime.as_secs(),
            "llm access token refreshed"
        );

        let value = SecretString::from(token.access_token);
        *cached = Some(CachedToken { value: value.clone(), expires_at: Instant::now() + lifetime });
        Ok(value)
    }
}

#[async_trait]
impl LlmClient for GigaChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<CompletionPayload, LlmError> {
        let token = self.access_token().await?;
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "top_p": request.top_p,
        });

        debug!(event_name = "llm.completion.requested", model = %request.model, "sending completion");
        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(token.expose_secret())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Unauthorized(format!("completion returned {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let raw = response.text().await?;
        let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        CompletionPayload::from_response(value)
    }

    async fn invalidate_credentials(&self) {
        *self.token.lock().await = None;
    }
}
