use std::time::Duration;

use async_trait::async_trait;
use intentbot_core::config::PlatformConfig;
use intentbot_core::platform::{
    DialogMessage, DialogPlatform, MetaEntry, MetaFilter, MetaMap, MetaScope, MetadataStore,
    PlatformError, SentMessage, UserDirectory, UserLookup,
};
use intentbot_core::{DialogId, MessageId, UserId};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::events::parse_timestamp;

const MESSAGE_TYPE: &str = "internal.text";

#[derive(Clone, Debug)]
pub struct PlatformClientConfig {
    pub api_url: String,
    pub api_key: SecretString,
    pub tenant_id: String,
    pub timeout: Duration,
}

impl PlatformClientConfig {
    pub fn from_config(platform: &PlatformConfig) -> Self {
        Self {
            api_url: platform.api_url.clone(),
            api_key: platform.api_key.clone(),
            tenant_id: platform.tenant_id.clone(),
            timeout: Duration::from_secs(platform.timeout_secs),
        }
    }
}

/// HTTP adapter for the conversation platform.
pub struct PlatformClient {
    http: reqwest::Client,
    config: PlatformClientConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    message_id: MessageId,
    #[serde(default)]
    dialog_id: Option<DialogId>,
    #[serde(default)]
    sender_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default, rename = "type")]
    message_type: Option<String>,
    #[serde(default)]
    meta: Option<Value>,
}

impl WireMessage {
    fn into_message(self, fallback_dialog: &DialogId) -> DialogMessage {
        DialogMessage {
            message_id: self.message_id,
            dialog_id: self.dialog_id.unwrap_or_else(|| fallback_dialog.clone()),
            sender_id: self.sender_id,
            content: self.content,
            created_at: self.created_at.as_ref().and_then(parse_timestamp),
            message_type: self.message_type,
            meta: self.meta.map(meta_map).unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedMessage {
    #[serde(default)]
    message_id: Option<MessageId>,
}

impl PlatformClient {
    pub fn new(config: PlatformClientConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| PlatformError::Transport(error.to_string()))?;
        Ok(Self { http, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        self.http
            .request(method, url)
            .header("X-API-Key", self.config.api_key.expose_secret())
            .header("X-Tenant-ID", self.config.tenant_id.as_str())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PlatformError> {
        let response =
            request.send().await.map_err(|error| PlatformError::Transport(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Status { status: status.as_u16(), body })
    }

    async fn fetch<T>(&self, request: RequestBuilder) -> Result<T, PlatformError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(request).await?;
        let text =
            response.text().await.map_err(|error| PlatformError::Decode(error.to_string()))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|error| PlatformError::Decode(error.to_string()))?
        };
        serde_json::from_value(unwrap_data(body))
            .map_err(|error| PlatformError::Decode(error.to_string()))
    }

    /// Read-only lookup; a `404` means the user is absent.
    pub async fn user_exists(&self, user_id: &UserId) -> Result<bool, PlatformError> {
        match self.send(self.request(Method::GET, &format!("users/{}", user_id.0))).await {
            Ok(_) => Ok(true),
            Err(PlatformError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    async fn messages(
        &self,
        dialog_id: &DialogId,
        query: Vec<(String, String)>,
    ) -> Result<Vec<DialogMessage>, PlatformError> {
        let request = self
            .request(Method::GET, &format!("dialogs/{}/messages", dialog_id.0))
            .query(&query);
        let messages = self.fetch::<Vec<WireMessage>>(request).await?;
        Ok(messages.into_iter().map(|message| message.into_message(dialog_id)).collect())
    }
}

/// Accepts both `{ "data": ... }` envelopes and bare bodies.
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut object) if object.contains_key("data") => {
            object.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Metadata values arrive either as `{ value, dataType }` entries or bare values.
fn meta_map(raw: Value) -> MetaMap {
    let Value::Object(object) = raw else {
        return MetaMap::new();
    };
    object
        .into_iter()
        .map(|(key, value)| {
            let entry = match value {
                Value::Object(fields) if fields.contains_key("value") => {
                    let value = Value::Object(fields);
                    serde_json::from_value::<MetaEntry>(value.clone())
                        .unwrap_or(MetaEntry { value, data_type: None })
                }
                bare => MetaEntry { value: bare, data_type: None },
            };
            (key, entry)
        })
        .collect()
}

#[async_trait]
impl MetadataStore for PlatformClient {
    async fn get_meta(&self, scope: MetaScope, entity_id: &str) -> Result<MetaMap, PlatformError> {
        let request = self.request(Method::GET, &format!("meta/{}/{entity_id}", scope.as_str()));
        match self.fetch::<Value>(request).await {
            Ok(raw) => Ok(meta_map(raw)),
            Err(PlatformError::Status { status: 404, .. }) => Ok(MetaMap::new()),
            Err(error) => Err(error),
        }
    }

    async fn set_meta(
        &self,
        scope: MetaScope,
        entity_id: &str,
        key: &str,
        entry: MetaEntry,
    ) -> Result<(), PlatformError> {
        let request = self
            .request(Method::PUT, &format!("meta/{}/{entity_id}/{key}", scope.as_str()))
            .json(&entry);
        self.send(request).await?;
        debug!(
            event_name = "platform.meta.written",
            scope = scope.as_str(),
            entity_id,
            key,
            "metadata written"
        );
        Ok(())
    }
}

#[async_trait]
impl DialogPlatform for PlatformClient {
    async fn recent_messages(
        &self,
        dialog_id: &DialogId,
        limit: usize,
    ) -> Result<Vec<DialogMessage>, PlatformError> {
        let query = vec![
            ("limit".to_owned(), limit.to_string()),
            ("sort".to_owned(), "-createdAt".to_owned()),
        ];
        self.messages(dialog_id, query).await
    }

    async fn messages_by_meta(
        &self,
        dialog_id: &DialogId,
        filter: &MetaFilter,
        limit: usize,
    ) -> Result<Vec<DialogMessage>, PlatformError> {
        let mut query = vec![("limit".to_owned(), limit.to_string())];
        query.extend(
            filter.conditions().iter().map(|(key, value)| (format!("meta.{key}"), value.clone())),
        );
        self.messages(dialog_id, query).await
    }

    async fn send_message(
        &self,
        dialog_id: &DialogId,
        sender_id: &UserId,
        content: &str,
    ) -> Result<SentMessage, PlatformError> {
        let request = self
            .request(Method::POST, &format!("dialogs/{}/messages", dialog_id.0))
            .json(&json!({ "senderId": sender_id.0, "type": MESSAGE_TYPE, "content": content }));
        let created = self.fetch::<Option<CreatedMessage>>(request).await?;
        Ok(SentMessage { message_id: created.and_then(|created| created.message_id) })
    }
}

#[async_trait]
impl UserDirectory for PlatformClient {
    async fn find_or_create_user(&self, user_id: &UserId, display_name: &str) -> UserLookup {
        match self.user_exists(user_id).await {
            Ok(true) => return UserLookup::Found,
            Ok(false) => {}
            Err(error) => {
                warn!(
                    event_name = "platform.user.lookup_failed",
                    user_id = %user_id,
                    error = %error,
                    "user lookup failed"
                );
                return UserLookup::Failed(error.to_string());
            }
        }

        let create = self
            .request(Method::POST, "users")
            .json(&json!({ "userId": user_id.0, "name": display_name, "type": "bot" }));
        match self.send(create).await {
            Ok(_) => {
                info!(event_name = "platform.user.created", user_id = %user_id, "bot user created");
                UserLookup::Created
            }
            Err(error) => UserLookup::Failed(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use intentbot_core::platform::{
        DialogPlatform, MetaEntry, MetaFilter, MetaScope, MetadataStore, PlatformError,
        UserDirectory, UserLookup,
    };
    use intentbot_core::{DialogId, MessageId, UserId};
    use serde_json::json;

    use super::{PlatformClient, PlatformClientConfig};

    fn client(server: &MockServer) -> PlatformClient {
        PlatformClient::new(PlatformClientConfig {
            api_url: server.url("/api"),
            api_key: "platform-key".to_owned().into(),
            tenant_id: "tnt_default".to_owned(),
            timeout: Duration::from_secs(5),
        })
        .expect("client builds")
    }

    fn dialog() -> DialogId {
        DialogId("dlg_1".to_owned())
    }

    #[tokio::test]
    async fn meta_reads_accept_wrapped_entries_and_bare_values() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/meta/dialog/dlg_1")
                .header("X-API-Key", "platform-key")
                .header("X-Tenant-ID", "tnt_default");
            then.status(200).json_body(json!({
                "data": {
                    "category": { "value": "support_billing", "dataType": "string" },
                    "botHandling": true
                }
            }));
        });

        let meta = client(&server).get_meta(MetaScope::Dialog, "dlg_1").await.expect("meta");

        mock.assert();
        assert_eq!(meta.get("category").and_then(MetaEntry::as_text).as_deref(), Some("support_billing"));
        assert!(meta.get("botHandling").is_some_and(MetaEntry::as_bool));
    }

    #[tokio::test]
    async fn missing_meta_reads_as_empty() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/meta/message/msg_9");
            then.status(404);
        });

        let meta = client(&server).get_meta(MetaScope::Message, "msg_9").await.expect("meta");

        assert!(meta.is_empty());
    }

    #[tokio::test]
    async fn meta_writes_put_typed_entries() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/api/meta/message/msg_1/botQuestion")
                .json_body(json!({ "value": true, "dataType": "boolean" }));
            then.status(204);
        });

        client(&server)
            .set_meta(MetaScope::Message, "msg_1", "botQuestion", MetaEntry::boolean(true))
            .await
            .expect("write succeeds");

        mock.assert();
    }

    #[tokio::test]
    async fn failed_writes_surface_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/api/meta/dialog/dlg_1/category");
            then.status(500).body("boom");
        });

        let error = client(&server)
            .set_meta(MetaScope::Dialog, "dlg_1", "category", MetaEntry::string("support_general"))
            .await
            .expect_err("write fails");

        assert_eq!(error, PlatformError::Status { status: 500, body: "boom".to_owned() });
    }

    #[tokio::test]
    async fn tagged_messages_are_queried_by_meta() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/dialogs/dlg_1/messages")
                .query_param("limit", "50")
                .query_param("meta.botQuestion", "true")
                .query_param("meta.botConversationId", "conv_1");
            then.status(200).json_body(json!([
                {
                    "messageId": "msg_2",
                    "senderId": "bot_helper",
                    "content": "На каком устройстве?",
                    "createdAt": "2025-01-15T10:00:05Z",
                    "meta": { "botQuestion": { "value": true, "dataType": "boolean" } }
                }
            ]));
        });
        let filter = MetaFilter::new().with("botQuestion", "true").with("botConversationId", "conv_1");

        let messages =
            client(&server).messages_by_meta(&dialog(), &filter, 50).await.expect("messages");

        mock.assert();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].dialog_id, dialog());
        assert!(messages[0].created_at.is_some());
        assert!(messages[0].meta.get("botQuestion").is_some_and(MetaEntry::as_bool));
    }

    #[tokio::test]
    async fn recent_history_is_requested_newest_first() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/dialogs/dlg_1/messages")
                .query_param("limit", "10")
                .query_param("sort", "-createdAt");
            then.status(200).json_body(json!({ "data": [] }));
        });

        let messages = client(&server).recent_messages(&dialog(), 10).await.expect("messages");

        mock.assert();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn sent_message_id_is_echoed() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/dialogs/dlg_1/messages")
                .json_body(json!({ "senderId": "bot_helper", "type": "internal.text", "content": "Привет" }));
            then.status(201).json_body(json!({ "data": { "messageId": "msg_3" } }));
        });

        let sent = client(&server)
            .send_message(&dialog(), &UserId("bot_helper".to_owned()), "Привет")
            .await
            .expect("sent");

        mock.assert();
        assert_eq!(sent.message_id, Some(MessageId("msg_3".to_owned())));
    }

    #[tokio::test]
    async fn missing_bot_user_is_created() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/users/bot_helper");
            then.status(404);
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/api/users")
                .json_body(json!({ "userId": "bot_helper", "name": "Helper Bot", "type": "bot" }));
            then.status(201).json_body(json!({ "data": { "userId": "bot_helper" } }));
        });

        let lookup = client(&server)
            .find_or_create_user(&UserId("bot_helper".to_owned()), "Helper Bot")
            .await;

        create.assert();
        assert_eq!(lookup, UserLookup::Created);
    }

    #[tokio::test]
    async fn existing_user_is_found_and_errors_are_tagged() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/users/bot_helper");
            then.status(200).json_body(json!({ "userId": "bot_helper" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/users/broken");
            then.status(503);
        });

        let found = client(&server).find_or_create_user(&UserId("bot_helper".to_owned()), "Bot").await;
        let failed = client(&server).find_or_create_user(&UserId("broken".to_owned()), "Bot").await;

        assert_eq!(found, UserLookup::Found);
        assert!(matches!(failed, UserLookup::Failed(reason) if reason.contains("503")));
    }
}
