use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use intentbot_core::{DialogId, MessageId, UserId};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// One platform update as delivered by the queue.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateEnvelope {
    pub event_type: String,
    pub kind: UpdateKind,
    pub data: UpdateData,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UpdateData {
    #[serde(default)]
    pub message: Option<UpdateMessage>,
    #[serde(default)]
    pub dialog: Option<Value>,
    #[serde(default)]
    pub member: Option<Value>,
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub typing: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    pub message_id: MessageId,
    pub dialog_id: DialogId,
    pub sender_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
}

impl UpdateMessage {
    /// `createdAt` as either an RFC 3339 string or epoch milliseconds.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.created_at.as_ref()?)
    }
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => {
            DateTime::parse_from_rfc3339(text).ok().map(|at| at.with_timezone(&Utc))
        }
        Value::Number(number) => Utc.timestamp_millis_opt(number.as_i64()?).single(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    #[serde(default, rename = "eventType")]
    event_type: Option<String>,
    #[serde(default)]
    data: Option<UpdateData>,
}

#[derive(Debug, Error)]
#[error("update payload is not valid json: {0}")]
pub struct EnvelopeError(#[from] serde_json::Error);

impl UpdateEnvelope {
    pub fn from_slice(body: &[u8]) -> Result<Self, EnvelopeError> {
        let raw = serde_json::from_slice::<RawUpdate>(body)?;
        let event_type = raw.event_type.unwrap_or_else(|| "unknown".to_owned());
        Ok(Self {
            kind: UpdateKind::from_event_type(&event_type),
            event_type,
            data: raw.data.unwrap_or_default(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    MessageCreate,
    MessageUpdate,
    MessageStatusUpdate,
    MessageReactionUpdate,
    DialogChange,
    DialogMemberUpdate,
    DialogTyping,
    UserChange,
    UserStatsUpdate,
    Unsupported,
}

impl UpdateKind {
    pub const KNOWN: [UpdateKind; 9] = [
        Self::MessageCreate,
        Self::MessageUpdate,
        Self::MessageStatusUpdate,
        Self::MessageReactionUpdate,
        Self::DialogChange,
        Self::DialogMemberUpdate,
        Self::DialogTyping,
        Self::UserChange,
        Self::UserStatsUpdate,
    ];

    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "message.create" => Self::MessageCreate,
            "message.update" => Self::MessageUpdate,
            "message.status.update" => Self::MessageStatusUpdate,
            "message.reaction.update" => Self::MessageReactionUpdate,
            "dialog.create" | "dialog.update" | "dialog.delete" | "dialog.member.add"
            | "dialog.member.remove" => Self::DialogChange,
            "dialog.member.update" => Self::DialogMemberUpdate,
            "dialog.typing" => Self::DialogTyping,
            "user.add" | "user.update" | "user.remove" => Self::UserChange,
            "user.stats.update" => Self::UserStatsUpdate,
            _ => Self::Unsupported,
        }
    }

    pub fn carries_message(self) -> bool {
        matches!(
            self,
            Self::MessageCreate
                | Self::MessageUpdate
                | Self::MessageStatusUpdate
                | Self::MessageReactionUpdate
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    Ignored,
}

impl HandlerResult {
    pub fn handled(&self) -> bool {
        matches!(self, Self::Processed)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("`{event_type}` update carries no message")]
    MissingMessage { event_type: String },
    #[error("`{event_type}` update carries no dialog")]
    MissingDialog { event_type: String },
    #[error("message handler failure: {0}")]
    Message(String),
    #[error("message cannot be handled: {0}")]
    Unrecoverable(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

impl DispatchError {
    /// Redelivering the same update would fail the same way.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Handler(
                EventHandlerError::MissingMessage { .. }
                    | EventHandlerError::MissingDialog { .. }
                    | EventHandlerError::Unrecoverable(_)
            )
        )
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn kind(&self) -> UpdateKind;
    async fn handle(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<UpdateKind, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.kind) else {
            debug!(
                event_name = "ingress.update.ignored",
                event_type = %envelope.event_type,
                correlation_id = %ctx.correlation_id,
                "no handler for update type"
            );
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// `message.create` handler for the orchestrator and log-only handlers for
/// every other known update kind.
pub fn default_dispatcher<S>(service: S, bot_user_id: UserId) -> EventDispatcher
where
    S: MessageService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MessageCreateHandler::new(service, bot_user_id));
    for kind in UpdateKind::KNOWN.into_iter().filter(|kind| *kind != UpdateKind::MessageCreate) {
        dispatcher.register(ActivityLogHandler::new(kind));
    }
    dispatcher
}

#[async_trait]
pub trait MessageService: Send + Sync {
    async fn handle_new_message(
        &self,
        message: &UpdateMessage,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

pub struct MessageCreateHandler<S> {
    service: S,
    bot_user_id: UserId,
}

impl<S> MessageCreateHandler<S>
where
    S: MessageService,
{
    pub fn new(service: S, bot_user_id: UserId) -> Self {
        Self { service, bot_user_id }
    }
}

#[async_trait]
impl<S> EventHandler for MessageCreateHandler<S>
where
    S: MessageService + 'static,
{
    fn kind(&self) -> UpdateKind {
        UpdateKind::MessageCreate
    }

    async fn handle(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let Some(message) = &envelope.data.message else {
            return Err(EventHandlerError::MissingMessage { event_type: envelope.event_type.clone() });
        };
        if message.sender_id == self.bot_user_id.0 {
            debug!(
                event_name = "ingress.message.own",
                correlation_id = %ctx.correlation_id,
                message_id = %message.message_id,
                "skipping the bot's own message"
            );
            return Ok(HandlerResult::Ignored);
        }

        self.service.handle_new_message(message, ctx).await
    }
}

/// Acknowledges an update kind the bot does not act on, after checking its payload.
pub struct ActivityLogHandler {
    kind: UpdateKind,
}

impl ActivityLogHandler {
    pub fn new(kind: UpdateKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl EventHandler for ActivityLogHandler {
    fn kind(&self) -> UpdateKind {
        self.kind
    }

    async fn handle(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        if self.kind.carries_message() {
            let Some(message) = &envelope.data.message else {
                return Err(EventHandlerError::MissingMessage {
                    event_type: envelope.event_type.clone(),
                });
            };
            info!(
                event_name = "ingress.message.activity",
                event_type = %envelope.event_type,
                correlation_id = %ctx.correlation_id,
                dialog_id = %message.dialog_id,
                message_id = %message.message_id,
                "message activity received"
            );
            return Ok(HandlerResult::Processed);
        }

        if self.kind == UpdateKind::DialogChange && envelope.data.dialog.is_none() {
            return Err(EventHandlerError::MissingDialog { event_type: envelope.event_type.clone() });
        }
        info!(
            event_name = "ingress.update.activity",
            event_type = %envelope.event_type,
            correlation_id = %ctx.correlation_id,
            "update received"
        );
        Ok(HandlerResult::Processed)
    }
}
