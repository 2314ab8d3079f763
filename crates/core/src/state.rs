use std::sync::Arc;

use tracing::warn;

use crate::domain::dialog::{
    merge_turns, recent_window, ConversationTurn, DialogId, DialogState, MessageId, SessionId,
    TurnTags, UserId,
};
use crate::platform::{
    DialogMessage, DialogPlatform, MetaEntry, MetaFilter, MetaMap, MetaScope, PlatformError,
};

pub mod keys {
    pub const CATEGORY: &str = "category";
    pub const BOT_HANDLING: &str = "botHandling";
    pub const LAST_INTENT: &str = "lastIntent";
    pub const CONVERSATION_ID: &str = "botConversationId";

    pub const BOT_QUESTION: &str = "botQuestion";
    pub const QUESTION_TYPE: &str = "questionType";
    pub const RELATED_INTENT: &str = "relatedIntent";
    pub const DIALOG_RESPONSE: &str = "botDialogResponse";

    pub const MISSING_FIELD_QUESTION: &str = "missing_field";
}

/// Upper bound on tagged messages fetched per metadata query.
pub const TAGGED_MESSAGE_LIMIT: usize = 50;

/// How far back a just-sent message is searched for when the send returned no id.
const SENT_LOOKUP_LIMIT: usize = 10;

/// A metadata write that did not land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteFailure {
    pub scope: MetaScope,
    pub entity_id: String,
    pub key: String,
    pub error: PlatformError,
}

/// Typed view of dialog and message metadata.
///
/// Reads never fail: an unreachable store reads as "nothing recorded yet".
/// Writes report their failure to the caller and never roll anything back.
#[derive(Clone)]
pub struct ConversationStateStore {
    platform: Arc<dyn DialogPlatform>,
}

impl ConversationStateStore {
    pub fn new(platform: Arc<dyn DialogPlatform>) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &Arc<dyn DialogPlatform> {
        &self.platform
    }

    pub async fn dialog_state(&self, dialog_id: &DialogId) -> DialogState {
        match self.platform.get_meta(MetaScope::Dialog, &dialog_id.0).await {
            Ok(meta) => dialog_state_from_meta(&meta),
            Err(error) => {
                warn!(
                    event_name = "state.dialog.read_failed",
                    dialog_id = %dialog_id,
                    error = %error,
                    "dialog metadata unavailable, treating as empty"
                );
                DialogState::default()
            }
        }
    }

    pub async fn set_category(&self, dialog_id: &DialogId, intent: &str) -> Result<(), WriteFailure> {
        self.write(MetaScope::Dialog, &dialog_id.0, keys::CATEGORY, MetaEntry::string(intent)).await
    }

    pub async fn set_last_intent(
        &self,
        dialog_id: &DialogId,
        intent: &str,
    ) -> Result<(), WriteFailure> {
        self.write(MetaScope::Dialog, &dialog_id.0, keys::LAST_INTENT, MetaEntry::string(intent))
            .await
    }

    pub async fn set_bot_handling(
        &self,
        dialog_id: &DialogId,
        handling: bool,
    ) -> Result<(), WriteFailure> {
        self.write(MetaScope::Dialog, &dialog_id.0, keys::BOT_HANDLING, MetaEntry::boolean(handling))
            .await
    }

    pub async fn set_session_id(
        &self,
        dialog_id: &DialogId,
        session_id: &SessionId,
    ) -> Result<(), WriteFailure> {
        self.write(
            MetaScope::Dialog,
            &dialog_id.0,
            keys::CONVERSATION_ID,
            MetaEntry::string(session_id.0.clone()),
        )
        .await
    }

    /// Tags an outbound bot question. Stops at the first failed write.
    pub async fn tag_bot_question(
        &self,
        message_id: &MessageId,
        intent: &str,
        session_id: &SessionId,
    ) -> Result<(), WriteFailure> {
        let tags = [
            (keys::BOT_QUESTION, MetaEntry::boolean(true)),
            (keys::QUESTION_TYPE, MetaEntry::string(keys::MISSING_FIELD_QUESTION)),
            (keys::RELATED_INTENT, MetaEntry::string(intent)),
            (keys::CONVERSATION_ID, MetaEntry::string(session_id.0.clone())),
        ];
        for (key, entry) in tags {
            self.write(MetaScope::Message, &message_id.0, key, entry).await?;
        }
        Ok(())
    }

    /// Marks an inbound user message as an answer within the session.
    pub async fn tag_user_reply(
        &self,
        message_id: &MessageId,
        session_id: &SessionId,
    ) -> Result<(), WriteFailure> {
        self.write(MetaScope::Message, &message_id.0, keys::DIALOG_RESPONSE, MetaEntry::boolean(true))
            .await?;
        self.write(
            MetaScope::Message,
            &message_id.0,
            keys::CONVERSATION_ID,
            MetaEntry::string(session_id.0.clone()),
        )
        .await
    }

    /// Bot questions already asked in the dialog, across all sessions.
    pub async fn bot_question_count(&self, dialog_id: &DialogId) -> usize {
        let filter = MetaFilter::new().with(keys::BOT_QUESTION, "true");
        match self.platform.messages_by_meta(dialog_id, &filter, TAGGED_MESSAGE_LIMIT).await {
            Ok(messages) => messages.len(),
            Err(error) => {
                warn!(
                    event_name = "state.questions.read_failed",
                    dialog_id = %dialog_id,
                    error = %error,
                    "question count unavailable, treating as zero"
                );
                0
            }
        }
    }

    /// Newest message from `sender_id` with exactly `content`. Used when the
    /// platform accepted a send without returning the new message id.
    pub async fn find_sent_message(
        &self,
        dialog_id: &DialogId,
        sender_id: &UserId,
        content: &str,
    ) -> Option<MessageId> {
        match self.platform.recent_messages(dialog_id, SENT_LOOKUP_LIMIT).await {
            Ok(messages) => messages
                .into_iter()
                .filter(|message| message.sender_id == sender_id.0 && message.content == content)
                .max_by_key(|message| message.created_at)
                .map(|message| message.message_id),
            Err(error) => {
                warn!(
                    event_name = "state.sent_lookup.read_failed",
                    dialog_id = %dialog_id,
                    error = %error,
                    "could not look up the sent message"
                );
                None
            }
        }
    }

    /// Bot questions and user replies tagged with `session_id`, oldest first.
    pub async fn session_turns(
        &self,
        dialog_id: &DialogId,
        session_id: &SessionId,
    ) -> Vec<ConversationTurn> {
        let questions = MetaFilter::new()
            .with(keys::BOT_QUESTION, "true")
            .with(keys::CONVERSATION_ID, session_id.0.clone());
        let replies = MetaFilter::new()
            .with(keys::DIALOG_RESPONSE, "true")
            .with(keys::CONVERSATION_ID, session_id.0.clone());

        let mut sets = Vec::with_capacity(2);
        for filter in [questions, replies] {
            sets.push(self.tagged_turns(dialog_id, &filter).await);
        }
        merge_turns(sets)
    }

    /// Newest `limit` raw dialog turns, oldest first.
    pub async fn recent_turns(&self, dialog_id: &DialogId, limit: usize) -> Vec<ConversationTurn> {
        match self.platform.recent_messages(dialog_id, limit).await {
            Ok(messages) => recent_window(messages.into_iter().map(turn_from_message).collect(), limit),
            Err(error) => {
                warn!(
                    event_name = "state.history.read_failed",
                    dialog_id = %dialog_id,
                    error = %error,
                    "dialog history unavailable, classifying without context"
                );
                Vec::new()
            }
        }
    }

    async fn tagged_turns(&self, dialog_id: &DialogId, filter: &MetaFilter) -> Vec<ConversationTurn> {
        match self.platform.messages_by_meta(dialog_id, filter, TAGGED_MESSAGE_LIMIT).await {
            Ok(messages) => messages.into_iter().map(turn_from_message).collect(),
            Err(error) => {
                warn!(
                    event_name = "state.session.read_failed",
                    dialog_id = %dialog_id,
                    error = %error,
                    "session turns unavailable"
                );
                Vec::new()
            }
        }
    }

    async fn write(
        &self,
        scope: MetaScope,
        entity_id: &str,
        key: &str,
        entry: MetaEntry,
    ) -> Result<(), WriteFailure> {
        self.platform.set_meta(scope, entity_id, key, entry).await.map_err(|error| {
            warn!(
                event_name = "state.write_failed",
                scope = scope.as_str(),
                entity_id,
                key,
                error = %error,
                "metadata write failed"
            );
            WriteFailure { scope, entity_id: entity_id.to_owned(), key: key.to_owned(), error }
        })
    }
}

fn text(meta: &MetaMap, key: &str) -> Option<String> {
    meta.get(key).and_then(MetaEntry::as_text).filter(|value| !value.trim().is_empty())
}

fn flag(meta: &MetaMap, key: &str) -> bool {
    meta.get(key).is_some_and(MetaEntry::as_bool)
}

pub fn dialog_state_from_meta(meta: &MetaMap) -> DialogState {
    DialogState {
        category: text(meta, keys::CATEGORY),
        bot_handling: flag(meta, keys::BOT_HANDLING),
        last_intent: text(meta, keys::LAST_INTENT),
        conversation_id: text(meta, keys::CONVERSATION_ID).map(SessionId),
    }
}

pub fn turn_from_message(message: DialogMessage) -> ConversationTurn {
    let tags = TurnTags {
        is_bot_question: flag(&message.meta, keys::BOT_QUESTION),
        is_user_response_in_session: flag(&message.meta, keys::DIALOG_RESPONSE),
        related_intent: text(&message.meta, keys::RELATED_INTENT),
        session_id: text(&message.meta, keys::CONVERSATION_ID).map(SessionId),
    };
    ConversationTurn {
        message_id: message.message_id,
        sender_id: message.sender_id,
        content: message.content,
        created_at: message.created_at,
        tags,
    }
}
