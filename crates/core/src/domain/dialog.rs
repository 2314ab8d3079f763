use std::fmt;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Identifier of one clarification session inside a dialog.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Builds `conv_<dialog>_<millis>_<suffix>`; unique per dialog and per session.
    pub fn generate(dialog_id: &DialogId, now: DateTime<Utc>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(7)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect();
        Self(format!("conv_{}_{}_{suffix}", dialog_id.0, now.timestamp_millis()))
    }
}

macro_rules! display_newtype {
    ($($name:ident),*) => {
        $(impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_newtype!(DialogId, MessageId, UserId, SessionId);

/// Per-dialog state assembled from independent metadata keys.
///
/// The keys are read without any atomicity guarantee: two consumers working
/// the same dialog may observe each other's partial writes. Treat the value as
/// eventually consistent; last writer wins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogState {
    pub category: Option<String>,
    pub bot_handling: bool,
    pub last_intent: Option<String>,
    pub conversation_id: Option<SessionId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnTags {
    pub is_bot_question: bool,
    pub is_user_response_in_session: bool,
    pub related_intent: Option<String>,
    pub session_id: Option<SessionId>,
}

/// A dialog message as the classifier sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub message_id: MessageId,
    pub sender_id: String,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: TurnTags,
}

/// Merges tagged turn sets by message id and orders them oldest first.
///
/// Turns without a timestamp sort before timestamped ones; ties keep the
/// order in which the ids were first seen.
pub fn merge_turns<I>(sets: I) -> Vec<ConversationTurn>
where
    I: IntoIterator<Item = Vec<ConversationTurn>>,
{
    let mut seen = std::collections::HashSet::new();
    let mut merged: Vec<ConversationTurn> = sets
        .into_iter()
        .flatten()
        .filter(|turn| seen.insert(turn.message_id.clone()))
        .collect();
    merged.sort_by_key(|turn| turn.created_at);
    merged
}

/// Sorts raw history oldest first and keeps the newest `limit` turns.
pub fn recent_window(mut turns: Vec<ConversationTurn>, limit: usize) -> Vec<ConversationTurn> {
    turns.sort_by_key(|turn| turn.created_at);
    let skip = turns.len().saturating_sub(limit);
    turns.into_iter().skip(skip).collect()
}
