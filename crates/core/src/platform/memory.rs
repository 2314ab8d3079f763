use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use super::{
    DialogMessage, DialogPlatform, MetaEntry, MetaFilter, MetaMap, MetaScope, MetadataStore,
    PlatformError, SentMessage, UserDirectory, UserLookup,
};
use crate::domain::dialog::{DialogId, MessageId, UserId};

/// Process-local platform with failure injection.
///
/// Message timestamps come from a synthetic clock advancing one second per
/// message, so ordering is deterministic.
#[derive(Default)]
pub struct InMemoryPlatform {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    messages: Vec<DialogMessage>,
    dialog_meta: HashMap<String, MetaMap>,
    message_meta: HashMap<String, MetaMap>,
    users: HashSet<String>,
    sequence: i64,
    fail_reads: bool,
    fail_writes: bool,
    fail_sends: bool,
    send_without_echo: bool,
}

impl State {
    fn next_timestamp(&mut self) -> (i64, DateTime<Utc>) {
        self.sequence += 1;
        let base = Utc.timestamp_opt(1_730_000_000, 0).single().unwrap_or_else(Utc::now);
        (self.sequence, base + Duration::seconds(self.sequence))
    }

    fn push_message(&mut self, dialog_id: &DialogId, sender_id: &str, content: &str) -> MessageId {
        let (sequence, created_at) = self.next_timestamp();
        let message_id = MessageId(format!("msg_{sequence}"));
        self.messages.push(DialogMessage {
            message_id: message_id.clone(),
            dialog_id: dialog_id.clone(),
            sender_id: sender_id.to_owned(),
            content: content.to_owned(),
            created_at: Some(created_at),
            message_type: Some("internal.text".to_owned()),
            meta: MetaMap::new(),
        });
        message_id
    }

    fn with_meta(&self, message: &DialogMessage) -> DialogMessage {
        let mut message = message.clone();
        message.meta = self.message_meta.get(&message.message_id.0).cloned().unwrap_or_default();
        message
    }
}

fn injected(operation: &str) -> PlatformError {
    PlatformError::Transport(format!("injected {operation} failure"))
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Appends a message as if a participant had posted it.
    pub fn post(&self, dialog_id: &DialogId, sender_id: &str, content: &str) -> MessageId {
        self.state().push_message(dialog_id, sender_id, content)
    }

    pub fn messages(&self, dialog_id: &DialogId) -> Vec<DialogMessage> {
        let state = self.state();
        state
            .messages
            .iter()
            .filter(|message| &message.dialog_id == dialog_id)
            .map(|message| state.with_meta(message))
            .collect()
    }

    pub fn messages_from(&self, dialog_id: &DialogId, sender_id: &str) -> Vec<DialogMessage> {
        self.messages(dialog_id).into_iter().filter(|message| message.sender_id == sender_id).collect()
    }

    pub fn dialog_meta(&self, dialog_id: &DialogId) -> MetaMap {
        self.state().dialog_meta.get(&dialog_id.0).cloned().unwrap_or_default()
    }

    pub fn message_meta(&self, message_id: &MessageId) -> MetaMap {
        self.state().message_meta.get(&message_id.0).cloned().unwrap_or_default()
    }

    pub fn add_user(&self, user_id: &UserId) {
        self.state().users.insert(user_id.0.clone());
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    pub fn send_without_echo(&self, enabled: bool) {
        self.state().send_without_echo = enabled;
    }
}

#[async_trait]
impl MetadataStore for InMemoryPlatform {
    async fn get_meta(&self, scope: MetaScope, entity_id: &str) -> Result<MetaMap, PlatformError> {
        let state = self.state();
        if state.fail_reads {
            return Err(injected("read"));
        }
        let map = match scope {
            MetaScope::Dialog => &state.dialog_meta,
            MetaScope::Message => &state.message_meta,
        };
        Ok(map.get(entity_id).cloned().unwrap_or_default())
    }

    async fn set_meta(
        &self,
        scope: MetaScope,
        entity_id: &str,
        key: &str,
        entry: MetaEntry,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(injected("write"));
        }
        let map = match scope {
            MetaScope::Dialog => &mut state.dialog_meta,
            MetaScope::Message => &mut state.message_meta,
        };
        map.entry(entity_id.to_owned()).or_default().insert(key.to_owned(), entry);
        Ok(())
    }
}

#[async_trait]
impl DialogPlatform for InMemoryPlatform {
    async fn recent_messages(
        &self,
        dialog_id: &DialogId,
        limit: usize,
    ) -> Result<Vec<DialogMessage>, PlatformError> {
        if self.state().fail_reads {
            return Err(injected("read"));
        }
        let mut messages = self.messages(dialog_id);
        messages.reverse();
        messages.truncate(limit);
        Ok(messages)
    }

    async fn messages_by_meta(
        &self,
        dialog_id: &DialogId,
        filter: &MetaFilter,
        limit: usize,
    ) -> Result<Vec<DialogMessage>, PlatformError> {
        if self.state().fail_reads {
            return Err(injected("read"));
        }
        Ok(self
            .messages(dialog_id)
            .into_iter()
            .filter(|message| filter.matches(&message.meta))
            .take(limit)
            .collect())
    }

    async fn send_message(
        &self,
        dialog_id: &DialogId,
        sender_id: &UserId,
        content: &str,
    ) -> Result<SentMessage, PlatformError> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(injected("send"));
        }
        let message_id = state.push_message(dialog_id, &sender_id.0, content);
        let message_id = (!state.send_without_echo).then_some(message_id);
        Ok(SentMessage { message_id })
    }
}

#[async_trait]
impl UserDirectory for InMemoryPlatform {
    async fn find_or_create_user(&self, user_id: &UserId, _display_name: &str) -> UserLookup {
        let mut state = self.state();
        if state.users.contains(&user_id.0) {
            return UserLookup::Found;
        }
        if state.fail_writes {
            return UserLookup::Failed("injected write failure".to_owned());
        }
        state.users.insert(user_id.0.clone());
        UserLookup::Created
    }
}
