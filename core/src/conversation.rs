use crate::api::{MessageRecord, SessionDetail, SessionSummary};
use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

impl LocalId {
    pub fn next() -> Self {
        Self(NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// Server-assigned identifier. The backend emits UUID strings; numeric ids
/// are accepted and kept in their decimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DurableId(String);

impl DurableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DurableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DurableId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for DurableId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DurableId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Number(number) => Self(number.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Local(LocalId),
    Durable(DurableId),
}

impl MessageId {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local-{}", id.0),
            Self::Durable(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey(LocalId);

impl ConversationKey {
    fn next() -> Self {
        Self(LocalId::next())
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conversation-{}", self.0 .0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Loading,
    Streaming,
    Completed,
    Error,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }

    /// `loading -> streaming -> {completed | error}`, plus the direct
    /// `loading -> error` edge and `loading -> completed` for a reply that
    /// finished without any fragment. Terminal states are final.
    pub fn can_transition_to(self, next: Self) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Loading, Streaming)
                | (Loading, Completed)
                | (Loading, Error)
                | (Streaming, Streaming)
                | (Streaming, Completed)
                | (Streaming, Error)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rating(u8);

impl Rating {
    pub fn new(score: u8) -> Result<Self> {
        if (1..=5).contains(&score) {
            Ok(Self(score))
        } else {
            Err(ClientError::InvalidRating(score))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub rating: Option<Rating>,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::Local(LocalId::next()),
            role: Role::User,
            content: content.into(),
            status: MessageStatus::Completed,
            rating: None,
            created_at: Utc::now(),
            error: None,
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::Local(LocalId::next()),
            role: Role::Assistant,
            content: String::new(),
            status: MessageStatus::Loading,
            rating: None,
            created_at: Utc::now(),
            error: None,
        }
    }

    pub fn from_record(record: MessageRecord) -> Self {
        Self {
            id: MessageId::Durable(record.id),
            role: record.role,
            content: record.content,
            status: MessageStatus::Completed,
            rating: record.rating.and_then(|score| Rating::new(score).ok()),
            created_at: record.created_at.unwrap_or_else(Utc::now),
            error: None,
        }
    }

    pub fn transition(&mut self, next: MessageStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if !self.transition(MessageStatus::Error) {
            return false;
        }
        self.error = Some(reason.into());
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub key: ConversationKey,
    pub id: Option<DurableId>,
    pub title: String,
    pub is_pinned: bool,
    pub is_archived: bool,
    pub is_public: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub message_count: usize,
    pub preview: Option<String>,
    pub messages: Vec<Message>,
}

impl Conversation {
    fn draft() -> Self {
        Self {
            key: ConversationKey::next(),
            id: None,
            title: "New chat".to_string(),
            is_pinned: false,
            is_archived: false,
            is_public: false,
            created_at: None,
            updated_at: None,
            message_count: 0,
            preview: None,
            messages: Vec::new(),
        }
    }

    fn with_id(id: DurableId) -> Self {
        Self {
            id: Some(id),
            ..Self::draft()
        }
    }

    fn apply_summary(&mut self, summary: SessionSummary) {
        self.id = Some(summary.id);
        self.title = summary.title;
        self.is_pinned = summary.is_pinned;
        self.is_archived = summary.is_archived;
        self.is_public = summary.is_public;
        self.created_at = summary.created_at;
        self.updated_at = summary.updated_at;
        self.message_count = summary.message_count;
        self.preview = summary.last_message_preview;
    }

    fn apply_detail(&mut self, detail: SessionDetail) {
        self.id = Some(detail.id);
        self.title = detail.title;
        self.is_pinned = detail.is_pinned;
        self.is_archived = detail.is_archived;
        self.is_public = detail.is_public;
        self.created_at = detail.created_at;
        self.updated_at = detail.updated_at;
        self.messages = detail.messages.into_iter().map(Message::from_record).collect();
        self.message_count = self.messages.len();
        self.preview = self.messages.last().map(|message| message.content.clone());
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn has_pending_reply(&self) -> bool {
        self.messages.iter().any(|message| message.status.is_pending())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ConversationAdded(ConversationKey),
    ConversationUpdated(ConversationKey),
    ConversationRemoved(ConversationKey),
    MessageAppended {
        conversation: ConversationKey,
        message: MessageId,
    },
    MessageUpdated {
        conversation: ConversationKey,
        message: MessageId,
    },
    MessagesReplaced(ConversationKey),
}

#[derive(Default)]
struct Inner {
    conversations: Vec<Conversation>,
    sending: HashSet<ConversationKey>,
}

impl Inner {
    fn get_mut(&mut self, key: ConversationKey) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.key == key)
    }

    fn key_for(&self, id: &DurableId) -> Option<ConversationKey> {
        self.conversations
            .iter()
            .find(|c| c.id.as_ref() == Some(id))
            .map(|c| c.key)
    }
}

/// Conversations and their messages, shared by the pipeline and any view.
/// Every mutation is announced on a broadcast channel; dropping a receiver
/// unsubscribes it.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn create_draft(&self) -> ConversationKey {
        let draft = Conversation::draft();
        let key = draft.key;
        self.inner.write().conversations.insert(0, draft);
        self.emit(StoreEvent::ConversationAdded(key));
        key
    }

    pub fn key_for(&self, id: &DurableId) -> Option<ConversationKey> {
        self.inner.read().key_for(id)
    }

    pub fn ensure(&self, id: &DurableId) -> ConversationKey {
        if let Some(key) = self.key_for(id) {
            return key;
        }
        let key = {
            let mut inner = self.inner.write();
            if let Some(key) = inner.key_for(id) {
                return key;
            }
            let conversation = Conversation::with_id(id.clone());
            let key = conversation.key;
            inner.conversations.insert(0, conversation);
            key
        };
        self.emit(StoreEvent::ConversationAdded(key));
        key
    }

    pub fn get(&self, key: ConversationKey) -> Option<Conversation> {
        self.inner
            .read()
            .conversations
            .iter()
            .find(|c| c.key == key)
            .cloned()
    }

    pub fn find(&self, id: &DurableId) -> Option<Conversation> {
        self.inner
            .read()
            .conversations
            .iter()
            .find(|c| c.id.as_ref() == Some(id))
            .cloned()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.sorted(|c| !c.is_archived)
    }

    pub fn archived(&self) -> Vec<Conversation> {
        self.sorted(|c| c.is_archived)
    }

    fn sorted(&self, filter: impl Fn(&Conversation) -> bool) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self
            .inner
            .read()
            .conversations
            .iter()
            .filter(|c| filter(c))
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        list
    }

    pub fn is_sending(&self, key: ConversationKey) -> bool {
        self.inner.read().sending.contains(&key)
    }

    /// Claims the per-conversation send lock. The lock is released when the
    /// returned guard is dropped, on every exit path.
    pub fn try_begin_send(&self, key: ConversationKey) -> Result<SendGuard> {
        let mut inner = self.inner.write();
        if !inner.sending.insert(key) {
            return Err(ClientError::ConversationLockHeld);
        }
        Ok(SendGuard {
            store: self.clone(),
            key,
        })
    }

    pub fn append_messages(&self, key: ConversationKey, messages: Vec<Message>) -> Result<()> {
        let ids: Vec<MessageId> = {
            let mut inner = self.inner.write();
            let conversation = inner
                .get_mut(key)
                .ok_or_else(|| ClientError::UnknownConversation(key.to_string()))?;
            let ids = messages.iter().map(|m| m.id.clone()).collect();
            conversation.messages.extend(messages);
            conversation.message_count = conversation.messages.len();
            conversation.updated_at = Some(Utc::now());
            ids
        };
        for message in ids {
            self.emit(StoreEvent::MessageAppended {
                conversation: key,
                message,
            });
        }
        Ok(())
    }

    pub fn update_message<F>(&self, key: ConversationKey, id: &MessageId, update: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let found = {
            let mut inner = self.inner.write();
            match inner
                .get_mut(key)
                .and_then(|c| c.messages.iter_mut().find(|m| &m.id == id))
            {
                Some(message) => {
                    update(message);
                    true
                }
                None => false,
            }
        };
        if found {
            self.emit(StoreEvent::MessageUpdated {
                conversation: key,
                message: id.clone(),
            });
        }
        found
    }

    pub fn message(&self, key: ConversationKey, id: &MessageId) -> Option<Message> {
        self.inner
            .read()
            .conversations
            .iter()
            .find(|c| c.key == key)
            .and_then(|c| c.message(id).cloned())
    }

    pub fn acknowledge(&self, key: ConversationKey, created: SessionSummary) -> bool {
        self.patch_key(key, |conversation| {
            conversation.id = Some(created.id);
            conversation.title = created.title;
            conversation.created_at = created.created_at;
            conversation.updated_at = created.updated_at;
        })
    }

    pub fn replace_messages(&self, key: ConversationKey, detail: SessionDetail) -> bool {
        let replaced = {
            let mut inner = self.inner.write();
            match inner.get_mut(key) {
                Some(conversation) => {
                    conversation.apply_detail(detail);
                    true
                }
                None => false,
            }
        };
        if replaced {
            self.emit(StoreEvent::MessagesReplaced(key));
        }
        replaced
    }

    pub fn upsert_detail(&self, detail: SessionDetail) -> ConversationKey {
        let key = self.ensure(&detail.id);
        self.replace_messages(key, detail);
        key
    }

    /// Loads the active conversation list. Entries the server no longer
    /// reports are dropped unless they are drafts or have a send in flight.
    pub fn replace_all(&self, summaries: Vec<SessionSummary>) {
        self.merge_summaries(summaries, false);
    }

    pub fn replace_archived(&self, summaries: Vec<SessionSummary>) {
        self.merge_summaries(summaries, true);
    }

    fn merge_summaries(&self, summaries: Vec<SessionSummary>, archived: bool) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.write();
            let listed: HashSet<DurableId> = summaries.iter().map(|s| s.id.clone()).collect();
            let sending = inner.sending.clone();
            inner.conversations.retain(|c| {
                let keep = match &c.id {
                    None => true,
                    Some(id) => {
                        c.is_archived != archived || listed.contains(id) || sending.contains(&c.key)
                    }
                };
                if !keep {
                    events.push(StoreEvent::ConversationRemoved(c.key));
                }
                keep
            });
            for summary in summaries {
                match inner.key_for(&summary.id) {
                    Some(key) => {
                        if let Some(conversation) = inner.get_mut(key) {
                            conversation.apply_summary(summary);
                        }
                        events.push(StoreEvent::ConversationUpdated(key));
                    }
                    None => {
                        let mut conversation = Conversation::with_id(summary.id.clone());
                        conversation.apply_summary(summary);
                        events.push(StoreEvent::ConversationAdded(conversation.key));
                        inner.conversations.push(conversation);
                    }
                }
            }
        }
        for event in events {
            self.emit(event);
        }
    }

    pub fn patch<F>(&self, id: &DurableId, update: F) -> bool
    where
        F: FnOnce(&mut Conversation),
    {
        match self.key_for(id) {
            Some(key) => self.patch_key(key, update),
            None => false,
        }
    }

    fn patch_key<F>(&self, key: ConversationKey, update: F) -> bool
    where
        F: FnOnce(&mut Conversation),
    {
        let found = {
            let mut inner = self.inner.write();
            match inner.get_mut(key) {
                Some(conversation) => {
                    update(conversation);
                    true
                }
                None => false,
            }
        };
        if found {
            self.emit(StoreEvent::ConversationUpdated(key));
        }
        found
    }

    pub fn remove(&self, id: &DurableId) -> Option<Conversation> {
        let removed = {
            let mut inner = self.inner.write();
            let position = inner
                .conversations
                .iter()
                .position(|c| c.id.as_ref() == Some(id))?;
            inner.conversations.remove(position)
        };
        self.emit(StoreEvent::ConversationRemoved(removed.key));
        Some(removed)
    }

    pub fn set_rating(&self, id: &DurableId, rating: Rating) -> bool {
        let message_id = MessageId::Durable(id.clone());
        let key = {
            let mut inner = self.inner.write();
            inner.conversations.iter_mut().find_map(|conversation| {
                let message = conversation
                    .messages
                    .iter_mut()
                    .find(|m| m.id == message_id)?;
                message.rating = Some(rating);
                Some(conversation.key)
            })
        };
        match key {
            Some(conversation) => {
                self.emit(StoreEvent::MessageUpdated {
                    conversation,
                    message: message_id,
                });
                true
            }
            None => false,
        }
    }

    pub fn reset(&self) {
        let keys: Vec<ConversationKey> = {
            let mut inner = self.inner.write();
            let keys = inner.conversations.iter().map(|c| c.key).collect();
            inner.conversations.clear();
            keys
        };
        for key in keys {
            self.emit(StoreEvent::ConversationRemoved(key));
        }
    }
}

pub struct SendGuard {
    store: ConversationStore,
    key: ConversationKey,
}

impl SendGuard {
    pub fn key(&self) -> ConversationKey {
        self.key
    }
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        self.store.inner.write().sending.remove(&self.key);
        self.store.emit(StoreEvent::ConversationUpdated(self.key));
    }
}
