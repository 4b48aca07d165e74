#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;

use crate::api::{ChatApi, PublicSession, StreamRequest};
use crate::config::SendOptions;
use crate::conversation::{
    Conversation, ConversationKey, ConversationStore, DurableId, Message, MessageId,
    MessageStatus, Rating, Role,
};
use crate::error::{ClientError, Result};
use crate::stream::{self, StreamObserver};
use crate::transport::Transport;
use tracing::{debug, error, info, warn};

pub const CREATE_FAILURE: &str = "Sorry, I couldn't start a new conversation. Please try again.";
pub const REPLY_FAILURE: &str = "Sorry, something went wrong. Please try again in a moment.";

const TITLE_CHARS: usize = 30;

pub fn draft_title(text: &str) -> String {
    let head: String = text.chars().take(TITLE_CHARS).collect();
    format!("{head}...")
}

/// Outcome of a send that was accepted. Failures after acceptance live on the
/// assistant message; `error` carries the underlying cause for the caller.
#[derive(Debug)]
pub struct SendReport {
    pub conversation: ConversationKey,
    pub conversation_id: Option<DurableId>,
    pub assistant: MessageId,
    pub status: MessageStatus,
    pub error: Option<ClientError>,
}

impl SendReport {
    pub fn is_success(&self) -> bool {
        self.status == MessageStatus::Completed
    }

    pub fn forces_logout(&self) -> bool {
        self.error.as_ref().is_some_and(ClientError::forces_logout)
    }
}

struct PlaceholderWriter<'a> {
    store: &'a ConversationStore,
    conversation: ConversationKey,
    message: MessageId,
}

impl StreamObserver for PlaceholderWriter<'_> {
    fn on_fragment(&mut self, fragment: &str) {
        self.store
            .update_message(self.conversation, &self.message, |message| {
                message.transition(MessageStatus::Streaming);
                message.content.push_str(fragment);
            });
    }

    fn on_complete(&mut self, _full_text: &str) {
        self.store
            .update_message(self.conversation, &self.message, |message| {
                message.transition(MessageStatus::Completed);
            });
    }

    fn on_error(&mut self, _error: &ClientError) {
        self.store
            .update_message(self.conversation, &self.message, |message| {
                message.fail(REPLY_FAILURE);
            });
    }
}

/// Clones share the store, so a send outlives the view that started it.
#[derive(Clone)]
pub struct MessagePipeline {
    store: ConversationStore,
    api: ChatApi,
    options: SendOptions,
}

impl MessagePipeline {
    pub fn new(store: ConversationStore, transport: Transport, options: SendOptions) -> Self {
        Self {
            store,
            api: ChatApi::new(transport),
            options,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    pub fn options(&self) -> SendOptions {
        self.options
    }

    pub async fn send(&self, id: Option<&DurableId>, text: &str) -> Result<SendReport> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let key = match id {
            Some(id) => self.store.ensure(id),
            None => self.store.create_draft(),
        };
        self.send_in(key, text).await
    }

    /// Only rejection is an `Err`: blank input, or a send already in flight
    /// for the same conversation.
    pub async fn send_in(&self, key: ConversationKey, text: &str) -> Result<SendReport> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let _guard = self.store.try_begin_send(key)?;

        let placeholder = Message::assistant_placeholder();
        let assistant = placeholder.id.clone();
        self.store
            .append_messages(key, vec![Message::user(content), placeholder])
            .inspect_err(|err| error!(%err, "send lock held for a conversation that is gone"))?;

        let error = self.exchange(key, &assistant, content).await.err();
        let status = match self.store.message(key, &assistant) {
            Some(message) => message.status,
            // Replaced by reconciliation, or the conversation was removed mid-send.
            None if error.is_some() => MessageStatus::Error,
            None => MessageStatus::Completed,
        };
        let conversation = self.store.get(key);
        let conversation_id = conversation.as_ref().and_then(|c| c.id.clone());
        // After reconciliation the placeholder has been replaced by its
        // durable counterpart.
        let assistant = match self.store.message(key, &assistant) {
            Some(_) => assistant,
            None => conversation
                .and_then(|c| {
                    c.messages
                        .iter()
                        .rev()
                        .find(|m| m.role == Role::Assistant)
                        .map(|m| m.id.clone())
                })
                .unwrap_or(assistant),
        };

        Ok(SendReport {
            conversation: key,
            conversation_id,
            assistant,
            status,
            error,
        })
    }

    async fn exchange(&self, key: ConversationKey, assistant: &MessageId, content: &str) -> Result<()> {
        let id = match self.store.get(key).and_then(|c| c.id) {
            Some(id) => id,
            None => match self.create(key, content).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(%err, "conversation creation failed");
                    self.store.update_message(key, assistant, |message| {
                        message.fail(CREATE_FAILURE);
                    });
                    return Err(err);
                }
            },
        };

        let mut writer = PlaceholderWriter {
            store: &self.store,
            conversation: key,
            message: assistant.clone(),
        };
        let request = StreamRequest::new(&id, content, self.options);
        match self.api.open_stream(&request).await {
            Ok(response) => {
                stream::consume(response, &mut writer).await?;
            }
            Err(err) => {
                warn!(%err, conversation = %id, "stream could not be opened");
                writer.on_error(&err);
                return Err(err);
            }
        }

        self.reconcile(key, &id).await;
        Ok(())
    }

    async fn create(&self, key: ConversationKey, content: &str) -> Result<DurableId> {
        let created = self.api.create_session(&draft_title(content)).await?;
        let id = created.id.clone();
        info!(conversation = %id, "conversation created");
        self.store.acknowledge(key, created);
        Ok(id)
    }

    async fn reconcile(&self, key: ConversationKey, id: &DurableId) {
        match self.api.session(id).await {
            Ok(detail) => {
                debug!(conversation = %id, messages = detail.messages.len(), "reconciled");
                self.store.replace_messages(key, detail);
            }
            Err(err) => {
                warn!(%err, conversation = %id, "reconciliation fetch failed, keeping local messages");
            }
        }
    }

    /// Rates a persisted message. Local messages are refused without any
    /// network call; the store changes only after the backend acknowledges.
    pub async fn rate(&self, message: &MessageId, score: u8) -> Result<()> {
        let id = match message {
            MessageId::Local(_) => return Err(ClientError::NotPersistedYet),
            MessageId::Durable(id) => id,
        };
        let rating = Rating::new(score)?;
        self.api.rate(id, rating).await?;
        self.store.set_rating(id, rating);
        Ok(())
    }

    pub async fn rename(&self, id: &DurableId, title: &str) -> Result<()> {
        let detail = self.api.rename(id, title).await?;
        self.store.patch(id, |conversation| {
            conversation.title = detail.title;
            conversation.updated_at = detail.updated_at;
        });
        Ok(())
    }

    pub async fn pin(&self, id: &DurableId) -> Result<()> {
        self.api.pin(id).await?;
        self.store.patch(id, |conversation| conversation.is_pinned = true);
        Ok(())
    }

    pub async fn unpin(&self, id: &DurableId) -> Result<()> {
        self.api.unpin(id).await?;
        self.store.patch(id, |conversation| conversation.is_pinned = false);
        Ok(())
    }

    pub async fn archive(&self, id: &DurableId) -> Result<()> {
        self.api.archive(id).await?;
        self.store.patch(id, |conversation| conversation.is_archived = true);
        Ok(())
    }

    pub async fn unarchive(&self, id: &DurableId) -> Result<()> {
        self.api.unarchive(id).await?;
        self.store.patch(id, |conversation| conversation.is_archived = false);
        Ok(())
    }

    pub async fn delete(&self, id: &DurableId) -> Result<()> {
        self.api.delete(id).await?;
        self.store.remove(id);
        Ok(())
    }

    pub async fn toggle_public(&self, id: &DurableId) -> Result<bool> {
        let is_public = self.api.toggle_public(id).await?;
        self.store.patch(id, |conversation| conversation.is_public = is_public);
        Ok(is_public)
    }

    pub async fn refresh_list(&self) -> Result<Vec<Conversation>> {
        let summaries = self.api.list_sessions().await?;
        self.store.replace_all(summaries);
        Ok(self.store.conversations())
    }

    pub async fn refresh_archived(&self) -> Result<Vec<Conversation>> {
        let summaries = self.api.archived_sessions().await?;
        self.store.replace_archived(summaries);
        Ok(self.store.archived())
    }

    /// Left untouched while a send is in flight for it.
    pub async fn open(&self, id: &DurableId) -> Result<ConversationKey> {
        if let Some(key) = self.store.key_for(id) {
            if self.store.is_sending(key) {
                debug!(conversation = %id, "send in flight, keeping local state");
                return Ok(key);
            }
        }
        let detail = self.api.session(id).await?;
        if let Some(key) = self.store.key_for(id) {
            if self.store.is_sending(key) {
                return Ok(key);
            }
        }
        Ok(self.store.upsert_detail(detail))
    }

    pub async fn public_conversation(&self, id: &DurableId) -> Result<PublicSession> {
        self.api.public_session(id).await
    }
}
