use std::io::{self, Write};
use talksense_core::api::MessageRecord;
use talksense_core::{
    Conversation, ConversationStore, Message, MessageId, MessageStatus, Role, SendReport,
    StoreEvent,
};

/// Echoes the assistant reply of one send while it streams in.
#[derive(Debug, Default)]
pub struct ReplyEcho {
    message: Option<MessageId>,
    shown: String,
}

impl ReplyEcho {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the part of `content` not printed yet. Content that does not
    /// continue what was already printed yields nothing.
    pub fn advance<'a>(&mut self, content: &'a str) -> &'a str {
        match content.strip_prefix(self.shown.as_str()) {
            Some(tail) if !tail.is_empty() => {
                self.shown.push_str(tail);
                tail
            }
            _ => "",
        }
    }

    pub fn handle<W: Write>(
        &mut self,
        store: &ConversationStore,
        event: &StoreEvent,
        out: &mut W,
    ) -> io::Result<()> {
        let StoreEvent::MessageUpdated {
            conversation,
            message,
        } = event
        else {
            return Ok(());
        };
        let Some(current) = store.message(*conversation, message) else {
            return Ok(());
        };
        if current.role != Role::Assistant {
            return Ok(());
        }
        match &self.message {
            None => self.message = Some(message.clone()),
            Some(tracked) if tracked != message => return Ok(()),
            Some(_) => {}
        }
        let tail = self.advance(&current.content);
        if !tail.is_empty() {
            out.write_all(tail.as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }

    /// Prints whatever the reconciled reply holds beyond the streamed text and
    /// terminates the line.
    pub fn finish<W: Write>(
        &mut self,
        store: &ConversationStore,
        report: &SendReport,
        out: &mut W,
    ) -> io::Result<()> {
        if let Some(reply) = store.message(report.conversation, &report.assistant) {
            let tail = self.advance(&reply.content);
            out.write_all(tail.as_bytes())?;
            if let Some(error) = &reply.error {
                if !self.shown.is_empty() {
                    writeln!(out)?;
                }
                write!(out, "[{error}]")?;
            }
        }
        writeln!(out)?;
        out.flush()
    }
}

pub fn session_line(conversation: &Conversation) -> String {
    let marker = if conversation.is_pinned { "*" } else { " " };
    let id = conversation
        .id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "(unsaved)".to_string());
    let shared = if conversation.is_public { " [public]" } else { "" };
    let updated = conversation
        .updated_at
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    format!(
        "{marker} {id}  {title}{shared}  ({count} messages) {updated}",
        title = conversation.title,
        count = conversation.message_count,
    )
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

pub fn message_block(message: &Message) -> String {
    let mut header = format!("{} [{}]", speaker(message.role), message.id);
    if let Some(rating) = message.rating {
        header.push_str(&format!(" rated {}/5", rating.value()));
    }
    if message.status == MessageStatus::Error {
        header.push_str(" (failed)");
    }
    format!("{header}\n{}\n", message.content)
}

pub fn record_block(record: &MessageRecord) -> String {
    format!("{} [{}]\n{}\n", speaker(record.role), record.id, record.content)
}
