use crate::config::SendOptions;
use crate::conversation::{DurableId, Rating, Role};
use crate::error::Result;
use crate::transport::{ApiRequest, Transport};
use chrono::{DateTime, Utc};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub id: DurableId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionDetail {
    pub id: DurableId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PublicSession {
    pub id: DurableId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: DurableId,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rating: Option<u8>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamRequest<'a> {
    pub session_id: &'a str,
    pub content: &'a str,
    pub use_rag: bool,
    pub temperature: f64,
}

impl<'a> StreamRequest<'a> {
    pub fn new(session_id: &'a DurableId, content: &'a str, options: SendOptions) -> Self {
        Self {
            session_id: session_id.as_str(),
            content,
            use_rag: options.use_rag,
            temperature: options.temperature,
        }
    }
}

/// The list endpoint is paginated; the archived one is not.
#[derive(Deserialize)]
#[serde(untagged)]
enum SessionListing {
    Page { results: Vec<SessionSummary> },
    Plain(Vec<SessionSummary>),
}

impl SessionListing {
    fn into_vec(self) -> Vec<SessionSummary> {
        match self {
            Self::Page { results } => results,
            Self::Plain(list) => list,
        }
    }
}

#[derive(Deserialize)]
struct PublicFlag {
    is_public: bool,
}

fn session_path(id: &DurableId) -> String {
    format!("/chat/sessions/{id}/")
}

fn session_action(id: &DurableId, action: &str) -> String {
    format!("/chat/sessions/{id}/{action}/")
}

#[derive(Clone)]
pub struct ChatApi {
    transport: Transport,
}

impl ChatApi {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let listing: SessionListing = self
            .transport
            .call_json(&ApiRequest::get("/chat/sessions/"))
            .await?;
        Ok(listing.into_vec())
    }

    pub async fn archived_sessions(&self) -> Result<Vec<SessionSummary>> {
        let listing: SessionListing = self
            .transport
            .call_json(&ApiRequest::get("/chat/sessions/archived/"))
            .await?;
        Ok(listing.into_vec())
    }

    pub async fn create_session(&self, title: &str) -> Result<SessionSummary> {
        self.transport
            .call_json(&ApiRequest::post("/chat/sessions/").json(json!({ "title": title })))
            .await
    }

    pub async fn session(&self, id: &DurableId) -> Result<SessionDetail> {
        self.transport
            .call_json(&ApiRequest::get(session_path(id)))
            .await
    }

    pub async fn rename(&self, id: &DurableId, title: &str) -> Result<SessionDetail> {
        self.transport
            .call_json(&ApiRequest::patch(session_path(id)).json(json!({ "title": title })))
            .await
    }

    pub async fn delete(&self, id: &DurableId) -> Result<()> {
        self.transport
            .call_unit(&ApiRequest::delete(session_path(id)))
            .await
    }

    pub async fn archive(&self, id: &DurableId) -> Result<()> {
        self.action(id, "archive").await
    }

    pub async fn unarchive(&self, id: &DurableId) -> Result<()> {
        self.action(id, "unarchive").await
    }

    pub async fn pin(&self, id: &DurableId) -> Result<()> {
        self.action(id, "pin").await
    }

    pub async fn unpin(&self, id: &DurableId) -> Result<()> {
        self.action(id, "unpin").await
    }

    pub async fn toggle_public(&self, id: &DurableId) -> Result<bool> {
        let flag: PublicFlag = self
            .transport
            .call_json(&ApiRequest::post(session_action(id, "toggle_public")))
            .await?;
        Ok(flag.is_public)
    }

    pub async fn public_session(&self, id: &DurableId) -> Result<PublicSession> {
        self.transport
            .call_json(&ApiRequest::get(session_action(id, "public")))
            .await
    }

    pub async fn rate(&self, message: &DurableId, rating: Rating) -> Result<()> {
        let path = format!("/chat/messages/{message}/rate/");
        self.transport
            .call_unit(&ApiRequest::post(path).json(json!({ "rating": rating.value() })))
            .await
    }

    /// Opens the streaming exchange. The body is left unread for the stream reader.
    pub async fn open_stream(&self, request: &StreamRequest<'_>) -> Result<Response> {
        let body = serde_json::to_value(request)?;
        self.transport
            .call(&ApiRequest::post("/chat/messages/stream/").json(body))
            .await
    }

    async fn action(&self, id: &DurableId, action: &str) -> Result<()> {
        self.transport
            .call_unit(&ApiRequest::post(session_action(id, action)))
            .await
    }
}
