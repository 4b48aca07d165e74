pub mod api;
pub mod auth;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod storage;
pub mod stream;
pub mod telemetry;
pub mod transport;

pub use api::{ChatApi, PublicSession, SessionDetail, SessionSummary};
pub use auth::{AuthService, SignupRequest};
pub use config::{ClientSettings, ConfigError, SendOptions};
pub use conversation::{
    Conversation, ConversationKey, ConversationStore, DurableId, LocalId, Message, MessageId,
    MessageStatus, Rating, Role, StoreEvent,
};
pub use credentials::{AuthStatus, Credential, CredentialStore, TokenRenewer};
pub use error::{ClientError, Result};
pub use pipeline::{MessagePipeline, SendReport};
pub use storage::{CredentialStorage, FileCredentialStorage, MemoryCredentialStorage, UserProfile};
pub use transport::{ApiRequest, Transport};
