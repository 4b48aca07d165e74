use reqwest::StatusCode;

/// Shown to the user whenever a failure must not expose backend details.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// The refresh credential is missing or was rejected by the backend.
    #[error("refresh credential expired or rejected")]
    CredentialExpired,
    #[error("session expired")]
    SessionExpired,
    #[error("request failed with status {status}")]
    RequestFailed { status: StatusCode, body: String },
    /// Sanitized streaming failure; the underlying cause is only logged.
    #[error("{0}")]
    StreamError(String),
    #[error("message has not been persisted yet")]
    NotPersistedYet,
    #[error("a message is already being sent in this conversation")]
    ConversationLockHeld,
    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
    #[error("message is empty")]
    EmptyMessage,
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("credential storage failure: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn request_failed(status: StatusCode, body: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            body: body.into(),
        }
    }

    pub fn stream_failed() -> Self {
        Self::StreamError(GENERIC_FAILURE.to_string())
    }

    pub fn forces_logout(&self) -> bool {
        matches!(self, Self::CredentialExpired | Self::SessionExpired)
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            Self::Http(err) => err.status(),
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::CredentialExpired | Self::SessionExpired => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::NotPersistedYet => {
                "Please wait a moment for the message to save before rating.".to_string()
            }
            Self::ConversationLockHeld => {
                "Please wait for the current reply to finish.".to_string()
            }
            Self::InvalidRating(_) => "Ratings go from 1 to 5.".to_string(),
            Self::EmptyMessage => "Type a message first.".to_string(),
            Self::StreamError(message) => message.clone(),
            Self::RequestFailed { status, .. } if status.is_server_error() => {
                GENERIC_FAILURE.to_string()
            }
            Self::RequestFailed { body, .. } => {
                detail_from_body(body).unwrap_or_else(|| GENERIC_FAILURE.to_string())
            }
            Self::UnknownConversation(_) => "That conversation could not be found.".to_string(),
            Self::Http(_) | Self::Decode(_) | Self::Storage(_) => GENERIC_FAILURE.to_string(),
        }
    }
}

/// Handles `detail`, `error`, `non_field_errors` and per-field error maps.
pub fn detail_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let object = value.as_object()?;
    for key in ["detail", "error"] {
        if let Some(text) = object.get(key).and_then(|v| v.as_str()) {
            return Some(text.to_string());
        }
    }
    if let Some(errors) = object.get("non_field_errors") {
        return Some(join_values(errors));
    }
    let parts: Vec<String> = object
        .iter()
        .map(|(field, errors)| format!("{field}: {}", join_values(errors)))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

fn join_values(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_is_preferred() {
        let body = r#"{"detail": "No active account found"}"#;
        assert_eq!(
            detail_from_body(body).as_deref(),
            Some("No active account found")
        );
    }

    #[test]
    fn field_errors_are_joined() {
        let body = r#"{"email": ["This field is required."]}"#;
        assert_eq!(
            detail_from_body(body).as_deref(),
            Some("email: This field is required.")
        );
    }

    #[test]
    fn non_json_bodies_fall_back_to_generic_text() {
        let err = ClientError::request_failed(StatusCode::BAD_GATEWAY, "<html>proxy</html>");
        assert_eq!(err.user_message(), GENERIC_FAILURE);
    }

    #[test]
    fn server_errors_never_expose_their_body() {
        let err = ClientError::request_failed(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error": "database connection refused at 10.0.0.5"}"#,
        );
        assert_eq!(err.user_message(), GENERIC_FAILURE);
    }

    #[test]
    fn only_credential_failures_force_logout() {
        assert!(ClientError::SessionExpired.forces_logout());
        assert!(ClientError::CredentialExpired.forces_logout());
        assert!(!ClientError::stream_failed().forces_logout());
        assert!(!ClientError::NotPersistedYet.forces_logout());
    }
}
