use std::fmt;

use thiserror::Error;

use crate::xml::Status;

/// Error returned when the array reports a non-success status object.
///
/// The full status record is preserved verbatim so callers can pattern-match
/// the `response` text for domain-specific recovery ("name already in use",
/// "existing volume copy in progress", session expiry, and so on).
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: Status,
}

impl ApiError {
    /// The human-readable message carried by the status object.
    pub fn message(&self) -> &str {
        self.status.response.trim()
    }

    /// Whether the array rejected the command because the session is gone.
    pub fn is_session_error(&self) -> bool {
        let msg = self.status.response.to_lowercase();
        msg.contains("session") || msg.contains("login") || msg.contains("authorization")
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message();
        if message.is_empty() {
            write!(f, "command failed")
        } else {
            write!(f, "command failed: {}", message)
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("{0} is required")]
    MissingConfig(&'static str),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("response parse failed: {0}")]
    Parse(String),

    #[error("response missing status object")]
    MissingStatus,

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("login response missing session key")]
    MissingSessionKey,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("operation interrupted")]
    Interrupted,
}

impl ClientError {
    /// The API-level error, if the array itself rejected the command.
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_session_error(&self) -> bool {
        self.api().is_some_and(ApiError::is_session_error)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ClientError::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
