use thiserror::Error;

use msa_client::{ApiError, ClientError};

use crate::guard::Guardrail;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("{kind} already exists: import it or choose a different name")]
    AlreadyExists { kind: &'static str },

    #[error("{kind} name collision: {detail}")]
    Collision { kind: &'static str, detail: String },

    #[error("{kind} not found")]
    NotFound { kind: &'static str },

    #[error("{kind} mismatch: {detail}")]
    Mismatch { kind: &'static str, detail: String },

    #[error("{kind} deletion blocked: set allow_destroy = true to permit it")]
    ConsentRequired { kind: &'static str },

    #[error("{0}")]
    Guardrail(Guardrail),

    #[error("copy volume failed after {attempts} attempt(s); conflict context: {context}: {source}")]
    CopyConflict {
        attempts: u32,
        context: String,
        source: ApiError,
    },

    #[error("copy volume retry interrupted after {attempts} attempt(s); conflict context: {context}")]
    CopyInterrupted { attempts: u32, context: String },

    #[error("destroy lock: {0}")]
    Lock(String),

    #[error("operation interrupted")]
    Interrupted,

    #[error(transparent)]
    Client(ClientError),
}

impl From<ClientError> for DriverError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Interrupted => DriverError::Interrupted,
            other => DriverError::Client(other),
        }
    }
}

impl DriverError {
    /// The array-level error behind this failure, if any.
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            DriverError::Client(err) => err.api(),
            DriverError::CopyConflict { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether rerunning the operation later can succeed without a
    /// configuration change.
    pub fn is_retryable(&self) -> bool {
        match self {
            DriverError::Guardrail(guardrail) => guardrail.retryable,
            DriverError::CopyConflict { .. }
            | DriverError::CopyInterrupted { .. }
            | DriverError::Interrupted => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
