use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Response for an error
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
}

/// Failure outcomes of the collaboration coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollabError {
    /// Note or identity missing in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Permission check failed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Store I/O failure
    #[error("Store error: {0}")]
    Store(String),

    /// Malformed client message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection went away before the request finished
    #[error("Connection '{0}' disconnected")]
    Disconnected(String),
}

impl CollabError {
    /// Numeric signal sent to clients in `error` events.
    pub fn code(&self) -> u16 {
        match self {
            CollabError::NotFound(_) => 404,
            CollabError::Forbidden(_) => 403,
            CollabError::Store(_) => 500,
            CollabError::Protocol(_) => 400,
            CollabError::Disconnected(_) => 410,
        }
    }
}
