//! Error types for the sync service.

use std::time::Duration;
use thiserror::Error;

/// Main error type for catalog sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Peer unreachable (no response within {0:?})")]
    PeerUnreachable(Duration),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Origin mismatch: expected {expected}, got {got}")]
    OriginMismatch { expected: String, got: String },

    #[error("Transport closed")]
    TransportClosed,

    #[error("Invalid service state: {0}")]
    InvalidState(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    #[error("Token expired")]
    TokenExpired,
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
