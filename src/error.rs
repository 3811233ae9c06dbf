//! Session protocol error types.
//!
//! # Error Classification
//!
//! Errors fall into two families with different propagation rules:
//!
//! - **Transport** errors (connect refused, I/O failure, closed connection)
//!   terminate the affected connection. They are the only errors allowed to
//!   unwind past a session boundary. An oversized outbound frame is rejected
//!   before any byte is written and leaves the connection intact.
//! - Everything else (protocol, authorization, collaborator, timeout) is
//!   converted into an error [`Message`](crate::protocol::Message) at the
//!   session boundary, so callers never see raw internal errors on the wire.
//!
//! The `Collaborator` variant preserves the domain error via `#[source]`.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::text;
use crate::services::CollaboratorError;

/// Session protocol errors.
#[derive(Error, Debug)]
pub enum SmsError {
    /// Opening a connection to the peer failed.
    #[error("Connect error: {0}")]
    Connect(String),

    /// The connection is closed (locally or by the peer).
    #[error("Connection closed")]
    Closed,

    /// A frame exceeded the configured maximum size.
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Protocol-level error (unexpected message kind, unknown action).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed message or missing payload key.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Waiting for a correlated response took too long.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The session is not allowed to perform the action.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A domain collaborator failed.
    #[error("Collaborator error: {0}")]
    Collaborator(#[source] CollaboratorError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Server-side error (bind failure, lifecycle misuse).
    #[error("Server error: {0}")]
    Server(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for session protocol operations
pub type Result<T> = std::result::Result<T, SmsError>;

impl SmsError {
    /// Whether this error must tear down the connection it occurred on.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SmsError::Connect(_) | SmsError::Closed | SmsError::Io(_)
        )
    }

    /// Human-readable text safe to send to the peer.
    ///
    /// Internal details never cross the wire; collaborator and server
    /// failures collapse into a generic server error.
    pub fn client_text(&self) -> String {
        match self {
            SmsError::Unauthorized(_) => text::UNAUTHORIZED.to_string(),
            SmsError::InvalidMessage(_) | SmsError::Json(_) => text::INVALID_DATA.to_string(),
            SmsError::Protocol(reason) => reason.clone(),
            SmsError::Timeout(_) => text::TIMEOUT.to_string(),
            SmsError::Closed | SmsError::Connect(_) | SmsError::Io(_) => {
                text::CONNECTION_LOST.to_string()
            },
            SmsError::Collaborator(CollaboratorError::Invalid(_)) => text::INVALID_DATA.to_string(),
            SmsError::Collaborator(CollaboratorError::Conflict(_)) => text::DUPLICATE_DATA.to_string(),
            _ => text::SERVER_ERROR.to_string(),
        }
    }
}

impl From<CollaboratorError> for SmsError {
    fn from(err: CollaboratorError) -> Self {
        SmsError::Collaborator(err)
    }
}

impl From<toml::de::Error> for SmsError {
    fn from(err: toml::de::Error) -> Self {
        SmsError::Config(err.to_string())
    }
}
