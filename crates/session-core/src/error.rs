//! Error types for the session lifecycle core.

use crate::types::DisconnectReason;
use std::time::Duration;
use thiserror::Error;

/// Session lifecycle errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid phone number: {0}")]
    InvalidNumber(String),

    #[error("Connection already active for {0}")]
    AlreadyActive(String),

    #[error("Pairing failed: {0}")]
    PairingFailed(String),

    #[error("Pairing timed out after {0:?}")]
    PairingTimeout(Duration),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Session for {number} ended permanently: {reason}")]
    TerminalDisconnect {
        number: String,
        reason: DisconnectReason,
    },
}

/// Credential store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Invalid record key: {0}")]
    InvalidKey(String),

    #[error("Invalid store configuration: {0}")]
    Config(String),
}

impl From<aes_gcm::Error> for StoreError {
    fn from(_: aes_gcm::Error) -> Self {
        StoreError::Encryption("AES-GCM encryption/decryption failed".to_string())
    }
}

/// Errors reported by a connection capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected by protocol: {0}")]
    Rejected(String),

    #[error("Connection closed")]
    Closed,
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
