//! Bridge client errors.

use session_core::ConnectionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("No bridge session for {0}")]
    SessionNotFound(String),
}

impl From<BridgeError> for ConnectionError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::SessionNotFound(_) => ConnectionError::Closed,
            BridgeError::Api { status, message } if (400..500).contains(&status) => {
                ConnectionError::Rejected(message)
            }
            other => ConnectionError::Transport(other.to_string()),
        }
    }
}
