//! Session records, statuses and disconnect classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque authentication material issued by the messaging protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Protocol credential blob
    pub credentials: Value,

    /// Supplementary key material
    #[serde(default)]
    pub keys: Option<Value>,
}

impl Credentials {
    pub fn new(credentials: Value, keys: Option<Value>) -> Self {
        Self { credentials, keys }
    }

    /// Whether the blob marks a completed registration.
    pub fn is_registered(&self) -> bool {
        self.credentials
            .get("registered")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Durable credential record, one per phone number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Normalized number (digits only)
    pub number: String,

    /// Protocol credential blob
    pub credentials: Value,

    /// Supplementary key material
    #[serde(default)]
    pub keys: Option<Value>,

    /// Time of the last persisted write
    pub updated_at: DateTime<Utc>,

    /// Monotonic write sequence; stores never replace a newer revision
    #[serde(default)]
    pub revision: u64,
}

impl SessionRecord {
    /// Create a record for the given credential state.
    pub fn new(number: impl Into<String>, credentials: Credentials, revision: u64) -> Self {
        Self {
            number: number.into(),
            credentials: credentials.credentials,
            keys: credentials.keys,
            updated_at: Utc::now(),
            revision,
        }
    }

    /// Credential state to hand to a new connection.
    pub fn to_credentials(&self) -> Credentials {
        Credentials {
            credentials: self.credentials.clone(),
            keys: self.keys.clone(),
        }
    }
}

/// Status of an active connection in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Handshake in progress
    Pairing,
    /// Authenticated and running
    Open,
    /// Being torn down
    Closing,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Account logged the session out
    LoggedOut,
    /// Server declared the stored session unusable
    StaleSession,
    /// Any other protocol status code
    Status(u16),
    /// Closed without a status code
    Unknown,
}

impl DisconnectReason {
    pub const LOGGED_OUT: u16 = 401;
    pub const STALE_SESSION: u16 = 515;

    /// Classify a protocol status code.
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(Self::LOGGED_OUT) => DisconnectReason::LoggedOut,
            Some(Self::STALE_SESSION) => DisconnectReason::StaleSession,
            Some(code) => DisconnectReason::Status(code),
            None => DisconnectReason::Unknown,
        }
    }

    /// Protocol status code, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DisconnectReason::LoggedOut => Some(Self::LOGGED_OUT),
            DisconnectReason::StaleSession => Some(Self::STALE_SESSION),
            DisconnectReason::Status(code) => Some(*code),
            DisconnectReason::Unknown => None,
        }
    }

    /// Terminal reasons require the number to pair again from scratch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DisconnectReason::LoggedOut | DisconnectReason::StaleSession
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::LoggedOut => write!(f, "logged out ({})", Self::LOGGED_OUT),
            DisconnectReason::StaleSession => {
                write!(f, "stale session ({})", Self::STALE_SESSION)
            }
            DisconnectReason::Status(code) => write!(f, "status {}", code),
            DisconnectReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Successful result of a pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// Formatted one-time pairing code
    Code(String),
    /// Number already has valid credentials; no code was generated
    AlreadyRegistered,
}
