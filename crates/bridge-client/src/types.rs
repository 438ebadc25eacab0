//! Bridge API types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use session_core::{ConnectionEvent, Credentials, DisconnectReason};

/// Open (or resume) a session.
#[derive(Debug, Clone, Serialize)]
pub struct OpenSessionRequest {
    pub credentials: Value,
    pub keys: Option<Value>,
}

impl From<Option<Credentials>> for OpenSessionRequest {
    fn from(credentials: Option<Credentials>) -> Self {
        match credentials {
            Some(c) => Self {
                credentials: c.credentials,
                keys: c.keys,
            },
            None => Self {
                credentials: Value::Object(Default::default()),
                keys: None,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenSessionResponse {
    #[serde(default)]
    pub registered: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairingCodeResponse {
    pub code: String,
}

/// Outgoing text message request.
#[derive(Debug, Clone, Serialize)]
pub struct SendTextRequest {
    pub text: String,
}

/// Lifecycle event as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeEvent {
    Ready,
    Credentials {
        credentials: Value,
        #[serde(default)]
        keys: Option<Value>,
    },
    Open {
        #[serde(default)]
        user: Option<String>,
    },
    Close {
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Event types this client does not know about
    #[serde(other)]
    Unknown,
}

impl BridgeEvent {
    /// Whether no further events follow this one.
    pub fn is_close(&self) -> bool {
        matches!(self, BridgeEvent::Close { .. })
    }

    /// Convert to a session lifecycle event. Unknown events map to `None`.
    pub fn into_connection_event(self) -> Option<ConnectionEvent> {
        match self {
            BridgeEvent::Ready => Some(ConnectionEvent::Ready),
            BridgeEvent::Credentials { credentials, keys } => Some(
                ConnectionEvent::CredentialsUpdated(Credentials::new(credentials, keys)),
            ),
            BridgeEvent::Open { user } => Some(ConnectionEvent::Opened { user }),
            BridgeEvent::Close { status, .. } => Some(ConnectionEvent::Closed(
                DisconnectReason::from_status(status),
            )),
            BridgeEvent::Unknown => None,
        }
    }
}
