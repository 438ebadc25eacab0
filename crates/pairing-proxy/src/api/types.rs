//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_core::{SessionInfo, SessionStatus};

/// Query of the pairing endpoints.
#[derive(Debug, Deserialize)]
pub struct PairQuery {
    pub number: Option<String>,
}

/// Pairing outcome as returned to the caller.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PairResponse {
    Code { code: String },
    Message { message: String },
}

impl PairResponse {
    pub fn already_registered() -> Self {
        PairResponse::Message {
            message: "Already Registered".to_string(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
    pub bridge_healthy: bool,
    pub store_healthy: bool,
}

/// One active session.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub number: String,
    pub status: SessionStatus,
    pub since: DateTime<Utc>,
}

impl From<SessionInfo> for SessionSummary {
    fn from(info: SessionInfo) -> Self {
        Self {
            number: info.number,
            status: info.status,
            since: info.since,
        }
    }
}

/// Active sessions and every number that has ever been linked.
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub known_numbers: Vec<String>,
    pub total: usize,
}
