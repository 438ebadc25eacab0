//! Error types for the pairing proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use session_core::SessionError;
use thiserror::Error;
use tracing::warn;

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Phone number required")]
    MissingNumber,

    #[error("Invalid phone number")]
    InvalidNumber(String),

    #[error("Code generation failed. Try again.")]
    PairingFailed(String),

    #[error("Pairing timed out. Try again.")]
    PairingTimeout,

    #[error("Pairing already in progress for this number")]
    Busy,

    #[error("Service unavailable")]
    Unavailable(String),

    #[error("No active session for {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingNumber | ApiError::InvalidNumber(_) => StatusCode::BAD_REQUEST,
            ApiError::PairingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::PairingTimeout | ApiError::Busy | ApiError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Details stay in the log; the body carries the public message only
        match &self {
            ApiError::InvalidNumber(detail)
            | ApiError::PairingFailed(detail)
            | ApiError::Unavailable(detail) => {
                warn!(%status, detail = %detail, "{}", self);
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidNumber(reason) => ApiError::InvalidNumber(reason),
            SessionError::AlreadyActive(_) => ApiError::Busy,
            SessionError::PairingTimeout(_) => ApiError::PairingTimeout,
            SessionError::Persistence(e) => ApiError::Unavailable(e.to_string()),
            SessionError::PairingFailed(_)
            | SessionError::Connection(_)
            | SessionError::TerminalDisconnect { .. } => ApiError::PairingFailed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_core::StoreError;
    use std::time::Duration;

    #[test]
    fn test_session_error_mapping() {
        let cases = [
            (SessionError::InvalidNumber("x".into()), StatusCode::BAD_REQUEST),
            (SessionError::AlreadyActive("1".into()), StatusCode::SERVICE_UNAVAILABLE),
            (SessionError::PairingFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                SessionError::PairingTimeout(Duration::from_secs(30)),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                SessionError::Persistence(StoreError::Config("x".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn test_public_messages() {
        assert_eq!(ApiError::MissingNumber.to_string(), "Phone number required");
        assert_eq!(
            ApiError::InvalidNumber("too short".into()).to_string(),
            "Invalid phone number"
        );
        assert_eq!(
            ApiError::PairingFailed("bridge said no".into()).to_string(),
            "Code generation failed. Try again."
        );
    }
}
