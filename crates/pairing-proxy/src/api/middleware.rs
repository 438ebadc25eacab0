//! Pairing request throttling and request logging.
//!
//! Two quotas guard the pairing routes: a global one across all callers, and
//! one per normalized phone number so a single number cannot have codes
//! generated for it back to back.

use crate::api::types::PairQuery;
use crate::error::ApiError;
use axum::{
    extract::{Query, Request, State},
    http::Uri,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{keyed::DefaultKeyedStateStore, InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use session_core::normalize_number;
use std::{num::NonZeroU32, sync::Arc};
use tracing::{debug, warn};

/// Limiter shared by every request.
pub type GlobalLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter keyed by normalized phone number.
pub type NumberLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

fn per_minute(requests: u32, fallback: u32) -> Quota {
    let fallback = NonZeroU32::new(fallback).unwrap_or(NonZeroU32::MIN);
    Quota::per_minute(NonZeroU32::new(requests).unwrap_or(fallback))
}

/// Pairing quotas shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    pub global: Arc<GlobalLimiter>,
    pub per_number: Arc<NumberLimiter>,
}

impl RateLimitState {
    /// Zero limits fall back to 30 global and 5 per number.
    pub fn new(global_per_minute: u32, number_per_minute: u32) -> Self {
        Self {
            global: Arc::new(RateLimiter::direct(per_minute(global_per_minute, 30))),
            per_number: Arc::new(RateLimiter::keyed(per_minute(number_per_minute, 5))),
        }
    }

    /// Create a permissive rate limiter for testing.
    pub fn permissive() -> Self {
        Self::new(10_000, 10_000)
    }

    /// Spend one unit of each quota that applies to a request for `number`.
    fn admit(&self, number: Option<&str>) -> Result<(), ApiError> {
        if self.global.check().is_err() {
            warn!("Global pairing rate limit exceeded");
            return Err(ApiError::RateLimitExceeded);
        }

        if let Some(number) = number {
            if self.per_number.check_key(&number.to_string()).is_err() {
                warn!(number = %mask_number(number), "Per-number pairing rate limit exceeded");
                return Err(ApiError::RateLimitExceeded);
            }
        }

        // Idle numbers would otherwise accumulate in the keyed store
        self.per_number.retain_recent();
        Ok(())
    }
}

/// Normalized `number` query parameter, if present and valid.
fn requested_number(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<PairQuery>::try_from_uri(uri).ok()?;
    normalize_number(query.number.as_deref()?).ok()
}

/// Keep the country prefix and last two digits, e.g. `1555***00`.
pub fn mask_number(number: &str) -> String {
    if number.len() <= 6 {
        return "*".repeat(number.len());
    }
    format!("{}***{}", &number[..4], &number[number.len() - 2..])
}

/// Returns 429 once the global quota, or the requested number's quota, is used up.
///
/// Requests without a valid number only count against the global quota and
/// are left for the handler to reject.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let number = requested_number(request.uri());
    rate_limit.admit(number.as_deref())?;
    Ok(next.run(request).await)
}

/// Request logging with phone numbers masked.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let number = requested_number(request.uri()).map(|n| mask_number(&n));
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();
    let number = number.as_deref().unwrap_or("-");

    if status.is_success() {
        debug!(%method, %path, number, %status, ?duration, "Request completed");
    } else {
        warn!(%method, %path, number, %status, ?duration, "Request failed");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_quota_exhaustion() {
        let state = RateLimitState::new(1, 100);

        assert!(state.admit(None).is_ok());
        assert!(matches!(state.admit(Some("15550100")), Err(ApiError::RateLimitExceeded)));
    }

    #[test]
    fn test_per_number_quota_is_independent() {
        let state = RateLimitState::new(100, 1);

        assert!(state.admit(Some("15550100")).is_ok());
        assert!(state.admit(Some("15550100")).is_err());
        assert!(state.admit(Some("14155551234")).is_ok());
        assert!(state.admit(None).is_ok());
    }

    #[test]
    fn test_zero_limits_fall_back() {
        let state = RateLimitState::new(0, 0);
        for _ in 0..5 {
            assert!(state.admit(Some("15550100")).is_ok());
        }
        assert!(state.admit(Some("15550100")).is_err());
    }

    #[test]
    fn test_requested_number_is_normalized() {
        let uri: Uri = "/pair?number=%2B1%20555%200100".parse().unwrap();
        assert_eq!(requested_number(&uri).as_deref(), Some("15550100"));

        let uri: Uri = "/pair?number=nope".parse().unwrap();
        assert_eq!(requested_number(&uri), None);

        let uri: Uri = "/health".parse().unwrap();
        assert_eq!(requested_number(&uri), None);
    }

    #[test]
    fn test_mask_number() {
        assert_eq!(mask_number("15550100"), "1555***00");
        assert_eq!(mask_number("14155551234"), "1415***34");
        assert_eq!(mask_number("12345"), "*****");
    }
}
