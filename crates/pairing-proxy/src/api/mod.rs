//! HTTP API for the pairing proxy.

mod handlers;
mod middleware;
mod types;

pub use handlers::*;
pub use middleware::{logging_middleware, rate_limit_middleware, RateLimitState};
pub use types::*;

use axum::{middleware as axum_middleware, routing::get, Router};
use session_core::PairingCoordinator;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: PairingCoordinator,
}

impl AppState {
    pub fn new(coordinator: PairingCoordinator) -> Self {
        Self { coordinator }
    }
}

/// Create the API router with custom rate limiting.
pub fn create_router_with_rate_limit(state: AppState, rate_limit: RateLimitState) -> Router {
    let limited = Router::new()
        .route("/pair", get(handlers::pair))
        .route("/pair/code", get(handlers::pair))
        .route("/v1/sessions", get(handlers::list_sessions))
        .route("/v1/sessions/:number", get(handlers::get_session))
        .layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ));

    Router::new()
        // Health check (no rate limiting)
        .route("/health", get(handlers::health))
        .merge(limited)
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
