//! HTTP request handlers.

use super::types::{HealthResponse, PairQuery, PairResponse, SessionSummary, SessionsResponse};
use super::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use session_core::{normalize_number, PairingOutcome};
use tracing::info;

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let bridge_healthy = state.coordinator.connector().health_check().await;
    let store_healthy = state.coordinator.store().health_check().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: state.coordinator.registry().count().await,
        bridge_healthy,
        store_healthy,
    })
}

/// Start pairing a number and return its pairing code.
pub async fn pair(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> Result<Json<PairResponse>, ApiError> {
    let number = query
        .number
        .filter(|n| !n.trim().is_empty())
        .ok_or(ApiError::MissingNumber)?;

    let outcome = state.coordinator.start(&number).await?;

    Ok(Json(match outcome {
        PairingOutcome::Code(code) => PairResponse::Code { code },
        PairingOutcome::AlreadyRegistered => {
            info!("Pairing skipped, number already registered");
            PairResponse::already_registered()
        }
    }))
}

/// List active sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let sessions: Vec<SessionSummary> = state
        .coordinator
        .registry()
        .list()
        .await
        .into_iter()
        .map(SessionSummary::from)
        .collect();

    let known_numbers = state
        .coordinator
        .store()
        .known_numbers()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(Json(SessionsResponse {
        total: sessions.len(),
        sessions,
        known_numbers,
    }))
}

/// Status of one number's active session.
pub async fn get_session(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    let number = normalize_number(&number).map_err(ApiError::InvalidNumber)?;

    match state.coordinator.registry().status(&number).await {
        Some(info) => Ok(Json(info.into())),
        None => Err(ApiError::NotFound(number)),
    }
}
