//! HTTP endpoints of the facilitator.
//!
//! - `GET /supported` lists served `(version, scheme, network)` kinds
//! - `POST /verify` runs the verification gates on `{payload, details}`
//! - `POST /settle` verifies again and transfers on-chain
//! - `GET /health` reports liveness and the server version
//!
//! A body that is not valid JSON for the endpoint is a `400`. A payment
//! that fails a gate is a `200` with `valid: false` / `success: false`.
//! A facilitator that cannot reach its node answers `502`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use p402::facilitator::Facilitator;
use p402::proto::{
    SettleRequest, SettlementResult, SupportedResponse, VerificationResult, VerifyRequest,
};
use serde::Serialize;

use crate::error::ApiError;

/// Shared state of the HTTP handlers.
pub type FacilitatorState = Arc<dyn Facilitator>;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// Always `"ok"` while the server answers.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
}

/// `GET /supported`.
///
/// # Errors
///
/// Returns [`ApiError::Facilitator`] if a network handler fails.
pub async fn get_supported(
    State(facilitator): State<FacilitatorState>,
) -> Result<Json<SupportedResponse>, ApiError> {
    Ok(Json(facilitator.supported().await?))
}

/// `POST /verify`.
///
/// # Errors
///
/// Returns [`ApiError::InvalidBody`] for malformed JSON and
/// [`ApiError::Facilitator`] for infrastructure failures.
pub async fn post_verify(
    State(facilitator): State<FacilitatorState>,
    body: Bytes,
) -> Result<Json<VerificationResult>, ApiError> {
    let request: VerifyRequest = serde_json::from_slice(&body)?;
    let result = facilitator.verify(request).await?;
    if let Some(error) = result.error {
        tracing::info!(%error, "Verification failed");
    }
    Ok(Json(result))
}

/// `POST /settle`.
///
/// # Errors
///
/// Returns [`ApiError::InvalidBody`] for malformed JSON and
/// [`ApiError::Facilitator`] for infrastructure failures.
pub async fn post_settle(
    State(facilitator): State<FacilitatorState>,
    body: Bytes,
) -> Result<Json<SettlementResult>, ApiError> {
    let request: SettleRequest = serde_json::from_slice(&body)?;
    let result = facilitator.settle(request).await?;
    Ok(Json(result))
}

/// `GET /health`.
pub async fn get_health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Router with every facilitator endpoint.
pub fn facilitator_router(state: FacilitatorState) -> Router {
    Router::new()
        .route("/supported", get(get_supported))
        .route("/verify", post(post_verify))
        .route("/settle", post(post_settle))
        .route("/health", get(get_health))
        .with_state(state)
}
