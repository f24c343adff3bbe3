use axum::Json;
use axum::extract::State;
use std::sync::Arc;

use crate::AppState;
use crate::engine::VerifyOutcome;
use crate::types::{ApiError, HealthResponse, VerifyRequest};

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        sessions: state.engine.sessions().len(),
        intel_configured: state.engine.intel_configured(),
    })
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyOutcome>, ApiError> {
    let params = req.into_params()?;
    tracing::debug!(verification_id = %params.verification_id, "verify request");
    let outcome = state.engine.verify(params).await?;
    Ok(Json(outcome))
}
