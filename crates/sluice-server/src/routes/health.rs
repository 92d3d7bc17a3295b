//! Health check endpoint.

use std::collections::BTreeSet;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub listeners: usize,
    pub subscriptions: BTreeSet<String>,
}

/// Health check endpoint.
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let status = state.engine.status().await;

    Ok(Json(HealthResponse {
        status: if status.watching { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        listeners: status.listeners,
        subscriptions: status.subscriptions,
    }))
}
