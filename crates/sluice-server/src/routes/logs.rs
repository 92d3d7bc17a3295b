//! Delivery log endpoint.

use axum::{extract::State, Json};
use sluice_core::{DeliveryLog, DeliveryLogEntry};

use super::ListResponse;
use crate::error::ApiResult;
use crate::state::AppState;

/// Most entries returned by the log endpoint.
pub const LOG_LIMIT: usize = 100;

/// Recent delivery outcomes, newest first.
/// GET /api/v1/logs
pub async fn list_logs(
    State(state): State<AppState>,
) -> ApiResult<Json<ListResponse<DeliveryLogEntry>>> {
    let entries = state.store.recent(LOG_LIMIT).await?;
    Ok(Json(ListResponse::new(entries)))
}
