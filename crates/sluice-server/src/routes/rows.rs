//! Observed-row test endpoint.
//!
//! Inserts a row into any observed table so that a change notification is
//! published without an external writer.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use sluice_core::StoredRow;
use tracing::debug;

use super::CreatedResponse;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Insert a test row.
/// POST /api/v1/test/rows/:table
pub async fn insert_row(
    State(state): State<AppState>,
    Path(table): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedResponse<StoredRow>>)> {
    let Json(data) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let row = state.store.insert_row(&table, data).await?;
    debug!(table = %row.table, id = %row.id, "Test row inserted");

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            success: true,
            message: "Test row created".to_string(),
            data: row,
        }),
    ))
}
