//! Listener management endpoints.
//!
//! Writes only touch the store; the engine picks them up through its
//! configuration watcher.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use sluice_core::{parse_listener_id, Listener, ListenerStore, NewListener};
use tracing::info;

use super::{CreatedResponse, ListResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// List listeners, newest first.
/// GET /api/v1/listeners
pub async fn list_listeners(
    State(state): State<AppState>,
) -> ApiResult<Json<ListResponse<Listener>>> {
    let listeners = state.store.list().await?;
    Ok(Json(ListResponse::new(listeners)))
}

/// Create a listener.
/// POST /api/v1/listeners
pub async fn create_listener(
    State(state): State<AppState>,
    body: Result<Json<NewListener>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedResponse<Listener>>)> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let fields = request.validate()?;

    let listener = state.store.insert(fields).await?;
    info!(
        id = %listener.id,
        name = %listener.name,
        table = %listener.source_table,
        event = %listener.event,
        "Listener created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            success: true,
            message: "Listener created successfully".to_string(),
            data: listener,
        }),
    ))
}

/// Delete a listener. Unknown ids are not an error.
/// DELETE /api/v1/listeners/:id
pub async fn delete_listener(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_listener_id(&id)?;
    if state.store.delete(id).await? {
        info!(id = %id, "Listener deleted");
    }
    Ok(StatusCode::NO_CONTENT)
}
