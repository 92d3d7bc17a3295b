//! Route definitions for the REST API.

mod health;
mod index;
mod listeners;
mod logs;
mod rows;

use axum::{
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;

use crate::state::AppState;

/// Envelope for list responses.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub count: usize,
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            success: true,
            count: data.len(),
            data,
        }
    }
}

/// Envelope for create responses.
#[derive(Debug, Serialize)]
pub struct CreatedResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index::index))
        // Health check
        .route("/health", get(health::health_check))
        // Listener management
        .route(
            "/api/v1/listeners",
            get(listeners::list_listeners).post(listeners::create_listener),
        )
        .route("/api/v1/listeners/:id", delete(listeners::delete_listener))
        // Delivery log
        .route("/api/v1/logs", get(logs::list_logs))
        // Test data
        .route("/api/v1/test/rows/:table", post(rows::insert_row))
        // Attach state
        .with_state(state)
}

pub use health::*;
pub use index::*;
pub use listeners::*;
pub use logs::*;
pub use rows::*;
