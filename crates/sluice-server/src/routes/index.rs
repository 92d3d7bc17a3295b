//! Service descriptor.

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub listeners: &'static str,
    pub logs: &'static str,
    pub health: &'static str,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub message: &'static str,
    pub version: &'static str,
    pub endpoints: Endpoints,
}

/// GET /
pub async fn index() -> Json<IndexResponse> {
    Json(IndexResponse {
        message: "sluice change dispatcher",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: Endpoints {
            listeners: "/api/v1/listeners",
            logs: "/api/v1/logs",
            health: "/health",
        },
    })
}
