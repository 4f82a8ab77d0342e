//! Health endpoint reporting upstream-keys dependency status.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::gateway::Gateway;

pub async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    let upstream_keys = gateway.keys().dependency_status().await;
    let status = if upstream_keys.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if upstream_keys.is_healthy() { "ok" } else { "degraded" },
            "upstream_keys": upstream_keys.as_str(),
        })),
    )
        .into_response()
}
