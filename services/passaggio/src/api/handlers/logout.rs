//! Session teardown.

use axum::{extract::State, http::StatusCode, response::Response};
use std::sync::Arc;
use tracing::warn;

use super::respond;
use crate::gateway::Gateway;

/// End the session. The upstream logout is best-effort; the cookies are
/// cleared regardless, since a stale upstream session is recoverable but a
/// lingering local session is not.
pub async fn logout(State(gateway): State<Arc<Gateway>>) -> Response {
    if let Err(err) = gateway.upstream().get("/logout", None).await {
        warn!("Upstream logout failed: {err:#}");
    }

    respond(
        &gateway,
        StatusCode::NO_CONTENT,
        None,
        &gateway.teardown_mutations(),
    )
}
