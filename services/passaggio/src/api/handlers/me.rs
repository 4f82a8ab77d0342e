//! Authenticated profile lookup, proxied upstream on behalf of the verified
//! session subject.

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use super::{bad_upstream, respond};
use crate::gateway::{CookieMutation, CookieRole, Gateway, Identity};

/// Fetch the current user from the identity server.
///
/// The gateway, not the browser, authenticates this call, by minting a
/// service assertion for the cookie-verified subject. The pre-auth cookie is
/// cleared either way: reaching this endpoint means any login ceremony is
/// finished.
pub async fn me(
    State(gateway): State<Arc<Gateway>>,
    identity: Option<Extension<Identity>>,
) -> Response {
    let Some(Extension(identity)) = identity else {
        // Only reachable if the route was wired without the session layer.
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let assertion = match gateway.mint_assertion(&identity.sub) {
        Ok(assertion) => assertion,
        Err(err) => {
            error!("Failed to mint service assertion: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let (status, data) = match gateway
        .upstream()
        .get("/users/me", Some(&format!("Bearer {assertion}")))
        .await
    {
        Ok(result) => result,
        Err(err) => {
            error!("Upstream profile lookup failed: {err:#}");
            return bad_upstream("Auth server unreachable");
        }
    };

    let clear_preauth = vec![CookieMutation::Clear {
        name: gateway.config().cookie_name(CookieRole::PreAuth).to_string(),
    }];

    let user = data.get("user").filter(|user| !user.is_null());
    if !status.is_success() || user.is_none() {
        return respond(
            &gateway,
            StatusCode::UNAUTHORIZED,
            Some(json!({ "error": "unauthenticated" })),
            &clear_preauth,
        );
    }

    let body = json!({
        "user": data.get("user"),
        "credentials": data.get("credentials"),
    });

    respond(&gateway, StatusCode::OK, Some(body), &clear_preauth)
}
