//! Registration ceremony proxying.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use super::login::session_grant_mutations;
use super::{bad_upstream, respond, string_field, ttl_field, verify_signed_response};
use crate::api::middleware::authorization_header;
use crate::gateway::{CookieMutation, CookieRole, Gateway, SessionClaims};

const DEFAULT_REGISTRATION_TTL_SECONDS: i64 = 600;

/// Start a registration upstream and bind the ceremony to this browser with
/// the registration cookie.
pub async fn register(State(gateway): State<Arc<Gateway>>, Json(body): Json<Value>) -> Response {
    let (status, data) = match gateway
        .upstream()
        .post("/registration/register", &body, None)
        .await
    {
        Ok(result) => result,
        Err(err) => {
            error!("Upstream registration call failed: {err:#}");
            return bad_upstream("Auth server unreachable");
        }
    };

    if !status.is_success() {
        return respond(&gateway, status, Some(data), &[]);
    }

    let Some(sub) = string_field(&data, "sub") else {
        return bad_upstream("Upstream response missing subject");
    };

    let mutations = vec![CookieMutation::Set {
        name: gateway
            .config()
            .cookie_name(CookieRole::Registration)
            .to_string(),
        payload: SessionClaims::access(sub, None),
        ttl_seconds: ttl_field(&data, "ttl", DEFAULT_REGISTRATION_TTL_SECONDS),
        domain: gateway.config().cookie_domain().map(str::to_string),
    }];

    respond(&gateway, StatusCode::OK, Some(data), &mutations)
}

/// Complete a registration ceremony. Like login completion, the upstream
/// grant is only trusted after its signature checks out.
pub async fn finish_register(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let authorization = authorization_header(&headers);
    let (status, data) = match gateway
        .upstream()
        .post("/webAuthn/register/finish", &body, authorization.as_deref())
        .await
    {
        Ok(result) => result,
        Err(err) => {
            error!("Upstream registration completion failed: {err:#}");
            return bad_upstream("Auth server unreachable");
        }
    };

    if !status.is_success() {
        return respond(&gateway, status, Some(data), &[]);
    }

    if let Err(response) = verify_signed_response(&gateway, &data).await {
        return response;
    }

    let mutations = match session_grant_mutations(&gateway, &data) {
        Ok(mutations) => mutations,
        Err(response) => return response,
    };

    respond(&gateway, StatusCode::NO_CONTENT, None, &mutations)
}
