//! Login ceremony proxying.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use super::{bad_upstream, respond, roles_field, string_field, ttl_field, verify_signed_response};
use crate::api::middleware::authorization_header;
use crate::gateway::{CookieMutation, CookieRole, Gateway, SessionClaims};

const DEFAULT_PREAUTH_TTL_SECONDS: i64 = 300;

/// Start a login ceremony upstream. On success the upstream issues a
/// pre-auth token which, once its provenance is verified, is bound to the
/// browser through the pre-auth cookie.
pub async fn login(State(gateway): State<Arc<Gateway>>, Json(body): Json<Value>) -> Response {
    let (status, data) = match gateway.upstream().post("/login", &body, None).await {
        Ok(result) => result,
        Err(err) => {
            error!("Upstream login call failed: {err:#}");
            return bad_upstream("Auth server unreachable");
        }
    };

    if !status.is_success() {
        return respond(&gateway, status, Some(data), &[]);
    }

    if let Err(response) = verify_signed_response(&gateway, &data).await {
        return response;
    }
    // verify_signed_response guarantees both fields.
    let Some(sub) = string_field(&data, "sub") else {
        return bad_upstream("Upstream response missing subject");
    };
    let Some(token) = string_field(&data, "token") else {
        return bad_upstream("Upstream response missing signed token");
    };

    let mutations = vec![CookieMutation::Set {
        name: gateway.config().cookie_name(CookieRole::PreAuth).to_string(),
        payload: SessionClaims {
            sub: sub.to_string(),
            roles: None,
            token: Some(token.to_string()),
            refresh_token: None,
        },
        ttl_seconds: ttl_field(&data, "ttl", DEFAULT_PREAUTH_TTL_SECONDS),
        domain: gateway.config().cookie_domain().map(str::to_string),
    }];

    respond(&gateway, StatusCode::NO_CONTENT, None, &mutations)
}

/// Complete a login ceremony. The upstream response carries the full session
/// grant; its signature is authenticated before any cookie is minted.
pub async fn finish_login(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let authorization = authorization_header(&headers);
    let (status, data) = match gateway
        .upstream()
        .post("/webAuthn/login/finish", &body, authorization.as_deref())
        .await
    {
        Ok(result) => result,
        Err(err) => {
            error!("Upstream login completion failed: {err:#}");
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

    respond(&gateway, StatusCode::OK, Some(data), &mutations)
}

/// Cookie mutations for a completed login/registration: access cookie plus
/// rotation cookie, from the upstream grant.
pub(super) fn session_grant_mutations(
    gateway: &Gateway,
    data: &Value,
) -> Result<Vec<CookieMutation>, Response> {
    let Some(sub) = string_field(data, "sub") else {
        return Err(bad_upstream("Upstream response missing subject"));
    };
    let Some(refresh_token) = string_field(data, "refreshToken") else {
        return Err(bad_upstream("Upstream response missing rotation credential"));
    };
    let domain = gateway.config().cookie_domain().map(str::to_string);

    Ok(vec![
        CookieMutation::Set {
            name: gateway.config().cookie_name(CookieRole::Access).to_string(),
            payload: SessionClaims::access(sub, roles_field(data)),
            ttl_seconds: ttl_field(data, "ttl", DEFAULT_PREAUTH_TTL_SECONDS),
            domain: domain.clone(),
        },
        CookieMutation::Set {
            name: gateway.config().refresh_cookie_name().to_string(),
            payload: SessionClaims::rotation(sub, refresh_token),
            ttl_seconds: ttl_field(data, "refreshTtl", DEFAULT_PREAUTH_TTL_SECONDS),
            domain,
        },
    ])
}
