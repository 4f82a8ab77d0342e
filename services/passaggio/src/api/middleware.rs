//! Transport glue between HTTP and the gateway decision core.
//!
//! This is the only place that reads `Cookie` headers or writes `Set-Cookie`
//! headers. The decision core works on plain maps and declarative mutations;
//! here those mutations become signed cookies with the deployment's
//! attributes.

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use secrecy::ExposeSecret;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::gateway::{now_unix_seconds, CookieMutation, Gateway, GatewayConfig, GatewayDecision};

/// Parse the request `Cookie` header into a name → value map.
#[must_use]
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let Some(header) = headers.get(COOKIE) else {
        return cookies;
    };
    let Ok(value) = header.to_str() else {
        return cookies;
    };
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let Some(key) = parts.next().map(str::trim) else {
            continue;
        };
        let Some(val) = parts.next().map(str::trim) else {
            continue;
        };
        if !key.is_empty() {
            cookies.insert(key.to_string(), val.to_string());
        }
    }
    cookies
}

/// Raw `Authorization` header, forwarded as-is to the identity server by the
/// ceremony-completion handlers.
#[must_use]
pub fn authorization_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Run the gateway state machine for every request.
///
/// Allowed requests proceed with the verified [`Identity`](crate::gateway::Identity)
/// attached as an extension; denied requests are answered here, with the
/// decision's mutations applied in both cases.
pub async fn ensure_session(
    State(gateway): State<Arc<Gateway>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let cookies = parse_cookies(request.headers());

    match gateway.ensure(&path, &cookies).await {
        GatewayDecision::Allow {
            identity,
            mutations,
        } => {
            if let Some(identity) = identity {
                request.extensions_mut().insert(identity);
            }
            let response = next.run(request).await;
            finish_with_mutations(response, &mutations, gateway.config())
        }
        GatewayDecision::Deny {
            status,
            message,
            mutations,
        } => {
            let response = (status, Json(json!({ "error": message }))).into_response();
            finish_with_mutations(response, &mutations, gateway.config())
        }
    }
}

fn finish_with_mutations(
    mut response: Response,
    mutations: &[CookieMutation],
    config: &GatewayConfig,
) -> Response {
    // A handler that already issued a cookie (e.g. logout clearing the
    // session it just rotated) wins over the decision's mutations.
    let handler_cookies: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split('=').next().map(str::to_string))
        .collect();
    let pending: Vec<CookieMutation> = mutations
        .iter()
        .filter(|mutation| !handler_cookies.iter().any(|name| name == mutation.name()))
        .cloned()
        .collect();

    if let Err(err) = apply_mutations(response.headers_mut(), &pending, config) {
        error!("Failed to apply cookie mutations: {err:#}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    response
}

/// Apply cookie mutations, in order, as `Set-Cookie` headers. `Set` payloads
/// are signed here with the cookie secret; the decision core never sees
/// serialized cookies.
///
/// # Errors
///
/// Returns an error if signing fails or a cookie value is not a valid header.
pub fn apply_mutations(
    headers: &mut HeaderMap,
    mutations: &[CookieMutation],
    config: &GatewayConfig,
) -> Result<()> {
    for mutation in mutations {
        let value = match mutation {
            CookieMutation::Set {
                name,
                payload,
                ttl_seconds,
                domain,
            } => {
                let token = gate_token::sign_hs256(
                    payload,
                    config.cookie_secret().expose_secret().as_bytes(),
                    *ttl_seconds,
                    None,
                    now_unix_seconds(),
                )
                .with_context(|| format!("Failed to sign \"{name}\" cookie"))?;
                session_cookie(
                    name,
                    &token,
                    *ttl_seconds,
                    domain.as_deref(),
                    config.cookie_secure(),
                )
            }
            CookieMutation::Clear { name } => {
                clear_cookie(name, config.cookie_domain(), config.cookie_secure())
            }
        }
        .with_context(|| format!("Invalid cookie header for \"{}\"", mutation.name()))?;

        headers.append(SET_COOKIE, value);
    }
    Ok(())
}

/// Build a secure `HttpOnly` cookie carrying a signed session token.
fn session_cookie(
    name: &str,
    token: &str,
    ttl_seconds: i64,
    domain: Option<&str>,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}");
    if let Some(domain) = domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_cookie(
    name: &str,
    domain: Option<&str>,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if let Some(domain) = domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
