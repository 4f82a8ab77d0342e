//! Proxy handlers for the identity-server ceremony endpoints.
//!
//! Each handler forwards its request upstream, mirrors upstream failures
//! verbatim, and on success converts the response into cookie mutations for
//! the transport layer. Completion handlers additionally authenticate the
//! upstream response signature before trusting any subject it names.

pub mod health;
pub mod login;
pub mod logout;
pub mod me;
pub mod register;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::error;

use crate::api::middleware::apply_mutations;
use crate::gateway::{CookieMutation, Gateway};

pub(crate) fn string_field<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    data.get(field).and_then(Value::as_str)
}

pub(crate) fn roles_field(data: &Value) -> Option<Vec<String>> {
    data.get("roles").and_then(Value::as_array).map(|roles| {
        roles
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

pub(crate) fn ttl_field(data: &Value, field: &str, default: i64) -> i64 {
    data.get(field).and_then(Value::as_i64).unwrap_or(default)
}

/// Build a response and attach cookie mutations. Mutation failures are
/// internal errors, never silently dropped cookies.
pub(crate) fn respond(
    gateway: &Gateway,
    status: StatusCode,
    body: Option<Value>,
    mutations: &[CookieMutation],
) -> Response {
    let mut response = match body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    };
    if let Err(err) = apply_mutations(response.headers_mut(), mutations, gateway.config()) {
        error!("Failed to apply cookie mutations: {err:#}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    response
}

/// Upstream answered, but with a shape we cannot trust.
pub(crate) fn bad_upstream(message: &str) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// Authenticate the signed token embedded in an upstream response body and
/// cross-check it against the body's own subject. Aborts the flow on any
/// mismatch; the unverified payload is never used.
pub(crate) async fn verify_signed_response(
    gateway: &Gateway,
    data: &Value,
) -> Result<(), Response> {
    let Some(sub) = string_field(data, "sub") else {
        return Err(bad_upstream("Upstream response missing subject"));
    };
    let Some(token) = string_field(data, "token") else {
        return Err(bad_upstream("Upstream response missing signed token"));
    };

    match gateway.authenticate_upstream_response(token, sub).await {
        Ok(_) => Ok(()),
        Err(err) => {
            error!("Rejecting upstream response: {err}");
            Err(bad_upstream("Invalid signed response from auth server"))
        }
    }
}
