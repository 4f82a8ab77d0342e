//! HTTP surface of the gateway.
//!
//! The router wires the ceremony proxy handlers behind the session layer;
//! everything session-related happens in [`middleware::ensure_session`]
//! before a handler runs. Request ids propagate end-to-end so one gateway
//! request can be correlated with its upstream calls.

pub mod handlers;
pub mod middleware;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

use crate::gateway::Gateway;

/// Build the gateway router with the session layer applied to every route.
#[must_use]
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/login", post(handlers::login::login))
        .route(
            "/webAuthn/login/finish",
            post(handlers::login::finish_login),
        )
        .route(
            "/registration/register",
            post(handlers::register::register),
        )
        .route(
            "/webAuthn/register/finish",
            post(handlers::register::finish_register),
        )
        .route("/logout", post(handlers::logout::logout))
        .route("/users/me", get(handlers::me::me))
        .route("/health", get(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &Request<Body>| {
                        HeaderValue::from_str(Ulid::new().to_string().as_str()).ok()
                    },
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(from_fn_with_state(
                    Arc::clone(&gateway),
                    middleware::ensure_session,
                )),
        )
        .with_state(gateway)
}

/// Start the server.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(port: u16, gateway: Arc<Gateway>) -> Result<()> {
    let app = router(gateway);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Gracefully shutdown");
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
