//! Rotation-token refresh orchestration.
//!
//! Flow Overview:
//! 1) Verify the rotation cookie locally; nothing leaves the process for an
//!    invalid cookie.
//! 2) Mint a service assertion embedding the opaque rotation credential.
//! 3) `GET /refresh` upstream with the assertion as bearer auth.
//! 4) Hand the fresh token pair back; every failure mode collapses to `None`
//!    so callers react uniformly (full session teardown).
//!
//! Two concurrent requests observing the same expired session would both
//! try to spend the same rotation credential; if upstream invalidates it on
//! first use, the loser is logged out through no fault of its own. Refreshes
//! are therefore single-flight per rotation token: concurrent callers join
//! the in-flight attempt and share its outcome, which stays joinable for a
//! short window after completion. The upstream call runs in a detached task
//! so an aborted request can never cancel a rotation the upstream may
//! already have consumed.

use base64ct::{Base64UrlUnpadded, Encoding};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, warn};

use super::assertion::ServiceAssertionMinter;
use super::client::{RefreshedSession, UpstreamClient};
use super::config::GatewayConfig;
use super::decision::SessionClaims;

/// How long a completed or in-flight refresh stays joinable. Doubles as a
/// small grace window for stragglers that raced the rotation.
const REFRESH_SHARE_WINDOW: Duration = Duration::from_secs(5);

type RefreshOutcome = Option<RefreshedSession>;

#[derive(Clone)]
struct Inflight {
    rx: watch::Receiver<Option<RefreshOutcome>>,
    started_at: Instant,
}

pub struct RefreshOrchestrator {
    minter: ServiceAssertionMinter,
    client: Arc<UpstreamClient>,
    cookie_secret: SecretString,
    inflight: Mutex<HashMap<String, Inflight>>,
}

impl RefreshOrchestrator {
    #[must_use]
    pub fn new(config: &GatewayConfig, client: Arc<UpstreamClient>) -> Self {
        Self {
            minter: ServiceAssertionMinter::new(config),
            client,
            cookie_secret: config.cookie_secret().clone(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh a session from a rotation cookie. `None` means the caller
    /// must treat the session as gone; the reason is only logged.
    pub async fn refresh(
        &self,
        rotation_cookie: &str,
        now_unix_seconds: i64,
    ) -> Option<RefreshedSession> {
        let claims = match gate_token::verify_hs256::<SessionClaims>(
            rotation_cookie,
            self.cookie_secret.expose_secret().as_bytes(),
            now_unix_seconds,
        ) {
            Ok(claims) => claims,
            Err(err) => {
                debug!(error = %err, "rotation cookie failed verification");
                return None;
            }
        };

        let Some(refresh_token) = claims.refresh_token else {
            warn!(sub = %claims.sub, "rotation cookie carries no rotation credential");
            return None;
        };

        let mut rx = self
            .join_or_start(rotation_cookie, claims.sub, refresh_token, now_unix_seconds)
            .await;

        let result = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone().flatten(),
            // Sender dropped without a result: the refresh task died.
            Err(_) => None,
        };
        result
    }

    /// Join an in-flight refresh for this rotation token, or start one.
    async fn join_or_start(
        &self,
        rotation_cookie: &str,
        sub: String,
        refresh_token: String,
        now_unix_seconds: i64,
    ) -> watch::Receiver<Option<RefreshOutcome>> {
        // Keyed by digest: raw rotation cookies never sit in the map.
        let key = fingerprint(rotation_cookie);

        let mut inflight = self.inflight.lock().await;
        inflight.retain(|_, entry| entry.started_at.elapsed() < REFRESH_SHARE_WINDOW);

        if let Some(entry) = inflight.get(&key) {
            debug!(sub = %sub, "joining in-flight session refresh");
            return entry.rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        let minter = self.minter.clone();
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            let outcome =
                perform_refresh(&minter, &client, &sub, &refresh_token, now_unix_seconds).await;
            let _ = tx.send(Some(outcome));
        });

        inflight.insert(
            key,
            Inflight {
                rx: rx.clone(),
                started_at: Instant::now(),
            },
        );

        rx
    }
}

async fn perform_refresh(
    minter: &ServiceAssertionMinter,
    client: &UpstreamClient,
    sub: &str,
    refresh_token: &str,
    now_unix_seconds: i64,
) -> RefreshOutcome {
    let assertion = match minter.mint(sub, Some(refresh_token), now_unix_seconds) {
        Ok(assertion) => assertion,
        Err(err) => {
            error!("Failed to mint service assertion: {err:#}");
            return None;
        }
    };

    match client.refresh(&assertion).await {
        Ok(session) => Some(session),
        Err(err) => {
            warn!("Upstream session refresh failed: {err:#}");
            None
        }
    }
}

fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    Base64UrlUnpadded::encode_string(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::assertion::ServiceAssertionClaims;
    use crate::gateway::config::test_support;
    use anyhow::{anyhow, Result};
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NOW: i64 = 1_700_000_000;
    const COOKIE_SECRET: &[u8] = b"cookie-secret-for-tests";

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn orchestrator(upstream_url: &str) -> Result<RefreshOrchestrator> {
        let config = test_support::config(upstream_url);
        let client = Arc::new(UpstreamClient::new(upstream_url, "passaggio-test/0.1")?);
        Ok(RefreshOrchestrator::new(&config, client))
    }

    fn rotation_cookie() -> Result<String> {
        Ok(gate_token::sign_hs256(
            &SessionClaims::rotation("u1", "opaque-credential"),
            COOKIE_SECRET,
            3600,
            None,
            NOW,
        )?)
    }

    fn refresh_body() -> serde_json::Value {
        json!({
            "sub": "u1",
            "token": "t",
            "refreshToken": "r",
            "roles": ["user"],
            "ttl": 300,
            "refreshTtl": 3600
        })
    }

    #[tokio::test]
    async fn invalid_rotation_cookie_skips_upstream() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refresh_body()))
            .expect(0)
            .mount(&server)
            .await;

        let orchestrator = orchestrator(&server.uri())?;
        let result = orchestrator.refresh("not-a-token", NOW).await;
        assert!(result.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rotation_cookie_without_credential_is_rejected() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refresh_body()))
            .expect(0)
            .mount(&server)
            .await;

        let cookie = gate_token::sign_hs256(
            &SessionClaims::access("u1", None),
            COOKIE_SECRET,
            3600,
            None,
            NOW,
        )?;
        let orchestrator = orchestrator(&server.uri())?;
        let result = orchestrator.refresh(&cookie, NOW).await;
        assert!(result.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_presents_a_service_assertion() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refresh_body()))
            .mount(&server)
            .await;

        let orchestrator = orchestrator(&server.uri())?;
        let session = orchestrator
            .refresh(&rotation_cookie()?, NOW)
            .await
            .ok_or_else(|| anyhow!("expected refreshed session"))?;
        assert_eq!(session.sub, "u1");

        let requests = server.received_requests().await.unwrap_or_default();
        let request = requests.first().ok_or_else(|| anyhow!("no request"))?;
        let authorization = request
            .headers
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| anyhow!("no authorization header"))?;
        let assertion = authorization
            .strip_prefix("Bearer ")
            .ok_or_else(|| anyhow!("not a bearer header"))?;

        let claims: ServiceAssertionClaims =
            gate_token::verify_hs256(assertion, b"service-secret-for-tests", NOW)?;
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.refresh_token.as_deref(), Some("opaque-credential"));
        assert_eq!(claims.iss, "passaggio");
        assert_eq!(claims.aud, "auth-server");
        Ok(())
    }

    #[tokio::test]
    async fn upstream_rejection_collapses_to_none() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "rotation token revoked"
            })))
            .mount(&server)
            .await;

        let orchestrator = orchestrator(&server.uri())?;
        let result = orchestrator.refresh(&rotation_cookie()?, NOW).await;
        assert!(result.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_upstream_call() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refresh_body()))
            .expect(1)
            .mount(&server)
            .await;

        let orchestrator = Arc::new(orchestrator(&server.uri())?);
        let cookie = rotation_cookie()?;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let orchestrator = Arc::clone(&orchestrator);
            let cookie = cookie.clone();
            handles.push(tokio::spawn(async move {
                orchestrator.refresh(&cookie, NOW).await
            }));
        }

        for handle in handles {
            let session = handle
                .await?
                .ok_or_else(|| anyhow!("expected refreshed session"))?;
            assert_eq!(session.sub, "u1");
        }
        Ok(())
    }
}
