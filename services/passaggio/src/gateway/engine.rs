//! Per-request decision engine.
//!
//! Combines the route table, the token codec, and the refresh orchestrator
//! into a single decision: allow, deny, or allow with rotated cookies.
//! Status codes are deliberate: 400 marks a client flow error (a required
//! cookie was never presented and there is no rotation path), 401 marks a
//! trust failure (invalid cookie, failed refresh). Cookie verification always
//! happens before any network call, and mutations are only attached to
//! terminal decisions.

use anyhow::Result;
use axum::http::StatusCode;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::assertion::ServiceAssertionMinter;
use super::client::UpstreamClient;
use super::config::GatewayConfig;
use super::decision::{CookieMutation, GatewayDecision, Identity, SessionClaims};
use super::keys::{ProvenanceClaims, ProvenanceError, UpstreamKeys};
use super::now_unix_seconds;
use super::refresh::RefreshOrchestrator;
use super::routes::RouteTable;

pub struct Gateway {
    config: GatewayConfig,
    routes: RouteTable,
    refresh: RefreshOrchestrator,
    keys: Arc<UpstreamKeys>,
    upstream: Arc<UpstreamClient>,
    minter: ServiceAssertionMinter,
}

impl Gateway {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the upstream
    /// client cannot be built.
    pub fn new(config: GatewayConfig, routes: RouteTable, keys: Arc<UpstreamKeys>) -> Result<Self> {
        config.validate_cookie_names()?;
        let upstream = Arc::new(UpstreamClient::new(
            config.upstream_url(),
            crate::APP_USER_AGENT,
        )?);
        let refresh = RefreshOrchestrator::new(&config, Arc::clone(&upstream));
        let minter = ServiceAssertionMinter::new(&config);

        Ok(Self {
            config,
            routes,
            refresh,
            keys,
            upstream,
            minter,
        })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    #[must_use]
    pub fn keys(&self) -> &UpstreamKeys {
        &self.keys
    }

    /// Mint a service assertion for an already-verified subject (used when
    /// proxying authenticated calls upstream).
    ///
    /// # Errors
    ///
    /// Returns an error if the service secret is missing or signing fails.
    pub fn mint_assertion(&self, subject: &str) -> Result<String> {
        self.minter.mint(subject, None, now_unix_seconds())
    }

    /// Verify that an upstream response token is authentic and was issued
    /// for `expected_sub`.
    ///
    /// # Errors
    ///
    /// Propagates [`ProvenanceError`]; callers must abort their flow.
    pub async fn authenticate_upstream_response(
        &self,
        token: &str,
        expected_sub: &str,
    ) -> Result<ProvenanceClaims, ProvenanceError> {
        self.keys.authenticate(token, expected_sub).await
    }

    /// Run the per-request state machine for `path` with the request's
    /// cookies.
    pub async fn ensure(
        &self,
        path: &str,
        cookies: &HashMap<String, String>,
    ) -> GatewayDecision {
        let now = now_unix_seconds();

        let Some(rule) = self.routes.resolve(path) else {
            return GatewayDecision::allow();
        };
        let cookie_name = self.config.cookie_name(rule.role);

        if let Some(value) = cookies.get(cookie_name) {
            return match gate_token::verify_hs256::<SessionClaims>(
                value,
                self.config.cookie_secret().expose_secret().as_bytes(),
                now,
            ) {
                Ok(claims) => GatewayDecision::allow_as(Identity::from(&claims)),
                Err(err) => {
                    debug!(cookie = %cookie_name, error = %err, "session cookie rejected");
                    GatewayDecision::deny(
                        StatusCode::UNAUTHORIZED,
                        format!("Invalid or expired \"{cookie_name}\" cookie"),
                    )
                }
            };
        }

        if !rule.required {
            return GatewayDecision::allow();
        }

        let Some(rotation_cookie) = cookies.get(self.config.refresh_cookie_name()) else {
            // Flow error, not an authentication failure: the client skipped a
            // step rather than presenting a bad credential.
            return GatewayDecision::deny(
                StatusCode::BAD_REQUEST,
                format!("Missing required cookie \"{cookie_name}\""),
            );
        };

        match self.refresh.refresh(rotation_cookie, now).await {
            Some(session) => {
                let domain = self.config.cookie_domain().map(str::to_string);
                let identity = Identity {
                    sub: session.sub.clone(),
                    roles: Some(session.roles.clone()),
                };
                GatewayDecision::Allow {
                    identity: Some(identity),
                    mutations: vec![
                        CookieMutation::Set {
                            name: cookie_name.to_string(),
                            payload: SessionClaims::access(
                                session.sub.as_str(),
                                Some(session.roles.clone()),
                            ),
                            ttl_seconds: session.ttl,
                            domain: domain.clone(),
                        },
                        CookieMutation::Set {
                            name: self.config.refresh_cookie_name().to_string(),
                            payload: SessionClaims::rotation(
                                session.sub.as_str(),
                                session.refresh_token.as_str(),
                            ),
                            ttl_seconds: session.refresh_ttl,
                            domain,
                        },
                    ],
                }
            }
            None => GatewayDecision::Deny {
                status: StatusCode::UNAUTHORIZED,
                message: "Session refresh failed".to_string(),
                mutations: self.teardown_mutations(),
            },
        }
    }

    /// Clear every session-bearing cookie. Used on refresh failure and by
    /// the logout handler.
    #[must_use]
    pub fn teardown_mutations(&self) -> Vec<CookieMutation> {
        use super::routes::CookieRole::{Access, Registration};
        vec![
            CookieMutation::Clear {
                name: self.config.cookie_name(Access).to_string(),
            },
            CookieMutation::Clear {
                name: self.config.cookie_name(Registration).to_string(),
            },
            CookieMutation::Clear {
                name: self.config.refresh_cookie_name().to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::config::test_support;
    use crate::gateway::routes::{CookieRole, RouteRule};
    use anyhow::anyhow;
    use gate_token::Jwks;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COOKIE_SECRET: &[u8] = b"cookie-secret-for-tests";

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn gateway(upstream_url: &str, routes: RouteTable) -> Result<Gateway> {
        let config = test_support::config(upstream_url);
        let keys = Arc::new(UpstreamKeys::new(
            Jwks { keys: Vec::new() },
            upstream_url.trim_end_matches('/').to_string(),
        ));
        Gateway::new(config, routes, keys)
    }

    fn cookies(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn access_cookie(sub: &str) -> Result<String> {
        Ok(gate_token::sign_hs256(
            &SessionClaims::access(sub, Some(vec!["user".to_string()])),
            COOKIE_SECRET,
            300,
            None,
            now_unix_seconds(),
        )?)
    }

    fn rotation_cookie(sub: &str) -> Result<String> {
        Ok(gate_token::sign_hs256(
            &SessionClaims::rotation(sub, "opaque-credential"),
            COOKIE_SECRET,
            3600,
            None,
            now_unix_seconds(),
        )?)
    }

    #[tokio::test]
    async fn unlisted_path_passes_without_identity() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let gateway = gateway(&server.uri(), RouteTable::standard())?;

        let decision = gateway.ensure("/public/docs", &cookies(&[])).await;
        assert_eq!(decision, GatewayDecision::allow());
        Ok(())
    }

    #[tokio::test]
    async fn valid_access_cookie_satisfies_requirement() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let gateway = gateway(&server.uri(), RouteTable::standard())?;

        let decision = gateway
            .ensure(
                "/users/me",
                &cookies(&[("passaggio_access", &access_cookie("u1")?)]),
            )
            .await;

        match decision {
            GatewayDecision::Allow {
                identity: Some(identity),
                mutations,
            } => {
                assert_eq!(identity.sub, "u1");
                assert_eq!(identity.roles.as_deref(), Some(&["user".to_string()][..]));
                assert!(mutations.is_empty());
            }
            other => return Err(anyhow!("unexpected decision: {other:?}")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn invalid_access_cookie_is_a_trust_failure() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let gateway = gateway(&server.uri(), RouteTable::standard())?;

        let decision = gateway
            .ensure("/users/me", &cookies(&[("passaggio_access", "garbage")]))
            .await;

        match decision {
            GatewayDecision::Deny {
                status, mutations, ..
            } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert!(mutations.is_empty());
            }
            other => return Err(anyhow!("unexpected decision: {other:?}")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn missing_cookie_without_rotation_path_is_a_flow_error() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let gateway = gateway(&server.uri(), RouteTable::standard())?;

        let decision = gateway.ensure("/users/me", &cookies(&[])).await;

        match decision {
            GatewayDecision::Deny {
                status,
                message,
                mutations,
            } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert!(message.contains("passaggio_access"));
                assert!(mutations.is_empty());
            }
            other => return Err(anyhow!("unexpected decision: {other:?}")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn optional_requirement_passes_when_cookie_absent() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let table = RouteTable::new(vec![RouteRule::new("/maybe", CookieRole::Access, false)]);
        let gateway = gateway(&server.uri(), table)?;

        let decision = gateway.ensure("/maybe/page", &cookies(&[])).await;
        assert_eq!(decision, GatewayDecision::allow());
        Ok(())
    }

    #[tokio::test]
    async fn rotation_cookie_refreshes_the_session() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "u1",
                "token": "t",
                "refreshToken": "r",
                "roles": ["user"],
                "ttl": 300,
                "refreshTtl": 3600
            })))
            .mount(&server)
            .await;

        let gateway = gateway(&server.uri(), RouteTable::standard())?;
        let decision = gateway
            .ensure(
                "/users/me",
                &cookies(&[("passaggio_refresh", &rotation_cookie("u1")?)]),
            )
            .await;

        match decision {
            GatewayDecision::Allow {
                identity: Some(identity),
                mutations,
            } => {
                assert_eq!(identity.sub, "u1");
                assert_eq!(mutations.len(), 2);
                match &mutations[0] {
                    CookieMutation::Set {
                        name,
                        payload,
                        ttl_seconds,
                        ..
                    } => {
                        assert_eq!(name, "passaggio_access");
                        assert_eq!(payload.sub, "u1");
                        assert_eq!(payload.roles.as_deref(), Some(&["user".to_string()][..]));
                        assert!(payload.refresh_token.is_none());
                        assert_eq!(*ttl_seconds, 300);
                    }
                    other => return Err(anyhow!("unexpected mutation: {other:?}")),
                }
                match &mutations[1] {
                    CookieMutation::Set {
                        name,
                        payload,
                        ttl_seconds,
                        ..
                    } => {
                        assert_eq!(name, "passaggio_refresh");
                        assert_eq!(payload.refresh_token.as_deref(), Some("r"));
                        assert!(payload.roles.is_none());
                        assert_eq!(*ttl_seconds, 3600);
                    }
                    other => return Err(anyhow!("unexpected mutation: {other:?}")),
                }
            }
            other => return Err(anyhow!("unexpected decision: {other:?}")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_tears_down_the_session() -> Result<()> {
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

        let gateway = gateway(&server.uri(), RouteTable::standard())?;
        let decision = gateway
            .ensure(
                "/users/me",
                &cookies(&[("passaggio_refresh", &rotation_cookie("u1")?)]),
            )
            .await;

        match decision {
            GatewayDecision::Deny {
                status, mutations, ..
            } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                let cleared: Vec<&str> =
                    mutations.iter().map(super::CookieMutation::name).collect();
                assert_eq!(
                    cleared,
                    vec![
                        "passaggio_access",
                        "passaggio_registration",
                        "passaggio_refresh"
                    ]
                );
                assert!(mutations
                    .iter()
                    .all(|m| matches!(m, CookieMutation::Clear { .. })));
            }
            other => return Err(anyhow!("unexpected decision: {other:?}")),
        }
        Ok(())
    }
}
