//! Upstream verification keys and response provenance.
//!
//! The identity server signs sensitive response payloads (login and
//! registration completions) with its private key and publishes the matching
//! JWKS at `/.well-known/jwks.json`. This module caches that keyset and
//! verifies that a claimed response really originated upstream and names the
//! expected subject.
//!
//! Caching: in-memory keyset with TTL; refresh on stale cache or unknown
//! `kid`, with a cooldown so a flood of unknown-kid tokens can't hammer the
//! identity server. If a refresh fails, the last known keyset keeps serving
//! so verification keeps working.

use anyhow::{anyhow, Context, Result};
use gate_token::Jwks;
use reqwest::{
    header::{ETAG, IF_NONE_MATCH},
    Client,
};
use serde::Deserialize;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, info_span, warn, Instrument};
use url::Url;

use super::now_unix_seconds;

const KEYSET_CACHE_TTL_SECONDS: u64 = 300;
const KEYSET_REFRESH_COOLDOWN_SECONDS: u64 = 30;
pub const JWKS_WELL_KNOWN_PATH: &str = "/.well-known/jwks.json";

/// Subject of an authenticated upstream response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProvenanceClaims {
    pub iss: String,
    pub sub: String,
}

/// Hard failures of response authentication. These abort the enclosing
/// login/registration flow; there is no fallback to the unverified payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProvenanceError {
    #[error("upstream response failed signature verification")]
    Verification,
    #[error("signed subject does not match response payload")]
    SubjectMismatch,
}

#[derive(Debug)]
enum KeysetSource {
    /// Keyset provided at construction and never refreshed.
    Static,
    /// Keyset fetched from the identity server and refreshed as needed.
    Remote { url: String, client: Client },
}

#[derive(Debug, Clone)]
struct KeysetCache {
    keys: Jwks,
    fetched_at: Instant,
    /// `ETag` from the last successful fetch, if the server provided one.
    etag: Option<String>,
}

impl KeysetCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < Duration::from_secs(KEYSET_CACHE_TTL_SECONDS)
    }
}

/// Health of the remote keyset dependency, reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    Ok,
    Error,
    /// Static keyset means no external dependency.
    Static,
}

impl DependencyStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Static => "static",
        }
    }

    #[must_use]
    pub const fn is_healthy(self) -> bool {
        !matches!(self, Self::Error)
    }
}

/// Cached resolver for the identity server's published verification keys.
#[derive(Debug)]
pub struct UpstreamKeys {
    source: KeysetSource,
    cache: RwLock<KeysetCache>,
    /// Expected `iss` on upstream-signed responses (the identity server's
    /// base URL).
    issuer: String,
    /// Timestamp throttling refresh attempts triggered by unknown kids.
    last_refresh_unix: AtomicU64,
}

impl UpstreamKeys {
    /// Build from a static keyset (tests, air-gapped deploys). No refresh.
    #[must_use]
    pub fn new(keys: Jwks, issuer: String) -> Self {
        Self {
            source: KeysetSource::Static,
            cache: RwLock::new(KeysetCache {
                keys,
                fetched_at: Instant::now(),
                etag: None,
            }),
            issuer,
            last_refresh_unix: AtomicU64::new(0),
        }
    }

    /// Build a resolver that fetches the JWKS from the identity server's
    /// well-known endpoint.
    ///
    /// The startup fetch is best-effort: if the identity server isn't ready
    /// yet, the resolver starts with an empty, stale keyset so verification
    /// fails closed until a refresh succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream URL is invalid or not https, or the
    /// HTTP client cannot be built.
    pub async fn new_remote(upstream_url: &str, user_agent: &str) -> Result<Self> {
        let parsed = Url::parse(upstream_url).context("Invalid upstream URL")?;
        if parsed.scheme() != "https" {
            return Err(anyhow!("Upstream JWKS URL must use https: {upstream_url}"));
        }
        let issuer = upstream_url.trim_end_matches('/').to_string();
        let url = format!("{issuer}{JWKS_WELL_KNOWN_PATH}");

        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("Failed to build JWKS HTTP client")?;

        let (keys, fetched_at, last_refresh_unix, etag) =
            match fetch_keyset(&client, &url, None).await {
                Ok(FetchOutcome::Updated { keys, etag }) => (
                    keys,
                    Instant::now(),
                    now_unix_seconds_u64(),
                    etag,
                ),
                Ok(FetchOutcome::NotModified) => {
                    warn!("upstream JWKS fetch returned not-modified during startup");
                    (empty_keyset(), stale_instant(), 0, None)
                }
                Err(err) => {
                    warn!(
                        url = %url,
                        error = %err,
                        "upstream JWKS fetch failed during startup; continuing with empty keyset"
                    );
                    (empty_keyset(), stale_instant(), 0, None)
                }
            };

        Ok(Self {
            source: KeysetSource::Remote { url, client },
            cache: RwLock::new(KeysetCache {
                keys,
                fetched_at,
                etag,
            }),
            issuer,
            last_refresh_unix: AtomicU64::new(last_refresh_unix),
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Authenticate an upstream-signed response token and check that it was
    /// issued for `expected_sub`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Verification`] when the signature, issuer,
    /// or expiry check fails and [`ProvenanceError::SubjectMismatch`] when a
    /// structurally valid token names a different subject. Both are fatal to
    /// the enclosing flow.
    pub async fn authenticate(
        &self,
        token: &str,
        expected_sub: &str,
    ) -> Result<ProvenanceClaims, ProvenanceError> {
        let claims = self
            .verify(token)
            .await
            .ok_or(ProvenanceError::Verification)?;

        if claims.sub != expected_sub {
            warn!(
                expected = %expected_sub,
                signed = %claims.sub,
                "upstream response subject mismatch"
            );
            return Err(ProvenanceError::SubjectMismatch);
        }

        Ok(claims)
    }

    /// Verify a token against the cached keyset; on unknown `kid`, refresh
    /// (with cooldown) and retry once.
    async fn verify(&self, token: &str) -> Option<ProvenanceClaims> {
        let keys = self.snapshot().await;

        match gate_token::verify_rs256(token, &keys, &self.issuer, now_unix_seconds()) {
            Ok(claims) => Some(claims),
            Err(gate_token::Error::UnknownKid(kid)) => match self.refresh_on_unknown_kid().await {
                Ok(true) => {
                    let keys = self.snapshot().await;
                    match gate_token::verify_rs256(token, &keys, &self.issuer, now_unix_seconds())
                    {
                        Ok(claims) => Some(claims),
                        Err(err) => {
                            error!("Upstream response verification failed after refresh: {err}");
                            None
                        }
                    }
                }
                Ok(false) => {
                    warn!(kid = %kid, "upstream key id not found and refresh suppressed");
                    None
                }
                Err(err) => {
                    error!("Upstream JWKS refresh failed: {err:#}");
                    None
                }
            },
            Err(err) => {
                error!("Upstream response verification failed: {err}");
                None
            }
        }
    }

    /// Return a keyset snapshot; refresh if stale, keep the cache if the
    /// refresh fails.
    async fn snapshot(&self) -> Jwks {
        let (cached, fresh) = {
            let cache = self.cache.read().await;
            (cache.keys.clone(), cache.is_fresh())
        };

        if fresh {
            return cached;
        }

        if let KeysetSource::Remote { url, .. } = &self.source {
            if let Err(err) = self.refresh_keyset().await {
                warn!(
                    error = %err,
                    url = %url,
                    "failed to refresh upstream JWKS cache"
                );
                return cached;
            }
        }

        let cache = self.cache.read().await;
        cache.keys.clone()
    }

    /// Fetch the JWKS from upstream and update the in-memory cache.
    async fn refresh_keyset(&self) -> Result<()> {
        let (url, client, etag) = match &self.source {
            KeysetSource::Static => return Ok(()),
            KeysetSource::Remote { url, client } => {
                let etag = self.cache.read().await.etag.clone();
                (url.clone(), client.clone(), etag)
            }
        };

        match fetch_keyset(&client, &url, etag.as_deref()).await? {
            FetchOutcome::NotModified => {
                let mut cache = self.cache.write().await;
                cache.fetched_at = Instant::now();
            }
            FetchOutcome::Updated { keys, etag } => {
                let mut cache = self.cache.write().await;
                cache.keys = keys;
                cache.fetched_at = Instant::now();
                cache.etag = etag;
                info!(
                    keyset_keys = cache.keys.keys.len(),
                    "upstream JWKS cache refreshed"
                );
            }
        }
        Ok(())
    }

    /// Report dependency status for `/health` by attempting a refresh.
    pub async fn dependency_status(&self) -> DependencyStatus {
        match &self.source {
            KeysetSource::Static => DependencyStatus::Static,
            KeysetSource::Remote { url, .. } => match self.refresh_keyset().await {
                Ok(()) => DependencyStatus::Ok,
                Err(err) => {
                    warn!(
                        error = %err,
                        url = %url,
                        "upstream JWKS fetch failed during health check"
                    );
                    DependencyStatus::Error
                }
            },
        }
    }

    /// Refresh when a token `kid` is unknown, with cooldown to avoid
    /// hammering the identity server.
    async fn refresh_on_unknown_kid(&self) -> Result<bool> {
        if matches!(&self.source, KeysetSource::Static) {
            return Ok(false);
        }
        let now = now_unix_seconds_u64();
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        if now.saturating_sub(last) < KEYSET_REFRESH_COOLDOWN_SECONDS {
            return Ok(false);
        }
        self.last_refresh_unix.store(now, Ordering::Relaxed);
        self.refresh_keyset().await?;
        Ok(true)
    }
}

fn now_unix_seconds_u64() -> u64 {
    u64::try_from(now_unix_seconds()).unwrap_or(0)
}

/// Empty keyset used when the startup fetch fails; forces verification to
/// fail closed.
fn empty_keyset() -> Jwks {
    Jwks { keys: Vec::new() }
}

/// An Instant that is already stale so the first use triggers a refresh.
fn stale_instant() -> Instant {
    Instant::now()
        .checked_sub(Duration::from_secs(KEYSET_CACHE_TTL_SECONDS + 1))
        .unwrap_or_else(Instant::now)
}

enum FetchOutcome {
    NotModified,
    Updated { keys: Jwks, etag: Option<String> },
}

async fn fetch_keyset(client: &Client, url: &str, etag: Option<&str>) -> Result<FetchOutcome> {
    let span = info_span!(
        "upstream.jwks.fetch",
        http.method = "GET",
        url = %url
    );
    async {
        let mut request = client.get(url);
        if let Some(etag_value) = etag {
            request = request.header(IF_NONE_MATCH, etag_value);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 304 {
            return Ok(FetchOutcome::NotModified);
        }
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!("upstream JWKS fetch failed: {status}"));
        }

        let keys = Jwks::from_json(&body).context("Invalid upstream JWKS JSON")?;
        Ok(FetchOutcome::Updated { keys, etag })
    }
    .instrument(span)
    .await
}
