//! Service-identity assertions presented to the identity server.
//!
//! When the gateway calls upstream on behalf of a user it does not forward
//! the user's cookies. It mints a fresh HS256 assertion naming itself
//! (`iss`), the identity server (`aud`), and the acting subject (`sub`),
//! optionally proving possession of a rotation credential via the embedded
//! `refreshToken` claim. Assertions live for 60 seconds and are never reused
//! across requests.

use anyhow::{anyhow, Context, Result};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::config::GatewayConfig;

/// Fixed assertion lifetime. Long enough for one upstream round trip, short
/// enough that a leaked assertion is near-useless. Deliberately not
/// configurable.
pub const SERVICE_ASSERTION_TTL_SECONDS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceAssertionClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub jti: String,
    #[serde(rename = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Mints per-call service assertions from the gateway configuration.
#[derive(Debug, Clone)]
pub struct ServiceAssertionMinter {
    issuer: String,
    audience: String,
    key_id: String,
    service_secret: secrecy::SecretString,
}

impl ServiceAssertionMinter {
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            issuer: config.issuer().to_string(),
            audience: config.audience().to_string(),
            key_id: config.key_id().to_string(),
            service_secret: config.service_secret().clone(),
        }
    }

    /// Mint an assertion for `subject`, embedding `refresh_token` when the
    /// call proves possession of a rotation credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the service secret is absent or signing fails.
    /// A missing secret is a deployment error and must never degrade into an
    /// unsigned assertion.
    pub fn mint(
        &self,
        subject: &str,
        refresh_token: Option<&str>,
        now_unix_seconds: i64,
    ) -> Result<String> {
        if self.service_secret.expose_secret().is_empty() {
            return Err(anyhow!("Service secret is not configured"));
        }

        let claims = ServiceAssertionClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: subject.to_string(),
            jti: Ulid::new().to_string(),
            refresh_token: refresh_token.map(str::to_string),
        };

        gate_token::sign_hs256(
            &claims,
            self.service_secret.expose_secret().as_bytes(),
            SERVICE_ASSERTION_TTL_SECONDS,
            Some(&self.key_id),
            now_unix_seconds,
        )
        .context("Failed to sign service assertion")
    }
}
