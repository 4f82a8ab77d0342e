//! # Passaggio (Session-Authentication Gateway)
//!
//! `passaggio` sits between an application backend and its upstream identity
//! server. For every inbound request it decides whether a valid session is
//! present, transparently refreshes an expired session from a rotation
//! cookie, and, when calling upstream, identifies itself with a short-lived
//! signed service assertion instead of replaying end-user credentials.
//!
//! ## Session Model
//!
//! Sessions are entirely self-contained HS256-signed cookies; there is no
//! server-side session table. Rotation cookies carry only the subject and an
//! opaque rotation credential, never roles, so stale privileges cannot
//! survive a rotation.
//!
//! ## Trust Boundaries
//!
//! - Cookies are trusted only after local signature and expiry checks.
//! - The identity server is trusted only through response-provenance checks:
//!   login/registration completions carry an RS256 token verified against
//!   the server's published JWKS, and its subject must equal the payload
//!   subject.
//! - Routes not listed in the route table are unrestricted by design; every
//!   protected route must be enumerated.
//!
//! ## Status Codes
//!
//! `400` marks client flow errors (a required cookie was never presented),
//! `401` marks trust failures (invalid cookie, failed refresh). Refresh
//! failure always tears down the whole cookie session.

pub mod api;
pub mod cli;
pub mod gateway;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
