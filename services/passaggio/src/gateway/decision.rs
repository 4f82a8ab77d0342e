//! Decision and cookie-mutation values emitted by the gateway.
//!
//! A decision fully describes the outcome of one request: whether it may
//! proceed, which identity it carries, and which cookies the transport layer
//! must set or clear. Mutations are declarative; nothing here touches HTTP
//! headers directly.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Claims carried by session, rotation, and ceremony cookies.
///
/// `iat`/`exp` are stamped by the token codec at signing time and checked at
/// verification time, so they don't appear here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    /// Upstream-issued token echoed into pre-auth cookies during ceremonies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Opaque rotation credential. Present only on rotation cookies, which
    /// deliberately carry no roles.
    #[serde(rename = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl SessionClaims {
    /// Claims for an access or ceremony cookie.
    #[must_use]
    pub fn access(sub: impl Into<String>, roles: Option<Vec<String>>) -> Self {
        Self {
            sub: sub.into(),
            roles,
            token: None,
            refresh_token: None,
        }
    }

    /// Claims for a rotation cookie: subject plus the opaque rotation
    /// credential, nothing else.
    #[must_use]
    pub fn rotation(sub: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            roles: None,
            token: None,
            refresh_token: Some(refresh_token.into()),
        }
    }
}

/// The authenticated principal attached to an allowed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub sub: String,
    pub roles: Option<Vec<String>>,
}

impl From<&SessionClaims> for Identity {
    fn from(claims: &SessionClaims) -> Self {
        Self {
            sub: claims.sub.clone(),
            roles: claims.roles.clone(),
        }
    }
}

/// One cookie change requested by the gateway. Applied in order by the
/// transport layer, which owns serialization and cookie attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieMutation {
    Set {
        name: String,
        payload: SessionClaims,
        ttl_seconds: i64,
        domain: Option<String>,
    },
    Clear {
        name: String,
    },
}

impl CookieMutation {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Set { name, .. } | Self::Clear { name } => name,
        }
    }
}

/// Terminal outcome of the per-request state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayDecision {
    /// Continue the request pipeline, optionally with a verified identity
    /// and cookie rotations to apply alongside the eventual response.
    Allow {
        identity: Option<Identity>,
        mutations: Vec<CookieMutation>,
    },
    /// Short-circuit: the response is fully described here.
    Deny {
        status: StatusCode,
        message: String,
        mutations: Vec<CookieMutation>,
    },
}

impl GatewayDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self::Allow {
            identity: None,
            mutations: Vec::new(),
        }
    }

    #[must_use]
    pub fn allow_as(identity: Identity) -> Self {
        Self::Allow {
            identity: Some(identity),
            mutations: Vec::new(),
        }
    }

    #[must_use]
    pub fn deny(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Deny {
            status,
            message: message.into(),
            mutations: Vec::new(),
        }
    }

    #[must_use]
    pub fn mutations(&self) -> &[CookieMutation] {
        match self {
            Self::Allow { mutations, .. } | Self::Deny { mutations, .. } => mutations,
        }
    }
}
