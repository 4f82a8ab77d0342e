//! Immutable gateway configuration.
//!
//! Built once at startup and passed into constructors; verification code
//! never reaches into the process environment. Secrets are wrapped in
//! [`SecretString`] and exposed only at signing/verification time.

use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::routes::CookieRole;

const DEFAULT_ACCESS_COOKIE: &str = "passaggio_access";
const DEFAULT_REGISTRATION_COOKIE: &str = "passaggio_registration";
const DEFAULT_PREAUTH_COOKIE: &str = "passaggio_preauth";
const DEFAULT_REFRESH_COOKIE: &str = "passaggio_refresh";
const DEFAULT_KEY_ID: &str = "passaggio-k1";

#[derive(Clone)]
pub struct GatewayConfig {
    upstream_url: String,
    cookie_domain: Option<String>,
    access_cookie_name: String,
    registration_cookie_name: String,
    preauth_cookie_name: String,
    refresh_cookie_name: String,
    cookie_secret: SecretString,
    service_secret: SecretString,
    issuer: String,
    audience: String,
    key_id: String,
    cookie_secure: bool,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets are deliberately absent from the debug output.
        f.debug_struct("GatewayConfig")
            .field("upstream_url", &self.upstream_url)
            .field("cookie_domain", &self.cookie_domain)
            .field("access_cookie_name", &self.access_cookie_name)
            .field("registration_cookie_name", &self.registration_cookie_name)
            .field("preauth_cookie_name", &self.preauth_cookie_name)
            .field("refresh_cookie_name", &self.refresh_cookie_name)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("key_id", &self.key_id)
            .field("cookie_secure", &self.cookie_secure)
            .finish_non_exhaustive()
    }
}

impl GatewayConfig {
    /// Build a configuration with defaulted cookie names and key id.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream URL is not http(s), or if any secret,
    /// issuer, or audience is empty. Misconfiguration is fatal here so it can
    /// never degrade into unsigned tokens at request time.
    pub fn new(
        upstream_url: impl Into<String>,
        cookie_secret: SecretString,
        service_secret: SecretString,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self> {
        let upstream_url = upstream_url.into();
        let parsed = Url::parse(&upstream_url)
            .with_context(|| format!("Invalid upstream URL: {upstream_url}"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(anyhow!(
                "Upstream URL must use http or https: {upstream_url}"
            ));
        }

        if cookie_secret.expose_secret().is_empty() {
            return Err(anyhow!("Cookie secret must not be empty"));
        }
        if service_secret.expose_secret().is_empty() {
            return Err(anyhow!("Service secret must not be empty"));
        }

        let issuer = issuer.into();
        let audience = audience.into();
        if issuer.is_empty() {
            return Err(anyhow!("Issuer must not be empty"));
        }
        if audience.is_empty() {
            return Err(anyhow!("Audience must not be empty"));
        }

        Ok(Self {
            upstream_url: upstream_url.trim_end_matches('/').to_string(),
            cookie_domain: None,
            access_cookie_name: DEFAULT_ACCESS_COOKIE.to_string(),
            registration_cookie_name: DEFAULT_REGISTRATION_COOKIE.to_string(),
            preauth_cookie_name: DEFAULT_PREAUTH_COOKIE.to_string(),
            refresh_cookie_name: DEFAULT_REFRESH_COOKIE.to_string(),
            cookie_secret,
            service_secret,
            issuer,
            audience,
            key_id: DEFAULT_KEY_ID.to_string(),
            cookie_secure: true,
        })
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain.filter(|d| !d.is_empty());
        self
    }

    /// Override a cookie name. Empty names are rejected later by
    /// [`Self::validate_cookie_names`].
    #[must_use]
    pub fn with_cookie_name(mut self, role: CookieRole, name: impl Into<String>) -> Self {
        match role {
            CookieRole::Access => self.access_cookie_name = name.into(),
            CookieRole::Registration => self.registration_cookie_name = name.into(),
            CookieRole::PreAuth => self.preauth_cookie_name = name.into(),
        }
        self
    }

    #[must_use]
    pub fn with_refresh_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.refresh_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    /// Only disable for plain-http development setups.
    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    /// # Errors
    ///
    /// Returns an error if any configured cookie name is empty.
    pub fn validate_cookie_names(&self) -> Result<()> {
        for (label, name) in [
            ("access", &self.access_cookie_name),
            ("registration", &self.registration_cookie_name),
            ("pre-auth", &self.preauth_cookie_name),
            ("refresh", &self.refresh_cookie_name),
        ] {
            if name.is_empty() {
                return Err(anyhow!("{label} cookie name must not be empty"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    #[must_use]
    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    /// Name of the cookie fulfilling a route requirement.
    #[must_use]
    pub fn cookie_name(&self, role: CookieRole) -> &str {
        match role {
            CookieRole::Access => &self.access_cookie_name,
            CookieRole::Registration => &self.registration_cookie_name,
            CookieRole::PreAuth => &self.preauth_cookie_name,
        }
    }

    #[must_use]
    pub fn refresh_cookie_name(&self) -> &str {
        &self.refresh_cookie_name
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    pub(crate) fn cookie_secret(&self) -> &SecretString {
        &self.cookie_secret
    }

    pub(crate) fn service_secret(&self) -> &SecretString {
        &self.service_secret
    }
}
