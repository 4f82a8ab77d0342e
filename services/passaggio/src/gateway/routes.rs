//! Route-to-cookie requirements.
//!
//! The table maps path prefixes to the cookie a request must present. It is
//! built once at startup and consulted read-only per request. Matching is
//! first-prefix-wins in declaration order; the configurer is expected to pick
//! non-ambiguous prefixes rather than rely on longest-prefix semantics.
//!
//! Security boundary: paths with no matching prefix are unrestricted. This is
//! a deliberate fail-open default: every protected route must be enumerated
//! in the table.

/// Which configured cookie a route requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieRole {
    /// Short-lived authenticated-session cookie.
    Access,
    /// Ephemeral cookie binding a multi-step login ceremony.
    PreAuth,
    /// Ephemeral cookie binding a registration ceremony.
    Registration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub prefix: String,
    pub role: CookieRole,
    pub required: bool,
}

impl RouteRule {
    #[must_use]
    pub fn new(prefix: impl Into<String>, role: CookieRole, required: bool) -> Self {
        Self {
            prefix: prefix.into(),
            role,
            required,
        }
    }
}

/// Ordered prefix table consulted per request.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    #[must_use]
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// The ceremony and session routes protected by the stock deployment.
    #[must_use]
    pub fn standard() -> Self {
        use CookieRole::{Access, PreAuth, Registration};
        Self::new(vec![
            RouteRule::new("/webAuthn/login/finish", PreAuth, true),
            RouteRule::new("/webAuthn/login/start", PreAuth, true),
            RouteRule::new("/webAuthn/register/start", Registration, true),
            RouteRule::new("/webAuthn/register/finish", Registration, true),
            RouteRule::new("/otp/verify-email-otp", Registration, true),
            RouteRule::new("/otp/verify-phone-otp", Registration, true),
            RouteRule::new("/logout", Access, true),
            RouteRule::new("/users/me", Access, true),
        ])
    }

    /// Resolve a request path to its requirement. First configured prefix
    /// for which the path starts-with wins; `None` means unrestricted.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&RouteRule> {
        self.rules
            .iter()
            .find(|rule| path.starts_with(rule.prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_standard_routes() {
        let table = RouteTable::standard();

        let rule = table.resolve("/users/me").expect("protected route");
        assert_eq!(rule.role, CookieRole::Access);
        assert!(rule.required);

        let rule = table.resolve("/otp/verify-email-otp").expect("protected");
        assert_eq!(rule.role, CookieRole::Registration);
    }

    #[test]
    fn prefix_match_covers_subpaths() {
        let table = RouteTable::standard();
        assert!(table.resolve("/users/me/credentials").is_some());
    }

    #[test]
    fn unlisted_paths_are_unrestricted() {
        let table = RouteTable::standard();
        assert!(table.resolve("/login").is_none());
        assert!(table.resolve("/health").is_none());
    }

    #[test]
    fn first_match_wins_in_declaration_order() {
        let table = RouteTable::new(vec![
            RouteRule::new("/api", CookieRole::Access, false),
            RouteRule::new("/api/admin", CookieRole::Access, true),
        ]);
        // The broader prefix was declared first, so it wins even though the
        // second rule matches more specifically.
        let rule = table.resolve("/api/admin/users").expect("match");
        assert!(!rule.required);
    }

    #[test]
    fn resolve_is_idempotent() {
        let table = RouteTable::standard();
        let first = table.resolve("/users/me").cloned();
        let second = table.resolve("/users/me").cloned();
        assert_eq!(first, second);
    }
}
