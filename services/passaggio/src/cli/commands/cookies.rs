use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_COOKIE_SECRET: &str = "cookie-secret";
pub const ARG_SERVICE_SECRET: &str = "service-secret";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_ACCESS_COOKIE_NAME: &str = "access-cookie-name";
pub const ARG_REGISTRATION_COOKIE_NAME: &str = "registration-cookie-name";
pub const ARG_PREAUTH_COOKIE_NAME: &str = "preauth-cookie-name";
pub const ARG_REFRESH_COOKIE_NAME: &str = "refresh-cookie-name";
pub const ARG_COOKIE_INSECURE: &str = "cookie-insecure";

#[derive(Debug, Clone)]
pub struct Options {
    pub cookie_secret: SecretString,
    pub service_secret: SecretString,
    pub cookie_domain: Option<String>,
    pub access_cookie_name: String,
    pub registration_cookie_name: String,
    pub preauth_cookie_name: String,
    pub refresh_cookie_name: String,
    pub cookie_insecure: bool,
}

impl Options {
    /// Parse cookie arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a required secret is missing or empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let cookie_secret = get_non_empty(ARG_COOKIE_SECRET)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_COOKIE_SECRET}"))?;
        let service_secret = get_non_empty(ARG_SERVICE_SECRET)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_SERVICE_SECRET}"))?;

        let name_or_default = |id: &str, default: &str| {
            get_non_empty(id).unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            cookie_secret: SecretString::from(cookie_secret),
            service_secret: SecretString::from(service_secret),
            cookie_domain: get_non_empty(ARG_COOKIE_DOMAIN),
            access_cookie_name: name_or_default(ARG_ACCESS_COOKIE_NAME, "passaggio_access"),
            registration_cookie_name: name_or_default(
                ARG_REGISTRATION_COOKIE_NAME,
                "passaggio_registration",
            ),
            preauth_cookie_name: name_or_default(ARG_PREAUTH_COOKIE_NAME, "passaggio_preauth"),
            refresh_cookie_name: name_or_default(ARG_REFRESH_COOKIE_NAME, "passaggio_refresh"),
            cookie_insecure: matches.get_flag(ARG_COOKIE_INSECURE),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_COOKIE_SECRET)
                .long(ARG_COOKIE_SECRET)
                .help("Symmetric secret signing session cookies")
                .env("PASSAGGIO_COOKIE_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SERVICE_SECRET)
                .long(ARG_SERVICE_SECRET)
                .help("Symmetric secret signing service assertions")
                .env("PASSAGGIO_SERVICE_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Domain attribute for issued cookies")
                .env("PASSAGGIO_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_ACCESS_COOKIE_NAME)
                .long(ARG_ACCESS_COOKIE_NAME)
                .help("Name of the access cookie")
                .env("PASSAGGIO_ACCESS_COOKIE_NAME")
                .default_value("passaggio_access"),
        )
        .arg(
            Arg::new(ARG_REGISTRATION_COOKIE_NAME)
                .long(ARG_REGISTRATION_COOKIE_NAME)
                .help("Name of the registration ceremony cookie")
                .env("PASSAGGIO_REGISTRATION_COOKIE_NAME")
                .default_value("passaggio_registration"),
        )
        .arg(
            Arg::new(ARG_PREAUTH_COOKIE_NAME)
                .long(ARG_PREAUTH_COOKIE_NAME)
                .help("Name of the pre-auth ceremony cookie")
                .env("PASSAGGIO_PREAUTH_COOKIE_NAME")
                .default_value("passaggio_preauth"),
        )
        .arg(
            Arg::new(ARG_REFRESH_COOKIE_NAME)
                .long(ARG_REFRESH_COOKIE_NAME)
                .help("Name of the rotation (refresh) cookie")
                .env("PASSAGGIO_REFRESH_COOKIE_NAME")
                .default_value("passaggio_refresh"),
        )
        .arg(
            Arg::new(ARG_COOKIE_INSECURE)
                .long(ARG_COOKIE_INSECURE)
                .help("Omit the Secure cookie attribute (plain-http development only)")
                .env("PASSAGGIO_COOKIE_INSECURE")
                .action(ArgAction::SetTrue),
        )
}
