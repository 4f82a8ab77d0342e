//! Command-line argument dispatch and server initialization.
//!
//! Parses validated CLI arguments and maps them to the appropriate action,
//! such as starting the gateway with its full configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{cookies, upstream};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let upstream_opts = upstream::Options::parse(matches)?;
    let cookie_opts = cookies::Options::parse(matches)?;

    Ok(Action::Server(Box::new(Args {
        port,
        upstream_url: upstream_opts.upstream_url,
        issuer: upstream_opts.issuer,
        audience: upstream_opts.audience,
        key_id: upstream_opts.key_id,
        upstream_jwks_path: upstream_opts.jwks_path,
        cookie_secret: cookie_opts.cookie_secret,
        service_secret: cookie_opts.service_secret,
        cookie_domain: cookie_opts.cookie_domain,
        access_cookie_name: cookie_opts.access_cookie_name,
        registration_cookie_name: cookie_opts.registration_cookie_name,
        preauth_cookie_name: cookie_opts.preauth_cookie_name,
        refresh_cookie_name: cookie_opts.refresh_cookie_name,
        cookie_insecure: cookie_opts.cookie_insecure,
    })))
}
