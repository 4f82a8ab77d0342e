use crate::{
    api,
    gateway::{CookieRole, Gateway, GatewayConfig, RouteTable, UpstreamKeys},
};
use anyhow::{Context, Result};
use gate_token::Jwks;
use secrecy::SecretString;
use std::{fs, sync::Arc};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub upstream_url: String,
    pub issuer: String,
    pub audience: String,
    pub key_id: Option<String>,
    pub upstream_jwks_path: Option<String>,
    pub cookie_secret: SecretString,
    pub service_secret: SecretString,
    pub cookie_domain: Option<String>,
    pub access_cookie_name: String,
    pub registration_cookie_name: String,
    pub preauth_cookie_name: String,
    pub refresh_cookie_name: String,
    pub cookie_insecure: bool,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the configuration is invalid, the upstream keyset
/// cannot be loaded, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let mut config = GatewayConfig::new(
        args.upstream_url,
        args.cookie_secret,
        args.service_secret,
        args.issuer,
        args.audience,
    )?
    .with_cookie_domain(args.cookie_domain)
    .with_cookie_name(CookieRole::Access, args.access_cookie_name)
    .with_cookie_name(CookieRole::Registration, args.registration_cookie_name)
    .with_cookie_name(CookieRole::PreAuth, args.preauth_cookie_name)
    .with_refresh_cookie_name(args.refresh_cookie_name)
    .with_cookie_secure(!args.cookie_insecure);

    if let Some(key_id) = args.key_id {
        config = config.with_key_id(key_id);
    }

    let keys = if let Some(path) = &args.upstream_jwks_path {
        let keyset_json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read JWKS file: {path}"))?;
        let keyset = Jwks::from_json(&keyset_json).context("Invalid upstream JWKS JSON")?;
        Arc::new(UpstreamKeys::new(
            keyset,
            config.upstream_url().to_string(),
        ))
    } else {
        Arc::new(UpstreamKeys::new_remote(config.upstream_url(), crate::APP_USER_AGENT).await?)
    };

    let gateway = Arc::new(Gateway::new(config, RouteTable::standard(), keys)?);

    api::serve(args.port, gateway).await
}
