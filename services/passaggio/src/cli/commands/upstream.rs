use clap::{Arg, ArgMatches, Command};

pub const ARG_UPSTREAM_URL: &str = "upstream-url";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_AUDIENCE: &str = "audience";
pub const ARG_KEY_ID: &str = "key-id";
pub const ARG_UPSTREAM_JWKS_PATH: &str = "upstream-jwks-path";

#[derive(Debug, Clone)]
pub struct Options {
    pub upstream_url: String,
    pub issuer: String,
    pub audience: String,
    pub key_id: Option<String>,
    pub jwks_path: Option<String>,
}

impl Options {
    /// Parse upstream arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // Filter empty strings which clap might pass through if env vars are set to ""
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let upstream_url = get_non_empty(ARG_UPSTREAM_URL)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_UPSTREAM_URL}"))?;
        let issuer = get_non_empty(ARG_ISSUER)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_ISSUER}"))?;
        let audience = get_non_empty(ARG_AUDIENCE)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_AUDIENCE}"))?;

        Ok(Self {
            upstream_url,
            issuer,
            audience,
            key_id: get_non_empty(ARG_KEY_ID),
            jwks_path: get_non_empty(ARG_UPSTREAM_JWKS_PATH),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_UPSTREAM_URL)
                .long(ARG_UPSTREAM_URL)
                .help("Base URL of the upstream identity server")
                .env("PASSAGGIO_UPSTREAM_URL"),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Service assertion issuer (iss) identifying this gateway")
                .env("PASSAGGIO_ISSUER"),
        )
        .arg(
            Arg::new(ARG_AUDIENCE)
                .long(ARG_AUDIENCE)
                .help("Service assertion audience (aud), the identity server's name")
                .env("PASSAGGIO_AUDIENCE"),
        )
        .arg(
            Arg::new(ARG_KEY_ID)
                .long(ARG_KEY_ID)
                .help("Key id embedded in service assertion headers for rotation")
                .env("PASSAGGIO_KEY_ID"),
        )
        .arg(
            Arg::new(ARG_UPSTREAM_JWKS_PATH)
                .long(ARG_UPSTREAM_JWKS_PATH)
                .help("Path to a static JWKS file instead of the upstream well-known endpoint")
                .long_help(
                    "Path to a static JWKS file (JSON) used to verify upstream-signed responses.\n\nWhen omitted, the keyset is fetched from `{upstream-url}/.well-known/jwks.json` over https,\ncached (TTL ~5 minutes), and refreshed on unknown `kid` with a cooldown.",
                )
                .env("PASSAGGIO_UPSTREAM_JWKS_PATH"),
        )
}
