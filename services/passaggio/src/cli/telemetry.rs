use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Initialize tracing output.
///
/// The verbosity flag wins when present; otherwise `RUST_LOG` applies, with
/// errors-only as the fallback. Set `PASSAGGIO_LOG_JSON=1` for JSON lines.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(level: Option<Level>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::default().add_directive(level.into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
    };

    let json = std::env::var("PASSAGGIO_LOG_JSON")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let registry = Registry::default().with(filter);
    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    result.map_err(|err| anyhow!("Failed to initialize tracing: {err}"))
}
