use std::env;

use anyhow::{anyhow, Result};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub const LOG_ENV: &str = "DIEX_LOG";
const DEFAULT_LEVEL: &str = "warn";

/// Picks the filter directive: `--log-level`, then `DIEX_LOG`, then
/// `RUST_LOG`, then `warn`.
pub fn filter_directive(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| env::var(LOG_ENV).ok())
        .or_else(|| env::var("RUST_LOG").ok())
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

/// Installs a stderr subscriber so log lines never mix with command output.
pub fn init_logging(explicit: Option<&str>) -> Result<()> {
    let directive = filter_directive(explicit);
    let env_filter = EnvFilter::try_new(&directive)
        .or_else(|_| EnvFilter::try_new(DEFAULT_LEVEL))
        .map_err(|e| anyhow!("Invalid log filter '{}': {}", directive, e))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .without_time()
        .with_filter(env_filter);

    Registry::default()
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
