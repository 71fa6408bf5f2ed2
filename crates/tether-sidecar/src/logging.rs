//! Console logging for the sidecar
//!
//! `RUST_LOG` takes precedence over the `--log-level` flag.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = filter_for(level)?;

    Registry::default()
        .with(fmt::layer().with_target(true).with_filter(filter))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

fn filter_for(level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(level)?),
    }
}
