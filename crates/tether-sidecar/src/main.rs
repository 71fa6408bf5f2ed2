//! tether-sidecar - registers one service instance and keeps it alive until shutdown

use std::path::{Path, PathBuf};

use clap::Parser;
use tether::{HeartbeatEvent, Settings, Tether};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

mod logging;
mod shutdown;

const DEFAULT_CONFIG_PATH: &str = "conf/tether.yml";

/// Command line arguments for the sidecar
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Settings file; `conf/tether.yml` is used when present
    #[arg(short = 'c', long = "config", env = "TETHER_CONFIG")]
    config: Option<PathBuf>,
    /// Agent address, overrides `agent.address`
    #[arg(short = 'a', long = "agent")]
    agent: Option<String>,
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            default.exists().then(|| default.to_path_buf())
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level)?;

    let mut settings = Settings::load(cli.config_path().as_deref())?;
    if let Some(agent) = cli.agent {
        settings.agent.address = agent;
    }

    let record = settings.service_record()?;
    let tether = Tether::connect(settings.agent.clone())?
        .with_heartbeat_config(settings.heartbeat_config());
    info!(
        agent = %settings.agent.address,
        service_id = %record.id,
        "Registering {}",
        record.host_port()
    );

    let service_id = record.id.clone();
    // A failed registration is retried by the heartbeat's redo
    let registrar = match tether.register(record).await {
        Ok(registrar) => Some(registrar),
        Err(e) => {
            warn!("Initial registration failed, heartbeat keeps running: {}", e);
            tether.get(&service_id)
        }
    };

    if let Some(registrar) = &registrar {
        let mut events = registrar.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} heartbeat events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    shutdown::wait_for_shutdown_signal().await?;

    if let Err(e) = tether.shutdown().await {
        error!("Shutdown finished with errors: {}", e);
        return Err(e.into());
    }
    info!("Shutdown complete");
    Ok(())
}

fn log_event(event: &HeartbeatEvent) {
    match event {
        HeartbeatEvent::Refreshed { .. } => {}
        HeartbeatEvent::Reregistered { service_id } => {
            info!(service_id = %service_id, "Agent relearned the service")
        }
        other => warn!("Heartbeat degraded: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["tether-sidecar"]).unwrap();
        assert!(cli.agent.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "tether-sidecar",
            "--config",
            "/etc/tether.yml",
            "--agent",
            "consul:8500",
            "-l",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.config_path(), Some(PathBuf::from("/etc/tether.yml")));
        assert_eq!(cli.agent.as_deref(), Some("consul:8500"));
        assert_eq!(cli.log_level, "debug");
    }
}
