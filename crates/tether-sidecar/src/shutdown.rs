//! Shutdown signal handling

use tracing::info;

/// Wait for Ctrl+C or SIGTERM
pub async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, deregistering...");
        }
        _ = terminate => {
            info!("Received SIGTERM, deregistering...");
        }
    }

    Ok(())
}
