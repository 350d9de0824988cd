//! `jobscale run` — scale every worker group on an interval until Ctrl-C.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use jobscale_autoscale::Autoscaler;

pub async fn run(autoscaler: &Autoscaler, interval_secs: u64) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    };

    tokio::join!(
        autoscaler.run(Duration::from_secs(interval_secs), shutdown_rx),
        signal
    );
    info!("jobscale stopped");
    Ok(())
}
