//! Sweep command: one pass, or a long-running job until Ctrl-C

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use loyalty_engine::SweepJob;

use super::{Paths, open_service};

pub async fn sweep_command(paths: &Paths, keep_running: bool) -> Result<()> {
    let service = Arc::new(open_service(paths)?);

    if !keep_running {
        let svc = service.clone();
        let report = tokio::task::spawn_blocking(move || SweepJob::run_once(&svc))
            .await
            .context("Sweep task failed")??;
        println!("Expired {} credits", report.expiry.expired);
        println!("  Re-credited: {}", report.expiry.recredited);
        println!("  Repaired:    {}", report.repaired.len());
        for member_id in &report.repaired {
            println!("    {}", member_id);
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let job = tokio::spawn(SweepJob::new(service).run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    job.await.context("Sweep job failed")?;

    Ok(())
}
