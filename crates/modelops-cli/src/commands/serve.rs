//! `mops serve` -- run the scheduler until interrupted.
//!
//! Resumes runs whose process is gone, then fires scheduled runs for
//! every enabled family, looking for orphaned runs again on each tick.
//! Runs a live `mops trigger` is executing are left to it. Ctrl+C stops
//! the scheduler; runs still in flight are resumed on the next start.

use tokio_util::sync::CancellationToken;
use tracing::info;

use modelops_platform::Platform;
use modelops_services::orchestrator::Orchestrator;
use modelops_types::config::Config;

pub async fn run<P: Platform>(config: Config, platform: &P) -> anyhow::Result<()> {
    let orch = Orchestrator::from_platform(config, platform)
        .await
        .map_err(|e| anyhow::anyhow!("failed to start orchestrator: {e}"))?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            shutdown.cancel();
        }
    });

    orch.scheduler
        .start(cancel)
        .await
        .map_err(|e| anyhow::anyhow!("scheduler failed: {e}"))
}
