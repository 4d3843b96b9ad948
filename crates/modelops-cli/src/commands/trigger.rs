//! `mops trigger` -- start a manual run for a family.
//!
//! Waits for the run to finish and prints its stage results. A family
//! that already has an active run, in this or any other process sharing
//! the storage directory, is refused. `mops runs cancel` stops the run.

use clap::Args;

use modelops_platform::Platform;
use modelops_services::orchestrator::Orchestrator;
use modelops_types::config::Config;
use modelops_types::run::{RunStatus, TriggerKind};

use super::runs::print_run;

/// Arguments for the `trigger` subcommand.
#[derive(Args)]
pub struct TriggerArgs {
    /// Model family key.
    pub family: String,
}

pub async fn run<P: Platform>(args: TriggerArgs, config: Config, platform: &P) -> anyhow::Result<()> {
    config.family(&args.family)?;
    let orch = Orchestrator::from_platform(config, platform)
        .await
        .map_err(|e| anyhow::anyhow!("failed to start orchestrator: {e}"))?;

    let run_id = orch
        .scheduler
        .trigger_run(&args.family, TriggerKind::Manual)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Triggered {run_id}");

    let run = orch
        .scheduler
        .join(&run_id)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    print_run(&run);

    if run.status != RunStatus::Succeeded {
        anyhow::bail!("run {run_id} finished {}", run.status);
    }
    Ok(())
}
