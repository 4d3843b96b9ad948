//! `mops runs` -- inspect pipeline runs.

use modelops_platform::Platform;
use modelops_types::config::Config;
use modelops_types::run::PipelineRun;

use super::{format_ts, open_runs, table};

/// List runs in a table, oldest trigger first.
pub async fn runs_list<P: Platform>(config: &Config, platform: &P, family: Option<&str>) -> anyhow::Result<()> {
    let runs = open_runs(config, platform).await?.list(family).await?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    let mut table = table();
    table.set_header(["RUN", "FAMILY", "TRIGGER", "STATUS", "TRIGGERED", "FINISHED", "FAILED STAGE"]);
    for run in &runs {
        let failed = run
            .failed_stage()
            .map_or_else(|| "-".to_string(), |s| s.stage.to_string());
        table.add_row([
            run.id.clone(),
            run.family.clone(),
            run.trigger.to_string(),
            run.status.to_string(),
            format_ts(Some(run.triggered_at)),
            format_ts(run.finished_at),
            failed,
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Show one run and its stage results.
pub async fn runs_show<P: Platform>(config: &Config, platform: &P, run_id: &str) -> anyhow::Result<()> {
    let run = open_runs(config, platform)
        .await?
        .get(run_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("run not found: {run_id}"))?;
    print_run(&run);
    Ok(())
}

/// Ask the process executing `run_id` to stop it at its next stage
/// boundary. Works from any process sharing the storage directory.
pub async fn runs_cancel<P: Platform>(config: &Config, platform: &P, run_id: &str) -> anyhow::Result<()> {
    let runs = open_runs(config, platform).await?;
    runs.request_cancel(run_id).await?;
    println!("Cancellation requested for {run_id}; the run stops at its next stage boundary.");
    Ok(())
}

pub fn print_run(run: &PipelineRun) {
    println!("Run:       {}", run.id);
    println!("Family:    {}", run.family);
    println!("Trigger:   {}", run.trigger);
    println!("Status:    {}", run.status);
    println!("Triggered: {}", format_ts(Some(run.triggered_at)));
    println!("Finished:  {}", format_ts(run.finished_at));
    if run.cancel_requested {
        println!("Cancel requested");
    }

    let mut table = table();
    table.set_header(["STAGE", "STATUS", "ATTEMPTS", "STARTED", "ENDED", "ERROR"]);
    for stage in &run.stages {
        table.add_row([
            stage.stage.to_string(),
            stage.status.to_string(),
            stage.attempts.to_string(),
            format_ts(stage.started_at),
            format_ts(stage.ended_at),
            stage.error.clone().unwrap_or_else(|| "-".into()),
        ]);
    }
    println!("{table}");
}
