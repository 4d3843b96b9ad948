//! CLI command implementations for `mops`.
//!
//! Read-only commands open the JSONL stores directly; `serve` and
//! `trigger` assemble the full orchestrator.

pub mod config_cmd;
pub mod decide;
pub mod decisions;
pub mod registry_cmd;
pub mod runs;
pub mod serve;
pub mod trigger;

use std::path::Path;

use chrono::{DateTime, Utc};
use comfy_table::{Table, presets::UTF8_FULL};

use modelops_platform::{NativePlatform, Platform};
use modelops_services::decision::log::DecisionLog;
use modelops_services::registry::ModelRegistry;
use modelops_services::runs::RunStore;
use modelops_services::storage::{DECISIONS_FILE, REGISTRY_DIR, RUNS_FILE};
use modelops_types::config::Config;

pub fn platform() -> anyhow::Result<NativePlatform> {
    NativePlatform::new().map_err(|e| anyhow::anyhow!("failed to initialise HTTP client: {e}"))
}

/// Load configuration from the given path override or via auto-discovery.
///
/// Discovery order: `MODELOPS_CONFIG`, then `~/.modelops/config.json`,
/// then built-in defaults.
pub async fn load_config<P: Platform>(platform: &P, config_override: Option<&str>) -> anyhow::Result<Config> {
    modelops_platform::config_loader::load_config(
        platform.fs().as_ref(),
        platform.env(),
        config_override.map(Path::new),
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))
}

pub async fn open_runs<P: Platform>(config: &Config, platform: &P) -> anyhow::Result<RunStore> {
    let path = config.storage_dir().join(RUNS_FILE);
    RunStore::open(platform.fs(), path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open run store: {e}"))
}

pub async fn open_registry<P: Platform>(config: &Config, platform: &P) -> anyhow::Result<ModelRegistry> {
    let dir = config.storage_dir().join(REGISTRY_DIR);
    ModelRegistry::open(platform.fs(), dir)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open model registry: {e}"))
}

pub async fn open_decisions<P: Platform>(config: &Config, platform: &P) -> anyhow::Result<DecisionLog> {
    let path = config.storage_dir().join(DECISIONS_FILE);
    DecisionLog::open(platform.fs(), path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open decision log: {e}"))
}

pub fn table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table
}

/// Format a timestamp, or "-" if `None`.
pub fn format_ts(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".into(),
    }
}

/// Format a rate to three decimals, or "-" if `None`.
pub fn format_rate(value: Option<f64>) -> String {
    value.map_or_else(|| "-".into(), |v| format!("{v:.3}"))
}
