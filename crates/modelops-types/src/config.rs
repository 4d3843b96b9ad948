//! Configuration schema types.
//!
//! Every section defaults sensibly so an empty JSON object is a valid
//! config. Fields accept both `snake_case` and `camelCase` names via
//! `#[serde(alias)]`; unknown fields are ignored for forward compatibility.
//!
//! Retry policy and decision thresholds are deployment tunables and live
//! here rather than in code.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModelOpsError, Result};
use crate::job::{Dataset, Hyperparameters};
use crate::run::StageName;

fn default_true() -> bool {
    true
}

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Where run, registry, metrics and decision logs are persisted.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Stage retry, timeout and polling policy.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Promotion thresholds.
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Recurring trigger settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// External training/evaluation job service.
    #[serde(default)]
    pub training: TrainingServiceConfig,

    /// Terminal-run notification sinks.
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Model families keyed by family name.
    #[serde(default)]
    pub families: BTreeMap<String, FamilyConfig>,
}

impl Config {
    /// Get the expanded storage directory.
    pub fn storage_dir(&self) -> PathBuf {
        let raw = &self.storage.dir;
        if let Some(rest) = raw.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(raw)
    }

    /// Look up a family, failing with [`ModelOpsError::UnknownFamily`].
    pub fn family(&self, key: &str) -> Result<&FamilyConfig> {
        self.families
            .get(key)
            .ok_or_else(|| ModelOpsError::UnknownFamily(key.to_string()))
    }

    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        self.decision.validate()?;
        if self.pipeline.poll_interval_secs == 0 {
            return Err(invalid("pipeline.poll_interval_secs must be positive"));
        }
        if self.pipeline.stage_timeout_secs == 0 {
            return Err(invalid("pipeline.stage_timeout_secs must be positive"));
        }
        if self.scheduler.tick_secs == 0 {
            return Err(invalid("scheduler.tick_secs must be positive"));
        }
        for key in self.families.keys() {
            if key.trim().is_empty() {
                return Err(invalid("family keys must be non-empty"));
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ModelOpsError {
    ModelOpsError::ConfigInvalid {
        reason: reason.into(),
    }
}

// ── Storage ──────────────────────────────────────────────────────────────

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the JSONL state files. `~/` is expanded.
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

fn default_storage_dir() -> String {
    "~/.modelops".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Retry budget for a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (1 means two attempts in total).
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    /// Fixed delay before each retry.
    #[serde(default = "default_backoff_secs", alias = "backoffSecs")]
    pub backoff_secs: u64,
}

fn default_max_retries() -> u32 {
    1
}
fn default_backoff_secs() -> u64 {
    300
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

/// Per-stage override of the pipeline defaults. Unset fields inherit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOverride {
    #[serde(default, alias = "maxRetries")]
    pub max_retries: Option<u32>,

    #[serde(default, alias = "backoffSecs")]
    pub backoff_secs: Option<u64>,

    #[serde(default, alias = "timeoutSecs")]
    pub timeout_secs: Option<u64>,
}

/// Stage execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    /// Upper bound on a single stage attempt, enforced by the orchestrator
    /// independently of the external job's own runtime.
    #[serde(default = "default_stage_timeout_secs", alias = "stageTimeoutSecs")]
    pub stage_timeout_secs: u64,

    /// How often external jobs are polled.
    #[serde(default = "default_poll_interval_secs", alias = "pollIntervalSecs")]
    pub poll_interval_secs: u64,

    /// Overrides keyed by stage name (`training`, `evaluation`, ...).
    #[serde(default)]
    pub stages: HashMap<StageName, StageOverride>,
}

fn default_stage_timeout_secs() -> u64 {
    24 * 60 * 60
}
fn default_poll_interval_secs() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            stage_timeout_secs: default_stage_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            stages: HashMap::new(),
        }
    }
}

/// Resolved execution policy for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl PipelineConfig {
    /// Merge the defaults with any override for `stage`.
    pub fn policy_for(&self, stage: StageName) -> StagePolicy {
        let overrides = self.stages.get(&stage);
        let max_retries = overrides
            .and_then(|o| o.max_retries)
            .unwrap_or(self.retry.max_retries);
        let backoff_secs = overrides
            .and_then(|o| o.backoff_secs)
            .unwrap_or(self.retry.backoff_secs);
        let timeout_secs = overrides
            .and_then(|o| o.timeout_secs)
            .unwrap_or(self.stage_timeout_secs);
        StagePolicy {
            max_retries,
            backoff: Duration::from_secs(backoff_secs),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// ── Decision ─────────────────────────────────────────────────────────────

/// Promotion gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Absolute quality gate: candidate mAP50 must exceed this.
    #[serde(default = "default_min_map50", alias = "minMap50")]
    pub min_map50: f64,

    /// Required relative gain over the baseline (0.05 = 5%).
    #[serde(default = "default_improvement_margin", alias = "improvementMargin")]
    pub improvement_margin: f64,

    /// Confidence level of the significance test.
    #[serde(default = "default_confidence_level", alias = "confidenceLevel")]
    pub confidence_level: f64,

    /// Minimum evaluated samples on each side for the significance test.
    #[serde(default = "default_min_sample_size", alias = "minSampleSize")]
    pub min_sample_size: u64,

    /// Registration quality bar: above this, a new version is staged.
    #[serde(default = "default_staging_map50", alias = "stagingMap50")]
    pub staging_map50: f64,
}

fn default_min_map50() -> f64 {
    0.6
}
fn default_improvement_margin() -> f64 {
    0.05
}
fn default_confidence_level() -> f64 {
    0.95
}
fn default_min_sample_size() -> u64 {
    100
}
fn default_staging_map50() -> f64 {
    0.7
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_map50: default_min_map50(),
            improvement_margin: default_improvement_margin(),
            confidence_level: default_confidence_level(),
            min_sample_size: default_min_sample_size(),
            staging_map50: default_staging_map50(),
        }
    }
}

impl DecisionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_map50) {
            return Err(invalid(format!(
                "decision.min_map50 must be in [0, 1], got {}",
                self.min_map50
            )));
        }
        if !(0.0..=1.0).contains(&self.staging_map50) {
            return Err(invalid(format!(
                "decision.staging_map50 must be in [0, 1], got {}",
                self.staging_map50
            )));
        }
        if !(self.improvement_margin.is_finite() && self.improvement_margin >= 0.0) {
            return Err(invalid(format!(
                "decision.improvement_margin must be non-negative, got {}",
                self.improvement_margin
            )));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(invalid(format!(
                "decision.confidence_level must be in (0, 1), got {}",
                self.confidence_level
            )));
        }
        Ok(())
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the scheduler checks for due families.
    #[serde(default = "default_tick_secs", alias = "tickSecs")]
    pub tick_secs: u64,

    /// Schedule used by families that do not set their own.
    #[serde(default = "default_schedule", alias = "defaultSchedule")]
    pub default_schedule: String,
}

fn default_tick_secs() -> u64 {
    60
}
fn default_schedule() -> String {
    "@weekly".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            default_schedule: default_schedule(),
        }
    }
}

// ── External services ────────────────────────────────────────────────────

/// Training/evaluation job service endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingServiceConfig {
    /// Base URL; jobs are posted to `{endpoint}/jobs`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Extra headers sent with every request (e.g. authorization).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Notification sinks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Webhook receiving `{run_id, status, summary}` as JSON.
    #[serde(default, alias = "webhookUrl")]
    pub webhook_url: Option<String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Registry UI base URL, linked from run summaries.
    #[serde(default, alias = "registryUrl")]
    pub registry_url: Option<String>,
}

// ── Families ─────────────────────────────────────────────────────────────

/// One model family.
///
/// Family keys pass through config key normalization, so they should be
/// lowercase (`crop-disease`, not `CropDisease`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    /// Disabled families are never triggered by the schedule.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cron expression or `@weekly`-style alias. Falls back to
    /// [`SchedulerConfig::default_schedule`].
    #[serde(default)]
    pub schedule: Option<String>,

    #[serde(default)]
    pub dataset: Dataset,

    #[serde(default)]
    pub hyperparameters: Hyperparameters,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: None,
            dataset: Dataset::default(),
            hyperparameters: Hyperparameters::default(),
        }
    }
}
