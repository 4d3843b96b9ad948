//! Pipeline run types.
//!
//! A [`PipelineRun`] is one train → evaluate → promote cycle for a model
//! family. It owns an ordered list of [`StageResult`] records, one per
//! stage that has been started, and an overall [`RunStatus`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created by the scheduler, not yet picked up.
    Pending,
    /// Stages are executing.
    Running,
    /// Every stage completed.
    Succeeded,
    /// A stage failed after exhausting its retry budget.
    Failed,
    /// Cancelled at a stage boundary.
    Cancelled,
}

impl RunStatus {
    /// Terminal runs are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// A retryable attempt failed and the next attempt is waiting on backoff.
    Retrying,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Retrying => "RETRYING",
        };
        f.write_str(s)
    }
}

/// The fixed, strictly sequential stages of the lifecycle pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    DataPreparation,
    Training,
    Evaluation,
    Registration,
    AbDecision,
    Promotion,
    Notification,
}

impl StageName {
    /// Execution order. Notification always runs last, even on failure.
    pub const PIPELINE: [StageName; 7] = [
        StageName::DataPreparation,
        StageName::Training,
        StageName::Evaluation,
        StageName::Registration,
        StageName::AbDecision,
        StageName::Promotion,
        StageName::Notification,
    ];

    /// Snake-case key used in config files and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataPreparation => "data_preparation",
            Self::Training => "training",
            Self::Evaluation => "evaluation",
            Self::Registration => "registration",
            Self::AbDecision => "ab_decision",
            Self::Promotion => "promotion",
            Self::Notification => "notification",
        }
    }

    /// Position of this stage in [`StageName::PIPELINE`].
    pub fn index(self) -> usize {
        Self::PIPELINE
            .iter()
            .position(|s| *s == self)
            .unwrap_or(Self::PIPELINE.len())
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PIPELINE
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fired by the recurring schedule.
    Scheduled,
    /// Requested by an operator.
    Manual,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => f.write_str("scheduled"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Record of one stage's execution within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,

    /// Number of attempts started so far (1 on the first try).
    #[serde(default)]
    pub attempts: u32,

    pub status: StageStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Error detail of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Artifact handed to the next stage. Persisted so an interrupted run
    /// can be resumed without re-running succeeded stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl StageResult {
    /// A fresh, not-yet-started result for `stage`.
    pub fn pending(stage: StageName) -> Self {
        Self {
            stage,
            attempts: 0,
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            output: None,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

/// One execution of the lifecycle pipeline for a model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run identifier (`run-<uuid>`).
    pub id: String,

    /// Model family key.
    pub family: String,

    pub trigger: TriggerKind,

    pub triggered_at: DateTime<Utc>,

    pub status: RunStatus,

    /// Stage results in execution order.
    #[serde(default)]
    pub stages: Vec<StageResult>,

    /// Set when cancellation has been requested; observed at the next
    /// stage boundary.
    #[serde(default)]
    pub cancel_requested: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Create a new PENDING run.
    pub fn new(family: impl Into<String>, trigger: TriggerKind) -> Self {
        Self {
            id: format!("run-{}", uuid::Uuid::new_v4()),
            family: family.into(),
            trigger,
            triggered_at: Utc::now(),
            status: RunStatus::Pending,
            stages: Vec::new(),
            cancel_requested: false,
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether this run still counts against the family's single active slot.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn stage(&self, name: StageName) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Insert or replace the result for `result.stage`, keeping pipeline order.
    pub fn upsert_stage(&mut self, result: StageResult) {
        match self.stages.iter_mut().find(|s| s.stage == result.stage) {
            Some(existing) => *existing = result,
            None => {
                self.stages.push(result);
                self.stages.sort_by_key(|s| s.stage.index());
            }
        }
    }

    /// The first stage (excluding Notification) that has not succeeded.
    ///
    /// Returns `None` when every work stage succeeded.
    pub fn resume_point(&self) -> Option<StageName> {
        StageName::PIPELINE
            .iter()
            .copied()
            .filter(|s| *s != StageName::Notification)
            .find(|s| !self.stage(*s).is_some_and(StageResult::is_succeeded))
    }

    /// The stage that failed, if any.
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages
            .iter()
            .filter(|s| s.stage != StageName::Notification)
            .find(|s| s.status == StageStatus::Failed)
    }
}
