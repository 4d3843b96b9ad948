//! Terminal-run notifications.
//!
//! Every run that reaches a terminal state produces one
//! [`RunNotification`]: `{run_id, status, summary}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::{ReasonCode, Verdict};
use crate::model::{EvaluationMetrics, VersionId};
use crate::run::{RunStatus, StageName, TriggerKind};

/// Human- and machine-readable outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub family: String,
    pub trigger: TriggerKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<VersionId>,

    /// `good` or `needs_improvement`, from the registration quality bar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EvaluationMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<ReasonCode>,

    /// Whether this run changed the production model.
    #[serde(default)]
    pub promoted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<StageName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Link to the family in the model registry UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,

    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// One-line description for logs and chat sinks.
    pub fn headline(&self, status: RunStatus) -> String {
        let mut line = format!("[{}] {} run {}", self.family, self.trigger, status);
        if let Some(version) = &self.model_version {
            line.push_str(&format!(", model {version}"));
        }
        if let Some(metrics) = &self.metrics {
            line.push_str(&format!(", mAP50 {:.3}", metrics.map50));
        }
        if let Some(verdict) = self.verdict {
            line.push_str(&format!(", verdict {verdict}"));
            if !self.reasons.is_empty() {
                let reasons: Vec<String> = self.reasons.iter().map(ToString::to_string).collect();
                line.push_str(&format!(" ({})", reasons.join(", ")));
            }
        }
        if let Some(stage) = self.failed_stage {
            line.push_str(&format!(", failed at {stage}"));
            if let Some(attempts) = self.attempts {
                line.push_str(&format!(" after {attempts} attempt(s)"));
            }
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(": {error}"));
        }
        line
    }
}

/// Payload delivered to notification sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunNotification {
    pub run_id: String,
    pub status: RunStatus,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            family: "detector".into(),
            trigger: TriggerKind::Scheduled,
            model_version: None,
            quality: None,
            metrics: None,
            verdict: None,
            reasons: vec![],
            promoted: false,
            failed_stage: None,
            attempts: None,
            error: None,
            registry_url: None,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn headline_for_failure() {
        let s = RunSummary {
            failed_stage: Some(StageName::Training),
            attempts: Some(2),
            error: Some("trainer unreachable".into()),
            ..summary()
        };
        assert_eq!(
            s.headline(RunStatus::Failed),
            "[detector] scheduled run FAILED, failed at training after 2 attempt(s): trainer unreachable"
        );
    }

    #[test]
    fn headline_for_rejection() {
        let s = RunSummary {
            model_version: Some(VersionId::new("detector", 4)),
            metrics: Some(EvaluationMetrics::new(0.72, 0.5, 0.7, 0.7, 500)),
            verdict: Some(Verdict::Reject),
            reasons: vec![ReasonCode::InsufficientImprovement],
            ..summary()
        };
        let line = s.headline(RunStatus::Succeeded);
        assert!(line.contains("model detector:v4"));
        assert!(line.contains("mAP50 0.720"));
        assert!(line.contains("verdict REJECT (InsufficientImprovement)"));
    }

    #[test]
    fn notification_serializes_compactly() {
        let n = RunNotification {
            run_id: "run-1".into(),
            status: RunStatus::Failed,
            summary: summary(),
        };
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["status"], "failed");
        assert!(value["summary"].get("reasons").is_none());
        assert_eq!(value["summary"]["promoted"], false);
    }
}
