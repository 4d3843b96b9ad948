//! Inter-stage context.
//!
//! Each stage consumes what earlier stages produced. Outputs are persisted
//! on the stage's [`StageResult`](modelops_types::run::StageResult), so a
//! resumed run rebuilds its context from the log instead of re-running
//! succeeded stages.

use serde::{Deserialize, Serialize};

use modelops_types::config::FamilyConfig;
use modelops_types::decision::PromotionDecision;
use modelops_types::model::{EvaluationMetrics, ModelStage, VersionId};
use modelops_types::run::{PipelineRun, TriggerKind};

use crate::error::Result;

/// Summary of a validated dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub version: String,
    pub classes: usize,
    pub train_images: u64,
    pub val_images: u64,
    pub test_images: u64,
    pub total_images: u64,
}

/// What a stage hands to the stages after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    DatasetReady(DatasetInfo),
    Trained {
        job_id: String,
        artifact_ref: String,
    },
    Evaluated {
        job_id: String,
        metrics: EvaluationMetrics,
    },
    Registered {
        version: VersionId,
        stage: ModelStage,
        quality: String,
    },
    Decided {
        decision: PromotionDecision,
    },
    Promoted {
        promoted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        archived: Option<VersionId>,
    },
}

/// Everything known about a run while it executes.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub family: String,
    pub trigger: TriggerKind,
    /// `None` when the family was removed from the config after the run
    /// was created.
    pub family_config: Option<FamilyConfig>,
    pub dataset: Option<DatasetInfo>,
    pub artifact_ref: Option<String>,
    pub metrics: Option<EvaluationMetrics>,
    pub version: Option<VersionId>,
    pub quality: Option<String>,
    pub decision: Option<PromotionDecision>,
    pub promoted: bool,
    pub archived: Option<VersionId>,
}

impl RunContext {
    pub fn new(run: &PipelineRun, family_config: Option<FamilyConfig>) -> Self {
        Self {
            run_id: run.id.clone(),
            family: run.family.clone(),
            trigger: run.trigger,
            family_config,
            dataset: None,
            artifact_ref: None,
            metrics: None,
            version: None,
            quality: None,
            decision: None,
            promoted: false,
            archived: None,
        }
    }

    /// Rebuild the context of a partially executed run from the outputs
    /// of its succeeded stages.
    pub fn restore(run: &PipelineRun, family_config: Option<FamilyConfig>) -> Result<Self> {
        let mut ctx = Self::new(run, family_config);
        for result in run.stages.iter().filter(|s| s.is_succeeded()) {
            if let Some(value) = &result.output {
                let output: StageOutput = serde_json::from_value(value.clone())?;
                ctx.absorb(&output);
            }
        }
        Ok(ctx)
    }

    pub fn absorb(&mut self, output: &StageOutput) {
        match output {
            StageOutput::DatasetReady(info) => self.dataset = Some(info.clone()),
            StageOutput::Trained { artifact_ref, .. } => {
                self.artifact_ref = Some(artifact_ref.clone());
            }
            StageOutput::Evaluated { metrics, .. } => self.metrics = Some(*metrics),
            StageOutput::Registered {
                version, quality, ..
            } => {
                self.version = Some(version.clone());
                self.quality = Some(quality.clone());
            }
            StageOutput::Decided { decision } => self.decision = Some(decision.clone()),
            StageOutput::Promoted { promoted, archived } => {
                self.promoted = *promoted;
                self.archived = archived.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops_types::run::{StageName, StageResult, StageStatus};

    fn succeeded(stage: StageName, output: &StageOutput) -> StageResult {
        StageResult {
            attempts: 1,
            status: StageStatus::Succeeded,
            output: Some(serde_json::to_value(output).unwrap()),
            ..StageResult::pending(stage)
        }
    }

    #[test]
    fn output_json_is_tagged() {
        let out = StageOutput::Trained {
            job_id: "job-1".into(),
            artifact_ref: "s3://best.pt".into(),
        };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["kind"], "trained");
        assert_eq!(value["artifact_ref"], "s3://best.pt");
    }

    #[test]
    fn restore_uses_only_succeeded_outputs() {
        let mut run = PipelineRun::new("detector", TriggerKind::Scheduled);
        run.upsert_stage(succeeded(
            StageName::Training,
            &StageOutput::Trained {
                job_id: "job-1".into(),
                artifact_ref: "s3://best.pt".into(),
            },
        ));
        let mut failed = succeeded(
            StageName::Evaluation,
            &StageOutput::Evaluated {
                job_id: "job-2".into(),
                metrics: EvaluationMetrics::new(0.7, 0.5, 0.8, 0.7, 100),
            },
        );
        failed.status = StageStatus::Running;
        run.upsert_stage(failed);

        let ctx = RunContext::restore(&run, None).unwrap();
        assert_eq!(ctx.run_id, run.id);
        assert_eq!(ctx.artifact_ref.as_deref(), Some("s3://best.pt"));
        assert!(ctx.metrics.is_none());
    }

    #[test]
    fn restore_rejects_corrupt_output() {
        let mut run = PipelineRun::new("detector", TriggerKind::Manual);
        let mut bad = StageResult::pending(StageName::Training);
        bad.status = StageStatus::Succeeded;
        bad.output = Some(serde_json::json!({"kind": "teleported"}));
        run.upsert_stage(bad);
        assert!(RunContext::restore(&run, None).is_err());
    }
}
