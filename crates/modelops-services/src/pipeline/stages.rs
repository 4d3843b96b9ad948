//! The work stages of the lifecycle pipeline.
//!
//! Notification is not here: it is driven by the pipeline itself because
//! it runs for every terminal run and never fails it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use modelops_types::config::{DecisionConfig, FamilyConfig};
use modelops_types::job::{EvaluationJob, JobRequest, TrainingJob};
use modelops_types::model::EvaluationMetrics;
use modelops_types::run::StageName;

use super::context::{DatasetInfo, RunContext, StageOutput};
use crate::decision::DecisionEngine;
use crate::decision::log::DecisionLog;
use crate::error::ServiceError;
use crate::executor::job::JobPoller;
use crate::executor::{Stage, StageError};
use crate::metrics::MetricsStore;
use crate::registry::ModelRegistry;

/// Registration tag: `good` or `needs_improvement`.
pub const TAG_QUALITY: &str = "quality";
/// Registration tag: when the artifact was trained.
pub const TAG_TRAINED_AT: &str = "trained_at";

fn family_config(ctx: &RunContext) -> Result<&FamilyConfig, StageError> {
    ctx.family_config.as_ref().ok_or_else(|| {
        StageError::Validation(format!("family {} is not configured", ctx.family))
    })
}

fn require<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T, StageError> {
    value
        .as_ref()
        .ok_or_else(|| StageError::Validation(format!("{what} missing from earlier stages")))
}

/// Validates the dataset descriptor and hyperparameters.
pub struct DataPreparation;

#[async_trait]
impl Stage for DataPreparation {
    fn name(&self) -> StageName {
        StageName::DataPreparation
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let family = family_config(ctx)?;
        let dataset = &family.dataset;
        dataset.validate().map_err(StageError::Validation)?;
        family
            .hyperparameters
            .validate()
            .map_err(StageError::Validation)?;

        let info = DatasetInfo {
            version: dataset.version.clone(),
            classes: dataset.classes.len(),
            train_images: dataset.train_images,
            val_images: dataset.val_images,
            test_images: dataset.test_images,
            total_images: dataset.total_images(),
        };
        info!(
            run_id = %ctx.run_id,
            dataset_version = %info.version,
            classes = info.classes,
            images = info.total_images,
            "dataset validated"
        );
        Ok(StageOutput::DatasetReady(info))
    }
}

/// Submits the training job and waits for its artifact.
pub struct Training {
    jobs: JobPoller,
}

impl Training {
    pub fn new(jobs: JobPoller) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl Stage for Training {
    fn name(&self) -> StageName {
        StageName::Training
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let family = family_config(ctx)?;
        let request = JobRequest::Train(TrainingJob {
            run_id: ctx.run_id.clone(),
            family: ctx.family.clone(),
            dataset: family.dataset.clone(),
            hyperparameters: family.hyperparameters.clone(),
        });

        let (handle, output) = self.jobs.run(&request).await?;
        let artifact_ref = output.artifact_ref.ok_or_else(|| StageError::JobFailed {
            job_id: handle.job_id.clone(),
            message: "training finished without an artifact reference".into(),
        })?;

        info!(run_id = %ctx.run_id, job_id = %handle.job_id, artifact = %artifact_ref, "training complete");
        Ok(StageOutput::Trained {
            job_id: handle.job_id,
            artifact_ref,
        })
    }
}

/// Evaluates the trained artifact and writes its metrics.
pub struct Evaluation {
    jobs: JobPoller,
    metrics: Arc<dyn MetricsStore>,
}

impl Evaluation {
    pub fn new(jobs: JobPoller, metrics: Arc<dyn MetricsStore>) -> Self {
        Self { jobs, metrics }
    }
}

#[async_trait]
impl Stage for Evaluation {
    fn name(&self) -> StageName {
        StageName::Evaluation
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let family = family_config(ctx)?;
        let artifact_ref = require(&ctx.artifact_ref, "trained artifact")?;

        // A resumed run keeps the metrics it already wrote.
        if let Some(metrics) = self.metrics.run_metrics(&ctx.run_id).await? {
            info!(run_id = %ctx.run_id, "metrics already written for run; skipping evaluation job");
            return Ok(StageOutput::Evaluated {
                job_id: String::new(),
                metrics,
            });
        }

        let request = JobRequest::Evaluate(EvaluationJob {
            run_id: ctx.run_id.clone(),
            family: ctx.family.clone(),
            artifact_ref: artifact_ref.clone(),
            dataset: family.dataset.clone(),
        });
        let (handle, output) = self.jobs.run(&request).await?;

        let metrics: EvaluationMetrics = output
            .metrics
            .ok_or_else(|| StageError::JobFailed {
                job_id: handle.job_id.clone(),
                message: "evaluation finished without metrics".into(),
            })?
            .with_derived_f1();
        metrics.validate().map_err(StageError::Validation)?;
        self.metrics.write_metrics(&ctx.run_id, &metrics).await?;

        info!(
            run_id = %ctx.run_id,
            map50 = metrics.map50,
            map50_95 = metrics.map50_95,
            precision = metrics.precision,
            recall = metrics.recall,
            f1 = metrics.f1,
            samples = metrics.sample_size,
            "evaluation complete"
        );
        Ok(StageOutput::Evaluated {
            job_id: handle.job_id,
            metrics,
        })
    }
}

/// Registers the evaluated artifact as a new model version.
pub struct Registration {
    registry: Arc<ModelRegistry>,
    metrics: Arc<dyn MetricsStore>,
    staging_map50: f64,
}

impl Registration {
    pub fn new(registry: Arc<ModelRegistry>, metrics: Arc<dyn MetricsStore>, staging_map50: f64) -> Self {
        Self {
            registry,
            metrics,
            staging_map50,
        }
    }
}

#[async_trait]
impl Stage for Registration {
    fn name(&self) -> StageName {
        StageName::Registration
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let artifact_ref = require(&ctx.artifact_ref, "trained artifact")?;
        let metrics = *require(&ctx.metrics, "evaluation metrics")?;

        let good = metrics.map50 > self.staging_map50;
        let quality = if good { "good" } else { "needs_improvement" };
        let tags = BTreeMap::from([
            (TAG_QUALITY.to_string(), quality.to_string()),
            (TAG_TRAINED_AT.to_string(), Utc::now().to_rfc3339()),
        ]);

        let mut version = self
            .registry
            .register_for_run(&ctx.run_id, &ctx.family, artifact_ref, metrics, tags)
            .await?;
        self.metrics.link_version(&version.id, &ctx.run_id).await?;

        if good {
            version = self.registry.mark_staging(&version.id).await?;
        }

        info!(
            run_id = %ctx.run_id,
            version = %version.id,
            stage = %version.stage,
            quality,
            "model registered"
        );
        Ok(StageOutput::Registered {
            version: version.id,
            stage: version.stage,
            quality: version
                .tags
                .get(TAG_QUALITY)
                .cloned()
                .unwrap_or_else(|| quality.to_string()),
        })
    }
}

/// Compares the candidate with the current production version.
pub struct AbDecision {
    registry: Arc<ModelRegistry>,
    metrics: Arc<dyn MetricsStore>,
    engine: DecisionEngine,
    log: Arc<DecisionLog>,
}

impl AbDecision {
    pub fn new(
        registry: Arc<ModelRegistry>,
        metrics: Arc<dyn MetricsStore>,
        config: DecisionConfig,
        log: Arc<DecisionLog>,
    ) -> Self {
        Self {
            registry,
            metrics,
            engine: DecisionEngine::new(config),
            log,
        }
    }
}

#[async_trait]
impl Stage for AbDecision {
    fn name(&self) -> StageName {
        StageName::AbDecision
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        if let Some(decision) = self.log.find_by_run(&ctx.run_id).await? {
            info!(run_id = %ctx.run_id, verdict = %decision.describe(), "reusing recorded decision");
            return Ok(StageOutput::Decided { decision });
        }

        let candidate = require(&ctx.version, "registered version")?;
        let candidate_metrics = match self.metrics.read_metrics(candidate).await {
            Ok(m) => m,
            Err(ServiceError::MetricsNotFound(_)) => *require(&ctx.metrics, "evaluation metrics")?,
            Err(e) => return Err(e.into()),
        };

        let baseline = self
            .registry
            .current_production(&ctx.family)
            .await?
            .filter(|v| &v.id != candidate);
        let baseline = match baseline {
            Some(version) => {
                let metrics = match self.metrics.read_metrics(&version.id).await {
                    Ok(m) => m,
                    Err(ServiceError::MetricsNotFound(_)) => {
                        warn!(version = %version.id, "baseline metrics missing from store; using registry snapshot");
                        version.metrics
                    }
                    Err(e) => return Err(e.into()),
                };
                Some((version.id, metrics))
            }
            None => None,
        };

        let decision = self.engine.decide(
            Some(&ctx.run_id),
            (candidate, &candidate_metrics),
            baseline.as_ref().map(|(id, m)| (id, m)),
            Utc::now(),
        );
        self.log.record(&decision).await?;
        Ok(StageOutput::Decided { decision })
    }
}

/// Applies a PROMOTE verdict to the registry. A REJECT leaves it untouched.
pub struct Promotion {
    registry: Arc<ModelRegistry>,
}

impl Promotion {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Stage for Promotion {
    fn name(&self) -> StageName {
        StageName::Promotion
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let decision = require(&ctx.decision, "promotion decision")?;

        if !decision.is_promote() {
            info!(
                run_id = %ctx.run_id,
                candidate = %decision.candidate,
                verdict = %decision.describe(),
                "candidate rejected; registry unchanged"
            );
            return Ok(StageOutput::Promoted {
                promoted: false,
                archived: None,
            });
        }

        let archived = self.registry.promote(&decision.candidate).await?;
        Ok(StageOutput::Promoted {
            promoted: true,
            archived,
        })
    }
}
