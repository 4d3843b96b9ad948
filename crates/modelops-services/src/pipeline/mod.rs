//! The lifecycle pipeline.
//!
//! A run executes its stages strictly in order:
//!
//! ```text
//! data_preparation -> training -> evaluation -> registration
//!     -> ab_decision -> promotion -> notification
//! ```
//!
//! Stage N+1 starts only after stage N succeeded. A failed stage skips
//! the remaining work stages and goes straight to notification, which runs
//! for every terminal run. Cancellation is honoured at stage boundaries.
//! The run's terminal status is written last.
//!
//! Once a run is RUNNING it always ends terminal: an error that escapes
//! the stages (unreadable persisted state, a store failure) fails the run
//! with that error as its cause, and it is still notified.

pub mod context;
pub mod stages;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use modelops_types::config::{Config, FamilyConfig};
use modelops_types::event::{RunNotification, RunSummary};
use modelops_types::run::{PipelineRun, RunStatus, StageName, StageResult, StageStatus};

use crate::error::Result;
use crate::executor::{Stage, StageExecutor};
use crate::notifier::Notifier;
use crate::runs::RunStore;
use context::RunContext;

/// Drives runs through the work stages and the notification stage.
pub struct Pipeline {
    config: Arc<Config>,
    runs: Arc<RunStore>,
    executor: StageExecutor,
    stages: Vec<Box<dyn Stage>>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    /// `stages` are the work stages in pipeline order. Notification is
    /// handled here.
    pub fn new(
        config: Arc<Config>,
        runs: Arc<RunStore>,
        stages: Vec<Box<dyn Stage>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let executor = StageExecutor::new(runs.clone(), config.pipeline.clone());
        Self {
            config,
            runs,
            executor,
            stages,
            notifier,
        }
    }

    pub fn runs(&self) -> &Arc<RunStore> {
        &self.runs
    }

    /// Execute (or resume) `run_id` until it reaches a terminal state.
    ///
    /// Stages that already succeeded are not re-run; their persisted
    /// outputs seed the run context.
    pub async fn execute(&self, run_id: &str, cancel: CancellationToken) -> Result<PipelineRun> {
        let run = self.runs.mark_running(run_id).await?;
        let family_config = self.config.families.get(&run.family).cloned();
        let mut ctx = RunContext::new(&run, family_config.clone());

        info!(
            run_id,
            family = %run.family,
            trigger = %run.trigger,
            resume_from = ?run.resume_point(),
            "pipeline run started"
        );

        let (status, cause) = match self.drive(&mut ctx, &run, family_config, &cancel).await {
            Ok(status) => (status, None),
            Err(e) => {
                error!(run_id, error = %e, "pipeline run aborted; failing it");
                (RunStatus::Failed, Some(e.to_string()))
            }
        };

        let run = match self.runs.require(run_id).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(run_id, error = %e, "could not reload run; notifying from its last known state");
                run
            }
        };
        let mut summary = self.summarize(&ctx, &run, status);
        if cause.is_some() {
            summary.error = cause;
        }
        if let Err(e) = self.notify(&run, status, summary).await {
            warn!(run_id, error = %e, "could not record the notification stage");
        }

        self.runs.finish(run_id, status).await
    }

    async fn drive(
        &self,
        ctx: &mut RunContext,
        run: &PipelineRun,
        family_config: Option<FamilyConfig>,
        cancel: &CancellationToken,
    ) -> Result<RunStatus> {
        *ctx = RunContext::restore(run, family_config)?;
        if run.failed_stage().is_some() {
            // Crashed between the failure and the terminal write.
            return Ok(RunStatus::Failed);
        }
        self.run_stages(ctx, run, cancel).await
    }

    async fn run_stages(&self, ctx: &mut RunContext, run: &PipelineRun, cancel: &CancellationToken) -> Result<RunStatus> {
        let Some(resume) = run.resume_point() else {
            return Ok(RunStatus::Succeeded);
        };

        for stage in self
            .stages
            .iter()
            .filter(|s| s.name().index() >= resume.index())
        {
            if cancel.is_cancelled() || self.runs.is_cancel_requested(&ctx.run_id).await? {
                info!(run_id = %ctx.run_id, next_stage = %stage.name(), "run cancelled at stage boundary");
                return Ok(RunStatus::Cancelled);
            }

            match self.executor.run(stage.as_ref(), ctx).await {
                Ok(output) => ctx.absorb(&output),
                Err(failure) => {
                    warn!(run_id = %ctx.run_id, error = %failure, "pipeline stage failed");
                    return Ok(RunStatus::Failed);
                }
            }
        }
        Ok(RunStatus::Succeeded)
    }

    fn summarize(&self, ctx: &RunContext, run: &PipelineRun, status: RunStatus) -> RunSummary {
        let failed = run.failed_stage();
        let registry_url = self
            .config
            .notifier
            .registry_url
            .as_deref()
            .map(|base| format!("{}/#/models/{}", base.trim_end_matches('/'), ctx.family));

        let mut error = failed.and_then(|s| s.error.clone());
        if status == RunStatus::Cancelled && error.is_none() {
            error = Some("cancelled".into());
        }

        RunSummary {
            family: ctx.family.clone(),
            trigger: ctx.trigger,
            model_version: ctx.version.clone(),
            quality: ctx.quality.clone(),
            metrics: ctx.metrics,
            verdict: ctx.decision.as_ref().map(|d| d.verdict),
            reasons: ctx
                .decision
                .as_ref()
                .map(|d| d.reasons.clone())
                .unwrap_or_default(),
            promoted: ctx.promoted,
            failed_stage: failed.map(|s| s.stage),
            attempts: failed.map(|s| s.attempts),
            error,
            registry_url,
            finished_at: Utc::now(),
        }
    }

    /// Run the notification stage. A delivery failure is recorded on the
    /// stage but never changes the run outcome. Delivery is attempted even
    /// when the stage cannot be recorded.
    async fn notify(&self, run: &PipelineRun, status: RunStatus, summary: RunSummary) -> Result<()> {
        let mut result = StageResult::pending(StageName::Notification);
        result.attempts = 1;
        result.status = StageStatus::Running;
        result.started_at = Some(Utc::now());
        if let Err(e) = self.runs.record_stage(&run.id, result.clone()).await {
            warn!(run_id = %run.id, error = %e, "could not record notification start");
        }

        let notification = RunNotification {
            run_id: run.id.clone(),
            status,
            summary,
        };
        match self.notifier.notify(&notification).await {
            Ok(()) => {
                result.status = StageStatus::Succeeded;
            }
            Err(e) => {
                warn!(run_id = %run.id, sink = self.notifier.name(), error = %e, "notification failed; run outcome unchanged");
                result.status = StageStatus::Failed;
                result.error = Some(e.to_string());
            }
        }
        result.ended_at = Some(Utc::now());
        self.runs.record_stage(&run.id, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::executor::StageError;
    use crate::notifier::{ChannelNotifier, FanoutNotifier};
    use async_trait::async_trait;
    use context::StageOutput;
    use modelops_platform::fs::NativeFileSystem;
    use modelops_types::config::{FamilyConfig, RetryConfig};
    use modelops_types::run::TriggerKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Succeeds with a canned output, or fails `failures` times first.
    struct Scripted {
        name: StageName,
        failures: AtomicU32,
        calls: Arc<AtomicU32>,
        cancel_on_run: Option<CancellationToken>,
        invalid: Option<&'static str>,
    }

    impl Scripted {
        fn ok(name: StageName) -> Self {
            Self {
                name,
                failures: AtomicU32::new(0),
                calls: Arc::new(AtomicU32::new(0)),
                cancel_on_run: None,
                invalid: None,
            }
        }
    }

    #[async_trait]
    impl Stage for Scripted {
        fn name(&self) -> StageName {
            self.name
        }

        async fn run(&self, _ctx: &RunContext) -> std::result::Result<StageOutput, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.cancel_on_run {
                token.cancel();
            }
            if let Some(reason) = self.invalid {
                return Err(StageError::Validation(reason.into()));
            }
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StageError::Transient("trainer unreachable".into()));
            }
            Ok(match self.name {
                StageName::Training => StageOutput::Trained {
                    job_id: "job-1".into(),
                    artifact_ref: "s3://best.pt".into(),
                },
                _ => StageOutput::Promoted {
                    promoted: false,
                    archived: None,
                },
            })
        }
    }

    fn work_stages() -> Vec<StageName> {
        StageName::PIPELINE
            .into_iter()
            .filter(|s| *s != StageName::Notification)
            .collect()
    }

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.pipeline.retry = RetryConfig {
            max_retries: 1,
            backoff_secs: 0,
        };
        config.notifier.registry_url = Some("http://registry.local/".into());
        config
            .families
            .insert("detector".into(), FamilyConfig::default());
        Arc::new(config)
    }

    async fn runs() -> Arc<RunStore> {
        let path = std::env::temp_dir()
            .join(format!("modelops-pipeline-{}", uuid::Uuid::new_v4()))
            .join("runs.jsonl");
        Arc::new(RunStore::open(Arc::new(NativeFileSystem), path).await.unwrap())
    }

    fn pipeline(
        runs: Arc<RunStore>,
        stages: Vec<Scripted>,
        notifier: Arc<dyn Notifier>,
    ) -> Pipeline {
        let stages = stages
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn Stage>)
            .collect();
        Pipeline::new(config(), runs, stages, notifier)
    }

    #[tokio::test]
    async fn successful_run_records_every_stage_in_order() {
        let runs = runs().await;
        let (tx, mut rx) = mpsc::channel(4);
        let stages = work_stages().into_iter().map(Scripted::ok).collect();
        let p = pipeline(runs.clone(), stages, Arc::new(ChannelNotifier::new(tx)));

        let (run, _lease) = runs.try_create("detector", TriggerKind::Manual).await.unwrap();
        let done = p.execute(&run.id, CancellationToken::new()).await.unwrap();

        assert_eq!(done.status, RunStatus::Succeeded);
        let names: Vec<StageName> = done.stages.iter().map(|s| s.stage).collect();
        assert_eq!(names, StageName::PIPELINE.to_vec());
        assert!(done.stages.iter().all(|s| s.status == StageStatus::Succeeded));

        let note = rx.recv().await.unwrap();
        assert_eq!(note.status, RunStatus::Succeeded);
        assert_eq!(
            note.summary.registry_url.as_deref(),
            Some("http://registry.local/#/models/detector")
        );
    }

    #[tokio::test]
    async fn failure_skips_to_notification() {
        let runs = runs().await;
        let (tx, mut rx) = mpsc::channel(4);
        let mut stages: Vec<Scripted> = work_stages().into_iter().map(Scripted::ok).collect();
        stages[1].failures = AtomicU32::new(2);
        let evaluation_calls = stages[2].calls.clone();
        let p = pipeline(runs.clone(), stages, Arc::new(ChannelNotifier::new(tx)));

        let (run, _lease) = runs.try_create("detector", TriggerKind::Scheduled).await.unwrap();
        let done = p.execute(&run.id, CancellationToken::new()).await.unwrap();

        assert_eq!(done.status, RunStatus::Failed);
        assert_eq!(evaluation_calls.load(Ordering::SeqCst), 0);
        assert!(done.stage(StageName::Evaluation).is_none());
        assert_eq!(
            done.stage(StageName::Notification).unwrap().status,
            StageStatus::Succeeded
        );

        let note = rx.recv().await.unwrap();
        assert_eq!(note.status, RunStatus::Failed);
        assert_eq!(note.summary.failed_stage, Some(StageName::Training));
        assert_eq!(note.summary.attempts, Some(2));
        assert!(note.summary.error.unwrap().contains("trainer unreachable"));
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_run() {
        struct Offline;

        #[async_trait]
        impl Notifier for Offline {
            fn name(&self) -> &str {
                "offline"
            }

            async fn notify(&self, _n: &RunNotification) -> Result<()> {
                Err(ServiceError::NotificationFailed("webhook unreachable".into()))
            }
        }

        let runs = runs().await;
        let stages = work_stages().into_iter().map(Scripted::ok).collect();
        let p = pipeline(runs.clone(), stages, Arc::new(Offline));

        let (run, _lease) = runs.try_create("detector", TriggerKind::Manual).await.unwrap();
        let done = p.execute(&run.id, CancellationToken::new()).await.unwrap();

        assert_eq!(done.status, RunStatus::Succeeded);
        let note = done.stage(StageName::Notification).unwrap();
        assert_eq!(note.status, StageStatus::Failed);
        assert!(note.error.as_deref().unwrap().contains("webhook unreachable"));
    }

    #[tokio::test]
    async fn cancellation_is_observed_at_the_next_boundary() {
        let runs = runs().await;
        let cancel = CancellationToken::new();
        let mut stages: Vec<Scripted> = work_stages().into_iter().map(Scripted::ok).collect();
        stages[1].cancel_on_run = Some(cancel.clone());
        let p = pipeline(runs.clone(), stages, Arc::new(FanoutNotifier::new()));

        let (run, _lease) = runs.try_create("detector", TriggerKind::Manual).await.unwrap();
        let done = p.execute(&run.id, cancel).await.unwrap();

        assert_eq!(done.status, RunStatus::Cancelled);
        // The in-flight stage finished; nothing after it started.
        assert!(done.stage(StageName::Training).unwrap().is_succeeded());
        assert!(done.stage(StageName::Evaluation).is_none());
        assert!(done.stage(StageName::Notification).is_some());
    }

    #[tokio::test]
    async fn resumed_run_skips_succeeded_stages() {
        let runs = runs().await;
        let first: Vec<Scripted> = work_stages().into_iter().map(Scripted::ok).collect();
        let first_calls: Vec<Arc<AtomicU32>> = first.iter().map(|s| s.calls.clone()).collect();

        let (run, _lease) = runs.try_create("detector", TriggerKind::Scheduled).await.unwrap();
        runs.mark_running(&run.id).await.unwrap();
        let mut done = StageResult::pending(StageName::DataPreparation);
        done.attempts = 1;
        done.status = StageStatus::Succeeded;
        runs.record_stage(&run.id, done.clone()).await.unwrap();
        done.stage = StageName::Training;
        done.output = Some(
            serde_json::to_value(StageOutput::Trained {
                job_id: "job-0".into(),
                artifact_ref: "s3://earlier.pt".into(),
            })
            .unwrap(),
        );
        runs.record_stage(&run.id, done).await.unwrap();

        let p = pipeline(runs.clone(), first, Arc::new(FanoutNotifier::new()));
        let finished = p.execute(&run.id, CancellationToken::new()).await.unwrap();

        assert_eq!(finished.status, RunStatus::Succeeded);
        assert_eq!(first_calls[0].load(Ordering::SeqCst), 0);
        assert_eq!(first_calls[1].load(Ordering::SeqCst), 0);
        assert_eq!(first_calls[2].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminal_runs_cannot_be_executed_again() {
        let runs = runs().await;
        let stages = work_stages().into_iter().map(Scripted::ok).collect();
        let p = pipeline(runs.clone(), stages, Arc::new(FanoutNotifier::new()));

        let (run, _lease) = runs.try_create("detector", TriggerKind::Manual).await.unwrap();
        p.execute(&run.id, CancellationToken::new()).await.unwrap();
        let err = p
            .execute(&run.id, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RunTerminal(_)));
    }

    #[tokio::test]
    async fn validation_failure_is_not_retried_and_reaches_the_summary() {
        let runs = runs().await;
        let (tx, mut rx) = mpsc::channel(4);
        let mut stages: Vec<Scripted> = work_stages().into_iter().map(Scripted::ok).collect();
        stages[0].invalid = Some("dataset descriptor has no classes");
        let prep_calls = stages[0].calls.clone();
        let training_calls = stages[1].calls.clone();
        let p = pipeline(runs.clone(), stages, Arc::new(ChannelNotifier::new(tx)));

        let (run, _lease) = runs.try_create("detector", TriggerKind::Manual).await.unwrap();
        let done = p.execute(&run.id, CancellationToken::new()).await.unwrap();

        assert_eq!(done.status, RunStatus::Failed);
        // One retry is configured; validation errors never use it.
        assert_eq!(prep_calls.load(Ordering::SeqCst), 1);
        assert_eq!(training_calls.load(Ordering::SeqCst), 0);
        let prep = done.stage(StageName::DataPreparation).unwrap();
        assert_eq!(prep.status, StageStatus::Failed);
        assert_eq!(prep.attempts, 1);

        let note = rx.recv().await.unwrap();
        assert_eq!(note.status, RunStatus::Failed);
        assert_eq!(note.summary.failed_stage, Some(StageName::DataPreparation));
        assert_eq!(note.summary.attempts, Some(1));
        assert!(
            note.summary
                .error
                .as_deref()
                .unwrap()
                .contains("dataset descriptor has no classes")
        );
    }

    #[tokio::test]
    async fn unreadable_state_fails_the_run_and_still_notifies() {
        let runs = runs().await;
        let (tx, mut rx) = mpsc::channel(4);
        let stages: Vec<Scripted> = work_stages().into_iter().map(Scripted::ok).collect();
        let prep_calls = stages[0].calls.clone();
        let p = pipeline(runs.clone(), stages, Arc::new(ChannelNotifier::new(tx)));

        let (run, lease) = runs.try_create("detector", TriggerKind::Scheduled).await.unwrap();
        runs.mark_running(&run.id).await.unwrap();
        let mut prep = StageResult::pending(StageName::DataPreparation);
        prep.attempts = 1;
        prep.status = StageStatus::Succeeded;
        prep.output = Some(serde_json::json!({ "kind": "from_older_release" }));
        runs.record_stage(&run.id, prep).await.unwrap();

        let done = p.execute(&run.id, CancellationToken::new()).await.unwrap();

        assert_eq!(done.status, RunStatus::Failed);
        assert!(done.status.is_terminal());
        assert_eq!(prep_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            done.stage(StageName::Notification).unwrap().status,
            StageStatus::Succeeded
        );

        let note = rx.recv().await.unwrap();
        assert_eq!(note.status, RunStatus::Failed);
        assert!(note.summary.error.as_deref().unwrap().contains("from_older_release"));

        // The family is free again.
        drop(lease);
        runs.try_create("detector", TriggerKind::Manual).await.unwrap();
    }
}
