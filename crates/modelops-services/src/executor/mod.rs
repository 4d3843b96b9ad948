//! Stage executor.
//!
//! Runs one pipeline stage to completion or terminal failure under the
//! stage's retry policy: a retryable failure is retried after a fixed
//! backoff until the retry budget is spent; anything else fails at once.
//! Every attempt is bounded by the stage timeout.
//!
//! The [`StageResult`] is persisted before each attempt starts and after
//! each attempt ends, so the run log always shows what was in flight.

pub mod job;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use modelops_types::config::PipelineConfig;
use modelops_types::run::{StageName, StageResult, StageStatus};

use crate::pipeline::context::{RunContext, StageOutput};
use crate::runs::RunStore;
pub use retry::{StageError, is_retryable};

/// One unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Perform one attempt.
    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError>;
}

/// A stage that failed for good.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: StageName,
    pub attempts: u32,
    pub error: StageError,
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.stage, self.attempts, self.error
        )
    }
}

/// Applies retry and timeout policy to stage attempts.
pub struct StageExecutor {
    runs: Arc<RunStore>,
    policy: PipelineConfig,
}

impl StageExecutor {
    pub fn new(runs: Arc<RunStore>, policy: PipelineConfig) -> Self {
        Self { runs, policy }
    }

    /// Run `stage` for `ctx.run_id` and return its output.
    pub async fn run(&self, stage: &dyn Stage, ctx: &RunContext) -> Result<StageOutput, StageFailure> {
        let name = stage.name();
        let policy = self.policy.policy_for(name);
        let max_attempts = policy.max_retries + 1;

        let mut result = StageResult::pending(name);
        result.started_at = Some(Utc::now());

        let mut attempt = 0;
        loop {
            attempt += 1;
            result.attempts = attempt;
            result.status = StageStatus::Running;
            self.persist(ctx, &result, attempt).await?;
            info!(run_id = %ctx.run_id, stage = %name, attempt, max_attempts, "stage attempt started");

            let outcome = match tokio::time::timeout(policy.timeout, stage.run(ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StageError::Timeout(policy.timeout)),
            };

            let error = match outcome {
                Ok(output) => {
                    result.status = StageStatus::Succeeded;
                    result.ended_at = Some(Utc::now());
                    result.error = None;
                    result.output = Some(serde_json::to_value(&output).map_err(|e| StageFailure {
                        stage: name,
                        attempts: attempt,
                        error: StageError::Service(e.into()),
                    })?);
                    self.persist(ctx, &result, attempt).await?;
                    info!(run_id = %ctx.run_id, stage = %name, attempt, "stage succeeded");
                    return Ok(output);
                }
                Err(error) => error,
            };

            result.error = Some(error.to_string());

            if is_retryable(&error) && attempt < max_attempts {
                result.status = StageStatus::Retrying;
                self.persist(ctx, &result, attempt).await?;
                warn!(
                    run_id = %ctx.run_id,
                    stage = %name,
                    attempt,
                    delay_secs = policy.backoff.as_secs(),
                    error = %error,
                    "stage attempt failed; retrying after backoff"
                );
                tokio::time::sleep(policy.backoff).await;
                continue;
            }

            result.status = StageStatus::Failed;
            result.ended_at = Some(Utc::now());
            self.persist(ctx, &result, attempt).await?;
            warn!(
                run_id = %ctx.run_id,
                stage = %name,
                attempts = attempt,
                retryable = is_retryable(&error),
                error = %error,
                "stage failed"
            );
            return Err(StageFailure {
                stage: name,
                attempts: attempt,
                error,
            });
        }
    }

    async fn persist(&self, ctx: &RunContext, result: &StageResult, attempt: u32) -> Result<(), StageFailure> {
        self.runs
            .record_stage(&ctx.run_id, result.clone())
            .await
            .map_err(|e| StageFailure {
                stage: result.stage,
                attempts: attempt,
                error: StageError::Service(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops_platform::fs::NativeFileSystem;
    use modelops_types::config::{RetryConfig, StageOverride};
    use modelops_types::run::{PipelineRun, TriggerKind};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails with the scripted errors, then succeeds.
    struct FlakyStage {
        errors: Mutex<Vec<StageError>>,
        calls: Mutex<u32>,
        delay: Duration,
    }

    impl FlakyStage {
        fn new(mut errors: Vec<StageError>) -> Self {
            errors.reverse();
            Self {
                errors: Mutex::new(errors),
                calls: Mutex::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Stage for FlakyStage {
        fn name(&self) -> StageName {
            StageName::Training
        }

        async fn run(&self, _ctx: &RunContext) -> Result<StageOutput, StageError> {
            *self.calls.lock().unwrap() += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.errors.lock().unwrap().pop();
            match next {
                Some(err) => Err(err),
                None => Ok(StageOutput::Trained {
                    job_id: "job-1".into(),
                    artifact_ref: "s3://best.pt".into(),
                }),
            }
        }
    }

    fn policy(max_retries: u32) -> PipelineConfig {
        PipelineConfig {
            retry: RetryConfig {
                max_retries,
                backoff_secs: 0,
            },
            ..Default::default()
        }
    }

    async fn setup(policy: PipelineConfig) -> (StageExecutor, Arc<RunStore>, RunContext) {
        let path = std::env::temp_dir()
            .join(format!("modelops-exec-{}", uuid::Uuid::new_v4()))
            .join("runs.jsonl");
        let runs = Arc::new(RunStore::open(Arc::new(NativeFileSystem), path).await.unwrap());
        let (run, _lease): (PipelineRun, _) = runs
            .try_create("detector", TriggerKind::Manual)
            .await
            .unwrap();
        let ctx = RunContext::new(&run, None);
        (StageExecutor::new(runs.clone(), policy), runs, ctx)
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let (exec, runs, ctx) = setup(policy(1)).await;
        let stage = FlakyStage::new(vec![]);
        exec.run(&stage, &ctx).await.unwrap();

        let run = runs.require(&ctx.run_id).await.unwrap();
        let result = run.stage(StageName::Training).unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(result.status, StageStatus::Succeeded);
        assert!(result.output.is_some());
        assert!(result.ended_at.is_some());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let (exec, runs, ctx) = setup(policy(1)).await;
        let stage = FlakyStage::new(vec![StageError::Transient("502".into())]);
        exec.run(&stage, &ctx).await.unwrap();

        assert_eq!(stage.calls(), 2);
        let run = runs.require(&ctx.run_id).await.unwrap();
        let result = run.stage(StageName::Training).unwrap();
        assert_eq!(result.attempts, 2);
        assert_eq!(result.status, StageStatus::Succeeded);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_attempt_count() {
        let (exec, runs, ctx) = setup(policy(1)).await;
        let stage = FlakyStage::new(vec![
            StageError::Transient("trainer unreachable".into()),
            StageError::Transient("trainer unreachable".into()),
        ]);
        let failure = exec.run(&stage, &ctx).await.unwrap_err();

        assert_eq!(failure.stage, StageName::Training);
        assert_eq!(failure.attempts, 2);
        assert_eq!(
            failure.to_string(),
            "training failed after 2 attempt(s): transient error: trainer unreachable"
        );
        let run = runs.require(&ctx.run_id).await.unwrap();
        let result = run.stage(StageName::Training).unwrap();
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.attempts, 2);
        assert!(result.error.as_deref().unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let (exec, _runs, ctx) = setup(policy(3)).await;
        let stage = FlakyStage::new(vec![StageError::Validation("no classes".into())]);
        let failure = exec.run(&stage, &ctx).await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(stage.calls(), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded_by_timeout() {
        let mut cfg = policy(0);
        cfg.stages = HashMap::from([(
            StageName::Training,
            StageOverride {
                timeout_secs: Some(1),
                ..Default::default()
            },
        )]);
        let (exec, _runs, ctx) = setup(cfg).await;
        let mut stage = FlakyStage::new(vec![]);
        stage.delay = Duration::from_secs(5);

        let started = std::time::Instant::now();
        let failure = exec.run(&stage, &ctx).await.unwrap_err();
        assert!(matches!(failure.error, StageError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn terminal_run_cannot_record_attempts() {
        let (exec, runs, ctx) = setup(policy(1)).await;
        runs.finish(&ctx.run_id, modelops_types::run::RunStatus::Cancelled)
            .await
            .unwrap();
        let stage = FlakyStage::new(vec![]);
        let failure = exec.run(&stage, &ctx).await.unwrap_err();
        assert!(matches!(failure.error, StageError::Service(_)));
        assert_eq!(stage.calls(), 0);
    }
}
