//! Service wiring.
//!
//! Opens the stores under the configured storage directory and assembles
//! the pipeline stages, executor, pipeline and scheduler around them.

use std::sync::Arc;

use tracing::info;

use modelops_platform::Platform;
use modelops_platform::fs::FileSystem;
use modelops_types::config::Config;

use crate::decision::log::DecisionLog;
use crate::error::{Result, ServiceError};
use crate::executor::Stage;
use crate::executor::job::{HttpJobBackend, JobBackend, JobPoller};
use crate::metrics::{JsonlMetricsStore, MetricsStore};
use crate::notifier::{FanoutNotifier, LogNotifier, Notifier, WebhookNotifier};
use crate::pipeline::Pipeline;
use crate::pipeline::stages::{AbDecision, DataPreparation, Evaluation, Promotion, Registration, Training};
use crate::registry::ModelRegistry;
use crate::runs::RunStore;
use crate::scheduler::Scheduler;
use crate::storage::{DECISIONS_FILE, METRICS_FILE, REGISTRY_DIR, RUNS_FILE};

/// The assembled orchestration engine.
pub struct Orchestrator {
    pub config: Arc<Config>,
    pub runs: Arc<RunStore>,
    pub registry: Arc<ModelRegistry>,
    pub metrics: Arc<dyn MetricsStore>,
    pub decisions: Arc<DecisionLog>,
    pub pipeline: Arc<Pipeline>,
    pub scheduler: Scheduler,
}

impl Orchestrator {
    /// Open every store and wire the services together.
    pub async fn open(
        config: Config,
        fs: Arc<dyn FileSystem>,
        jobs: Arc<dyn JobBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let dir = config.storage_dir();

        let runs = Arc::new(RunStore::open(fs.clone(), dir.join(RUNS_FILE)).await?);
        let registry = Arc::new(ModelRegistry::open(fs.clone(), dir.join(REGISTRY_DIR)).await?);
        let metrics: Arc<dyn MetricsStore> =
            Arc::new(JsonlMetricsStore::open(fs.clone(), dir.join(METRICS_FILE)).await?);
        let decisions = Arc::new(DecisionLog::open(fs, dir.join(DECISIONS_FILE)).await?);

        let poller = JobPoller::new(jobs, config.pipeline.poll_interval());
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(DataPreparation),
            Box::new(Training::new(poller.clone())),
            Box::new(Evaluation::new(poller, metrics.clone())),
            Box::new(Registration::new(
                registry.clone(),
                metrics.clone(),
                config.decision.staging_map50,
            )),
            Box::new(AbDecision::new(
                registry.clone(),
                metrics.clone(),
                config.decision.clone(),
                decisions.clone(),
            )),
            Box::new(Promotion::new(registry.clone())),
        ];

        let pipeline = Arc::new(Pipeline::new(config.clone(), runs.clone(), stages, notifier));
        let scheduler = Scheduler::new(config.clone(), runs.clone(), pipeline.clone())?;

        info!(
            storage = %dir.display(),
            families = config.families.len(),
            "orchestrator ready"
        );
        Ok(Self {
            config,
            runs,
            registry,
            metrics,
            decisions,
            pipeline,
            scheduler,
        })
    }

    /// Wire the orchestrator against a real platform: the HTTP job service
    /// from `training.endpoint`, and the log sink plus the webhook sink
    /// when `notifier.webhook_url` is set.
    pub async fn from_platform(config: Config, platform: &dyn Platform) -> Result<Self> {
        let endpoint = config.training.endpoint.clone().ok_or_else(|| {
            ServiceError::Validation("training.endpoint is not configured".into())
        })?;
        let jobs: Arc<dyn JobBackend> = Arc::new(HttpJobBackend::new(
            platform.http(),
            &endpoint,
            config.training.headers.clone(),
        ));

        let mut notifier = FanoutNotifier::new().with(Arc::new(LogNotifier));
        if let Some(url) = &config.notifier.webhook_url {
            notifier = notifier.with(Arc::new(WebhookNotifier::new(
                platform.http(),
                url.clone(),
                config.notifier.headers.clone(),
            )));
        }

        Self::open(config, platform.fs(), jobs, Arc::new(notifier)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops_platform::NativePlatform;
    use modelops_platform::fs::NativeFileSystem;

    fn config() -> Config {
        let mut config = Config::default();
        config.storage.dir = std::env::temp_dir()
            .join(format!("modelops-orch-{}", uuid::Uuid::new_v4()))
            .display()
            .to_string();
        config
    }

    #[tokio::test]
    async fn from_platform_requires_training_endpoint() {
        let platform = NativePlatform::new().unwrap();
        let err = Orchestrator::from_platform(config(), &platform)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("training.endpoint"));
    }

    #[tokio::test]
    async fn open_creates_empty_stores() {
        let mut config = config();
        config.training.endpoint = Some("http://127.0.0.1:9".into());
        let platform = NativePlatform::new().unwrap();
        let orch = Orchestrator::from_platform(config, &platform).await.unwrap();
        assert!(orch.runs.list(None).await.unwrap().is_empty());
        assert!(orch.registry.families().await.unwrap().is_empty());
        assert!(orch.decisions.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = config();
        config.decision.confidence_level = 1.5;
        let jobs: Arc<dyn JobBackend> = Arc::new(HttpJobBackend::new(
            Arc::new(modelops_platform::http::NativeHttpClient::new().unwrap()),
            "http://127.0.0.1:9",
            Default::default(),
        ));
        let err = Orchestrator::open(
            config,
            Arc::new(NativeFileSystem),
            jobs,
            Arc::new(FanoutNotifier::new()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ServiceError::Config(_)));
    }
}
