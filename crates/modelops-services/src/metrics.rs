//! Metrics store.
//!
//! Evaluation writes metrics keyed by run; registration links the run to
//! the version it produced; the decision engine reads metrics by version.
//! Metrics are immutable once written.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use modelops_platform::fs::FileSystem;
use modelops_types::model::{EvaluationMetrics, VersionId};

use crate::error::{Result, ServiceError};
use crate::storage::{JsonlLog, LogGuard};

/// Storage for per-run evaluation metrics.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Record the metrics of `run_id`. Rewriting identical metrics is a
    /// no-op; different metrics fail with [`ServiceError::MetricsConflict`].
    async fn write_metrics(&self, run_id: &str, metrics: &EvaluationMetrics) -> Result<()>;

    /// Attach a run's metrics to the version registered from it.
    async fn link_version(&self, version: &VersionId, run_id: &str) -> Result<()>;

    /// Metrics of a registered version.
    async fn read_metrics(&self, version: &VersionId) -> Result<EvaluationMetrics>;

    /// Metrics written for a run, if any.
    async fn run_metrics(&self, run_id: &str) -> Result<Option<EvaluationMetrics>>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MetricsEvent {
    MetricsWritten {
        run_id: String,
        metrics: EvaluationMetrics,
    },
    VersionLinked {
        version: VersionId,
        run_id: String,
    },
}

#[derive(Default)]
struct MetricsState {
    by_run: HashMap<String, EvaluationMetrics>,
    version_runs: HashMap<VersionId, String>,
}

impl MetricsState {
    fn apply(&mut self, event: MetricsEvent) {
        match event {
            MetricsEvent::MetricsWritten { run_id, metrics } => {
                self.by_run.entry(run_id).or_insert(metrics);
            }
            MetricsEvent::VersionLinked { version, run_id } => {
                self.version_runs.entry(version).or_insert(run_id);
            }
        }
    }
}

/// [`MetricsStore`] backed by a JSONL event log.
pub struct JsonlMetricsStore {
    state: RwLock<MetricsState>,
    log: JsonlLog<MetricsEvent>,
}

impl JsonlMetricsStore {
    pub async fn open(fs: Arc<dyn FileSystem>, path: PathBuf) -> Result<Self> {
        let log: JsonlLog<MetricsEvent> = JsonlLog::new(fs, path);
        let mut state = MetricsState::default();
        for event in log.read_new().await? {
            state.apply(event);
        }
        debug!(path = %log.path().display(), runs = state.by_run.len(), "loaded metrics store");
        Ok(Self {
            state: RwLock::new(state),
            log,
        })
    }

    async fn locked(
        &self,
    ) -> Result<(RwLockWriteGuard<'_, MetricsState>, LogGuard<'_, MetricsEvent>)> {
        let mut state = self.state.write().await;
        let (log, fresh) = self.log.lock().await?;
        for event in fresh {
            state.apply(event);
        }
        Ok((state, log))
    }

    async fn synced(&self) -> Result<RwLockWriteGuard<'_, MetricsState>> {
        Ok(self.locked().await?.0)
    }
}

#[async_trait]
impl MetricsStore for JsonlMetricsStore {
    async fn write_metrics(&self, run_id: &str, metrics: &EvaluationMetrics) -> Result<()> {
        metrics.validate().map_err(ServiceError::Validation)?;

        let (mut state, mut log) = self.locked().await?;
        if let Some(existing) = state.by_run.get(run_id) {
            if existing == metrics {
                return Ok(());
            }
            return Err(ServiceError::MetricsConflict(run_id.to_string()));
        }

        let event = MetricsEvent::MetricsWritten {
            run_id: run_id.to_string(),
            metrics: *metrics,
        };
        log.append(&event).await?;
        state.apply(event);

        info!(run_id, map50 = metrics.map50, samples = metrics.sample_size, "metrics written");
        Ok(())
    }

    async fn link_version(&self, version: &VersionId, run_id: &str) -> Result<()> {
        let (mut state, mut log) = self.locked().await?;
        if !state.by_run.contains_key(run_id) {
            return Err(ServiceError::MetricsNotFound(run_id.to_string()));
        }
        match state.version_runs.get(version) {
            Some(linked) if linked == run_id => return Ok(()),
            Some(_) => return Err(ServiceError::MetricsConflict(run_id.to_string())),
            None => {}
        }

        let event = MetricsEvent::VersionLinked {
            version: version.clone(),
            run_id: run_id.to_string(),
        };
        log.append(&event).await?;
        state.apply(event);
        Ok(())
    }

    async fn read_metrics(&self, version: &VersionId) -> Result<EvaluationMetrics> {
        let state = self.synced().await?;
        state
            .version_runs
            .get(version)
            .and_then(|run_id| state.by_run.get(run_id))
            .copied()
            .ok_or_else(|| ServiceError::MetricsNotFound(version.to_string()))
    }

    async fn run_metrics(&self, run_id: &str) -> Result<Option<EvaluationMetrics>> {
        Ok(self.synced().await?.by_run.get(run_id).copied())
    }
}
