//! Pipeline run store.
//!
//! Holds every [`PipelineRun`] in memory, backed by an append-only event
//! log. Each mutation is written to the log before it is applied in
//! memory, so the log is always at least as new as what callers observed.
//!
//! The store is also where the one-active-run-per-family guarantee lives:
//! [`RunStore::try_create`] inspects run state and inserts the new run
//! while holding the log lock, so two triggers can never both succeed,
//! even from different processes. No lock is held while a run executes;
//! instead the executing process holds a [`RunLease`] so that no other
//! process resumes the same run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use modelops_platform::fs::{FileLock, FileSystem};
use modelops_types::run::{PipelineRun, RunStatus, StageResult, TriggerKind};

use crate::error::{Result, ServiceError};
use crate::storage::{JsonlLog, LEASES_DIR, LogGuard};

/// Event types stored in the runs log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RunEvent {
    /// A run was created in PENDING.
    RunCreated { run: PipelineRun },
    /// The pipeline picked the run up.
    RunStarted { run_id: String, at: DateTime<Utc> },
    /// A stage result was inserted or replaced.
    StageRecorded { run_id: String, result: StageResult },
    /// An operator asked for the run to stop at the next stage boundary.
    CancelRequested { run_id: String },
    /// The run reached a terminal status.
    RunFinished {
        run_id: String,
        status: RunStatus,
        at: DateTime<Utc>,
    },
}

impl RunEvent {
    fn run_id(&self) -> &str {
        match self {
            Self::RunCreated { run } => &run.id,
            Self::RunStarted { run_id, .. }
            | Self::StageRecorded { run_id, .. }
            | Self::CancelRequested { run_id }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }
}

fn apply(runs: &mut HashMap<String, PipelineRun>, event: RunEvent) {
    if let RunEvent::RunCreated { run } = event {
        runs.insert(run.id.clone(), run);
        return;
    }
    let Some(run) = runs.get_mut(event.run_id()) else {
        debug!(run_id = %event.run_id(), "event for unknown run ignored");
        return;
    };
    match event {
        RunEvent::RunCreated { .. } => {}
        RunEvent::RunStarted { at, .. } => {
            run.status = RunStatus::Running;
            run.started_at.get_or_insert(at);
        }
        RunEvent::StageRecorded { result, .. } => run.upsert_stage(result),
        RunEvent::CancelRequested { .. } => run.cancel_requested = true,
        RunEvent::RunFinished { status, at, .. } => {
            run.status = status;
            run.finished_at = Some(at);
        }
    }
}

/// Proof that this process is executing a run.
///
/// Held for as long as the run executes. Another process (or a second
/// claim in this one) cannot claim the run while it is held, and the
/// operating system releases it if the holder dies.
#[derive(Debug)]
pub struct RunLease {
    run_id: String,
    _lock: FileLock,
}

impl RunLease {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

type Runs = HashMap<String, PipelineRun>;

/// Persistent store of pipeline runs.
pub struct RunStore {
    fs: Arc<dyn FileSystem>,
    leases: PathBuf,
    runs: RwLock<Runs>,
    log: JsonlLog<RunEvent>,
}

impl RunStore {
    /// Open the store, replaying any existing log at `path`. Run leases
    /// live next to it.
    pub async fn open(fs: Arc<dyn FileSystem>, path: PathBuf) -> Result<Self> {
        let leases = path
            .parent()
            .map(|dir| dir.join(LEASES_DIR))
            .unwrap_or_else(|| PathBuf::from(LEASES_DIR));
        let log: JsonlLog<RunEvent> = JsonlLog::new(fs.clone(), path);
        let mut runs = HashMap::new();
        for event in log.read_new().await? {
            apply(&mut runs, event);
        }
        debug!(path = %log.path().display(), runs = runs.len(), "loaded run store");
        Ok(Self {
            fs,
            leases,
            runs: RwLock::new(runs),
            log,
        })
    }

    fn lease_path(&self, run_id: &str) -> PathBuf {
        self.leases.join(format!("{run_id}.lock"))
    }

    /// Lock the log and fold in whatever other handles appended.
    async fn locked(&self) -> Result<(RwLockWriteGuard<'_, Runs>, LogGuard<'_, RunEvent>)> {
        let mut runs = self.runs.write().await;
        let (log, fresh) = self.log.lock().await?;
        for event in fresh {
            apply(&mut runs, event);
        }
        Ok((runs, log))
    }

    /// Current state, including changes made through other handles.
    async fn synced(&self) -> Result<RwLockWriteGuard<'_, Runs>> {
        Ok(self.locked().await?.0)
    }

    /// Create a PENDING run for `family` unless one is already active, and
    /// lease it to the caller.
    ///
    /// Fails with [`ServiceError::AlreadyRunning`] if the family has a
    /// PENDING or RUNNING run. The check and the insert happen under the
    /// log lock, so this holds across processes sharing the store.
    pub async fn try_create(&self, family: &str, trigger: TriggerKind) -> Result<(PipelineRun, RunLease)> {
        let (mut runs, mut log) = self.locked().await?;

        if let Some(active) = runs.values().find(|r| r.family == family && r.is_active()) {
            return Err(ServiceError::AlreadyRunning {
                family: family.to_string(),
                run_id: active.id.clone(),
            });
        }

        let run = PipelineRun::new(family, trigger);
        let lease = self
            .take_lease(&run.id)
            .await?
            .ok_or_else(|| ServiceError::Validation(format!("lease for {} is already held", run.id)))?;
        log.append(&RunEvent::RunCreated { run: run.clone() }).await?;
        runs.insert(run.id.clone(), run.clone());

        info!(run_id = %run.id, family, trigger = %trigger, "created pipeline run");
        Ok((run, lease))
    }

    /// Lease an unfinished run for execution.
    ///
    /// Returns `None` when a live process (possibly this one) already holds
    /// the run.
    pub async fn claim(&self, run_id: &str) -> Result<Option<RunLease>> {
        let (runs, _log) = self.locked().await?;
        mutable_run(&runs, run_id)?;
        self.take_lease(run_id).await
    }

    async fn take_lease(&self, run_id: &str) -> Result<Option<RunLease>> {
        let lock = self.fs.try_lock_exclusive(&self.lease_path(run_id)).await?;
        Ok(lock.map(|lock| {
            debug!(run_id, lease = %lock.path().display(), "run lease taken");
            RunLease {
                run_id: run_id.to_string(),
                _lock: lock,
            }
        }))
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<PipelineRun>> {
        Ok(self.synced().await?.get(run_id).cloned())
    }

    /// Like [`RunStore::get`], failing with [`ServiceError::RunNotFound`].
    pub async fn require(&self, run_id: &str) -> Result<PipelineRun> {
        self.get(run_id)
            .await?
            .ok_or_else(|| ServiceError::RunNotFound(run_id.to_string()))
    }

    /// All runs, optionally for one family, oldest trigger first.
    pub async fn list(&self, family: Option<&str>) -> Result<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self
            .synced()
            .await?
            .values()
            .filter(|r| family.is_none_or(|f| r.family == f))
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.triggered_at.cmp(&b.triggered_at).then(a.id.cmp(&b.id)));
        Ok(runs)
    }

    /// The family's PENDING or RUNNING run, if any.
    pub async fn active_run(&self, family: &str) -> Result<Option<PipelineRun>> {
        Ok(self
            .synced()
            .await?
            .values()
            .find(|r| r.family == family && r.is_active())
            .cloned())
    }

    /// Every non-terminal run, for crash recovery.
    pub async fn unfinished(&self) -> Result<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self
            .synced()
            .await?
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.triggered_at.cmp(&b.triggered_at));
        Ok(runs)
    }

    /// Move a PENDING run to RUNNING. A run that is already RUNNING (being
    /// resumed after a restart) is returned unchanged.
    pub async fn mark_running(&self, run_id: &str) -> Result<PipelineRun> {
        let (mut runs, mut log) = self.locked().await?;
        let run = mutable_run(&runs, run_id)?;
        if run.status == RunStatus::Running {
            return Ok(run.clone());
        }

        let event = RunEvent::RunStarted {
            run_id: run_id.to_string(),
            at: Utc::now(),
        };
        log.append(&event).await?;
        apply(&mut runs, event);
        runs.get(run_id)
            .cloned()
            .ok_or_else(|| ServiceError::RunNotFound(run_id.to_string()))
    }

    /// Insert or replace a stage result on a non-terminal run.
    pub async fn record_stage(&self, run_id: &str, result: StageResult) -> Result<()> {
        let (mut runs, mut log) = self.locked().await?;
        mutable_run(&runs, run_id)?;

        let event = RunEvent::StageRecorded {
            run_id: run_id.to_string(),
            result,
        };
        log.append(&event).await?;
        apply(&mut runs, event);
        Ok(())
    }

    /// Flag a run for cancellation at its next stage boundary. The process
    /// executing it sees the flag whichever process set it.
    pub async fn request_cancel(&self, run_id: &str) -> Result<()> {
        let (mut runs, mut log) = self.locked().await?;
        if mutable_run(&runs, run_id)?.cancel_requested {
            return Ok(());
        }

        let event = RunEvent::CancelRequested {
            run_id: run_id.to_string(),
        };
        log.append(&event).await?;
        apply(&mut runs, event);
        info!(run_id, "cancellation requested");
        Ok(())
    }

    pub async fn is_cancel_requested(&self, run_id: &str) -> Result<bool> {
        Ok(self
            .synced()
            .await?
            .get(run_id)
            .is_some_and(|r| r.cancel_requested))
    }

    /// Move a run to a terminal status. After this the run is immutable
    /// and its lease file is removed.
    pub async fn finish(&self, run_id: &str, status: RunStatus) -> Result<PipelineRun> {
        if !status.is_terminal() {
            return Err(ServiceError::Validation(format!(
                "{status} is not a terminal run status"
            )));
        }

        let (mut runs, mut log) = self.locked().await?;
        mutable_run(&runs, run_id)?;

        let event = RunEvent::RunFinished {
            run_id: run_id.to_string(),
            status,
            at: Utc::now(),
        };
        log.append(&event).await?;
        apply(&mut runs, event);

        // Terminal runs are never claimed again, so the file can go while
        // the log lock is still held.
        let lease = self.lease_path(run_id);
        if self.fs.exists(&lease).await
            && let Err(e) = self.fs.remove_file(&lease).await
        {
            warn!(run_id, error = %e, "failed to remove run lease file");
        }

        info!(run_id, status = %status, "pipeline run finished");
        runs.get(run_id)
            .cloned()
            .ok_or_else(|| ServiceError::RunNotFound(run_id.to_string()))
    }
}

fn mutable_run<'a>(runs: &'a HashMap<String, PipelineRun>, run_id: &str) -> Result<&'a PipelineRun> {
    let run = runs
        .get(run_id)
        .ok_or_else(|| ServiceError::RunNotFound(run_id.to_string()))?;
    if run.status.is_terminal() {
        return Err(ServiceError::RunTerminal(run_id.to_string()));
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops_platform::fs::NativeFileSystem;
    use modelops_types::run::{StageName, StageStatus};

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("modelops-runs-{}", uuid::Uuid::new_v4()))
            .join("runs.jsonl")
    }

    async fn open(path: &PathBuf) -> RunStore {
        RunStore::open(Arc::new(NativeFileSystem), path.clone())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_rejects_second_active_run() {
        let store = open(&temp_path()).await;
        let (first, _lease) = store
            .try_create("detector", TriggerKind::Scheduled)
            .await
            .unwrap();

        let err = store
            .try_create("detector", TriggerKind::Manual)
            .await
            .unwrap_err();
        match err {
            ServiceError::AlreadyRunning { family, run_id } => {
                assert_eq!(family, "detector");
                assert_eq!(run_id, first.id);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Other families are unaffected.
        store
            .try_create("segmenter", TriggerKind::Manual)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn finished_run_frees_the_family_slot() {
        let store = open(&temp_path()).await;
        let (run, _lease) = store
            .try_create("detector", TriggerKind::Manual)
            .await
            .unwrap();
        store.mark_running(&run.id).await.unwrap();
        store.finish(&run.id, RunStatus::Failed).await.unwrap();

        assert!(store.active_run("detector").await.unwrap().is_none());
        store
            .try_create("detector", TriggerKind::Manual)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_triggers_admit_exactly_one() {
        let store = Arc::new(open(&temp_path()).await);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_create("detector", TriggerKind::Manual)
                    .await
                    .map(|(run, _lease)| run)
            }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(ServiceError::AlreadyRunning { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.list(Some("detector")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_runs_are_immutable() {
        let store = open(&temp_path()).await;
        let (run, _lease) = store
            .try_create("detector", TriggerKind::Manual)
            .await
            .unwrap();
        store.finish(&run.id, RunStatus::Cancelled).await.unwrap();

        let result = store
            .record_stage(&run.id, StageResult::pending(StageName::Training))
            .await;
        assert!(matches!(result, Err(ServiceError::RunTerminal(_))));
        assert!(matches!(
            store.finish(&run.id, RunStatus::Succeeded).await,
            Err(ServiceError::RunTerminal(_))
        ));
        assert!(matches!(
            store.request_cancel(&run.id).await,
            Err(ServiceError::RunTerminal(_))
        ));
    }

    #[tokio::test]
    async fn finish_requires_terminal_status() {
        let store = open(&temp_path()).await;
        let (run, _lease) = store
            .try_create("detector", TriggerKind::Manual)
            .await
            .unwrap();
        assert!(matches!(
            store.finish(&run.id, RunStatus::Running).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = temp_path();
        let run_id = {
            let store = open(&path).await;
            let (run, _lease) = store
                .try_create("detector", TriggerKind::Scheduled)
                .await
                .unwrap();
            store.mark_running(&run.id).await.unwrap();

            let mut prep = StageResult::pending(StageName::DataPreparation);
            prep.attempts = 1;
            prep.status = StageStatus::Succeeded;
            store.record_stage(&run.id, prep).await.unwrap();

            let mut training = StageResult::pending(StageName::Training);
            training.attempts = 1;
            training.status = StageStatus::Running;
            store.record_stage(&run.id, training).await.unwrap();
            store.request_cancel(&run.id).await.unwrap();
            run.id
        };

        let store = open(&path).await;
        let run = store.require(&run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());
        assert!(run.cancel_requested);
        assert_eq!(run.stages.len(), 2);
        assert_eq!(run.resume_point(), Some(StageName::Training));
        assert_eq!(store.unfinished().await.unwrap().len(), 1);

        // The reloaded active run still blocks new triggers.
        assert!(matches!(
            store.try_create("detector", TriggerKind::Manual).await,
            Err(ServiceError::AlreadyRunning { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_run_errors() {
        let store = open(&temp_path()).await;
        assert!(matches!(
            store.require("run-missing").await,
            Err(ServiceError::RunNotFound(_))
        ));
        assert!(!store.is_cancel_requested("run-missing").await.unwrap());
    }

    #[tokio::test]
    async fn stores_sharing_a_directory_admit_one_active_run() {
        let path = temp_path();
        let cli = open(&path).await;
        let serve = open(&path).await;

        let (manual, _lease) = cli
            .try_create("detector", TriggerKind::Manual)
            .await
            .unwrap();
        match serve.try_create("detector", TriggerKind::Scheduled).await {
            Err(ServiceError::AlreadyRunning { run_id, .. }) => assert_eq!(run_id, manual.id),
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }

        cli.finish(&manual.id, RunStatus::Succeeded).await.unwrap();
        let (scheduled, _lease) = serve
            .try_create("detector", TriggerKind::Scheduled)
            .await
            .unwrap();
        assert_eq!(cli.list(Some("detector")).await.unwrap().len(), 2);
        assert_eq!(
            cli.active_run("detector").await.unwrap().map(|r| r.id),
            Some(scheduled.id)
        );
    }

    #[tokio::test]
    async fn cancel_requested_elsewhere_is_observed() {
        let path = temp_path();
        let executor = open(&path).await;
        let operator = open(&path).await;

        let (run, _lease) = executor
            .try_create("detector", TriggerKind::Manual)
            .await
            .unwrap();
        executor.mark_running(&run.id).await.unwrap();
        assert!(!executor.is_cancel_requested(&run.id).await.unwrap());

        operator.request_cancel(&run.id).await.unwrap();
        assert!(executor.is_cancel_requested(&run.id).await.unwrap());
    }

    #[tokio::test]
    async fn leased_runs_cannot_be_claimed_twice() {
        let path = temp_path();
        let owner = open(&path).await;
        let other = open(&path).await;

        let (run, lease) = owner
            .try_create("detector", TriggerKind::Manual)
            .await
            .unwrap();
        assert_eq!(lease.run_id(), run.id);
        assert!(other.claim(&run.id).await.unwrap().is_none());
        assert!(owner.claim(&run.id).await.unwrap().is_none());

        // The owner went away without finishing the run.
        drop(lease);
        let lease = other.claim(&run.id).await.unwrap();
        assert!(lease.is_some());

        other.finish(&run.id, RunStatus::Cancelled).await.unwrap();
        assert!(matches!(
            owner.claim(&run.id).await,
            Err(ServiceError::RunTerminal(_))
        ));
    }
}
