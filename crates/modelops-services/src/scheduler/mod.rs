//! Run scheduler.
//!
//! Fires scheduled runs for enabled families, accepts manual triggers and
//! owns the background tasks that execute runs. At most one run per family
//! is active at a time: a trigger that finds an active run is rejected with
//! [`ServiceError::AlreadyRunning`], and a scheduled fire that collides is
//! skipped, never queued.
//!
//! A run executes only while its process holds the run's lease, so a
//! `serve` process never picks up a run that a live `trigger` process is
//! still executing. Runs whose process died are resumed on the next tick.

pub mod schedule;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use modelops_types::config::Config;
use modelops_types::run::{PipelineRun, TriggerKind};

use crate::error::{Result, ServiceError};
use crate::pipeline::Pipeline;
use crate::runs::{RunLease, RunStore};
use schedule::{next_after, parse_schedule};

struct ActiveRun {
    handle: JoinHandle<Result<PipelineRun>>,
    cancel: CancellationToken,
}

/// Triggers runs and tracks their background tasks.
pub struct Scheduler {
    config: Arc<Config>,
    runs: Arc<RunStore>,
    pipeline: Arc<Pipeline>,
    schedules: HashMap<String, Schedule>,
    next_fire: Mutex<HashMap<String, DateTime<Utc>>>,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl Scheduler {
    /// Parse the schedule of every enabled family up front.
    pub fn new(config: Arc<Config>, runs: Arc<RunStore>, pipeline: Arc<Pipeline>) -> Result<Self> {
        let mut schedules = HashMap::new();
        for (key, family) in config.families.iter().filter(|(_, f)| f.enabled) {
            let expr = family
                .schedule
                .as_deref()
                .unwrap_or(&config.scheduler.default_schedule);
            schedules.insert(key.clone(), parse_schedule(expr)?);
        }

        Ok(Self {
            config,
            runs,
            pipeline,
            schedules,
            next_fire: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Create a run for `family` and start executing it in the background.
    ///
    /// Returns the new run id.
    pub async fn trigger_run(&self, family: &str, trigger: TriggerKind) -> Result<String> {
        if !self.config.families.contains_key(family) {
            return Err(ServiceError::UnknownFamily(family.to_string()));
        }

        let (run, lease) = self.runs.try_create(family, trigger).await?;
        self.spawn(lease).await;
        Ok(run.id)
    }

    /// Execute the leased run in the background. The lease is released
    /// when execution ends.
    async fn spawn(&self, lease: RunLease) {
        let cancel = CancellationToken::new();
        let pipeline = self.pipeline.clone();
        let token = cancel.clone();
        let run_id = lease.run_id().to_string();

        let handle = tokio::spawn(async move {
            let result = pipeline.execute(lease.run_id(), token).await;
            if let Err(e) = &result {
                error!(run_id = %lease.run_id(), error = %e, "pipeline run aborted");
            }
            drop(lease);
            result
        });

        let mut active = self.active.lock().await;
        active.retain(|_, a| !a.handle.is_finished());
        active.insert(run_id, ActiveRun { handle, cancel });
    }

    /// Wait for a run started by this scheduler to finish.
    ///
    /// For runs this scheduler does not own, the stored run is returned
    /// as-is.
    pub async fn join(&self, run_id: &str) -> Result<PipelineRun> {
        let entry = self.active.lock().await.remove(run_id);
        match entry {
            Some(active) => active
                .handle
                .await
                .map_err(|e| ServiceError::TaskFailed(e.to_string()))?,
            None => self.runs.require(run_id).await,
        }
    }

    /// Request cancellation. The run stops at its next stage boundary.
    pub async fn cancel(&self, run_id: &str) -> Result<()> {
        self.runs.request_cancel(run_id).await?;
        if let Some(active) = self.active.lock().await.get(run_id) {
            active.cancel.cancel();
        }
        Ok(())
    }

    /// Resume every PENDING or RUNNING run whose process is gone. Runs
    /// leased by a live process are left alone. Returns the resumed run ids.
    pub async fn recover(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();
        for run in self.runs.unfinished().await? {
            if self.active.lock().await.contains_key(&run.id) {
                continue;
            }
            let lease = match self.runs.claim(&run.id).await {
                Ok(Some(lease)) => lease,
                Ok(None) => {
                    debug!(run_id = %run.id, "run is leased by a live process; leaving it");
                    continue;
                }
                // Finished between the listing and the claim.
                Err(ServiceError::RunTerminal(_)) => continue,
                Err(e) => return Err(e),
            };
            info!(run_id = %run.id, family = %run.family, status = %run.status, "resuming unfinished run");
            self.spawn(lease).await;
            resumed.push(run.id);
        }
        Ok(resumed)
    }

    /// Run the scheduling loop until `cancel` fires.
    ///
    /// Unfinished runs are resumed first, and again on every tick so runs
    /// orphaned by another process are picked up. Shutdown does not cancel
    /// runs in flight; they are resumed by the next process.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let resumed = self.recover().await?;
        info!(
            families = self.schedules.len(),
            resumed = resumed.len(),
            tick_secs = self.config.scheduler.tick_secs,
            "scheduler started"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.scheduler.tick_secs.max(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {
                    if let Err(e) = self.recover().await {
                        warn!(error = %e, "failed to look for orphaned runs");
                    }
                    self.tick(Utc::now()).await;
                }
            }
        }
    }

    /// Fire every family whose next fire time is at or before `now`.
    ///
    /// A family's first tick only arms its next fire time. Returns the ids
    /// of the runs started.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();
        {
            let mut next_fire = self.next_fire.lock().await;
            for (family, schedule) in &self.schedules {
                match next_fire.get(family).copied() {
                    Some(at) if at <= now => {}
                    Some(_) => continue,
                    None => {
                        if let Some(at) = next_after(schedule, &now) {
                            debug!(family = %family, next_fire = %at, "armed schedule");
                            next_fire.insert(family.clone(), at);
                        }
                        continue;
                    }
                }

                match next_after(schedule, &now) {
                    Some(at) => {
                        next_fire.insert(family.clone(), at);
                    }
                    None => {
                        next_fire.remove(family);
                    }
                }
                due.push(family.clone());
            }
        }

        let mut started = Vec::new();
        for family in due {
            match self.trigger_run(&family, TriggerKind::Scheduled).await {
                Ok(run_id) => {
                    info!(family = %family, run_id = %run_id, "scheduled run triggered");
                    started.push(run_id);
                }
                Err(ServiceError::AlreadyRunning { run_id, .. }) => {
                    warn!(family = %family, active_run = %run_id, "scheduled fire skipped; family already has an active run");
                }
                Err(e) => {
                    error!(family = %family, error = %e, "failed to trigger scheduled run");
                }
            }
        }
        started
    }

    /// Next fire time per armed family.
    pub async fn next_fire_times(&self) -> HashMap<String, DateTime<Utc>> {
        self.next_fire.lock().await.clone()
    }
}
