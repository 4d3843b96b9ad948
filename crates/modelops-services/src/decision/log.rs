//! Append-only audit log of promotion decisions.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use modelops_platform::fs::FileSystem;
use modelops_types::decision::PromotionDecision;

use crate::error::Result;
use crate::storage::JsonlLog;

/// Every decision ever computed, in the order it was recorded.
///
/// Records are never mutated or removed.
pub struct DecisionLog {
    entries: RwLock<Vec<PromotionDecision>>,
    log: JsonlLog<PromotionDecision>,
}

impl DecisionLog {
    pub async fn open(fs: Arc<dyn FileSystem>, path: PathBuf) -> Result<Self> {
        let log: JsonlLog<PromotionDecision> = JsonlLog::new(fs, path);
        let entries = log.read_new().await?;
        debug!(path = %log.path().display(), decisions = entries.len(), "loaded decision log");
        Ok(Self {
            entries: RwLock::new(entries),
            log,
        })
    }

    /// Entries including those other handles appended.
    async fn synced(&self) -> Result<RwLockWriteGuard<'_, Vec<PromotionDecision>>> {
        let mut entries = self.entries.write().await;
        entries.extend(self.log.read_new().await?);
        Ok(entries)
    }

    pub async fn record(&self, decision: &PromotionDecision) -> Result<()> {
        let mut entries = self.entries.write().await;
        let (mut log, fresh) = self.log.lock().await?;
        entries.extend(fresh);
        log.append(decision).await?;
        entries.push(decision.clone());

        info!(
            candidate = %decision.candidate,
            baseline = ?decision.baseline.as_ref().map(ToString::to_string),
            verdict = %decision.describe(),
            "promotion decision recorded"
        );
        Ok(())
    }

    /// Decisions, optionally for one family, oldest first.
    pub async fn list(&self, family: Option<&str>) -> Result<Vec<PromotionDecision>> {
        Ok(self
            .synced()
            .await?
            .iter()
            .filter(|d| family.is_none_or(|f| d.family() == f))
            .cloned()
            .collect())
    }

    /// The decision recorded for `run_id`, if any.
    pub async fn find_by_run(&self, run_id: &str) -> Result<Option<PromotionDecision>> {
        Ok(self
            .synced()
            .await?
            .iter()
            .rev()
            .find(|d| d.run_id.as_deref() == Some(run_id))
            .cloned())
    }
}
