//! Model registry.
//!
//! A versioned catalog of model artifacts per family. Every family has its
//! own log file (`<dir>/<family>.jsonl`) and its own lock: registrations
//! and label transitions for one family serialize, in this process and
//! across processes sharing the directory, while different families never
//! contend.
//!
//! Every mutation locks the family's log, folds in what other processes
//! appended, checks, then appends. Version numbers are therefore allocated
//! from the latest state on disk and are never handed out twice.
//!
//! A promotion is persisted as a single `promoted` event naming both the
//! new PRODUCTION version and the version it archives, written under the
//! family lock before memory changes. Readers therefore never observe two
//! PRODUCTION versions, and a crash cannot separate the two relabels.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use modelops_platform::fs::FileSystem;
use modelops_types::model::{EvaluationMetrics, ModelStage, ModelVersion, VersionId};

use crate::error::{Result, ServiceError};
use crate::storage::{JsonlLog, LogGuard};

/// Tag set when a version is promoted.
pub const TAG_PROMOTED_AT: &str = "promoted_at";

const LOG_EXTENSION: &str = "jsonl";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RegistryEvent {
    Registered {
        version: ModelVersion,
    },
    Staged {
        version: VersionId,
        at: DateTime<Utc>,
    },
    Promoted {
        version: VersionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        archived: Option<VersionId>,
        at: DateTime<Utc>,
    },
}

#[derive(Default)]
struct FamilyEntry {
    versions: BTreeMap<u32, ModelVersion>,
    /// Highest version number ever allocated.
    last_version: u32,
}

impl FamilyEntry {
    fn apply(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Registered { version } => {
                self.last_version = self.last_version.max(version.version());
                self.versions.insert(version.version(), version);
            }
            RegistryEvent::Staged { version, at } => {
                if let Some(v) = self.versions.get_mut(&version.version) {
                    v.stage = ModelStage::Staging;
                    v.updated_at = at;
                }
            }
            RegistryEvent::Promoted {
                version,
                archived,
                at,
            } => {
                if let Some(prior) = archived.and_then(|id| self.versions.get_mut(&id.version)) {
                    prior.stage = ModelStage::Archived;
                    prior.updated_at = at;
                }
                if let Some(v) = self.versions.get_mut(&version.version) {
                    v.stage = ModelStage::Production;
                    v.updated_at = at;
                    v.tags.insert(TAG_PROMOTED_AT.into(), at.to_rfc3339());
                }
            }
        }
    }

    fn production(&self) -> Option<&ModelVersion> {
        self.versions
            .values()
            .find(|v| v.stage == ModelStage::Production)
    }

    fn require(&self, id: &VersionId) -> Result<&ModelVersion> {
        self.versions
            .get(&id.version)
            .ok_or_else(|| ServiceError::VersionNotFound(id.to_string()))
    }

    fn by_run(&self, run_id: &str) -> Option<&ModelVersion> {
        self.versions
            .values()
            .find(|v| v.run_id.as_deref() == Some(run_id))
    }
}

/// One family's in-memory state and log.
struct FamilyLog {
    entry: Mutex<FamilyEntry>,
    log: JsonlLog<RegistryEvent>,
}

impl FamilyLog {
    /// Lock the family for a mutation, folding in events other handles
    /// appended.
    async fn locked(&self) -> Result<(MutexGuard<'_, FamilyEntry>, LogGuard<'_, RegistryEvent>)> {
        let mut entry = self.entry.lock().await;
        let (log, fresh) = self.log.lock().await?;
        for event in fresh {
            entry.apply(event);
        }
        Ok((entry, log))
    }

    async fn synced(&self) -> Result<MutexGuard<'_, FamilyEntry>> {
        Ok(self.locked().await?.0)
    }
}

/// Family keys name files, so they are restricted to a safe alphabet.
fn validate_family(family: &str) -> Result<()> {
    let valid = !family.is_empty()
        && !family.starts_with('.')
        && family
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!("invalid family name: {family:?}")))
    }
}

/// Versioned model catalog with per-family serialized mutations.
pub struct ModelRegistry {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
    families: RwLock<HashMap<String, Arc<FamilyLog>>>,
}

impl ModelRegistry {
    /// Open the registry stored under `dir`, replaying every family log.
    pub async fn open(fs: Arc<dyn FileSystem>, dir: PathBuf) -> Result<Self> {
        let registry = Self {
            fs,
            dir,
            families: RwLock::new(HashMap::new()),
        };
        let families = registry.families().await?;
        for family in &families {
            registry.family(family).await?.synced().await?;
        }
        debug!(dir = %registry.dir.display(), families = families.len(), "loaded model registry");
        Ok(registry)
    }

    async fn family(&self, family: &str) -> Result<Arc<FamilyLog>> {
        validate_family(family)?;
        if let Some(log) = self.families.read().await.get(family) {
            return Ok(log.clone());
        }
        let path = self.dir.join(format!("{family}.{LOG_EXTENSION}"));
        Ok(self
            .families
            .write()
            .await
            .entry(family.to_string())
            .or_insert_with(|| {
                Arc::new(FamilyLog {
                    entry: Mutex::new(FamilyEntry::default()),
                    log: JsonlLog::new(self.fs.clone(), path),
                })
            })
            .clone())
    }

    /// Allocate the family's next version number and record the artifact
    /// with label NONE. Version numbers start at 1 and are never reused.
    pub async fn register(
        &self,
        family: &str,
        artifact_ref: &str,
        metrics: EvaluationMetrics,
    ) -> Result<ModelVersion> {
        let family_log = self.family(family).await?;
        let (mut entry, mut log) = family_log.locked().await?;
        register_locked(&mut entry, &mut log, family, artifact_ref, metrics, None, BTreeMap::new()).await
    }

    /// Register the artifact produced by `run_id`, or return the version
    /// that run already registered.
    pub async fn register_for_run(
        &self,
        run_id: &str,
        family: &str,
        artifact_ref: &str,
        metrics: EvaluationMetrics,
        tags: BTreeMap<String, String>,
    ) -> Result<ModelVersion> {
        let family_log = self.family(family).await?;
        let (mut entry, mut log) = family_log.locked().await?;

        if let Some(existing) = entry.by_run(run_id) {
            info!(run_id, version = %existing.id, "run already registered a version; reusing it");
            return Ok(existing.clone());
        }

        register_locked(
            &mut entry,
            &mut log,
            family,
            artifact_ref,
            metrics,
            Some(run_id.to_string()),
            tags,
        )
        .await
    }

    /// Label a NONE version STAGING. Versions already past NONE are left as
    /// they are.
    pub async fn mark_staging(&self, id: &VersionId) -> Result<ModelVersion> {
        let family_log = self.family(&id.family).await?;
        let (mut entry, mut log) = family_log.locked().await?;

        let current = entry.require(id)?;
        if current.stage != ModelStage::None {
            return Ok(current.clone());
        }

        let event = RegistryEvent::Staged {
            version: id.clone(),
            at: Utc::now(),
        };
        log.append(&event).await?;
        entry.apply(event);

        info!(version = %id, "version moved to STAGING");
        entry.require(id).cloned()
    }

    /// Make `id` the family's PRODUCTION version, archiving the previous one.
    ///
    /// Returns the archived version, if there was one. Promoting the
    /// version that is already PRODUCTION changes nothing.
    pub async fn promote(&self, id: &VersionId) -> Result<Option<VersionId>> {
        let family_log = self.family(&id.family).await?;
        let (mut entry, mut log) = family_log.locked().await?;

        if entry.require(id)?.stage == ModelStage::Production {
            debug!(version = %id, "version already in PRODUCTION");
            return Ok(None);
        }

        let archived = entry.production().map(|v| v.id.clone());
        let event = RegistryEvent::Promoted {
            version: id.clone(),
            archived: archived.clone(),
            at: Utc::now(),
        };
        log.append(&event).await?;
        entry.apply(event);

        match &archived {
            Some(prior) => info!(version = %id, archived = %prior, "promoted to PRODUCTION"),
            None => info!(version = %id, "promoted to PRODUCTION (first production version)"),
        }
        Ok(archived)
    }

    /// The family's PRODUCTION version, if any.
    pub async fn current_production(&self, family: &str) -> Result<Option<ModelVersion>> {
        let family_log = self.family(family).await?;
        let entry = family_log.synced().await?;
        Ok(entry.production().cloned())
    }

    pub async fn get(&self, id: &VersionId) -> Result<Option<ModelVersion>> {
        let family_log = self.family(&id.family).await?;
        let entry = family_log.synced().await?;
        Ok(entry.versions.get(&id.version).cloned())
    }

    /// The version registered by `run_id`, if any.
    pub async fn find_by_run(&self, family: &str, run_id: &str) -> Result<Option<ModelVersion>> {
        let family_log = self.family(family).await?;
        let entry = family_log.synced().await?;
        Ok(entry.by_run(run_id).cloned())
    }

    /// All versions of a family in version order.
    pub async fn list(&self, family: &str) -> Result<Vec<ModelVersion>> {
        let family_log = self.family(family).await?;
        let entry = family_log.synced().await?;
        Ok(entry.versions.values().cloned().collect())
    }

    /// Families with at least one registered version, sorted.
    pub async fn families(&self) -> Result<Vec<String>> {
        if !self.fs.exists(&self.dir).await {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = self
            .fs
            .list_dir(&self.dir)
            .await?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == LOG_EXTENSION))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|name| validate_family(name).is_ok())
            .collect();
        names.sort();
        Ok(names)
    }
}

async fn register_locked(
    entry: &mut FamilyEntry,
    log: &mut LogGuard<'_, RegistryEvent>,
    family: &str,
    artifact_ref: &str,
    metrics: EvaluationMetrics,
    run_id: Option<String>,
    tags: BTreeMap<String, String>,
) -> Result<ModelVersion> {
    let now = Utc::now();
    let version = ModelVersion {
        id: VersionId::new(family, entry.last_version + 1),
        artifact_ref: artifact_ref.to_string(),
        metrics,
        stage: ModelStage::None,
        run_id,
        created_at: now,
        updated_at: now,
        tags,
    };

    log.append(&RegistryEvent::Registered {
        version: version.clone(),
    })
    .await?;
    entry.apply(RegistryEvent::Registered {
        version: version.clone(),
    });

    info!(version = %version.id, artifact = %version.artifact_ref, "registered model version");
    Ok(version)
}
