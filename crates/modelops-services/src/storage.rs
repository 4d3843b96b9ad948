//! JSONL append-only persistence.
//!
//! Every store in this crate keeps its state as an event log: one JSON
//! object per line, appended and never rewritten. A store rebuilds its
//! in-memory state by reading the log, and keeps it current by reading
//! whatever was appended since, including by other processes that share
//! the storage directory.
//!
//! Writers hold an exclusive advisory lock on `<log>.lock` while they read
//! the tail, check their state and append. A check-then-append is
//! therefore atomic across every process using the same directory.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use modelops_platform::fs::{FileLock, FileSystem};

use crate::error::Result;

/// Pipeline runs and their stage results.
pub const RUNS_FILE: &str = "runs.jsonl";
/// Per-family model registry logs, one `<family>.jsonl` each.
pub const REGISTRY_DIR: &str = "registry";
/// Evaluation metrics and their version links.
pub const METRICS_FILE: &str = "metrics.jsonl";
/// Promotion decision audit trail.
pub const DECISIONS_FILE: &str = "decisions.jsonl";
/// Lock files held by the process executing a run.
pub const LEASES_DIR: &str = "leases";

/// An append-only log of `E` events backed by one JSONL file.
pub struct JsonlLog<E> {
    path: PathBuf,
    lock_path: PathBuf,
    fs: Arc<dyn FileSystem>,
    // Byte offset just past the last line this handle has read or written.
    cursor: Mutex<usize>,
    _event: PhantomData<fn() -> E>,
}

/// Exclusive write access to a [`JsonlLog`], in this process and across
/// processes. Dropping it releases the lock.
pub struct LogGuard<'a, E> {
    log: &'a JsonlLog<E>,
    cursor: MutexGuard<'a, usize>,
    _lock: FileLock,
}

impl<E> JsonlLog<E>
where
    E: Serialize + DeserializeOwned,
{
    pub fn new(fs: Arc<dyn FileSystem>, path: PathBuf) -> Self {
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            fs,
            cursor: Mutex::new(0),
            _event: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the log for writing.
    ///
    /// Returns the guard and every event appended since this handle last
    /// read the log. The first call returns the whole log.
    pub async fn lock(&self) -> Result<(LogGuard<'_, E>, Vec<E>)> {
        let mut cursor = self.cursor.lock().await;
        let lock = self.fs.lock_exclusive(&self.lock_path).await?;
        let events = self.read_tail(&mut *cursor).await?;
        Ok((
            LogGuard {
                log: self,
                cursor,
                _lock: lock,
            },
            events,
        ))
    }

    /// Events appended since this handle last read the log.
    pub async fn read_new(&self) -> Result<Vec<E>> {
        let (_guard, events) = self.lock().await?;
        Ok(events)
    }

    /// Read complete lines past `cursor`. Must be called with the file
    /// lock held.
    ///
    /// A trailing line without a newline can only be left by a writer that
    /// died mid-append; it is terminated so later appends start on a fresh
    /// line, and skipped like any other invalid line.
    async fn read_tail(&self, cursor: &mut usize) -> Result<Vec<E>> {
        if !self.fs.exists(&self.path).await {
            return Ok(Vec::new());
        }

        let content = self.fs.read_to_string(&self.path).await?;
        let Some(tail) = content.get(*cursor..) else {
            warn!(
                path = %self.path.display(),
                offset = *cursor,
                len = content.len(),
                "log is shorter than what was already read; ignoring"
            );
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for line in tail.split_inclusive('\n') {
            *cursor += line.len();
            if !line.ends_with('\n') {
                self.fs.append_string(&self.path, "\n").await?;
                *cursor += 1;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<E>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "skipping invalid JSONL line"
                    );
                }
            }
        }

        Ok(events)
    }
}

impl<E> LogGuard<'_, E>
where
    E: Serialize + DeserializeOwned,
{
    /// Append one event as a single line. Returns once the line is durable.
    pub async fn append(&mut self, event: &E) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        self.log.fs.append_string(&self.log.path, &line).await?;
        *self.cursor += line.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops_platform::fs::NativeFileSystem;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum Event {
        Put { key: String, value: u32 },
        Delete { key: String },
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("modelops-jsonl-{}", uuid::Uuid::new_v4()))
            .join("events.jsonl")
    }

    fn log_at(path: &Path) -> JsonlLog<Event> {
        JsonlLog::new(Arc::new(NativeFileSystem), path.to_path_buf())
    }

    async fn append(log: &JsonlLog<Event>, event: Event) {
        let (mut guard, _) = log.lock().await.unwrap();
        guard.append(&event).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let log = log_at(&temp_path());
        assert!(log.read_new().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopened_log_reads_everything_in_order() {
        let path = temp_path();
        let log = log_at(&path);
        append(
            &log,
            Event::Put {
                key: "a".into(),
                value: 1,
            },
        )
        .await;
        append(&log, Event::Delete { key: "a".into() }).await;

        // The writing handle has already seen its own lines.
        assert!(log.read_new().await.unwrap().is_empty());

        let events = log_at(&path).read_new().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], Event::Delete { key: "a".into() });

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with(r#"{"type":"put""#));
        assert!(log.lock_path.exists());
    }

    #[tokio::test]
    async fn handles_see_each_others_appends() {
        let path = temp_path();
        let first = log_at(&path);
        let second = log_at(&path);
        assert!(second.read_new().await.unwrap().is_empty());

        append(&first, Event::Delete { key: "x".into() }).await;

        let (mut guard, seen) = second.lock().await.unwrap();
        assert_eq!(seen, vec![Event::Delete { key: "x".into() }]);
        guard
            .append(&Event::Put {
                key: "y".into(),
                value: 2,
            })
            .await
            .unwrap();
        drop(guard);

        assert_eq!(
            first.read_new().await.unwrap(),
            vec![Event::Put {
                key: "y".into(),
                value: 2
            }]
        );
        assert!(second.read_new().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_lines_are_skipped() {
        let path = temp_path();
        let log = log_at(&path);
        append(
            &log,
            Event::Put {
                key: "a".into(),
                value: 1,
            },
        )
        .await;
        NativeFileSystem
            .append_string(&path, "{\"type\":\"put\",\"key\":\n\nnot json\n")
            .await
            .unwrap();
        append(&log, Event::Delete { key: "a".into() }).await;

        let events = log_at(&path).read_new().await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn torn_tail_is_terminated_before_the_next_append() {
        let path = temp_path();
        NativeFileSystem
            .append_string(&path, "{\"type\":\"delete\",\"key\":\"a\"}\n{\"type\":\"pu")
            .await
            .unwrap();

        let log = log_at(&path);
        assert_eq!(log.read_new().await.unwrap().len(), 1);
        append(&log, Event::Delete { key: "b".into() }).await;

        let events = log_at(&path).read_new().await.unwrap();
        assert_eq!(
            events,
            vec![
                Event::Delete { key: "a".into() },
                Event::Delete { key: "b".into() }
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let path = temp_path();
        let log = Arc::new(log_at(&path));
        let mut handles = Vec::new();
        for i in 0..20 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                append(
                    &log,
                    Event::Put {
                        key: format!("k{i}"),
                        value: i,
                    },
                )
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(log_at(&path).read_new().await.unwrap().len(), 20);
    }
}
