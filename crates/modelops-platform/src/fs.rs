//! Filesystem abstraction and native implementation.
//!
//! Provides the small set of file operations the orchestrator needs:
//! reading config files, appending to JSONL state logs, and advisory
//! locks that let several processes share one storage directory. The
//! native implementation is backed by [`tokio::fs`] and the advisory
//! locking of [`std::fs::File`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// An exclusive advisory lock on a lock file.
///
/// The lock is released when the value is dropped, and by the operating
/// system when the owning process exits, so a crashed holder never leaves
/// it stuck.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _file: std::fs::File,
}

impl FileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
}

/// Platform-agnostic filesystem operations.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read a file's entire contents as a UTF-8 string.
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String>;

    /// Append a string to a file, creating it (and parent dirs) if it does not exist.
    async fn append_string(&self, path: &Path, content: &str) -> std::io::Result<()>;

    /// Check whether a path exists (file or directory).
    async fn exists(&self, path: &Path) -> bool;

    /// List the entries of a directory.
    async fn list_dir(&self, path: &Path) -> std::io::Result<Vec<PathBuf>>;

    /// Remove a file.
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;

    /// Take an exclusive lock on `path`, waiting for other holders.
    ///
    /// The lock file (and its parent dirs) is created if missing.
    async fn lock_exclusive(&self, path: &Path) -> std::io::Result<FileLock>;

    /// Take an exclusive lock on `path` if nobody holds it.
    async fn try_lock_exclusive(&self, path: &Path) -> std::io::Result<Option<FileLock>>;

    /// Get the user's home directory.
    fn home_dir(&self) -> Option<PathBuf>;
}

/// Native filesystem implementation using [`tokio::fs`].
pub struct NativeFileSystem;

#[async_trait]
impl FileSystem for NativeFileSystem {
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn append_string(&self, path: &Path, content: &str) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        // State logs are the source of truth after a crash.
        file.sync_data().await?;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn list_dir(&self, path: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.path());
        }
        Ok(entries)
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn lock_exclusive(&self, path: &Path) -> std::io::Result<FileLock> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = open_lock_file(&path)?;
            file.lock()?;
            Ok(FileLock { path, _file: file })
        })
        .await
        .map_err(std::io::Error::other)?
    }

    async fn try_lock_exclusive(&self, path: &Path) -> std::io::Result<Option<FileLock>> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = open_lock_file(&path)?;
            match file.try_lock() {
                Ok(()) => Ok(Some(FileLock { path, _file: file })),
                Err(std::fs::TryLockError::WouldBlock) => Ok(None),
                Err(std::fs::TryLockError::Error(e)) => Err(e),
            }
        })
        .await
        .map_err(std::io::Error::other)?
    }

    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_test_path(prefix: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("modelops-fs-test-{prefix}-{}", std::process::id()))
            .join(format!("{}.jsonl", uuid_like()))
    }

    fn uuid_like() -> String {
        format!(
            "{:x}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        )
    }

    #[tokio::test]
    async fn append_creates_parents_and_accumulates() {
        let fs = NativeFileSystem;
        let path = temp_test_path("append");

        fs.append_string(&path, "one\n").await.unwrap();
        fs.append_string(&path, "two\n").await.unwrap();

        assert!(fs.exists(&path).await);
        assert_eq!(fs.read_to_string(&path).await.unwrap(), "one\ntwo\n");

        fs.remove_file(&path).await.unwrap();
        assert!(!fs.exists(&path).await);
    }

    #[tokio::test]
    async fn missing_file_does_not_exist() {
        let fs = NativeFileSystem;
        let path = temp_test_path("missing");
        assert!(!fs.exists(&path).await);
        assert!(fs.read_to_string(&path).await.is_err());
    }

    #[tokio::test]
    async fn list_dir_returns_entries() {
        let fs = NativeFileSystem;
        let path = temp_test_path("list");
        fs.append_string(&path, "x\n").await.unwrap();

        let dir = path.parent().unwrap();
        let entries = fs.list_dir(dir).await.unwrap();
        assert!(entries.contains(&path));
    }

    #[tokio::test]
    async fn exclusive_lock_is_held_until_dropped() {
        let fs = NativeFileSystem;
        let path = temp_test_path("lock").with_extension("lock");

        let held = fs.lock_exclusive(&path).await.unwrap();
        assert_eq!(held.path(), path.as_path());
        assert!(fs.try_lock_exclusive(&path).await.unwrap().is_none());

        drop(held);
        let again = fs.try_lock_exclusive(&path).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn waiting_lock_proceeds_after_release() {
        let fs = std::sync::Arc::new(NativeFileSystem);
        let path = temp_test_path("wait").with_extension("lock");

        let held = fs.lock_exclusive(&path).await.unwrap();
        let waiter = {
            let fs = fs.clone();
            let path = path.clone();
            tokio::spawn(async move { fs.lock_exclusive(&path).await.map(|_| ()) })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }
}
