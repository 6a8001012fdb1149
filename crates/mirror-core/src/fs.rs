//! FileSystem trait abstraction for the mirror's file operations.
//!
//! Implementations:
//! - `InMemoryFs` - For testing, with write fault injection
//! - `NativeFs` (in mirror-daemon) - Uses tokio::fs
//!
//! Paths are absolute: the `PathResolver` already placed them under the mirror
//! root, so implementations never join against a base directory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// The handful of file operations the mirror performs.
///
/// Every operation replaces state wholesale; nothing is ever read back by the
/// synchronizer itself (`read` and `exists` are there for callers and tests).
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or truncate the file with `content`. Parent directories are not created.
    async fn write(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Rename a file, replacing any file already at `to`
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Create directory (and parents if needed)
    async fn mkdir(&self, path: &Path) -> Result<()>;
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
    /// Number of upcoming writes that should fail
    failing_writes: AtomicUsize,
    /// Number of successful writes, for asserting "one write per event"
    write_count: AtomicUsize,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            failing_writes: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` writes fail with an IO error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of writes that succeeded so far.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Read a file as UTF-8, `None` when missing.
    pub fn contents(&self, path: &Path) -> Option<String> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// All file paths currently stored, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<_> = files.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn take_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        if self.take_failure() {
            return Err(FsError::Io(format!(
                "simulated write failure: {}",
                path.display()
            )));
        }

        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path.to_path_buf(), content.to_vec());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let content = files
            .remove(from)
            .ok_or_else(|| FsError::NotFound(from.display().to_string()))?;
        files.insert(to.to_path_buf(), content);
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.contains_key(path))
    }

    async fn mkdir(&self, _path: &Path) -> Result<()> {
        // Directories are implicit in memory
        Ok(())
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This lets a test keep a handle on the filesystem the synchronizer owns
#[async_trait]
impl<T: FileSystem + Send + Sync> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        (**self).rename(from, to).await
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        (**self).remove(path).await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        (**self).mkdir(path).await
    }
}
