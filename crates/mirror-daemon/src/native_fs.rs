//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use mirror_core::fs::{FileSystem, FsError, Result};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

/// Native filesystem implementation for the daemon
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFs;

impl NativeFs {
    pub fn new() -> Self {
        Self
    }
}

fn map_err(path: &Path, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.display().to_string()),
        _ => FsError::Io(format!("{}: {}", path.display(), e)),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).await.map_err(|e| map_err(path, e))
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        fs::write(path, content).await.map_err(|e| map_err(path, e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await.map_err(|e| map_err(from, e))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(|e| map_err(path, e))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(|e| map_err(path, e))
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(|e| map_err(path, e))
    }
}
