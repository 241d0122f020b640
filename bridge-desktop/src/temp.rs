//! Ephemeral scratch storage

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use bridge_traits::{
    error::{Result, StorageError},
    storage::{FileRecord, ReadStream, RecordStream, StorageBackend, WriteSink},
};
use futures::stream::{self, StreamExt};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::filesystem::LocalStorage;

/// Local storage over a freshly created temporary directory
///
/// The directory is removed by [`StorageBackend::close`], or on drop if the
/// storage was never closed. Operations after close fail with
/// `StorageError::Unsupported`.
#[derive(Debug)]
pub struct TempStorage {
    dir: Mutex<Option<TempDir>>,
    inner: LocalStorage,
}

impl TempStorage {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("problem-sync-")
            .tempdir()
            .map_err(|e| StorageError::from_io(e, "temporary directory"))?;
        let inner = LocalStorage::from_existing(dir.path().to_path_buf());
        debug!(path = ?dir.path(), "Created temporary storage");

        Ok(Self {
            dir: Mutex::new(Some(dir)),
            inner,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.inner.root().to_path_buf()
    }

    pub fn is_closed(&self) -> bool {
        self.dir.lock().map(|dir| dir.is_none()).unwrap_or(true)
    }

    fn ensure_open(&self) -> Result<&LocalStorage> {
        if self.is_closed() {
            return Err(StorageError::Unsupported(
                "temporary storage already closed".to_string(),
            ));
        }
        Ok(&self.inner)
    }
}

#[async_trait]
impl StorageBackend for TempStorage {
    fn uri(&self) -> String {
        self.inner.uri()
    }

    async fn open_for_read(&self, path: &str) -> Result<ReadStream> {
        self.ensure_open()?.open_for_read(path).await
    }

    async fn open_for_write(&self, path: &str) -> Result<Box<dyn WriteSink>> {
        self.ensure_open()?.open_for_write(path).await
    }

    fn list<'a>(&'a self, path: &'a str) -> RecordStream<'a> {
        match self.ensure_open() {
            Ok(inner) => inner.list(path),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn stat(&self, path: &str) -> Result<FileRecord> {
        self.ensure_open()?.stat(path).await
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        self.ensure_open()?.create_dir_all(path).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.ensure_open()?.remove(path).await
    }

    async fn remove_recursive(&self, path: &str) -> Result<()> {
        self.ensure_open()?.remove_recursive(path).await
    }

    async fn set_modified(&self, path: &str, modified_at: i64) -> Result<()> {
        self.ensure_open()?.set_modified(path, modified_at).await
    }

    async fn close(&self) -> Result<()> {
        let dir = match self.dir.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };

        if let Some(dir) = dir {
            let path = dir.path().display().to_string();
            let removal = tokio::task::spawn_blocking(move || dir.close())
                .await
                .map_err(|e| StorageError::IoFailure(format!("{path}: {e}")))?;
            if let Err(e) = removal {
                warn!(path = %path, error = %e, "Failed to remove temporary storage");
                return Err(StorageError::from_io(e, path));
            }
            debug!(path = %path, "Removed temporary storage");
        }
        Ok(())
    }
}
