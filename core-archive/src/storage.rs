//! Archive-backed storage endpoint

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bridge_desktop::TempStorage;
use bridge_traits::{
    error::{Result as StorageResult, StorageError},
    storage::{FileRecord, ReadStream, RecordStream, StorageBackend, WriteSink},
};
use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::format::ArchiveFormat;
use crate::transport::{create_archive, extract_all, ExtractSummary};

/// A scratch tree paired with an archive file on disk
///
/// The archive is unpacked into the scratch tree with
/// [`ArchiveStorage::extract_all`] and packed back with
/// [`ArchiveStorage::compress_all`]. All storage operations act on the
/// scratch tree.
#[derive(Debug)]
pub struct ArchiveStorage {
    archive_path: PathBuf,
    format: ArchiveFormat,
    scratch: TempStorage,
}

impl ArchiveStorage {
    /// Pair `archive_path` with a fresh scratch tree
    ///
    /// Fails with `ArchiveError::UnsupportedFormat` when no format can be
    /// resolved from the hint or file name.
    pub fn open(archive_path: impl Into<PathBuf>, hint: Option<ArchiveFormat>) -> Result<Self> {
        let archive_path = archive_path.into();
        let file_name = archive_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let format = ArchiveFormat::resolve(file_name.as_deref(), hint)?;
        let scratch = TempStorage::new()?;

        Ok(Self {
            archive_path,
            format,
            scratch,
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn scratch(&self) -> &TempStorage {
        &self.scratch
    }

    /// Unpack the archive file into the scratch tree
    pub async fn extract_all(&self) -> Result<ExtractSummary> {
        let display = self.archive_path.display().to_string();
        let bytes = tokio::fs::read(&self.archive_path)
            .await
            .map_err(|e| StorageError::from_io(e, display))?;
        extract_all(Bytes::from(bytes), self.format, &self.scratch).await
    }

    /// Pack the scratch tree back into the archive file
    pub async fn compress_all(&self) -> Result<u64> {
        let path_display = self.archive_path.display().to_string();
        let bytes = create_archive(&self.scratch, self.format).await?;

        if let Some(parent) = self.archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(e, &path_display))?;
        }
        tokio::fs::write(&self.archive_path, &bytes)
            .await
            .map_err(|e| StorageError::from_io(e, &path_display))?;

        debug!(path = %path_display, size = bytes.len(), "Wrote archive");
        Ok(bytes.len() as u64)
    }
}

#[async_trait]
impl StorageBackend for ArchiveStorage {
    fn uri(&self) -> String {
        self.archive_path.display().to_string()
    }

    async fn open_for_read(&self, path: &str) -> StorageResult<ReadStream> {
        self.scratch.open_for_read(path).await
    }

    async fn open_for_write(&self, path: &str) -> StorageResult<Box<dyn WriteSink>> {
        self.scratch.open_for_write(path).await
    }

    fn list<'a>(&'a self, path: &'a str) -> RecordStream<'a> {
        self.scratch.list(path)
    }

    async fn stat(&self, path: &str) -> StorageResult<FileRecord> {
        self.scratch.stat(path).await
    }

    async fn create_dir_all(&self, path: &str) -> StorageResult<()> {
        self.scratch.create_dir_all(path).await
    }

    async fn remove(&self, path: &str) -> StorageResult<()> {
        self.scratch.remove(path).await
    }

    async fn remove_recursive(&self, path: &str) -> StorageResult<()> {
        self.scratch.remove_recursive(path).await
    }

    async fn close(&self) -> StorageResult<()> {
        self.scratch.close().await
    }
}
