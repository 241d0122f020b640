//! Storage Abstractions
//!
//! Provides the backend-agnostic contract every storage endpoint implements:
//! streamed reads and writes, lazy recursive listing, stat, directory creation
//! and removal. Paths crossing this boundary are relative, forward-slash
//! separated, and never start with a slash.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, StorageError};

/// Boxed reader returned by [`StorageBackend::open_for_read`].
pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;

/// Lazy sequence of records produced by [`StorageBackend::list`].
pub type RecordStream<'a> = BoxStream<'a, Result<FileRecord>>;

/// One entry of a storage tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative POSIX path from the endpoint root
    pub path: String,
    pub is_directory: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time as a Unix timestamp, when the backend reports one
    pub modified_at: Option<i64>,
    /// Backend checksum (e.g. object entity tag), when the backend reports one
    pub checksum: Option<String>,
}

impl FileRecord {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            size,
            modified_at: None,
            checksum: None,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            size: 0,
            modified_at: None,
            checksum: None,
        }
    }

    pub fn with_modified_at(mut self, modified_at: Option<i64>) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Parent directory of this record, `None` for entries at the root.
    pub fn parent(&self) -> Option<&str> {
        parent_path(&self.path)
    }
}

/// Normalize a caller-supplied path into the relative POSIX form.
///
/// Empty and `.` segments collapse; a `..` segment is rejected because it
/// would escape the endpoint root.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StorageError::permission_denied(path)),
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

/// Join a relative directory and a child name.
pub fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{name}")
    }
}

pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Every proper ancestor directory of `path`, outermost first.
///
/// `ancestors("a/b/c.txt")` yields `["a", "a/b"]`.
pub fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/').map(|(idx, _)| &path[..idx]).collect()
}

/// Write handle returned by [`StorageBackend::open_for_write`].
///
/// Data becomes visible at the destination path once [`WriteSink::finish`]
/// returns. Dropping a sink without finishing abandons the write.
#[async_trait]
pub trait WriteSink: Send {
    /// Append a chunk
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Flush and commit the written data
    async fn finish(self: Box<Self>) -> Result<u64>;
}

/// Storage backend trait
///
/// Uniform capability surface over one storage backend:
/// - Local directories
/// - Ephemeral scratch directories
/// - S3-compatible object stores and versioned (branch-scoped) object stores
/// - Archive-backed trees
///
/// Implementations convert their native failures into [`StorageError`].
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::StorageBackend;
/// use futures::TryStreamExt;
///
/// async fn count_files(backend: &dyn StorageBackend) -> Result<usize> {
///     let records = backend.list("").try_collect::<Vec<_>>().await?;
///     Ok(records.iter().filter(|r| !r.is_directory).count())
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Identity of this endpoint (filesystem path or remote URI)
    fn uri(&self) -> String;

    /// Open a file for streaming reads
    async fn open_for_read(&self, path: &str) -> Result<ReadStream>;

    /// Open a file for writing, creating parent directories as needed
    async fn open_for_write(&self, path: &str) -> Result<Box<dyn WriteSink>>;

    /// Lazily walk everything under `path`
    ///
    /// Every entry (files and directories) is yielded exactly once. Returned
    /// paths are relative to the endpoint root, not to `path`.
    fn list<'a>(&'a self, path: &'a str) -> RecordStream<'a>;

    /// Metadata for a single entry
    async fn stat(&self, path: &str) -> Result<FileRecord>;

    /// Create a directory and all missing parents
    async fn create_dir_all(&self, path: &str) -> Result<()>;

    /// Remove a single file or empty directory
    async fn remove(&self, path: &str) -> Result<()>;

    /// Remove a directory tree
    async fn remove_recursive(&self, path: &str) -> Result<()>;

    /// Release the endpoint. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;

    /// Set the modification time of a file, in seconds since the epoch
    ///
    /// Backends without settable timestamps return `StorageError::Unsupported`.
    async fn set_modified(&self, path: &str, _modified_at: i64) -> Result<()> {
        Err(StorageError::Unsupported(format!(
            "{path}: modification times are managed by the backend"
        )))
    }

    /// Check if an entry exists
    async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read entire file contents into memory
    async fn read_all(&self, path: &str) -> Result<Bytes> {
        let mut reader = self.open_for_read(path).await?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        Ok(Bytes::from(buf))
    }

    /// Write data to a file, replacing any previous content
    async fn write_all(&self, path: &str, data: Bytes) -> Result<()> {
        let mut sink = self.open_for_write(path).await?;
        sink.write(&data).await?;
        sink.finish().await?;
        Ok(())
    }

    /// Collect the full listing under `path`
    async fn list_all(&self, path: &str) -> Result<Vec<FileRecord>> {
        self.list(path).try_collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_builders() {
        let record = FileRecord::file("tests/01.in", 42)
            .with_modified_at(Some(1_700_000_000))
            .with_checksum(Some("abc".to_string()));

        assert_eq!(record.name(), "01.in");
        assert_eq!(record.parent(), Some("tests"));
        assert!(!record.is_directory);
        assert_eq!(record.checksum.as_deref(), Some("abc"));

        let dir = FileRecord::directory("tests");
        assert!(dir.is_directory);
        assert_eq!(dir.parent(), None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a//b/./c.txt").unwrap(), "a/b/c.txt");
        assert_eq!(normalize_path("").unwrap(), "");
        assert_eq!(normalize_path("./").unwrap(), "");
        assert!(matches!(
            normalize_path("a/../../etc/passwd"),
            Err(StorageError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(join_path("", "a.txt"), "a.txt");
        assert_eq!(join_path("d", "a.txt"), "d/a.txt");
        assert_eq!(parent_path("d/e/a.txt"), Some("d/e"));
        assert_eq!(ancestors("a/b/c.txt"), vec!["a", "a/b"]);
        assert!(ancestors("c.txt").is_empty());
    }
}
