//! Local directory storage using Tokio

use std::collections::VecDeque;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use bridge_traits::{
    error::{Result, StorageError},
    storage::{join_path, normalize_path, FileRecord, ReadStream, RecordStream, StorageBackend, WriteSink},
};
use futures::stream::{self, StreamExt};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Storage rooted at a directory on the local filesystem
///
/// Every relative path handed to the backend is resolved under `root`; paths
/// that try to climb out of it are rejected.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open a directory as storage root
    ///
    /// With `create` set, a missing root is created; otherwise it fails with
    /// `StorageError::NotFound`.
    pub async fn open(root: impl Into<PathBuf>, create: bool) -> Result<Self> {
        let root = root.into();
        let display = root.display().to_string();

        match fs::metadata(&root).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                return Err(StorageError::Unsupported(format!(
                    "{display} is not a directory"
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && create => {
                fs::create_dir_all(&root)
                    .await
                    .map_err(|e| StorageError::from_io(e, &display))?;
                debug!(path = ?root, "Created storage root");
            }
            Err(e) => return Err(StorageError::from_io(e, display)),
        }

        Ok(Self { root })
    }

    /// Wrap a root the caller has already created
    pub(crate) fn from_existing(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf)> {
        let relative = normalize_path(path)?;
        let absolute = if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&relative)
        };
        Ok((relative, absolute))
    }

    /// Read one directory level, sorted by name
    async fn read_level(&self, relative: &str) -> Result<Vec<FileRecord>> {
        let (_, absolute) = self.resolve(relative)?;
        let mut read_dir = fs::read_dir(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, relative))?;

        let mut records = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(e, relative))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = join_path(relative, &name);
            // Follow symlinks so linked directories are walked like real ones
            let metadata = fs::metadata(entry.path())
                .await
                .map_err(|e| StorageError::from_io(e, &child))?;
            records.push(record_from_metadata(child, &metadata));
        }

        records.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(path = relative, count = records.len(), "Listed directory");
        Ok(records)
    }
}

fn record_from_metadata(path: String, metadata: &Metadata) -> FileRecord {
    let modified_at = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);

    if metadata.is_dir() {
        FileRecord::directory(path).with_modified_at(modified_at)
    } else {
        FileRecord::file(path, metadata.len()).with_modified_at(modified_at)
    }
}

/// Pending write into a sibling temp file, renamed over the target on finish
struct LocalWriteSink {
    file: fs::File,
    temp_path: TempPath,
    target: PathBuf,
    relative: String,
    written: u64,
}

#[async_trait]
impl WriteSink for LocalWriteSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| StorageError::from_io(e, &self.relative))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let LocalWriteSink {
            mut file,
            temp_path,
            target,
            relative,
            written,
        } = *self;

        file.flush()
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;
        drop(file);

        temp_path
            .persist(&target)
            .map_err(|e| StorageError::from_io(e.error, &relative))?;
        debug!(path = %relative, size = written, "Wrote file");
        Ok(written)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn uri(&self) -> String {
        self.root.display().to_string()
    }

    async fn open_for_read(&self, path: &str) -> Result<ReadStream> {
        let (relative, absolute) = self.resolve(path)?;
        let file = fs::File::open(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;
        debug!(path = %relative, "Opened file for reading");
        Ok(Box::new(file))
    }

    async fn open_for_write(&self, path: &str) -> Result<Box<dyn WriteSink>> {
        let (relative, target) = self.resolve(path)?;
        if relative.is_empty() {
            return Err(StorageError::Unsupported(
                "cannot write to the storage root".to_string(),
            ));
        }

        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;

        let temp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&parent)
            .map_err(|e| StorageError::from_io(e, &relative))?;
        let (file, temp_path) = temp.into_parts();

        Ok(Box::new(LocalWriteSink {
            file: fs::File::from_std(file),
            temp_path,
            target,
            relative,
            written: 0,
        }))
    }

    fn list<'a>(&'a self, path: &'a str) -> RecordStream<'a> {
        let start = match normalize_path(path) {
            Ok(start) => start,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };

        let pending = VecDeque::from([start]);
        let ready: VecDeque<FileRecord> = VecDeque::new();

        stream::try_unfold((pending, ready), move |(mut pending, mut ready)| async move {
            loop {
                if let Some(record) = ready.pop_front() {
                    return Ok(Some((record, (pending, ready))));
                }
                let Some(dir) = pending.pop_front() else {
                    return Ok(None);
                };
                for record in self.read_level(&dir).await? {
                    if record.is_directory {
                        pending.push_back(record.path.clone());
                    }
                    ready.push_back(record);
                }
            }
        })
        .boxed()
    }

    async fn stat(&self, path: &str) -> Result<FileRecord> {
        let (relative, absolute) = self.resolve(path)?;
        let metadata = fs::metadata(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;
        Ok(record_from_metadata(relative, &metadata))
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        let (relative, absolute) = self.resolve(path)?;
        fs::create_dir_all(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;
        debug!(path = %relative, "Created directory");
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let record = self.stat(path).await?;
        let (relative, absolute) = self.resolve(path)?;
        let removed = if record.is_directory {
            fs::remove_dir(&absolute).await
        } else {
            fs::remove_file(&absolute).await
        };
        removed.map_err(|e| StorageError::from_io(e, &relative))?;
        debug!(path = %relative, "Removed entry");
        Ok(())
    }

    async fn remove_recursive(&self, path: &str) -> Result<()> {
        let record = self.stat(path).await?;
        let (relative, absolute) = self.resolve(path)?;
        if relative.is_empty() {
            return Err(StorageError::Unsupported(
                "refusing to remove the storage root".to_string(),
            ));
        }
        let removed = if record.is_directory {
            fs::remove_dir_all(&absolute).await
        } else {
            fs::remove_file(&absolute).await
        };
        removed.map_err(|e| StorageError::from_io(e, &relative))?;
        debug!(path = %relative, "Removed tree");
        Ok(())
    }

    async fn set_modified(&self, path: &str, modified_at: i64) -> Result<()> {
        let (relative, absolute) = self.resolve(path)?;
        let secs = u64::try_from(modified_at).map_err(|_| {
            StorageError::Unsupported(format!("{relative}: timestamp {modified_at} before epoch"))
        })?;
        let time = UNIX_EPOCH + Duration::from_secs(secs);

        let task_path = relative.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&absolute)
                .and_then(|file| file.set_modified(time))
                .map_err(|e| StorageError::from_io(e, task_path))
        })
        .await
        .map_err(|e| StorageError::IoFailure(format!("{relative}: {e}")))??;

        debug!(path = %relative, modified_at, "Set modification time");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
