//! Moving archives into and out of storage trees

use bridge_traits::error::StorageError;
use bridge_traits::storage::{parent_path, StorageBackend};
use bytes::Bytes;
use tracing::{debug, instrument};

use crate::codec::{ArchiveReader, ArchiveWriter, DEFAULT_MAX_ENTRY_SIZE};
use crate::error::{ArchiveError, Result};
use crate::format::ArchiveFormat;

/// Counts from one extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ArchiveError::Storage(StorageError::IoFailure(format!("archive task failed: {e}"))))?
}

/// Unpack an archive into `destination`
///
/// Every member lands at its archive-relative path. Directory members are
/// created before any file is written.
///
/// Members over [`DEFAULT_MAX_ENTRY_SIZE`] are rejected, see
/// [`extract_all_with_limit`].
pub async fn extract_all<B>(archive: Bytes, format: ArchiveFormat, destination: &B) -> Result<ExtractSummary>
where
    B: StorageBackend + ?Sized,
{
    extract_all_with_limit(archive, format, DEFAULT_MAX_ENTRY_SIZE, destination).await
}

/// [`extract_all`] with an explicit per-member size limit in bytes
#[instrument(skip(archive, destination), fields(format = %format, size = archive.len()))]
pub async fn extract_all_with_limit<B>(
    archive: Bytes,
    format: ArchiveFormat,
    max_entry_size: u64,
    destination: &B,
) -> Result<ExtractSummary>
where
    B: StorageBackend + ?Sized,
{
    let entries = run_blocking(move || {
        ArchiveReader::new(archive, format)
            .with_max_entry_size(max_entry_size)
            .into_entries()
    })
    .await?;
    let mut summary = ExtractSummary::default();

    for entry in entries.iter().filter(|e| e.is_directory) {
        destination.create_dir_all(&entry.path).await?;
        summary.directories += 1;
    }

    for entry in entries.into_iter().filter(|e| !e.is_directory) {
        if let Some(parent) = parent_path(&entry.path) {
            destination.create_dir_all(parent).await?;
        }
        summary.bytes += entry.data.len() as u64;
        destination.write_all(&entry.path, Bytes::from(entry.data)).await?;
        summary.files += 1;
    }

    debug!(
        files = summary.files,
        directories = summary.directories,
        bytes = summary.bytes,
        "Extracted archive"
    );
    Ok(summary)
}

/// [`extract_all`] with the format resolved from a file name and optional hint
pub async fn extract_named<B>(
    archive: Bytes,
    file_name: Option<&str>,
    hint: Option<ArchiveFormat>,
    destination: &B,
) -> Result<ExtractSummary>
where
    B: StorageBackend + ?Sized,
{
    let format = ArchiveFormat::resolve(file_name, hint)?;
    extract_all(archive, format, destination).await
}

/// Pack the whole tree of `source` into a new archive
#[instrument(skip(source), fields(format = %format, source = %source.uri()))]
pub async fn create_archive<B>(source: &B, format: ArchiveFormat) -> Result<Bytes>
where
    B: StorageBackend + ?Sized,
{
    let mut records = source.list_all("").await?;
    records.sort_by(|a, b| a.path.cmp(&b.path));

    let mut members = Vec::with_capacity(records.len());
    for record in records {
        if record.is_directory {
            members.push((record.path, None));
        } else {
            let data = source.read_all(&record.path).await?;
            members.push((record.path, Some(data)));
        }
    }

    let bytes = run_blocking(move || {
        let mut writer = ArchiveWriter::new(format);
        for (path, data) in &members {
            match data {
                Some(data) => writer.write_entry(path, data)?,
                None => writer.write_directory(path)?,
            }
        }
        writer.finish()
    })
    .await?;

    debug!(size = bytes.len(), "Created archive");
    Ok(Bytes::from(bytes))
}
