//! # Sync Manager
//!
//! Validates a problem tree and mirrors it onto a destination endpoint.
//!
//! ## Workflow
//!
//! ### Validation
//! 1. Compile the ignore file (a missing file ignores nothing)
//! 2. List the source, dropping ignored entries and the derived snapshot
//! 3. Parse the descriptor (missing or malformed is fatal)
//! 4. Reconcile declared classifications with the listing
//!
//! ### Mirror
//! 1. Ensure every destination directory exists
//! 2. Copy files with at most `worker_count` copies in flight
//! 3. Stop at the first failure
//!
//! Mirroring is one-way and never deletes from the destination. When both
//! endpoints are object stores and a [`BulkTransport`] is configured, the
//! filtered file list is handed to the transport instead.
//!
//! Both endpoints are closed once the session reaches `Done` or `Failed`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{StorageEndpoint, SyncConfig, SyncManager};
//! use bridge_traits::ConsoleLogger;
//! use std::sync::Arc;
//!
//! let source = StorageEndpoint::local("/srv/problems/a-plus-b", false).await?;
//! let destination = StorageEndpoint::local("/srv/judge/a-plus-b", true).await?;
//!
//! let mut manager = SyncManager::new(
//!     source,
//!     Some(destination),
//!     Arc::new(ConsoleLogger::default()),
//!     SyncConfig::default(),
//! );
//! let report = manager.sync_with_validation().await?;
//! println!("copied {} files", report.files_copied);
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use bridge_desktop::CommandTransport;
use bridge_traits::{
    storage::{ancestors, StorageBackend},
    BulkTransport, FileRecord, LogEntry, LogLevel, LoggerSink, StorageError, TransportRequest,
};
use bytes::Bytes;
use core_runtime::config::{
    CoreConfig, DEFAULT_DESCRIPTOR_FILE, DEFAULT_IGNORE_FILE, DEFAULT_SNAPSHOT_FILE,
    DEFAULT_WORKER_COUNT,
};
use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::descriptor::{ClassificationMap, Descriptor};
use crate::endpoint::StorageEndpoint;
use crate::ignore::IgnoreMatcher;
use crate::session::{MirrorReport, SyncSession};
use crate::{Result, SyncError};

const LOG_TARGET: &str = "core_sync::manager";

/// Read buffer for streamed copies
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Flag telling the transport to read the file list verbatim
const FILES_FROM_FLAG: &str = "--files-from-raw";

/// Sync manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum concurrent file copies for [`SyncManager::sync_with_validation`]
    pub worker_count: usize,
    pub ignore_file: String,
    pub descriptor_file: String,
    pub snapshot_file: String,
    /// Write the reconciled descriptor back to the source before mirroring
    pub write_snapshot: bool,
    /// Skip files the destination already holds unchanged
    pub skip_unchanged: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            ignore_file: DEFAULT_IGNORE_FILE.to_string(),
            descriptor_file: DEFAULT_DESCRIPTOR_FILE.to_string(),
            snapshot_file: DEFAULT_SNAPSHOT_FILE.to_string(),
            write_snapshot: false,
            skip_unchanged: false,
        }
    }
}

impl From<&CoreConfig> for SyncConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            worker_count: config.worker_count,
            ignore_file: config.ignore_file.clone(),
            descriptor_file: config.descriptor_file.clone(),
            snapshot_file: config.snapshot_file.clone(),
            write_snapshot: config.write_snapshot,
            skip_unchanged: config.skip_unchanged,
        }
    }
}

/// Command transport described by the runtime configuration, if any
pub fn command_transport(config: &CoreConfig) -> Option<CommandTransport> {
    config.transport.as_ref().map(|settings| {
        let transport = CommandTransport::new(&settings.program);
        match &settings.config_text {
            Some(text) => transport.with_config(text),
            None => transport,
        }
    })
}

enum CopyOutcome {
    Copied(u64),
    Skipped,
}

/// Drives one sync session between a source and an optional destination
pub struct SyncManager {
    source: Arc<StorageEndpoint>,
    destination: Option<Arc<StorageEndpoint>>,
    logger: Arc<dyn LoggerSink>,
    bulk_transport: Option<Arc<dyn BulkTransport>>,
    config: SyncConfig,
    session: SyncSession,
    ignored_entries: u64,
    released: bool,
}

impl SyncManager {
    pub fn new(
        source: StorageEndpoint,
        destination: Option<StorageEndpoint>,
        logger: Arc<dyn LoggerSink>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source: Arc::new(source),
            destination: destination.map(Arc::new),
            logger,
            bulk_transport: None,
            config,
            session: SyncSession::new(),
            ignored_entries: 0,
            released: false,
        }
    }

    /// Use `transport` for object store to object store mirrors
    pub fn with_bulk_transport(mut self, transport: Arc<dyn BulkTransport>) -> Self {
        self.bulk_transport = Some(transport);
        self
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn source(&self) -> &StorageEndpoint {
        &self.source
    }

    pub fn destination(&self) -> Option<&StorageEndpoint> {
        self.destination.as_deref()
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Validate the source tree and return its reconciled classification
    ///
    /// # Errors
    ///
    /// - `SyncError::FileSystem` for unsupported sources and backend failures
    /// - `SyncError::Config` when the descriptor is missing or malformed
    ///
    /// Any failure moves the session to `Failed` and releases the endpoints.
    pub async fn validate_source(&mut self) -> Result<ClassificationMap> {
        self.session.begin_validation()?;
        let source_uri = self.source.uri();
        self.emit(LogLevel::Info, "Validating source", |e| {
            e.with_field("source", source_uri)
        })
        .await;

        match self.run_validation().await {
            Ok(classification) => Ok(classification),
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Validate the source, then mirror it onto the destination
    ///
    /// Nothing is written to the destination unless validation succeeds.
    pub async fn sync_with_validation(&mut self) -> Result<MirrorReport> {
        let destination = self.require_destination().await?;
        self.validate_source().await?;

        let worker_count = self.config.worker_count;
        let write_snapshot = self.config.write_snapshot;
        self.mirror(destination, worker_count, write_snapshot).await
    }

    /// Mirror the source onto the destination without descriptor checks
    ///
    /// Ignore rules still apply. Reuses the listing of a preceding
    /// [`SyncManager::validate_source`] call when there is one.
    pub async fn sync_without_validation(&mut self, worker_count: usize) -> Result<MirrorReport> {
        let destination = self.require_destination().await?;
        self.mirror(destination, worker_count, false).await
    }

    /// Close both endpoints; later calls do nothing
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut endpoints = vec![Arc::clone(&self.source)];
        endpoints.extend(self.destination.iter().cloned());

        for endpoint in endpoints {
            if let Err(e) = endpoint.backend().close().await {
                self.emit(LogLevel::Warn, "Failed to release endpoint", |entry| {
                    entry
                        .with_field("endpoint", endpoint.uri())
                        .with_field("error", &e)
                })
                .await;
            }
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    async fn run_validation(&mut self) -> Result<ClassificationMap> {
        self.require_syncable(&self.source)?;

        let matcher = self.load_ignore_matcher().await?;
        let listing = self.scan_source(&matcher).await?;

        let raw = match self
            .source
            .backend()
            .read_all(&self.config.descriptor_file)
            .await
        {
            Ok(bytes) => Some(bytes),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        let descriptor = Descriptor::parse(raw.as_deref())?;
        let classification = descriptor.reconcile(&listing);

        for path in descriptor.unrecognized().to_vec() {
            self.emit(LogLevel::Warn, "Unrecognized file type, using default", |e| {
                e.with_field("path", &path)
            })
            .await;
        }
        for path in descriptor.missing(&listing) {
            self.emit(LogLevel::Warn, "Declared file does not exist", |e| {
                e.with_field("path", &path)
            })
            .await;
        }

        let files = classification.len();
        self.session.finish_validation(
            listing,
            matcher,
            descriptor,
            classification.clone(),
        )?;
        self.emit(LogLevel::Info, "Source validated", |e| {
            e.with_field("files", files)
        })
        .await;

        Ok(classification)
    }

    async fn load_ignore_matcher(&mut self) -> Result<IgnoreMatcher> {
        let ignore_file = self.config.ignore_file.clone();
        let text = match self.source.backend().read_all(&ignore_file).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.is_not_found() => {
                self.emit(LogLevel::Debug, "No ignore file, nothing is ignored", |e| {
                    e.with_field("path", &ignore_file)
                })
                .await;
                return Ok(IgnoreMatcher::empty());
            }
            Err(e) => return Err(e.into()),
        };

        let base_path = match ignore_file.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => "",
        };
        let matcher = IgnoreMatcher::from_text(&text, base_path);

        for skipped in matcher.skipped().to_vec() {
            self.emit(LogLevel::Warn, "Skipping invalid ignore pattern", |e| {
                e.with_field("line", skipped.line)
                    .with_field("pattern", &skipped.text)
                    .with_field("reason", &skipped.reason)
            })
            .await;
        }
        Ok(matcher)
    }

    /// Full source listing minus ignored entries and the snapshot file
    async fn scan_source(&mut self, matcher: &IgnoreMatcher) -> Result<Vec<FileRecord>> {
        let mut listing = Vec::new();
        let mut ignored = 0u64;

        {
            let mut stream = self.source.backend().list("");
            while let Some(record) = stream.try_next().await? {
                if record.path == self.config.snapshot_file {
                    continue;
                }
                let protected = record.path == self.config.ignore_file
                    || record.path == self.config.descriptor_file;
                if !protected && matcher.is_ignored_entry(&record.path, record.is_directory) {
                    ignored += 1;
                    continue;
                }
                listing.push(record);
            }
        }

        listing.sort_by(|a, b| a.path.cmp(&b.path));
        self.ignored_entries = ignored;
        self.emit(LogLevel::Debug, "Listed source", |e| {
            e.with_field("entries", listing.len())
                .with_field("ignored", ignored)
        })
        .await;
        Ok(listing)
    }

    // ========================================================================
    // Mirror
    // ========================================================================

    async fn mirror(
        &mut self,
        destination: Arc<StorageEndpoint>,
        worker_count: usize,
        write_snapshot: bool,
    ) -> Result<MirrorReport> {
        self.session.begin_mirror()?;
        let source_uri = self.source.uri();
        self.emit(LogLevel::Info, "Mirroring source", |e| {
            e.with_field("source", source_uri)
                .with_field("destination", destination.uri())
                .with_field("workers", worker_count)
        })
        .await;

        match self.run_mirror(destination, worker_count.max(1), write_snapshot).await {
            Ok(report) => {
                self.session.complete(report)?;
                self.emit(LogLevel::Info, "Mirror complete", |e| {
                    e.with_field("copied", report.files_copied)
                        .with_field("skipped", report.files_skipped)
                        .with_field("bytes", report.bytes_copied)
                })
                .await;
                self.release().await;
                Ok(report)
            }
            Err(e) => Err(self.abort(e).await),
        }
    }

    async fn run_mirror(
        &mut self,
        destination: Arc<StorageEndpoint>,
        worker_count: usize,
        write_snapshot: bool,
    ) -> Result<MirrorReport> {
        self.require_syncable(&self.source)?;
        self.require_syncable(&destination)?;

        let mut listing = match self.session.listing.clone() {
            Some(listing) => listing,
            None => {
                let matcher = self.load_ignore_matcher().await?;
                let listing = self.scan_source(&matcher).await?;
                self.session.matcher = Some(matcher);
                self.session.listing = Some(listing.clone());
                listing
            }
        };

        if write_snapshot {
            if let Some(record) = self.write_snapshot().await? {
                listing.push(record);
            }
        }

        let files: Vec<FileRecord> = listing.iter().filter(|r| !r.is_directory).cloned().collect();

        if self.source.is_remote() && destination.is_remote() {
            if let Some(transport) = self.bulk_transport.clone() {
                return self.bulk_copy(transport, &destination, &files).await;
            }
        }

        let mut report = MirrorReport {
            files_ignored: self.ignored_entries,
            ..MirrorReport::default()
        };
        report.directories_created = self
            .ensure_directories(destination.backend(), &listing, worker_count)
            .await?;

        let (copied, skipped, bytes) = self.copy_files(&destination, files, worker_count).await?;
        report.files_copied = copied;
        report.files_skipped = skipped;
        report.bytes_copied = bytes;
        Ok(report)
    }

    async fn write_snapshot(&mut self) -> Result<Option<FileRecord>> {
        let (Some(descriptor), Some(classification)) =
            (&self.session.descriptor, &self.session.classification)
        else {
            return Ok(None);
        };

        let bytes = descriptor.snapshot(classification)?;
        let size = bytes.len() as u64;
        let path = self.config.snapshot_file.clone();
        self.source
            .backend()
            .write_all(&path, Bytes::from(bytes))
            .await?;

        self.emit(LogLevel::Info, "Wrote descriptor snapshot", |e| {
            e.with_field("path", &path).with_field("size", size)
        })
        .await;
        Ok(Some(FileRecord::file(path, size)))
    }

    /// Create every destination directory before any file is copied
    async fn ensure_directories(
        &self,
        destination: &dyn StorageBackend,
        listing: &[FileRecord],
        worker_count: usize,
    ) -> Result<u64> {
        let mut directories = BTreeSet::new();
        for record in listing {
            directories.extend(ancestors(&record.path).into_iter().map(str::to_string));
            if record.is_directory {
                directories.insert(record.path.clone());
            }
        }

        let created: Vec<()> = futures::stream::iter(directories)
            .map(|dir| async move { destination.create_dir_all(&dir).await })
            .buffer_unordered(worker_count)
            .try_collect()
            .await?;
        Ok(created.len() as u64)
    }

    /// Copy `files` with bounded concurrency; the first failure aborts the rest
    async fn copy_files(
        &self,
        destination: &Arc<StorageEndpoint>,
        files: Vec<FileRecord>,
        worker_count: usize,
    ) -> Result<(u64, u64, u64)> {
        let semaphore = Arc::new(Semaphore::new(worker_count));
        let skip_unchanged = self.config.skip_unchanged;
        let mut tasks: JoinSet<Result<CopyOutcome>> = JoinSet::new();
        let mut totals = (0u64, 0u64, 0u64);

        for record in files {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = tally(joined, &mut totals) {
                    tasks.abort_all();
                    return Err(e);
                }
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Task("copy semaphore closed".to_string()))?;
            let source = Arc::clone(&self.source);
            let destination = Arc::clone(destination);

            tasks.spawn(async move {
                let outcome = copy_file(
                    source.backend(),
                    destination.backend(),
                    &record,
                    skip_unchanged,
                )
                .await;
                drop(permit);
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = tally(joined, &mut totals) {
                tasks.abort_all();
                return Err(e);
            }
        }
        Ok(totals)
    }

    async fn bulk_copy(
        &mut self,
        transport: Arc<dyn BulkTransport>,
        destination: &StorageEndpoint,
        files: &[FileRecord],
    ) -> Result<MirrorReport> {
        let unsupported =
            || StorageError::Unsupported("bulk transport needs remote endpoints".to_string());
        let source_uri = self.source.remote_uri().ok_or_else(unsupported)?;
        let destination_uri = destination.remote_uri().ok_or_else(unsupported)?;

        let list_file = tempfile::Builder::new()
            .prefix("sync-files-")
            .tempfile()
            .map_err(|e| StorageError::from_io(e, "transport file list"))?;
        let mut paths = files
            .iter()
            .map(|r| r.path.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        paths.push('\n');
        tokio::fs::write(list_file.path(), paths)
            .await
            .map_err(|e| StorageError::from_io(e, list_file.path().display().to_string()))?;

        let request = TransportRequest::new(&source_uri, &destination_uri)
            .with_flag(FILES_FROM_FLAG)
            .with_flag(list_file.path().display().to_string());

        self.emit(LogLevel::Info, "Handing mirror to bulk transport", |e| {
            e.with_field("source", &source_uri)
                .with_field("destination", &destination_uri)
                .with_field("files", files.len())
        })
        .await;

        let output = transport.copy(request).await?;
        drop(list_file);

        if !output.success() {
            return Err(SyncError::Transport {
                code: output.exit_code,
                stderr: output.stderr,
            });
        }

        Ok(MirrorReport {
            files_copied: files.len() as u64,
            files_ignored: self.ignored_entries,
            bytes_copied: files.iter().map(|r| r.size).sum(),
            used_bulk_transport: true,
            ..MirrorReport::default()
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn require_destination(&mut self) -> Result<Arc<StorageEndpoint>> {
        if let Some(destination) = &self.destination {
            return Ok(Arc::clone(destination));
        }
        let err = SyncError::DestinationUndefined;
        self.emit(LogLevel::Error, err.to_string(), |e| e).await;
        Err(err)
    }

    fn require_syncable(&self, endpoint: &StorageEndpoint) -> Result<()> {
        if endpoint.is_syncable() {
            Ok(())
        } else {
            Err(StorageError::Unsupported(format!(
                "{} endpoints cannot be synced, extract the archive first",
                endpoint.kind()
            ))
            .into())
        }
    }

    /// Fail the session, release the endpoints and hand the error back
    async fn abort(&mut self, error: SyncError) -> SyncError {
        if !self.session.state.is_terminal() && self.session.fail(error.to_string()).is_ok() {
            self.emit(LogLevel::Error, "Sync session failed", |e| {
                e.with_field("error", &error)
            })
            .await;
        }
        self.release().await;
        error
    }

    /// Record a diagnostic on the session and forward it to the logger
    async fn emit<F>(&mut self, level: LogLevel, message: impl Into<String>, build: F)
    where
        F: FnOnce(LogEntry) -> LogEntry,
    {
        let entry = build(LogEntry::new(level, LOG_TARGET, message))
            .with_session_id(self.session.id.as_str());

        if level >= self.logger.min_level() {
            self.logger.log(entry.clone()).await.ok();
        }
        self.session.diagnostics.push(entry);
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("source", &self.source.uri())
            .field("destination", &self.destination.as_ref().map(|d| d.uri()))
            .field("bulk_transport", &self.bulk_transport.is_some())
            .field("config", &self.config)
            .field("state", &self.session.state)
            .finish()
    }
}

fn tally(
    joined: std::result::Result<Result<CopyOutcome>, tokio::task::JoinError>,
    totals: &mut (u64, u64, u64),
) -> Result<()> {
    match joined {
        Ok(Ok(CopyOutcome::Copied(bytes))) => {
            totals.0 += 1;
            totals.2 += bytes;
            Ok(())
        }
        Ok(Ok(CopyOutcome::Skipped)) => {
            totals.1 += 1;
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(SyncError::Task(e.to_string())),
    }
}

/// Stream one file from `source` to `destination`
async fn copy_file(
    source: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    record: &FileRecord,
    skip_unchanged: bool,
) -> Result<CopyOutcome> {
    let path = record.path.as_str();

    if skip_unchanged {
        match destination.stat(path).await {
            Ok(existing) if is_up_to_date(record, &existing) => return Ok(CopyOutcome::Skipped),
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    let mut reader = source.open_for_read(path).await?;
    let mut sink = destination.open_for_write(path).await?;
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        if n == 0 {
            break;
        }
        sink.write(&buf[..n]).await?;
    }
    let written = sink.finish().await?;

    // the destination keeps the source mtime
    if let Some(modified_at) = record.modified_at {
        match destination.set_modified(path, modified_at).await {
            Ok(()) | Err(StorageError::Unsupported(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(CopyOutcome::Copied(written))
}

/// Equal size and checksum, or without checksums equal size and mtime
fn is_up_to_date(source: &FileRecord, destination: &FileRecord) -> bool {
    if destination.is_directory || source.size != destination.size {
        return false;
    }
    match (&source.checksum, &destination.checksum) {
        (Some(a), Some(b)) => a == b,
        _ => match (source.modified_at, destination.modified_at) {
            (Some(src), Some(dst)) => dst == src,
            _ => false,
        },
    }
}
