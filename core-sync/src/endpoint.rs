//! # Storage Endpoints
//!
//! The closed set of backends a sync session can read from or write to.
//!
//! | Kind                   | Backend                  | Syncable | Remote |
//! |------------------------|--------------------------|----------|--------|
//! | `Local`                | [`LocalStorage`]         | yes      | no     |
//! | `Temporary`            | [`TempStorage`]          | yes      | no     |
//! | `ObjectStore`          | [`ObjectStorage`]        | yes      | yes    |
//! | `VersionedObjectStore` | [`VersionedObjectStorage`] | yes    | yes    |
//! | `ArchiveBacked`        | [`ArchiveStorage`]       | no       | no     |
//!
//! Archive-backed endpoints are only ever extracted. A submitted bundle is
//! synced by unpacking it into a temporary endpoint first, see
//! [`StorageEndpoint::ingest_archive`]. Submitted code text gets the same
//! treatment through [`StorageEndpoint::from_code_text`].

use std::fmt;
use std::path::PathBuf;

use bridge_desktop::{LocalStorage, TempStorage};
use bridge_traits::StorageBackend;
use bytes::Bytes;
use core_archive::{extract_named, ArchiveFormat, ArchiveStorage};
use core_runtime::config::{ObjectStoreSettings, VersionedStoreSettings};
use provider_s3::{
    ObjectStorage, ObjectStoreAddress, StaticCredentials, VersionedObjectStorage,
    VersionedStoreAddress,
};
use tracing::debug;

use crate::error::Result;

/// Discriminant of [`StorageEndpoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Local,
    Temporary,
    ObjectStore,
    VersionedObjectStore,
    ArchiveBacked,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Local => "local",
            EndpointKind::Temporary => "temporary",
            EndpointKind::ObjectStore => "object_store",
            EndpointKind::VersionedObjectStore => "versioned_object_store",
            EndpointKind::ArchiveBacked => "archive",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected storage backend
#[derive(Debug)]
pub enum StorageEndpoint {
    Local(LocalStorage),
    Temporary(TempStorage),
    ObjectStore(ObjectStorage),
    VersionedObjectStore(VersionedObjectStorage),
    ArchiveBacked(ArchiveStorage),
}

impl StorageEndpoint {
    /// Open a local directory, creating it when `create` is set
    pub async fn local(root: impl Into<PathBuf>, create: bool) -> Result<Self> {
        Ok(Self::Local(LocalStorage::open(root, create).await?))
    }

    pub fn temporary() -> Result<Self> {
        Ok(Self::Temporary(TempStorage::new()?))
    }

    pub async fn object_store(address: ObjectStoreAddress) -> Result<Self> {
        let storage = ObjectStorage::connect(address)
            .await
            .map_err(bridge_traits::StorageError::from)?;
        Ok(Self::ObjectStore(storage))
    }

    pub async fn versioned_object_store(address: VersionedStoreAddress) -> Result<Self> {
        let storage = VersionedObjectStorage::connect(address)
            .await
            .map_err(bridge_traits::StorageError::from)?;
        Ok(Self::VersionedObjectStore(storage))
    }

    /// Pair an archive file with a scratch tree; the archive is not read yet
    pub fn archive(path: impl Into<PathBuf>, hint: Option<ArchiveFormat>) -> Result<Self> {
        Ok(Self::ArchiveBacked(ArchiveStorage::open(path, hint)?))
    }

    /// Unpack a submitted bundle into a fresh temporary endpoint
    ///
    /// The temporary root is released again when extraction fails.
    pub async fn ingest_archive(
        bytes: Bytes,
        file_name: Option<&str>,
        hint: Option<ArchiveFormat>,
    ) -> Result<Self> {
        let format = ArchiveFormat::resolve(file_name, hint)?;
        let scratch = TempStorage::new()?;

        match extract_named(bytes, None, Some(format), &scratch).await {
            Ok(summary) => {
                debug!(
                    format = %format,
                    files = summary.files,
                    root = %scratch.uri(),
                    "Ingested archive"
                );
                Ok(Self::Temporary(scratch))
            }
            Err(e) => {
                scratch.close().await.ok();
                Err(e.into())
            }
        }
    }

    /// A temporary endpoint holding one submitted source file
    pub async fn from_code_text(file_name: &str, text: &str) -> Result<Self> {
        let scratch = TempStorage::new()?;
        match scratch
            .write_all(file_name, Bytes::copy_from_slice(text.as_bytes()))
            .await
        {
            Ok(()) => {
                debug!(file = %file_name, size = text.len(), "Stored code text");
                Ok(Self::Temporary(scratch))
            }
            Err(e) => {
                scratch.close().await.ok();
                Err(e.into())
            }
        }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            StorageEndpoint::Local(_) => EndpointKind::Local,
            StorageEndpoint::Temporary(_) => EndpointKind::Temporary,
            StorageEndpoint::ObjectStore(_) => EndpointKind::ObjectStore,
            StorageEndpoint::VersionedObjectStore(_) => EndpointKind::VersionedObjectStore,
            StorageEndpoint::ArchiveBacked(_) => EndpointKind::ArchiveBacked,
        }
    }

    /// Whether the endpoint can take part in validation and mirroring
    pub fn is_syncable(&self) -> bool {
        !matches!(self, StorageEndpoint::ArchiveBacked(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            StorageEndpoint::ObjectStore(_) | StorageEndpoint::VersionedObjectStore(_)
        )
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        match self {
            StorageEndpoint::Local(storage) => storage,
            StorageEndpoint::Temporary(storage) => storage,
            StorageEndpoint::ObjectStore(storage) => storage,
            StorageEndpoint::VersionedObjectStore(storage) => storage,
            StorageEndpoint::ArchiveBacked(storage) => storage,
        }
    }

    /// Address understood by the bulk transport, remote endpoints only
    pub fn remote_uri(&self) -> Option<String> {
        match self {
            StorageEndpoint::ObjectStore(storage) => Some(storage.remote_uri()),
            StorageEndpoint::VersionedObjectStore(storage) => Some(storage.remote_uri()),
            _ => None,
        }
    }

    pub fn uri(&self) -> String {
        self.backend().uri()
    }
}

impl From<LocalStorage> for StorageEndpoint {
    fn from(storage: LocalStorage) -> Self {
        Self::Local(storage)
    }
}

impl From<TempStorage> for StorageEndpoint {
    fn from(storage: TempStorage) -> Self {
        Self::Temporary(storage)
    }
}

impl From<ObjectStorage> for StorageEndpoint {
    fn from(storage: ObjectStorage) -> Self {
        Self::ObjectStore(storage)
    }
}

impl From<VersionedObjectStorage> for StorageEndpoint {
    fn from(storage: VersionedObjectStorage) -> Self {
        Self::VersionedObjectStore(storage)
    }
}

impl From<ArchiveStorage> for StorageEndpoint {
    fn from(storage: ArchiveStorage) -> Self {
        Self::ArchiveBacked(storage)
    }
}

// ============================================================================
// Addressing from runtime settings
// ============================================================================

/// Object store address for `bucket/prefix` using configured connection settings
pub fn object_store_address(
    settings: &ObjectStoreSettings,
    bucket: &str,
    prefix: &str,
) -> ObjectStoreAddress {
    let mut address = ObjectStoreAddress::new(bucket).with_prefix(prefix);
    if let Some(endpoint_url) = &settings.endpoint_url {
        address = address.with_endpoint_url(endpoint_url);
    }
    if let Some(region) = &settings.region {
        address = address.with_region(region);
    }
    if let (Some(key), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
        address = address.with_credentials(StaticCredentials::new(key, secret));
    }
    if let Some(remote_name) = &settings.remote_name {
        address = address.with_remote_name(remote_name);
    }
    address
}

/// Versioned store address for `repository[/path]` on the given or default branch
pub fn versioned_store_address(
    settings: &VersionedStoreSettings,
    repository: &str,
    branch: Option<&str>,
    path: &str,
) -> VersionedStoreAddress {
    let store = &settings.store;
    let mut address = VersionedStoreAddress::new(repository)
        .with_branch(branch.unwrap_or(&settings.default_branch))
        .with_path(path);
    if let Some(endpoint_url) = &store.endpoint_url {
        address = address.with_endpoint_url(endpoint_url);
    }
    if let Some(region) = &store.region {
        address = address.with_region(region);
    }
    if let (Some(key), Some(secret)) = (&store.access_key_id, &store.secret_access_key) {
        address = address.with_credentials(StaticCredentials::new(key, secret));
    }
    if let Some(remote_name) = &store.remote_name {
        address = address.with_remote_name(remote_name);
    }
    address
}
