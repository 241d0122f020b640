//! Object store endpoints over the S3 API

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bridge_traits::{
    error::{Result, StorageError},
    storage::{
        ancestors, normalize_path, FileRecord, ReadStream, RecordStream, StorageBackend, WriteSink,
    },
};
use futures::stream::{self, StreamExt};
use tracing::{debug, instrument};

use crate::error::S3Error;
use crate::types::{ObjectStoreAddress, VersionedStoreAddress};

/// Region used for custom endpoints that do not care about regions
const FALLBACK_REGION: &str = "us-east-1";

/// Provider identity attached to static credentials
const CREDENTIALS_PROVIDER: &str = "problem-sync-static";

// =============================================================================
// Key helpers
// =============================================================================

/// Full object key for a relative path under `prefix`.
pub(crate) fn object_key(prefix: &str, path: &str) -> Result<String> {
    let relative = normalize_path(path)?;
    Ok(match (prefix.is_empty(), relative.is_empty()) {
        (true, _) => relative,
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{relative}"),
    })
}

/// Relative path of `key` under `prefix`, `None` when the key lies outside it.
pub(crate) fn relative_key<'k>(prefix: &str, key: &'k str) -> Option<&'k str> {
    if prefix.is_empty() {
        return Some(key);
    }
    key.strip_prefix(prefix)?.strip_prefix('/')
}

/// Entity tags arrive wrapped in double quotes.
pub(crate) fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Prefix used when listing everything beneath `key`.
fn listing_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

// =============================================================================
// ObjectStorage
// =============================================================================

/// Storage backed by a key prefix inside an S3-compatible bucket
///
/// Directories are implicit: listings synthesize a directory record for every
/// intermediate prefix, and `create_dir_all` does nothing.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    client: Client,
    address: ObjectStoreAddress,
}

impl ObjectStorage {
    /// Build a client for `address`
    ///
    /// Static credentials, when given, replace the default credential chain.
    /// Path-style addressing is always enabled.
    pub async fn connect(address: ObjectStoreAddress) -> std::result::Result<Self, S3Error> {
        if address.bucket.trim().is_empty() {
            return Err(S3Error::InvalidAddress("bucket name is empty".to_string()));
        }
        normalize_path(&address.prefix)
            .map_err(|_| S3Error::InvalidAddress(format!("invalid prefix {}", address.prefix)))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        match (&address.region, &address.endpoint_url) {
            (Some(region), _) => loader = loader.region(Region::new(region.clone())),
            (None, Some(_)) => loader = loader.region(Region::new(FALLBACK_REGION)),
            (None, None) => {}
        }

        if let Some(credentials) = &address.credentials {
            loader = loader.credentials_provider(Credentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.clone(),
                None,
                None,
                CREDENTIALS_PROVIDER,
            ));
        }

        let sdk_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(true);
        if let Some(endpoint_url) = &address.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint_url);
        }

        debug!(
            bucket = %address.bucket,
            prefix = %address.prefix,
            endpoint = ?address.endpoint_url,
            "Connected object store"
        );

        Ok(Self::with_client(Client::from_conf(s3_config.build()), address))
    }

    /// Use an already configured client
    pub fn with_client(client: Client, address: ObjectStoreAddress) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> &ObjectStoreAddress {
        &self.address
    }

    pub fn remote_uri(&self) -> String {
        self.address.remote_uri()
    }

    fn key(&self, path: &str) -> Result<String> {
        object_key(&self.address.prefix, path)
    }

    fn record_for_object(&self, object: &aws_sdk_s3::types::Object) -> Option<(String, FileRecord)> {
        let key = object.key()?;
        let relative = relative_key(&self.address.prefix, key)?;
        if relative.is_empty() {
            return None;
        }

        if let Some(dir) = relative.strip_suffix('/') {
            return Some((dir.to_string(), FileRecord::directory(dir)));
        }

        let record = FileRecord::file(relative, object.size().unwrap_or(0).max(0) as u64)
            .with_modified_at(object.last_modified().map(|t| t.secs()))
            .with_checksum(object.e_tag().map(trim_etag));
        Some((relative.to_string(), record))
    }

    /// Whether any object lives beneath `key/`
    async fn has_children(&self, key: &str) -> Result<bool> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.address.bucket)
            .prefix(listing_prefix(key))
            .max_keys(1)
            .send()
            .await
            .map_err(|e| StorageError::from(S3Error::from_sdk(e, key)))?;
        Ok(!output.contents().is_empty())
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.address.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::from(S3Error::from_sdk(e, key)))?;
        debug!(key = %key, "Deleted object");
        Ok(())
    }
}

/// Buffered upload committed by `put_object` on finish
struct ObjectWriteSink {
    client: Client,
    bucket: String,
    key: String,
    buffer: Vec<u8>,
}

#[async_trait]
impl WriteSink for ObjectWriteSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let ObjectWriteSink {
            client,
            bucket,
            key,
            buffer,
        } = *self;
        let size = buffer.len() as u64;

        client
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .body(ByteStream::from(buffer))
            .send()
            .await
            .map_err(|e| StorageError::from(S3Error::from_sdk(e, &key)))?;
        debug!(key = %key, size, "Uploaded object");
        Ok(size)
    }
}

/// Pagination state for a listing
struct ListingState {
    continuation: Option<String>,
    exhausted: bool,
    ready: VecDeque<FileRecord>,
    seen_directories: HashSet<String>,
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    fn uri(&self) -> String {
        self.remote_uri()
    }

    #[instrument(skip(self), fields(bucket = %self.address.bucket))]
    async fn open_for_read(&self, path: &str) -> Result<ReadStream> {
        let key = self.key(path)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.address.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::from(S3Error::from_sdk(e, &key)))?;
        debug!(key = %key, "Opened object for reading");
        Ok(Box::new(Box::pin(output.body.into_async_read())))
    }

    async fn open_for_write(&self, path: &str) -> Result<Box<dyn WriteSink>> {
        let key = self.key(path)?;
        if key.is_empty() || normalize_path(path)?.is_empty() {
            return Err(StorageError::Unsupported(
                "cannot write to the storage root".to_string(),
            ));
        }
        Ok(Box::new(ObjectWriteSink {
            client: self.client.clone(),
            bucket: self.address.bucket.clone(),
            key,
            buffer: Vec::new(),
        }))
    }

    fn list<'a>(&'a self, path: &'a str) -> RecordStream<'a> {
        let (start, key) = match normalize_path(path).and_then(|start| {
            let key = self.key(&start)?;
            Ok((start, key))
        }) {
            Ok(pair) => pair,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        let prefix = listing_prefix(&key);

        let state = ListingState {
            continuation: None,
            exhausted: false,
            ready: VecDeque::new(),
            seen_directories: HashSet::new(),
        };

        stream::try_unfold(state, move |mut state| {
            let start = start.clone();
            let prefix = prefix.clone();
            async move {
                loop {
                    if let Some(record) = state.ready.pop_front() {
                        return Ok(Some((record, state)));
                    }
                    if state.exhausted {
                        return Ok(None);
                    }

                    let output = self
                        .client
                        .list_objects_v2()
                        .bucket(&self.address.bucket)
                        .prefix(&prefix)
                        .set_continuation_token(state.continuation.take())
                        .send()
                        .await
                        .map_err(|e| StorageError::from(S3Error::from_sdk(e, &prefix)))?;

                    for object in output.contents() {
                        let Some((relative, record)) = self.record_for_object(object) else {
                            continue;
                        };

                        for dir in ancestors(&relative) {
                            if dir.len() > start.len() && state.seen_directories.insert(dir.to_string()) {
                                state.ready.push_back(FileRecord::directory(dir));
                            }
                        }

                        if record.is_directory {
                            if relative.len() > start.len()
                                && state.seen_directories.insert(relative.clone())
                            {
                                state.ready.push_back(record);
                            }
                        } else {
                            state.ready.push_back(record);
                        }
                    }

                    match output.next_continuation_token() {
                        Some(token) if output.is_truncated().unwrap_or(false) => {
                            state.continuation = Some(token.to_string());
                        }
                        _ => state.exhausted = true,
                    }
                    debug!(prefix = %prefix, buffered = state.ready.len(), "Listed object page");
                }
            }
        })
        .boxed()
    }

    async fn stat(&self, path: &str) -> Result<FileRecord> {
        let relative = normalize_path(path)?;
        let key = self.key(&relative)?;
        if relative.is_empty() {
            return Ok(FileRecord::directory(""));
        }

        match self
            .client
            .head_object()
            .bucket(&self.address.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(head) => Ok(FileRecord::file(
                relative,
                head.content_length().unwrap_or(0).max(0) as u64,
            )
            .with_modified_at(head.last_modified().map(|t| t.secs()))
            .with_checksum(head.e_tag().map(trim_etag))),
            Err(err) => match S3Error::from_sdk(err, &key) {
                S3Error::ObjectNotFound { .. } => {
                    if self.has_children(&key).await? {
                        Ok(FileRecord::directory(relative))
                    } else {
                        Err(StorageError::not_found(relative))
                    }
                }
                other => Err(other.into()),
            },
        }
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        normalize_path(path)?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let record = self.stat(path).await?;
        if record.is_directory {
            return Err(StorageError::Unsupported(format!(
                "{} is a non-empty prefix",
                record.path
            )));
        }
        self.delete_key(&self.key(&record.path)?).await
    }

    async fn remove_recursive(&self, path: &str) -> Result<()> {
        let relative = normalize_path(path)?;
        if relative.is_empty() {
            return Err(StorageError::Unsupported(
                "refusing to remove the storage root".to_string(),
            ));
        }

        let record = self.stat(&relative).await?;
        if !record.is_directory {
            return self.delete_key(&self.key(&relative)?).await;
        }

        let prefix = listing_prefix(&self.key(&relative)?);
        let mut continuation = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.address.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation)
                .send()
                .await
                .map_err(|e| StorageError::from(S3Error::from_sdk(e, &prefix)))?;

            for key in output.contents().iter().filter_map(|o| o.key()) {
                self.delete_key(key).await?;
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// VersionedObjectStorage
// =============================================================================

/// Object storage scoped to one branch of a versioned repository
#[derive(Debug, Clone)]
pub struct VersionedObjectStorage {
    inner: ObjectStorage,
    address: VersionedStoreAddress,
}

impl VersionedObjectStorage {
    pub async fn connect(address: VersionedStoreAddress) -> std::result::Result<Self, S3Error> {
        if address.branch.trim_matches('/').is_empty() {
            return Err(S3Error::InvalidAddress("branch name is empty".to_string()));
        }
        let inner = ObjectStorage::connect(address.to_object_store_address()).await?;
        Ok(Self { inner, address })
    }

    pub fn with_client(client: Client, address: VersionedStoreAddress) -> Self {
        let inner = ObjectStorage::with_client(client, address.to_object_store_address());
        Self { inner, address }
    }

    pub fn repository(&self) -> &str {
        &self.address.repository
    }

    pub fn branch(&self) -> &str {
        &self.address.branch
    }

    pub fn remote_uri(&self) -> String {
        self.inner.remote_uri()
    }
}

#[async_trait]
impl StorageBackend for VersionedObjectStorage {
    fn uri(&self) -> String {
        self.inner.uri()
    }

    async fn open_for_read(&self, path: &str) -> Result<ReadStream> {
        self.inner.open_for_read(path).await
    }

    async fn open_for_write(&self, path: &str) -> Result<Box<dyn WriteSink>> {
        self.inner.open_for_write(path).await
    }

    fn list<'a>(&'a self, path: &'a str) -> RecordStream<'a> {
        self.inner.list(path)
    }

    async fn stat(&self, path: &str) -> Result<FileRecord> {
        self.inner.stat(path).await
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        self.inner.create_dir_all(path).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.inner.remove(path).await
    }

    async fn remove_recursive(&self, path: &str) -> Result<()> {
        self.inner.remove_recursive(path).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(FALLBACK_REGION))
            .force_path_style(true)
            .build();
        Client::from_conf(config)
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("", "a/b.txt").unwrap(), "a/b.txt");
        assert_eq!(object_key("root", "a/b.txt").unwrap(), "root/a/b.txt");
        assert_eq!(object_key("root", "").unwrap(), "root");
        assert!(object_key("root", "../escape").is_err());
    }

    #[test]
    fn test_relative_key() {
        assert_eq!(relative_key("root", "root/a/b.txt"), Some("a/b.txt"));
        assert_eq!(relative_key("root", "rootless/a.txt"), None);
        assert_eq!(relative_key("", "a.txt"), Some("a.txt"));
    }

    #[test]
    fn test_trim_etag() {
        assert_eq!(trim_etag("\"9b2cf535f27731c974343645a3985328\""), "9b2cf535f27731c974343645a3985328");
        assert_eq!(trim_etag("plain"), "plain");
    }

    #[test]
    fn test_record_for_object() {
        let storage = ObjectStorage::with_client(
            offline_client(),
            ObjectStoreAddress::new("problems").with_prefix("p1"),
        );

        let object = aws_sdk_s3::types::Object::builder()
            .key("p1/tests/01.in")
            .size(12)
            .e_tag("\"abc\"")
            .build();
        let (relative, record) = storage.record_for_object(&object).unwrap();
        assert_eq!(relative, "tests/01.in");
        assert_eq!(record.size, 12);
        assert_eq!(record.checksum.as_deref(), Some("abc"));

        let marker = aws_sdk_s3::types::Object::builder().key("p1/tests/").build();
        let (_, record) = storage.record_for_object(&marker).unwrap();
        assert!(record.is_directory);
        assert_eq!(record.path, "tests");

        let outside = aws_sdk_s3::types::Object::builder().key("p2/x").build();
        assert!(storage.record_for_object(&outside).is_none());
    }

    #[test]
    fn test_versioned_storage_uses_branch_prefix() {
        let storage = VersionedObjectStorage::with_client(
            offline_client(),
            VersionedStoreAddress::new("judge").with_branch("main"),
        );
        assert_eq!(storage.branch(), "main");
        assert_eq!(storage.repository(), "judge");
        assert_eq!(storage.uri(), "lakefs:judge/main");
        assert_eq!(storage.inner.key("a.txt").unwrap(), "main/a.txt");
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_bucket() {
        let err = ObjectStorage::connect(ObjectStoreAddress::new("  ")).await.unwrap_err();
        assert!(matches!(err, S3Error::InvalidAddress(_)));
    }
}
