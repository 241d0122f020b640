//! Addressing types for object store endpoints

use std::fmt;

/// Branch used when a versioned address names none
pub const DEFAULT_BRANCH: &str = "master";

/// Remote name used in transport URIs for plain object stores
pub const DEFAULT_REMOTE_NAME: &str = "s3";

/// Remote name used in transport URIs for versioned object stores
pub const DEFAULT_VERSIONED_REMOTE_NAME: &str = "lakefs";

/// Static access key pair, passed through verbatim
#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl StaticCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Location of a tree inside an S3-compatible bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreAddress {
    pub bucket: String,
    /// Key prefix acting as the tree root, without surrounding slashes
    pub prefix: String,
    /// Custom endpoint (MinIO, data-lake gateways); path-style addressing is always used
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    /// Falls back to the default credential chain when absent
    pub credentials: Option<StaticCredentials>,
    /// Name of this store in the bulk transport's remote configuration
    pub remote_name: String,
}

impl ObjectStoreAddress {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            endpoint_url: None,
            region: None,
            credentials: None,
            remote_name: DEFAULT_REMOTE_NAME.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(mut self, credentials: StaticCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = remote_name.into();
        self
    }

    /// Transport URI, e.g. `s3:problems/a-plus-b`
    pub fn remote_uri(&self) -> String {
        if self.prefix.is_empty() {
            format!("{}:{}", self.remote_name, self.bucket)
        } else {
            format!("{}:{}/{}", self.remote_name, self.bucket, self.prefix)
        }
    }
}

/// Location of a tree on a branch of a versioned data-lake repository
///
/// Versioned stores expose an S3 gateway where the repository is the bucket
/// and the branch is the first key segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedStoreAddress {
    pub repository: String,
    pub branch: String,
    /// Sub-path inside the branch
    pub path: String,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub credentials: Option<StaticCredentials>,
    pub remote_name: String,
}

impl VersionedStoreAddress {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            branch: DEFAULT_BRANCH.to_string(),
            path: String::new(),
            endpoint_url: None,
            region: None,
            credentials: None,
            remote_name: DEFAULT_VERSIONED_REMOTE_NAME.to_string(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into().trim_matches('/').to_string();
        self
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(mut self, credentials: StaticCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = remote_name.into();
        self
    }

    /// Equivalent plain object store address (branch folded into the prefix)
    pub fn to_object_store_address(&self) -> ObjectStoreAddress {
        let branch = self.branch.trim_matches('/');
        let prefix = if self.path.is_empty() {
            branch.to_string()
        } else {
            format!("{branch}/{}", self.path)
        };

        ObjectStoreAddress {
            bucket: self.repository.clone(),
            prefix,
            endpoint_url: self.endpoint_url.clone(),
            region: self.region.clone(),
            credentials: self.credentials.clone(),
            remote_name: self.remote_name.clone(),
        }
    }
}
