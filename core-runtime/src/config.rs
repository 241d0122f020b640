//! # Runtime Configuration Module
//!
//! Provides configuration management for sync workers.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! [`CoreConfig`] holding every tunable of a sync run: worker parallelism,
//! the well-known file names inside a problem tree, object store addressing,
//! the bulk transport command and logging. `build()` validates fail-fast with
//! actionable messages.
//!
//! ## Usage
//!
//! ### Explicit configuration
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, ObjectStoreSettings};
//!
//! let config = CoreConfig::builder()
//!     .worker_count(8)
//!     .write_snapshot(true)
//!     .object_store(
//!         ObjectStoreSettings::new()
//!             .with_endpoint_url("http://minio:9000")
//!             .with_credentials("minio", "minio123"),
//!     )
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ### From the environment
//!
//! ```ignore
//! use core_runtime::config::CoreConfigBuilder;
//!
//! // reads PROBLEM_SYNC_WORKERS, PROBLEM_SYNC_S3_ENDPOINT, ...
//! let config = CoreConfigBuilder::from_env()?.build()?;
//! ```

use std::fmt;

use bridge_traits::logging::LogLevel;

use crate::error::{Error, Result};
use crate::logging::{LogFormat, LoggingConfig};

/// Default number of concurrent file copies
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Upper bound on concurrent file copies
pub const MAX_WORKER_COUNT: usize = 256;

/// Descriptor file declaring file classifications
pub const DEFAULT_DESCRIPTOR_FILE: &str = "config.json";

/// Ignore-pattern file at the tree root
pub const DEFAULT_IGNORE_FILE: &str = ".gitignore";

/// Derived descriptor written back after validation
pub const DEFAULT_SNAPSHOT_FILE: &str = "config.generated.json";

/// Default branch of versioned stores
pub const DEFAULT_BRANCH: &str = "master";

/// Prefix of every environment variable read by [`CoreConfigBuilder::from_env`]
pub const ENV_PREFIX: &str = "PROBLEM_SYNC_";

// ============================================================================
// Store settings
// ============================================================================

/// Connection settings for an S3-compatible store
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ObjectStoreSettings {
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Name of the store in the bulk transport's remote configuration
    pub remote_name: Option<String>,
}

impl ObjectStoreSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = Some(remote_name.into());
        self
    }

    fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Validate the settings
    ///
    /// # Errors
    ///
    /// Returns an error when only half of a key pair is set.
    pub fn validate(&self, label: &str) -> Result<()> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(_), None) => Err(Error::Config(format!(
                "{label}: access key id is set without a secret access key. \
                 Set both or neither."
            ))),
            (None, Some(_)) => Err(Error::Config(format!(
                "{label}: secret access key is set without an access key id. \
                 Set both or neither."
            ))),
            _ => Ok(()),
        }?;

        if let Some(endpoint) = &self.endpoint_url {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "{label}: endpoint '{endpoint}' must start with http:// or https://"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectStoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreSettings")
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("remote_name", &self.remote_name)
            .finish()
    }
}

/// Settings for a versioned (branch-scoped) store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedStoreSettings {
    pub store: ObjectStoreSettings,
    pub default_branch: String,
}

impl VersionedStoreSettings {
    pub fn new(store: ObjectStoreSettings) -> Self {
        Self {
            store,
            default_branch: DEFAULT_BRANCH.to_string(),
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }
}

/// External bulk copy command
#[derive(Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub program: String,
    /// Remote definitions handed to the command
    pub config_text: Option<String>,
}

impl TransportSettings {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            config_text: None,
        }
    }

    pub fn with_config_text(mut self, config_text: impl Into<String>) -> Self {
        self.config_text = Some(config_text.into());
        self
    }
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("program", &self.program)
            .field("config_text", &self.config_text.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ============================================================================
// CoreConfig
// ============================================================================

/// Validated configuration of a sync worker
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Maximum concurrent file copies during mirroring
    pub worker_count: usize,
    pub descriptor_file: String,
    pub ignore_file: String,
    pub snapshot_file: String,
    /// Write the reconciled descriptor back to the source after validation
    pub write_snapshot: bool,
    /// Skip copies whose destination already matches the source
    pub skip_unchanged: bool,
    pub object_store: Option<ObjectStoreSettings>,
    pub versioned_store: Option<VersionedStoreSettings>,
    pub transport: Option<TransportSettings>,
    pub logging: LoggingConfig,
}

impl CoreConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(Error::Config(format!(
                "Worker count must be between 1 and {MAX_WORKER_COUNT}, got {}",
                self.worker_count
            )));
        }

        for (label, name) in [
            ("Descriptor file", &self.descriptor_file),
            ("Ignore file", &self.ignore_file),
            ("Snapshot file", &self.snapshot_file),
        ] {
            if name.trim().is_empty() {
                return Err(Error::Config(format!("{label} name cannot be empty")));
            }
            if name.starts_with('/') || name.split('/').any(|segment| segment == "..") {
                return Err(Error::Config(format!(
                    "{label} name '{name}' must be a path relative to the problem root"
                )));
            }
        }

        if self.snapshot_file == self.descriptor_file {
            return Err(Error::Config(
                "Snapshot file must differ from the descriptor file, \
                 otherwise validation would overwrite its own input"
                    .to_string(),
            ));
        }

        if let Some(store) = &self.object_store {
            store.validate("Object store")?;
        }
        if let Some(versioned) = &self.versioned_store {
            versioned.store.validate("Versioned store")?;
            if versioned.default_branch.trim().is_empty() {
                return Err(Error::Config(
                    "Versioned store default branch cannot be empty".to_string(),
                ));
            }
        }
        if let Some(transport) = &self.transport {
            if transport.program.trim().is_empty() {
                return Err(Error::Config(
                    "Transport program cannot be empty. Use .transport() with a command name."
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Builder for [`CoreConfig`]
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    worker_count: Option<usize>,
    descriptor_file: Option<String>,
    ignore_file: Option<String>,
    snapshot_file: Option<String>,
    write_snapshot: bool,
    skip_unchanged: bool,
    object_store: Option<ObjectStoreSettings>,
    versioned_store: Option<VersionedStoreSettings>,
    transport: Option<TransportSettings>,
    logging: Option<LoggingConfig>,
}

impl CoreConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a builder from `PROBLEM_SYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Seed a builder from `(name, value)` pairs using the environment variable names
    ///
    /// | Variable                                | Setting                      |
    /// |-----------------------------------------|------------------------------|
    /// | `PROBLEM_SYNC_WORKERS`                  | worker count                 |
    /// | `PROBLEM_SYNC_DESCRIPTOR_FILE`          | descriptor file name         |
    /// | `PROBLEM_SYNC_IGNORE_FILE`              | ignore file name             |
    /// | `PROBLEM_SYNC_SNAPSHOT_FILE`            | snapshot file name           |
    /// | `PROBLEM_SYNC_WRITE_SNAPSHOT`           | write snapshot (bool)        |
    /// | `PROBLEM_SYNC_SKIP_UNCHANGED`           | skip unchanged (bool)        |
    /// | `PROBLEM_SYNC_S3_ENDPOINT`              | object store endpoint        |
    /// | `PROBLEM_SYNC_S3_REGION`                | object store region          |
    /// | `PROBLEM_SYNC_S3_ACCESS_KEY_ID`         | object store access key      |
    /// | `PROBLEM_SYNC_S3_SECRET_ACCESS_KEY`     | object store secret key      |
    /// | `PROBLEM_SYNC_LAKEFS_ENDPOINT`          | versioned store endpoint     |
    /// | `PROBLEM_SYNC_LAKEFS_ACCESS_KEY_ID`     | versioned store access key   |
    /// | `PROBLEM_SYNC_LAKEFS_SECRET_ACCESS_KEY` | versioned store secret key   |
    /// | `PROBLEM_SYNC_LAKEFS_BRANCH`            | versioned store branch       |
    /// | `PROBLEM_SYNC_TRANSPORT_PROGRAM`        | bulk transport command       |
    /// | `PROBLEM_SYNC_TRANSPORT_CONFIG`         | bulk transport remote config |
    /// | `PROBLEM_SYNC_LOG_LEVEL`                | log level                    |
    /// | `PROBLEM_SYNC_LOG_FORMAT`               | log format                   |
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = Self::new();
        let mut s3 = ObjectStoreSettings::new();
        let mut lakefs = ObjectStoreSettings::new();
        let mut lakefs_branch: Option<String> = None;
        let mut transport_program: Option<String> = None;
        let mut transport_config: Option<String> = None;
        let mut logging = LoggingConfig::default();
        let mut logging_set = false;

        for (name, value) in vars {
            let Some(key) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value: String = value.into();

            match key {
                "WORKERS" => {
                    let count = value.trim().parse::<usize>().map_err(|_| {
                        Error::Config(format!(
                            "{ENV_PREFIX}WORKERS must be a positive integer, got '{value}'"
                        ))
                    })?;
                    builder = builder.worker_count(count);
                }
                "DESCRIPTOR_FILE" => builder = builder.descriptor_file(value),
                "IGNORE_FILE" => builder = builder.ignore_file(value),
                "SNAPSHOT_FILE" => builder = builder.snapshot_file(value),
                "WRITE_SNAPSHOT" => builder = builder.write_snapshot(parse_bool(key, &value)?),
                "SKIP_UNCHANGED" => builder = builder.skip_unchanged(parse_bool(key, &value)?),
                "S3_ENDPOINT" => s3.endpoint_url = Some(value),
                "S3_REGION" => s3.region = Some(value),
                "S3_ACCESS_KEY_ID" => s3.access_key_id = Some(value),
                "S3_SECRET_ACCESS_KEY" => s3.secret_access_key = Some(value),
                "S3_REMOTE_NAME" => s3.remote_name = Some(value),
                "LAKEFS_ENDPOINT" => lakefs.endpoint_url = Some(value),
                "LAKEFS_ACCESS_KEY_ID" => lakefs.access_key_id = Some(value),
                "LAKEFS_SECRET_ACCESS_KEY" => lakefs.secret_access_key = Some(value),
                "LAKEFS_REMOTE_NAME" => lakefs.remote_name = Some(value),
                "LAKEFS_BRANCH" => lakefs_branch = Some(value),
                "TRANSPORT_PROGRAM" => transport_program = Some(value),
                "TRANSPORT_CONFIG" => transport_config = Some(value),
                "LOG_LEVEL" => {
                    logging = logging.with_level(parse_log_level(&value)?);
                    logging_set = true;
                }
                "LOG_FORMAT" => {
                    logging = logging.with_format(value.parse::<LogFormat>()?);
                    logging_set = true;
                }
                _ => {}
            }
        }

        if !s3.is_empty() {
            builder = builder.object_store(s3);
        }
        if !lakefs.is_empty() || lakefs_branch.is_some() {
            let mut versioned = VersionedStoreSettings::new(lakefs);
            if let Some(branch) = lakefs_branch {
                versioned = versioned.with_default_branch(branch);
            }
            builder = builder.versioned_store(versioned);
        }
        if transport_program.is_some() || transport_config.is_some() {
            let mut transport = TransportSettings::new(
                transport_program.unwrap_or_else(|| "rclone".to_string()),
            );
            if let Some(config_text) = transport_config {
                transport = transport.with_config_text(config_text);
            }
            builder = builder.transport(transport);
        }
        if logging_set {
            builder = builder.logging(logging);
        }

        Ok(builder)
    }

    /// Maximum concurrent file copies (default: 4)
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Descriptor file name (default: `config.json`)
    pub fn descriptor_file(mut self, name: impl Into<String>) -> Self {
        self.descriptor_file = Some(name.into());
        self
    }

    /// Ignore file name (default: `.gitignore`)
    pub fn ignore_file(mut self, name: impl Into<String>) -> Self {
        self.ignore_file = Some(name.into());
        self
    }

    /// Snapshot file name (default: `config.generated.json`)
    pub fn snapshot_file(mut self, name: impl Into<String>) -> Self {
        self.snapshot_file = Some(name.into());
        self
    }

    pub fn write_snapshot(mut self, enabled: bool) -> Self {
        self.write_snapshot = enabled;
        self
    }

    pub fn skip_unchanged(mut self, enabled: bool) -> Self {
        self.skip_unchanged = enabled;
        self
    }

    pub fn object_store(mut self, settings: ObjectStoreSettings) -> Self {
        self.object_store = Some(settings);
        self
    }

    pub fn versioned_store(mut self, settings: VersionedStoreSettings) -> Self {
        self.versioned_store = Some(settings);
        self
    }

    pub fn transport(mut self, settings: TransportSettings) -> Self {
        self.transport = Some(settings);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if any setting is invalid.
    pub fn build(self) -> Result<CoreConfig> {
        let config = CoreConfig {
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
            descriptor_file: self
                .descriptor_file
                .unwrap_or_else(|| DEFAULT_DESCRIPTOR_FILE.to_string()),
            ignore_file: self
                .ignore_file
                .unwrap_or_else(|| DEFAULT_IGNORE_FILE.to_string()),
            snapshot_file: self
                .snapshot_file
                .unwrap_or_else(|| DEFAULT_SNAPSHOT_FILE.to_string()),
            write_snapshot: self.write_snapshot,
            skip_unchanged: self.skip_unchanged,
            object_store: self.object_store,
            versioned_store: self.versioned_store,
            transport: self.transport,
            logging: self.logging.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!(
            "{ENV_PREFIX}{key} must be a boolean (true/false), got '{value}'"
        ))),
    }
}

fn parse_log_level(value: &str) -> Result<LogLevel> {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(Error::Config(format!(
            "{ENV_PREFIX}LOG_LEVEL '{other}' is not one of trace, debug, info, warn, error"
        ))),
    }
}
