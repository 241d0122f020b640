//! # Object Store Provider
//!
//! Implements `StorageBackend` for S3-compatible object stores.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`ObjectStorage`]: bucket + key-prefix addressing over the S3 API
//! - [`VersionedObjectStorage`]: a branch of a versioned data-lake repository
//!   reached through its S3 gateway (default branch `master`)
//! - Path-style addressing for MinIO and gateway endpoints
//! - Entity tags reported as file checksums
//!
//! Object stores have no real directories. Listings synthesize one directory
//! record per intermediate prefix and directory creation is a no-op.

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{ObjectStorage, VersionedObjectStorage};
pub use error::{Result, S3Error};
pub use types::{
    ObjectStoreAddress, StaticCredentials, VersionedStoreAddress, DEFAULT_BRANCH,
    DEFAULT_REMOTE_NAME, DEFAULT_VERSIONED_REMOTE_NAME,
};
