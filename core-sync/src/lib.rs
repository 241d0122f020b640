//! # Problem Sync Module
//!
//! Validates problem trees and mirrors them between storage endpoints.
//!
//! ## Overview
//!
//! This module manages the lifecycle of a sync session, including:
//! - Selecting a storage endpoint (local, temporary, object store, archive)
//! - Filtering the source listing through ignore-file rules
//! - Validating the problem descriptor against the files that exist
//! - Mirroring the filtered tree onto a destination
//!
//! ## Components
//!
//! - **Storage Endpoints** (`endpoint`): Closed set of backends a session works with
//! - **Ignore Matcher** (`ignore`): Ignore-file rules compiled into a path predicate
//! - **Descriptor** (`descriptor`): Descriptor parsing and classification reconciliation
//! - **Sync Session State Machine** (`session`): Session lifecycle with validated transitions
//! - **Sync Manager** (`manager`): Orchestrates validation and mirroring

pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod ignore;
pub mod manager;
pub mod session;

pub use descriptor::{ClassificationMap, Descriptor, FileType};
pub use endpoint::{object_store_address, versioned_store_address, EndpointKind, StorageEndpoint};
pub use error::{ConfigError, Result, SyncError};
pub use ignore::{IgnoreMatcher, IgnoreRule, SkippedRule};
pub use manager::{command_transport, SyncConfig, SyncManager};
pub use session::{MirrorReport, SessionId, SyncSession, SyncState};
