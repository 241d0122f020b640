//! # Storage Bridge Traits
//!
//! Abstraction traits that every storage backend and host integration must
//! implement.
//!
//! ## Overview
//!
//! This crate defines the contract between the sync core and the concrete
//! backends. Each trait represents a capability that the core requires but
//! that is implemented differently per backend (local disk, scratch space,
//! object stores, archives).
//!
//! ## Traits
//!
//! ### Storage
//! - [`StorageBackend`](storage::StorageBackend) - Streamed file I/O, lazy listing, stat
//! - [`WriteSink`](storage::WriteSink) - Commit-on-finish write handle
//!
//! ### Transport
//! - [`BulkTransport`](transport::BulkTransport) - External backend-to-backend copy tool
//!
//! ### Utilities
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to the host
//!
//! ## Error Handling
//!
//! All storage operations use the [`StorageError`](error::StorageError) type.
//! Backend implementations should:
//!
//! - Convert backend-specific errors to `StorageError`
//! - Include the offending path in the error
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so a backend can be shared
//! across concurrent copy tasks.

pub mod error;
pub mod logging;
pub mod storage;
pub mod transport;

pub use error::StorageError;

// Re-export commonly used types
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink, MemoryLogger};
pub use storage::{FileRecord, ReadStream, RecordStream, StorageBackend, WriteSink};
pub use transport::{BulkTransport, TransportOutput, TransportRequest};
