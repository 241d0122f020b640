//! # Archive Transport
//!
//! Converts archive byte streams into storage trees and back.
//!
//! ## Formats
//!
//! | Format  | Suffixes            | Notes                              |
//! |---------|---------------------|------------------------------------|
//! | ZIP     | `.zip`              | entries deflated independently     |
//! | TAR     | `.tar`              | gzip input detected by magic bytes |
//! | TAR+gz  | `.tar.gz`, `.tgz`   |                                    |
//!
//! An explicit [`ArchiveFormat`] hint always takes precedence over the file
//! name.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::TempStorage;
//! use core_archive::{extract_named, ArchiveFormat};
//!
//! let scratch = TempStorage::new()?;
//! extract_named(upload_bytes, Some("bundle.zip"), None, &scratch).await?;
//! ```

pub mod codec;
pub mod error;
pub mod format;
pub mod storage;
pub mod transport;

pub use codec::{ArchiveEntry, ArchiveReader, ArchiveWriter, DEFAULT_MAX_ENTRY_SIZE};
pub use error::{ArchiveError, Result};
pub use format::ArchiveFormat;
pub use storage::ArchiveStorage;
pub use transport::{
    create_archive, extract_all, extract_all_with_limit, extract_named, ExtractSummary,
};
