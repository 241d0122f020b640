//! # Desktop Bridge Implementations
//!
//! Implementations of the storage bridge traits backed by the local machine.
//!
//! ## Overview
//!
//! - [`LocalStorage`]: `StorageBackend` over a directory, using `tokio::fs`
//! - [`TempStorage`]: `StorageBackend` over a self-deleting scratch directory
//! - [`CommandTransport`]: `BulkTransport` that shells out to an external copy tool
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{LocalStorage, TempStorage};
//! use bridge_traits::StorageBackend;
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let problem = LocalStorage::open("/srv/problems/a-plus-b", false).await?;
//!     let scratch = TempStorage::new()?;
//!
//!     let descriptor = problem.read_all("config.json").await?;
//!     scratch.write_all("config.json", descriptor).await?;
//!     scratch.close().await
//! }
//! ```

mod filesystem;
mod temp;
mod transport;

pub use filesystem::LocalStorage;
pub use temp::TempStorage;
pub use transport::{CommandTransport, DEFAULT_TRANSPORT_PROGRAM};
