//! Workspace placeholder crate.
//!
//! Re-exports the sync engine so host applications can depend on
//! `problem-sync-workspace` alone. The `runtime` feature (on by default) also
//! exposes logging and configuration setup from `core-runtime`.

pub use core_sync::*;

#[cfg(feature = "runtime")]
pub use core_runtime as runtime;
