use bridge_traits::StorageError;
use core_archive::ArchiveError;
use thiserror::Error;

/// Descriptor failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config file not found!")]
    NotFound,

    #[error("config file is malformed: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    FileSystem(#[from] StorageError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sync failed, destination not defined!")]
    DestinationUndefined,

    #[error("Transport exited with code {code}: {stderr}")]
    Transport { code: i32, stderr: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Copy task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
