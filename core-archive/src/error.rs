use bridge_traits::error::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    #[error("Archive format not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    pub(crate) fn corrupt(err: impl std::fmt::Display) -> Self {
        ArchiveError::Corrupt(err.to_string())
    }

    pub(crate) fn encode(err: impl std::fmt::Display) -> Self {
        ArchiveError::Storage(StorageError::IoFailure(format!("archive encoding failed: {err}")))
    }
}
