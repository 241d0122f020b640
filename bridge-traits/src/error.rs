use std::io::ErrorKind;

use thiserror::Error;

/// Failure taxonomy shared by every storage backend.
///
/// Backend-specific errors (filesystem, object store, archive codecs) are
/// converted into one of these variants at the endpoint boundary so callers
/// never need to know which backend produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),
}

impl StorageError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied { path: path.into() }
    }

    /// Map an `std::io::Error` raised while touching `path`.
    pub fn from_io(err: std::io::Error, path: impl Into<String>) -> Self {
        let path = path.into();
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound { path },
            ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            ErrorKind::Unsupported => Self::Unsupported(format!("{path}: {err}")),
            _ => Self::IoFailure(format!("{path}: {err}")),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_kind_mapping() {
        let err = StorageError::from_io(std::io::Error::from(ErrorKind::NotFound), "a.txt");
        assert_eq!(err, StorageError::not_found("a.txt"));

        let err = StorageError::from_io(
            std::io::Error::from(ErrorKind::PermissionDenied),
            "secret/b.txt",
        );
        assert_eq!(err, StorageError::permission_denied("secret/b.txt"));

        let err = StorageError::from_io(std::io::Error::other("disk on fire"), "c.txt");
        assert!(matches!(err, StorageError::IoFailure(msg) if msg.contains("disk on fire")));
    }

    #[test]
    fn test_is_not_found() {
        assert!(StorageError::not_found("x").is_not_found());
        assert!(!StorageError::Unsupported("x".into()).is_not_found());
    }
}
