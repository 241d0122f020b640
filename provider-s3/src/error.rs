//! Error types for the object store provider

use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use bridge_traits::error::StorageError;
use thiserror::Error;

/// Object store provider errors
#[derive(Error, Debug)]
pub enum S3Error {
    /// Key does not exist
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    /// Credentials rejected or bucket policy denies the call
    #[error("Access denied: {key}")]
    AccessDenied { key: String },

    /// Any other non-success service response
    #[error("Object store error (status {status_code}): {message}")]
    ServiceError { status_code: u16, message: String },

    /// Request never produced a service response
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Address is missing a bucket or has an unusable prefix
    #[error("Invalid object store address: {0}")]
    InvalidAddress(String),
}

/// Result type for object store operations
pub type Result<T> = std::result::Result<T, S3Error>;

impl S3Error {
    pub(crate) fn from_sdk<E>(err: SdkError<E>, key: &str) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match &err {
            SdkError::ServiceError(service) => {
                let status_code = service.raw().status().as_u16();
                match status_code {
                    404 => S3Error::ObjectNotFound {
                        key: key.to_string(),
                    },
                    401 | 403 => S3Error::AccessDenied {
                        key: key.to_string(),
                    },
                    _ => S3Error::ServiceError {
                        status_code,
                        message: DisplayErrorContext(&err).to_string(),
                    },
                }
            }
            _ => S3Error::NetworkError(DisplayErrorContext(&err).to_string()),
        }
    }
}

impl From<S3Error> for StorageError {
    fn from(error: S3Error) -> Self {
        match error {
            S3Error::ObjectNotFound { key } => StorageError::NotFound { path: key },
            S3Error::AccessDenied { key } => StorageError::PermissionDenied { path: key },
            S3Error::ServiceError {
                status_code,
                message,
            } => StorageError::IoFailure(format!("object store status {status_code}: {message}")),
            S3Error::NetworkError(msg) => StorageError::IoFailure(msg),
            S3Error::InvalidAddress(msg) => StorageError::Unsupported(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_to_storage_error() {
        let err: StorageError = S3Error::ObjectNotFound {
            key: "problems/a.txt".into(),
        }
        .into();
        assert_eq!(err, StorageError::not_found("problems/a.txt"));

        let err: StorageError = S3Error::AccessDenied { key: "k".into() }.into();
        assert!(matches!(err, StorageError::PermissionDenied { .. }));

        let err: StorageError = S3Error::ServiceError {
            status_code: 500,
            message: "InternalError".into(),
        }
        .into();
        assert!(matches!(err, StorageError::IoFailure(msg) if msg.contains("500")));

        let err: StorageError = S3Error::InvalidAddress("bucket is empty".into()).into();
        assert!(matches!(err, StorageError::Unsupported(_)));
    }
}
