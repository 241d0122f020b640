//! Bulk Transport Abstraction
//!
//! Large backend-to-backend copies (object store to object store) are handed
//! to an external copy tool instead of being streamed through this process.
//! The tool is treated as an opaque command: it takes a source URI, a
//! destination URI and flags, and reports an exit code plus captured output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single copy invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportRequest {
    pub source: String,
    pub destination: String,
    pub flags: Vec<String>,
}

impl TransportRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            flags: Vec::new(),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }
}

/// Outcome of a copy invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl TransportOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Bulk copy executor
///
/// Errors are reserved for failing to run the tool at all; a tool that runs
/// and fails reports a nonzero [`TransportOutput::exit_code`].
#[async_trait]
pub trait BulkTransport: Send + Sync {
    async fn copy(&self, request: TransportRequest) -> Result<TransportOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = TransportRequest::new("store:bucket/a", "store:bucket/b")
            .with_flag("--files-from-raw")
            .with_flag("/tmp/list");

        assert_eq!(request.source, "store:bucket/a");
        assert_eq!(request.flags, vec!["--files-from-raw", "/tmp/list"]);
    }

    #[test]
    fn test_output_success() {
        let ok = TransportOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(ok.success());

        let failed = TransportOutput {
            exit_code: 3,
            ..ok
        };
        assert!(!failed.success());
    }
}
