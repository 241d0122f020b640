//! Bulk transport backed by an external copy command

use std::io::Write;
use std::process::Stdio;

use async_trait::async_trait;
use bridge_traits::{
    error::{Result, StorageError},
    transport::{BulkTransport, TransportOutput, TransportRequest},
};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Program invoked when none is configured
pub const DEFAULT_TRANSPORT_PROGRAM: &str = "rclone";

/// Runs `<program> copy --config <file> <src> <dst> <flags..> --s3-force-path-style`
///
/// The remote definitions (`config_text`) are written to a temporary file
/// that lives exactly as long as the invocation.
#[derive(Clone)]
pub struct CommandTransport {
    program: String,
    config_text: String,
    verbose: bool,
}

impl CommandTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            config_text: String::new(),
            verbose: true,
        }
    }

    /// Remote definitions passed to the tool through `--config`
    pub fn with_config(mut self, config_text: impl Into<String>) -> Self {
        self.config_text = config_text.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn write_config_file(&self) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("transport-")
            .suffix(".conf")
            .tempfile()
            .map_err(|e| StorageError::from_io(e, "transport config"))?;
        file.write_all(self.config_text.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| StorageError::from_io(e, "transport config"))?;
        Ok(file)
    }
}

impl Default for CommandTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSPORT_PROGRAM)
    }
}

impl std::fmt::Debug for CommandTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // remote definitions carry credentials
        f.debug_struct("CommandTransport")
            .field("program", &self.program)
            .field("config_text", &"[REDACTED]")
            .field("verbose", &self.verbose)
            .finish()
    }
}

#[async_trait]
impl BulkTransport for CommandTransport {
    #[instrument(skip(self, request), fields(program = %self.program, source = %request.source, destination = %request.destination))]
    async fn copy(&self, request: TransportRequest) -> Result<TransportOutput> {
        let config_file = self.write_config_file()?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("copy")
            .arg("--config")
            .arg(config_file.path())
            .arg(&request.source)
            .arg(&request.destination)
            .args(&request.flags);
        if self.verbose {
            cmd.arg("-v");
        }
        cmd.arg("--s3-force-path-style")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| {
            warn!(error = %e, "Failed to launch transport");
            StorageError::from_io(e, self.program.clone())
        })?;

        // config file is removed when it goes out of scope, after the child exits
        drop(config_file);

        let result = TransportOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(exit_code = result.exit_code, "Transport finished");
        Ok(result)
    }
}
