//! Archive format resolution

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// Supported archive container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    /// ZIP with per-entry deflate
    Zip,
    /// POSIX tar, optionally gzip-compressed
    Tar { gzip: bool },
}

/// Suffixes recognized as archives we cannot decode
const UNIMPLEMENTED_SUFFIXES: &[&str] = &[".rar", ".7z"];

impl ArchiveFormat {
    pub const TAR: ArchiveFormat = ArchiveFormat::Tar { gzip: false };
    pub const TAR_GZ: ArchiveFormat = ArchiveFormat::Tar { gzip: true };

    /// Pick the format for an archive
    ///
    /// An explicit hint always wins. Otherwise the format is inferred from
    /// the file name suffix.
    pub fn resolve(file_name: Option<&str>, hint: Option<ArchiveFormat>) -> Result<Self> {
        if let Some(format) = hint {
            return Ok(format);
        }
        match file_name {
            Some(name) => Self::from_file_name(name),
            None => Err(ArchiveError::UnsupportedFormat(
                "no file name or format hint given".to_string(),
            )),
        }
    }

    /// Infer the format from a file name suffix (case-insensitive)
    pub fn from_file_name(name: &str) -> Result<Self> {
        let lower = name.to_ascii_lowercase();

        if lower.ends_with(".zip") {
            Ok(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(ArchiveFormat::TAR_GZ)
        } else if lower.ends_with(".tar") {
            Ok(ArchiveFormat::TAR)
        } else if let Some(suffix) = UNIMPLEMENTED_SUFFIXES.iter().find(|s| lower.ends_with(*s)) {
            Err(ArchiveError::NotImplemented(format!(
                "archive type {} is not implemented",
                suffix.trim_start_matches('.')
            )))
        } else {
            Err(ArchiveError::UnsupportedFormat(format!(
                "archive type of {name} not supported"
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar { gzip: false } => "tar",
            ArchiveFormat::Tar { gzip: true } => "tar.gz",
        }
    }

    /// Conventional file extension, without the leading dot
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl FromStr for ArchiveFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar" => Ok(ArchiveFormat::TAR),
            "tar.gz" | "tgz" | "targz" => Ok(ArchiveFormat::TAR_GZ),
            other => Err(ArchiveError::UnsupportedFormat(format!(
                "archive type {other} not supported"
            ))),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
