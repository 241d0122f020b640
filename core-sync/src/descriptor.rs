//! # Descriptor Validation
//!
//! Parses the problem descriptor and reconciles its declared file
//! classifications with the files that actually exist.
//!
//! The descriptor is a JSON object. Only its `files` member is interpreted:
//! a map of relative path to one of `default`, `compile`, `runtime`,
//! `testcase` or `judge`. Everything else is carried through untouched so a
//! snapshot written back to the source keeps the original document.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bridge_traits::FileRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Member holding the classification map
pub const FILES_KEY: &str = "files";

/// Role of a file within a problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Default,
    Compile,
    Runtime,
    Testcase,
    Judge,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Default => "default",
            FileType::Compile => "compile",
            FileType::Runtime => "runtime",
            FileType::Testcase => "testcase",
            FileType::Judge => "judge",
        }
    }
}

impl FromStr for FileType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(FileType::Default),
            "compile" => Ok(FileType::Compile),
            "runtime" => Ok(FileType::Runtime),
            "testcase" => Ok(FileType::Testcase),
            "judge" => Ok(FileType::Judge),
            other => Err(ConfigError::Malformed(format!(
                "unknown file type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciled classification, ordered by path
pub type ClassificationMap = BTreeMap<String, FileType>;

/// Parsed descriptor document
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    document: Map<String, Value>,
    /// Declared tokens, unrecognized ones included
    files: BTreeMap<String, String>,
    unrecognized: Vec<String>,
}

impl Descriptor {
    /// Parse raw descriptor bytes; `None` means the file does not exist
    pub fn parse(raw: Option<&[u8]>) -> Result<Self, ConfigError> {
        let raw = raw.ok_or(ConfigError::NotFound)?;
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        let Value::Object(document) = value else {
            return Err(ConfigError::Malformed(
                "descriptor must be a JSON object".to_string(),
            ));
        };

        let mut files = BTreeMap::new();
        let mut unrecognized = Vec::new();
        match document.get(FILES_KEY) {
            None | Some(Value::Null) => {}
            Some(Value::Object(declared)) => {
                for (path, token) in declared {
                    let token = match token {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if token.parse::<FileType>().is_err() {
                        unrecognized.push(path.clone());
                    }
                    files.insert(path.trim_start_matches('/').to_string(), token);
                }
            }
            Some(_) => {
                return Err(ConfigError::Malformed(format!(
                    "'{FILES_KEY}' must be an object mapping paths to file types"
                )))
            }
        }

        Ok(Self {
            document,
            files,
            unrecognized,
        })
    }

    /// Declared classification tokens as written
    pub fn declared(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    /// Declared paths whose token is not a known file type
    pub fn unrecognized(&self) -> &[String] {
        &self.unrecognized
    }

    /// Classify every file in `listing`
    ///
    /// Recognized declarations are kept, anything else becomes
    /// [`FileType::Default`]. Declared paths missing from the listing are
    /// dropped and directories are not classified.
    pub fn reconcile(&self, listing: &[FileRecord]) -> ClassificationMap {
        listing
            .iter()
            .filter(|record| !record.is_directory)
            .map(|record| {
                let file_type = self
                    .files
                    .get(&record.path)
                    .and_then(|token| token.parse().ok())
                    .unwrap_or_default();
                (record.path.clone(), file_type)
            })
            .collect()
    }

    /// Declared paths absent from `listing`
    pub fn missing(&self, listing: &[FileRecord]) -> Vec<String> {
        self.files
            .keys()
            .filter(|path| !listing.iter().any(|r| !r.is_directory && &r.path == *path))
            .cloned()
            .collect()
    }

    /// The original document with `files` replaced, as pretty JSON
    pub fn snapshot(&self, classification: &ClassificationMap) -> Result<Vec<u8>, ConfigError> {
        let mut document = self.document.clone();
        let files: Map<String, Value> = classification
            .iter()
            .map(|(path, file_type)| (path.clone(), Value::String(file_type.to_string())))
            .collect();
        document.insert(FILES_KEY.to_string(), Value::Object(files));

        serde_json::to_vec_pretty(&Value::Object(document))
            .map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}
