//! # Sync Session State Machine
//!
//! Tracks one validation/mirror run from start to a terminal state.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Validating → Validated → Mirroring → Done
//!  │         ↑  ↓          │          │
//!  │         └──┼──────────┘          ↓
//!  │            └────────→ Failed ←───┘
//!  └──────────────────────────→ Mirroring   (unvalidated clone)
//! ```
//!
//! `Done` and `Failed` are terminal. Sessions are ephemeral and never
//! persisted.

use bridge_traits::{FileRecord, LogEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::descriptor::{ClassificationMap, Descriptor};
use crate::ignore::IgnoreMatcher;
use crate::{Result, SyncError};

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// State Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Session created, nothing inspected yet
    Idle,
    Validating,
    /// Source listing, ignore rules and descriptor are resolved
    Validated,
    Mirroring,
    Done,
    Failed,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Done | SyncState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Validating => "validating",
            SyncState::Validated => "validated",
            SyncState::Mirroring => "mirroring",
            SyncState::Done => "done",
            SyncState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Mirror Report
// ============================================================================

/// Outcome counters of a mirror run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorReport {
    pub directories_created: u64,
    pub files_copied: u64,
    /// Files already up to date at the destination
    pub files_skipped: u64,
    /// Entries dropped by ignore rules
    pub files_ignored: u64,
    pub bytes_copied: u64,
    pub used_bulk_transport: bool,
}

// ============================================================================
// Sync Session
// ============================================================================

/// State of one sync run
#[derive(Debug, Clone)]
pub struct SyncSession {
    pub id: SessionId,
    pub state: SyncState,
    /// Filtered source listing
    pub listing: Option<Vec<FileRecord>>,
    pub matcher: Option<IgnoreMatcher>,
    pub descriptor: Option<Descriptor>,
    pub classification: Option<ClassificationMap>,
    pub report: Option<MirrorReport>,
    /// Everything reported through the session's logger
    pub diagnostics: Vec<LogEntry>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            state: SyncState::Idle,
            listing: None,
            matcher: None,
            descriptor: None,
            classification: None,
            report: None,
            diagnostics: Vec::new(),
            error_message: None,
            created_at: Utc::now(),
            validated_at: None,
            completed_at: None,
        }
    }

    /// Enter validation; results of a previous validation are discarded
    pub fn begin_validation(&mut self) -> Result<()> {
        self.validate_transition(SyncState::Validating)?;
        self.state = SyncState::Validating;
        self.listing = None;
        self.matcher = None;
        self.descriptor = None;
        self.classification = None;
        Ok(())
    }

    pub fn finish_validation(
        &mut self,
        listing: Vec<FileRecord>,
        matcher: IgnoreMatcher,
        descriptor: Descriptor,
        classification: ClassificationMap,
    ) -> Result<()> {
        self.validate_transition(SyncState::Validated)?;
        self.state = SyncState::Validated;
        self.listing = Some(listing);
        self.matcher = Some(matcher);
        self.descriptor = Some(descriptor);
        self.classification = Some(classification);
        self.validated_at = Some(Utc::now());
        Ok(())
    }

    pub fn begin_mirror(&mut self) -> Result<()> {
        self.validate_transition(SyncState::Mirroring)?;
        self.state = SyncState::Mirroring;
        Ok(())
    }

    pub fn complete(&mut self, report: MirrorReport) -> Result<()> {
        self.validate_transition(SyncState::Done)?;
        self.state = SyncState::Done;
        self.report = Some(report);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error_message: impl Into<String>) -> Result<()> {
        self.validate_transition(SyncState::Failed)?;
        self.state = SyncState::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_validated(&self) -> bool {
        self.state == SyncState::Validated
    }

    /// Elapsed time between creation and completion
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.created_at)
    }

    fn validate_transition(&self, to: SyncState) -> Result<()> {
        let valid = match (self.state, to) {
            (SyncState::Idle, SyncState::Validating) => true,
            (SyncState::Validated, SyncState::Validating) => true,

            (SyncState::Validating, SyncState::Validated) => true,
            (SyncState::Validating, SyncState::Failed) => true,

            // Idle → Mirroring is the unvalidated clone path
            (SyncState::Idle, SyncState::Mirroring) => true,
            (SyncState::Validated, SyncState::Mirroring) => true,

            (SyncState::Mirroring, SyncState::Done) => true,
            (SyncState::Mirroring, SyncState::Failed) => true,

            (SyncState::Done, _) | (SyncState::Failed, _) => false,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.state.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
