//! Data model for backup jobs.
//!
//! This module defines the structures the orchestrator works on:
//! - BackupJob: one run of scan, diff and transfer for a source directory
//! - BackupOptions: knobs supplied by the caller
//! - JobState: where the run is in its lifecycle
//! - RunReport / RunOutcome: what happened

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::checksums::ChecksumAlgorithm;
use crate::snapshot::{snapshot_path_for, Snapshot};
use crate::tree::Folder;

/// Multiple of the snapshot's persisted size kept in reserve on the destination.
pub const DEFAULT_RESERVE_MULTIPLIER: u64 = 3;

/// A single backup run.
#[derive(Debug)]
pub struct BackupJob {
    /// Source directory (canonical)
    pub source_path: PathBuf,

    /// Root of the active destination volume
    pub destination_path: PathBuf,

    /// Basename of the source; the destination mirror lives under it
    pub root_name: OsString,

    pub options: BackupOptions,

    pub state: JobState,

    /// Snapshot being brought up to date, entry by entry
    pub baseline: Snapshot,

    /// Work still to do
    pub delta: Folder,

    /// Size of the placeholder written before each transfer attempt
    pub reservation_size: u64,

    /// Files and bytes the delta held when planning finished
    pub planned_files: usize,
    pub planned_bytes: u64,

    pub report: RunReport,

    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl BackupJob {
    /// Where the source tree is mirrored on the active destination.
    pub fn mirror_path(&self) -> PathBuf {
        self.destination_path.join(&self.root_name)
    }

    /// Where the baseline is loaded from and persisted to.
    pub fn snapshot_path(&self) -> PathBuf {
        match &self.options.snapshot_path {
            Some(path) => path.clone(),
            None => snapshot_path_for(&self.destination_path, &self.root_name),
        }
    }
}

/// Caller-supplied configuration of a backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOptions {
    /// Pin the snapshot file instead of keeping it on the active destination
    pub snapshot_path: Option<PathBuf>,

    pub reserve_multiplier: u64,

    /// Verify every copy against its source with this algorithm
    pub verify: Option<ChecksumAlgorithm>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        BackupOptions {
            snapshot_path: None,
            reserve_multiplier: DEFAULT_RESERVE_MULTIPLIER,
            verify: None,
        }
    }
}

/// Lifecycle of a backup job.
///
/// `Pending → Scanning → Diffing → Planned`, then per transfer attempt
/// `Reserving → Transferring`, ending in `Complete` or `Interrupted`.
/// `VolumeFull` and `Errored` are passed through while the loop recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Scanning,
    Diffing,
    Planned,
    Reserving,
    Transferring,
    VolumeFull,
    Errored,
    Interrupted,
    Complete,
}

impl JobState {
    /// Returns true if the run is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Interrupted)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How `run_job` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Delta fully consumed and baseline persisted
    Completed,
    /// Operator cancelled; baseline persisted and resumable
    Interrupted,
}

/// An entry that failed with an ordinary error and was skipped for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub path: Option<PathBuf>,
    pub message: String,
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub deletions_recorded: usize,
    /// Volumes written to during this run
    pub volumes_used: u32,
    pub failures: Vec<FailedEntry>,
}
