//! Error types for the backup engine.
//!
//! The primary error type is `EngineError`. Scan and snapshot-load errors are
//! fatal and surface before any destination state changes. Errors raised while
//! transferring are classified so the orchestrator can decide whether to swap
//! volumes, stop, or keep going.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while scanning, diffing, transferring or replaying.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source directory could not be enumerated
    #[error("Failed to scan directory: {}", path.display())]
    Scan { path: PathBuf, source: io::Error },

    /// Persisted snapshot exists but could not be read
    #[error("Failed to read snapshot: {}", path.display())]
    SnapshotLoad { path: PathBuf, source: io::Error },

    /// Persisted snapshot could not be decoded
    #[error("Snapshot is corrupt: {}", path.display())]
    SnapshotCorrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Persisted snapshot was written by an incompatible format revision
    #[error("Unsupported snapshot format version {version}: {}", path.display())]
    UnsupportedSnapshotFormat { path: PathBuf, version: u32 },

    /// Snapshot could not be written
    #[error("Failed to save snapshot: {}", path.display())]
    SnapshotSave { path: PathBuf, source: io::Error },

    /// Destination volume is out of space
    #[error("Destination is full: {}", path.display())]
    SpaceExhausted { path: PathBuf, source: io::Error },

    /// Destination file is write-protected and clearing the protection did not help
    #[error("Permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf, source: io::Error },

    /// Operator asked to stop
    #[error("Cancelled by operator")]
    Cancelled,

    /// Any other failure while copying a file
    #[error("Failed to transfer file: {}", path.display())]
    Transfer { path: PathBuf, source: io::Error },

    /// Failed to create a destination directory
    #[error("Failed to create directory: {}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Copied file does not match its source
    #[error("Checksum mismatch after copy: {}", path.display())]
    VerificationFailed { path: PathBuf },

    /// Reservation placeholder could not be written
    #[error("Failed to reserve space: {}", path.display())]
    Reservation { path: PathBuf, source: io::Error },

    /// A recorded deletion could not be applied
    #[error("Failed to delete: {}", path.display())]
    Deletion { path: PathBuf, source: io::Error },

    /// The operator prompt for a new volume failed
    #[error("Failed to read new destination")]
    VolumePrompt { source: io::Error },

    /// Path is unusable as a source or destination
    #[error("Invalid path: {} ({reason})", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Job function called in the wrong lifecycle state
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    /// Transfer keeps failing without making progress
    #[error("Transfer stalled without progress")]
    Stalled {
        #[source]
        last: Box<EngineError>,
    },
}

impl EngineError {
    /// Classify an I/O failure that happened while copying `src` to `dst`.
    ///
    /// Out-of-space is the only trigger for volume swapping. A refused write
    /// to the destination stops the run; everything else is an ordinary
    /// per-entry failure.
    pub fn from_copy(src: &Path, dst: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::StorageFull => Self::SpaceExhausted {
                path: dst.to_path_buf(),
                source,
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: dst.to_path_buf(),
                source,
            },
            _ => Self::Transfer {
                path: src.to_path_buf(),
                source,
            },
        }
    }

    /// Classify a failure to create the destination directory `path`.
    pub fn from_create_dir(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        if source.kind() == io::ErrorKind::StorageFull {
            Self::SpaceExhausted { path, source }
        } else {
            Self::DirectoryCreationFailed { path, source }
        }
    }

    /// True for failures the orchestrator logs and moves past.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transfer { .. }
                | Self::DirectoryCreationFailed { .. }
                | Self::VerificationFailed { .. }
        )
    }

    /// Path the error concerns, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Scan { path, .. }
            | Self::SnapshotLoad { path, .. }
            | Self::SnapshotCorrupt { path, .. }
            | Self::UnsupportedSnapshotFormat { path, .. }
            | Self::SnapshotSave { path, .. }
            | Self::SpaceExhausted { path, .. }
            | Self::PermissionDenied { path, .. }
            | Self::Transfer { path, .. }
            | Self::DirectoryCreationFailed { path, .. }
            | Self::VerificationFailed { path }
            | Self::Reservation { path, .. }
            | Self::Deletion { path, .. }
            | Self::InvalidPath { path, .. } => Some(path),
            Self::Cancelled
            | Self::VolumePrompt { .. }
            | Self::InvalidState(_)
            | Self::Stalled { .. } => None,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Scan { source, .. }
            | Self::SnapshotLoad { source, .. }
            | Self::SnapshotSave { source, .. }
            | Self::SpaceExhausted { source, .. }
            | Self::PermissionDenied { source, .. }
            | Self::Transfer { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::Reservation { source, .. }
            | Self::Deletion { source, .. }
            | Self::VolumePrompt { source } => source.raw_os_error(),
            _ => None,
        }
    }
}
