//! Collaborator traits.
//!
//! The engine never talks to a terminal. Indexing and transfer progress go
//! out through `ProgressCallback`, and the request for a fresh volume when the
//! destination fills up goes through `VolumePrompt`. The CLI implements both;
//! tests script them.

use std::io;
use std::path::{Path, PathBuf};

/// Trait for receiving progress updates while a backup runs.
///
/// All methods are called synchronously from the single engine thread.
pub trait ProgressCallback: Send {
    /// Called for every file recorded while scanning the source.
    fn on_entry_indexed(&self, path: &Path);

    /// Called before each transfer attempt with the work still pending.
    fn on_transfer_started(&self, pending_files: usize, pending_bytes: u64);

    /// Called after a file has been copied and recorded in the baseline.
    fn on_file_copied(&self, path: &Path, bytes: u64);

    /// Called when the delta has been fully consumed.
    fn on_transfer_finished(&self);
}

/// Asks the operator for a new destination once the current one is full.
pub trait VolumePrompt {
    /// Return the path of the next volume, or `None` to keep using `current`.
    fn next_volume(&mut self, current: &Path) -> io::Result<Option<PathBuf>>;
}
