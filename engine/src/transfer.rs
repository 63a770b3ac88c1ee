//! Transfer engine.
//!
//! `Transfer::process` walks a delta tree, writes it to the destination and
//! moves every completed entry into the baseline, one entry at a time. At any
//! point where it returns, `delta` holds exactly the work still to do and
//! `baseline` exactly the work done, so persisting the baseline is always a
//! valid checkpoint.

use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::checksums::{self, ChecksumAlgorithm};
use crate::error::EngineError;
use crate::fs_ops;
use crate::progress::ProgressCallback;
use crate::shutdown::ShutdownCheck;
use crate::tree::{Entry, Folder};

/// Copies one file to the destination. Swapped out in tests to inject failures.
pub trait FileCopier {
    /// Copy content and metadata, returning the number of bytes written.
    fn copy(&self, src: &Path, dst: &Path) -> io::Result<u64>;
}

/// Copier backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCopier;

impl FileCopier for FsCopier {
    fn copy(&self, src: &Path, dst: &Path) -> io::Result<u64> {
        fs_ops::copy_file_with_metadata(src, dst)
    }
}

/// Running totals across `process` calls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub deletions_recorded: usize,
}

pub struct Transfer<'a> {
    copier: &'a dyn FileCopier,
    shutdown: &'a dyn ShutdownCheck,
    progress: Option<&'a dyn ProgressCallback>,
    verify: Option<ChecksumAlgorithm>,
    stats: TransferStats,
}

impl<'a> Transfer<'a> {
    pub fn new(copier: &'a dyn FileCopier, shutdown: &'a dyn ShutdownCheck) -> Self {
        Transfer {
            copier,
            shutdown,
            progress: None,
            verify: None,
            stats: TransferStats::default(),
        }
    }

    pub fn with_progress(mut self, progress: Option<&'a dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_verification(mut self, verify: Option<ChecksumAlgorithm>) -> Self {
        self.verify = verify;
        self
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Consume `delta` into `baseline`, copying from `source` to `destination`.
    ///
    /// Deletions are folded into the baseline registry and never applied to
    /// the destination. Folders leave the delta only once their whole subtree
    /// is done; files leave it before the copy is attempted and come back only
    /// when the destination is full.
    ///
    /// # Errors
    /// - `SpaceExhausted`: the file being copied is back in `delta`
    /// - `Cancelled`: raised between entries, nothing is half-written
    /// - anything else: the failing entry is no longer in `delta`
    pub fn process(
        &mut self,
        delta: &mut Folder,
        baseline: &mut Folder,
        source: &Path,
        destination: &Path,
    ) -> Result<(), EngineError> {
        for (name, kind) in delta.take_deleted() {
            debug!(path = %destination.join(&name).display(), %kind, "Recording deletion");
            baseline.record_deletion(name, kind);
            self.stats.deletions_recorded += 1;
        }

        fs_ops::ensure_dir_exists(destination)?;

        for name in delta.folder_names() {
            self.check_shutdown()?;
            let child_destination = destination.join(&name);
            let Some(child_delta) = delta.folder_mut(&name) else {
                continue;
            };
            let child_baseline = baseline.folder_entry(&name);

            match self.process(
                child_delta,
                child_baseline,
                &source.join(&name),
                &child_destination,
            ) {
                Ok(()) => {
                    delta.remove(&name);
                }
                Err(e @ EngineError::DirectoryCreationFailed { .. })
                    if e.path() == Some(child_destination.as_path()) =>
                {
                    // Nothing below this folder can be written; drop it for this run.
                    delta.remove(&name);
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        for name in delta.file_names() {
            self.check_shutdown()?;
            let Some(Entry::File(file)) = delta.remove(&name) else {
                continue;
            };
            let src = source.join(&name);
            let dst = destination.join(&name);

            match self.copy_file(&src, &dst) {
                Ok(bytes) => {
                    debug!(path = %dst.display(), bytes, "Copied");
                    baseline.add_file(file);
                    self.stats.files_copied += 1;
                    self.stats.bytes_copied += bytes;
                    if let Some(callback) = self.progress {
                        callback.on_file_copied(&src, bytes);
                    }
                }
                Err(e @ EngineError::SpaceExhausted { .. }) => {
                    info!(
                        path = %dst.display(),
                        "Destination full, keeping file for the next volume"
                    );
                    delta.add_file(file);
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> Result<u64, EngineError> {
        let bytes = self.copier.copy(src, dst).map_err(|e| {
            // A refusal to read the source is an ordinary per-file failure.
            if e.kind() == io::ErrorKind::PermissionDenied && !fs_ops::is_readable(src) {
                EngineError::Transfer {
                    path: src.to_path_buf(),
                    source: e,
                }
            } else {
                EngineError::from_copy(src, dst, e)
            }
        })?;

        if let Some(algorithm) = self.verify {
            let matches = checksums::verify_copy(src, dst, algorithm).map_err(|e| {
                EngineError::Transfer {
                    path: src.to_path_buf(),
                    source: e,
                }
            })?;
            if !matches {
                return Err(EngineError::VerificationFailed {
                    path: dst.to_path_buf(),
                });
            }
        }

        Ok(bytes)
    }

    fn check_shutdown(&self) -> Result<(), EngineError> {
        if self.shutdown.should_stop() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
