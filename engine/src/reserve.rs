//! Space reservation guard.
//!
//! Before each transfer attempt a zero-filled placeholder is written to the
//! destination. When the volume fills up mid-copy, releasing the placeholder
//! frees enough room to persist the in-progress snapshot.

use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EngineError;
use crate::snapshot::file_stem_for;

/// Extension of the placeholder file.
pub const RESERVE_EXTENSION: &str = "cbreserve";

const CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct SpaceReservation {
    path: PathBuf,
    size: u64,
}

impl SpaceReservation {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        SpaceReservation {
            path: path.into(),
            size,
        }
    }

    /// Reservation for backup root `root_name` on `destination`.
    pub fn for_destination(destination: &Path, root_name: impl AsRef<OsStr>, size: u64) -> Self {
        Self::new(placeholder_path(destination, root_name), size)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Point the guard at a new destination volume.
    pub fn repoint(&mut self, destination: &Path, root_name: impl AsRef<OsStr>) {
        self.path = placeholder_path(destination, root_name);
    }

    /// (Re)create the placeholder. Zeros are written out explicitly so the
    /// blocks are allocated rather than left sparse.
    pub fn reserve(&self) -> Result<(), EngineError> {
        let reserve_err = |source: io::Error| {
            if source.kind() == io::ErrorKind::StorageFull {
                EngineError::SpaceExhausted {
                    path: self.path.clone(),
                    source,
                }
            } else {
                EngineError::Reservation {
                    path: self.path.clone(),
                    source,
                }
            }
        };

        let mut file = fs::File::create(&self.path).map_err(reserve_err)?;
        let zeros = vec![0u8; CHUNK];
        let mut remaining = self.size;
        while remaining > 0 {
            let n = remaining.min(CHUNK as u64) as usize;
            file.write_all(&zeros[..n]).map_err(reserve_err)?;
            remaining -= n as u64;
        }
        file.sync_all().map_err(reserve_err)?;
        debug!(path = %self.path.display(), bytes = self.size, "Space reserved");
        Ok(())
    }

    /// Delete the placeholder; a missing file is fine.
    pub fn release(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Space released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Could not release reservation")
            }
        }
    }
}

fn placeholder_path(destination: &Path, root_name: impl AsRef<OsStr>) -> PathBuf {
    destination.join(format!("{}.{}", file_stem_for(root_name), RESERVE_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_writes_exact_size() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let guard = SpaceReservation::for_destination(temp_dir.path(), "Data", 150_000);

        guard.reserve().expect("Failed to reserve");

        let metadata = fs::metadata(guard.path()).expect("Placeholder should exist");
        assert_eq!(metadata.len(), 150_000);
        assert_eq!(guard.path(), temp_dir.path().join("Data.cbreserve"));
    }

    #[test]
    fn test_reserve_twice_recreates() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let guard = SpaceReservation::new(temp_dir.path().join("r.cbreserve"), 10);

        guard.reserve().expect("First reserve");
        guard.reserve().expect("Second reserve");

        assert_eq!(fs::metadata(guard.path()).unwrap().len(), 10);
    }

    #[test]
    fn test_release_tolerates_missing_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let guard = SpaceReservation::new(temp_dir.path().join("r.cbreserve"), 10);

        guard.release();
        guard.reserve().expect("Failed to reserve");
        guard.release();

        assert!(!guard.path().exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_full_device_is_space_exhausted() {
        let guard = SpaceReservation::new("/dev/full", 1024);

        let result = guard.reserve();

        assert!(matches!(result, Err(EngineError::SpaceExhausted { .. })));
    }

    #[test]
    fn test_other_write_failures_are_reservation_errors() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let guard = SpaceReservation::new(temp_dir.path().join("missing").join("r.cbreserve"), 1);

        assert!(matches!(guard.reserve(), Err(EngineError::Reservation { .. })));
    }

    #[test]
    fn test_repoint_follows_destination() {
        let first = tempfile::tempdir().expect("Failed to create temp dir");
        let second = tempfile::tempdir().expect("Failed to create temp dir");
        let mut guard = SpaceReservation::for_destination(first.path(), "Data", 1);

        guard.repoint(second.path(), "Data");
        guard.reserve().expect("Failed to reserve");

        assert!(second.path().join("Data.cbreserve").exists());
        assert!(!first.path().join("Data.cbreserve").exists());
    }
}
