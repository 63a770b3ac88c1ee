//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Building an entry tree from a live directory
//! - Copying files with metadata preservation
//! - Creating directories recursively
//! - Removing destination files and subtrees

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::progress::ProgressCallback;
use crate::tree::{FileEntry, Folder};

/// System-reserved directory names that are never indexed.
pub const SKIPPED_DIRECTORIES: &[&str] = &["$RECYCLE.BIN", "System Volume Information"];

/// Build a `Folder` describing everything under `path`.
///
/// Regular files become file entries carrying modification time and size;
/// subdirectories are scanned recursively. Symbolic links are classified
/// without being followed, so they are neither files nor directories and are
/// left out.
///
/// # Errors
/// Returns `EngineError::Scan` if any directory in the tree cannot be read.
/// An unreadable directory aborts the scan: skipping it would make the next
/// diff record its contents as deleted.
pub fn scan_folder(
    path: &Path,
    progress: Option<&dyn ProgressCallback>,
) -> Result<Folder, EngineError> {
    let name = path
        .file_name()
        .map(OsStr::to_os_string)
        .ok_or_else(|| EngineError::InvalidPath {
            path: path.to_path_buf(),
            reason: "Path has no final component".to_string(),
        })?;
    debug!(path = %path.display(), "Indexing");

    let scan_err = |source: io::Error| EngineError::Scan {
        path: path.to_path_buf(),
        source,
    };

    let mut folder = Folder::new(name);
    for entry in fs::read_dir(path).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        let file_type = entry.file_type().map_err(scan_err)?;
        let entry_name = entry.file_name();
        let entry_path = entry.path();

        if file_type.is_file() {
            let metadata = entry.metadata().map_err(scan_err)?;
            let modified = metadata.modified().map_err(scan_err)?;
            folder.add_file(FileEntry::new(
                entry_name,
                DateTime::<Utc>::from(modified),
                metadata.len(),
            ));
            if let Some(callback) = progress {
                callback.on_entry_indexed(&entry_path);
            }
        } else if file_type.is_dir() {
            if is_skipped_directory(&entry_name) {
                debug!(path = %entry_path.display(), "Skipping reserved directory");
                continue;
            }
            folder.add_folder(scan_folder(&entry_path, progress)?);
        } else {
            debug!(path = %entry_path.display(), "Skipping non-regular entry");
        }
    }

    Ok(folder)
}

fn is_skipped_directory(name: &OsStr) -> bool {
    SKIPPED_DIRECTORIES.iter().any(|skipped| name == OsStr::new(skipped))
}

/// Copy a file from source to destination with metadata preservation.
///
/// Content and permission bits are copied, then the source modification time
/// is applied to the destination. If the destination exists and is
/// write-protected, the protection is cleared and the copy retried once.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> io::Result<u64> {
    retry_unprotected(dst, || copy_once(src, dst))
}

/// Run `copy`; if it is refused and `dst` turns out to be write-protected,
/// clear the protection and run it exactly once more.
fn retry_unprotected(dst: &Path, mut copy: impl FnMut() -> io::Result<u64>) -> io::Result<u64> {
    match copy() {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            if !clear_readonly(dst)? {
                return Err(e);
            }
            warn!(path = %dst.display(), "Destination was write-protected, retrying copy");
            copy()
        }
        result => result,
    }
}

fn copy_once(src: &Path, dst: &Path) -> io::Result<u64> {
    let bytes_copied = fs::copy(src, dst)?;
    let src_mtime = fs::metadata(src)?.modified()?;
    filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(src_mtime))?;
    Ok(bytes_copied)
}

/// Clear the read-only flag on `path`. Returns false if there was nothing to clear.
#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) -> io::Result<bool> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let mut permissions = metadata.permissions();
    if !permissions.readonly() {
        return Ok(false);
    }
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)?;
    Ok(true)
}

/// True when `path` can be opened for reading.
pub fn is_readable(path: &Path) -> bool {
    fs::File::open(path).is_ok()
}

/// Ensure a directory exists, creating it and its parents if necessary.
///
/// # Errors
/// Returns `SpaceExhausted` when the volume is full, otherwise
/// `DirectoryCreationFailed`.
pub fn ensure_dir_exists(path: &Path) -> Result<(), EngineError> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: path.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "Path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path).map_err(|e| EngineError::from_create_dir(path, e))
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Remove a destination file or, with `recursive`, a whole subtree.
///
/// Returns false if there was nothing to remove.
pub fn remove_path(path: &Path, recursive: bool) -> io::Result<bool> {
    let result = if recursive {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
