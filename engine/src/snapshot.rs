//! Snapshot persistence.
//!
//! A `Snapshot` owns one root `Folder` and is the unit that gets saved and
//! loaded. On disk it is a versioned JSON envelope, written through a
//! temporary file and renamed into place so a crash never leaves a
//! truncated checkpoint behind.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::tree::Folder;

/// Revision of the on-disk layout. Bumped whenever the encoding changes.
pub const FORMAT_VERSION: u32 = 2;

/// Extension of persisted snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "cbdef";

/// A named, persistable tree plus its deletion bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub root: Folder,
    /// 1-based index of the volume currently receiving data
    pub volume: u32,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format_version: u32,
    snapshot: &'a Snapshot,
}

#[derive(Deserialize)]
struct Header {
    format_version: u32,
}

#[derive(Deserialize)]
struct Envelope {
    snapshot: Snapshot,
}

impl Snapshot {
    pub fn new(root: Folder) -> Self {
        Snapshot { root, volume: 1 }
    }

    /// An empty baseline named like `root_name`, used when no prior backup exists.
    pub fn empty(root_name: impl Into<OsString>) -> Self {
        Snapshot::new(Folder::new(root_name))
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&EnvelopeRef {
            format_version: FORMAT_VERSION,
            snapshot: self,
        })
    }

    /// Size in bytes this snapshot takes once persisted.
    pub fn estimated_size(&self) -> u64 {
        // Encoding an in-memory tree of strings and numbers cannot fail.
        self.encode().map(|bytes| bytes.len() as u64).unwrap_or(0)
    }

    pub fn decode(path: &Path, bytes: &[u8]) -> Result<Self, EngineError> {
        let header: Header =
            serde_json::from_slice(bytes).map_err(|e| EngineError::SnapshotCorrupt {
                path: path.to_path_buf(),
                source: e,
            })?;
        if header.format_version != FORMAT_VERSION {
            return Err(EngineError::UnsupportedSnapshotFormat {
                path: path.to_path_buf(),
                version: header.format_version,
            });
        }
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| EngineError::SnapshotCorrupt {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(envelope.snapshot)
    }

    /// Write the snapshot to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let save_err = |source: io::Error| EngineError::SnapshotSave {
            path: path.to_path_buf(),
            source,
        };
        let bytes = self
            .encode()
            .map_err(|e| save_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(save_err)?;
            }
        }

        let temp_path = temp_path_for(path);
        let mut file = fs::File::create(&temp_path).map_err(save_err)?;
        file.write_all(&bytes).map_err(save_err)?;
        file.sync_all().map_err(save_err)?;
        drop(file);
        fs::rename(&temp_path, path).map_err(save_err)?;

        info!(
            path = %path.display(),
            bytes = bytes.len(),
            files = self.root.file_count(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Load a snapshot from `path`.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let bytes = fs::read(path).map_err(|e| EngineError::SnapshotLoad {
            path: path.to_path_buf(),
            source: e,
        })?;
        let snapshot = Self::decode(path, &bytes)?;
        debug!(path = %path.display(), files = snapshot.root.file_count(), "Snapshot loaded");
        Ok(snapshot)
    }

    /// Load a snapshot, or `None` when no file exists at `path`.
    ///
    /// A missing file means "no prior backup"; any other failure is fatal.
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>, EngineError> {
        match Self::load(path) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(EngineError::SnapshotLoad { source, .. })
                if source.kind() == io::ErrorKind::NotFound =>
            {
                info!(
                    path = %path.display(),
                    "No previous snapshot, starting from an empty baseline"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Strip everything but letters, decimal digits and spaces, then trailing
/// whitespace.
pub fn sanitize_filename(unsafe_name: &str) -> String {
    unsafe_name
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_ascii_digit() || *c == ' ')
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Stem shared by the snapshot and reservation files of a backup root.
///
/// Bytes that are not valid UTF-8 decode to U+FFFD and are stripped.
pub fn file_stem_for(root_name: impl AsRef<OsStr>) -> String {
    let stem = sanitize_filename(&root_name.as_ref().to_string_lossy());
    if stem.is_empty() {
        "backup".to_string()
    } else {
        stem
    }
}

/// Default snapshot location for `root_name` on `destination`.
pub fn snapshot_path_for(destination: &Path, root_name: impl AsRef<OsStr>) -> PathBuf {
    destination.join(format!("{}.{}", file_stem_for(root_name), SNAPSHOT_EXTENSION))
}
