//! Deletion replay.
//!
//! Backups never delete anything from the destination; removals are only
//! recorded in the snapshot's deletion registry. `replay_deletions` is the
//! explicit, operator-confirmed step that applies that registry to a mirror.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::EngineError;
use crate::fs_ops;
use crate::snapshot::Snapshot;
use crate::tree::{Entry, EntryKind, Folder};

/// One entry of the deletion registry, resolved against the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionAction {
    pub path: PathBuf,
    pub kind: EntryKind,
    /// False when the target was already gone
    pub applied: bool,
}

/// Remove every recorded deletion from the mirror of `snapshot` under
/// `destination`.
///
/// Targets are resolved as `destination/<root name>/<relative path>`. Missing
/// targets are skipped. With `dry_run` set nothing is touched and every
/// target that exists is reported as it would be applied.
///
/// # Errors
/// Returns `Deletion` for the first target that exists but cannot be removed.
pub fn replay_deletions(
    snapshot: &Snapshot,
    destination: &Path,
    dry_run: bool,
) -> Result<Vec<DeletionAction>, EngineError> {
    let mirror = destination.join(&snapshot.root.name);
    let mut actions = Vec::new();
    replay_folder(&snapshot.root, &mirror, dry_run, &mut actions)?;
    info!(
        mirror = %mirror.display(),
        applied = actions.iter().filter(|a| a.applied).count(),
        recorded = actions.len(),
        dry_run,
        "Deletion replay finished"
    );
    Ok(actions)
}

fn replay_folder(
    folder: &Folder,
    target: &Path,
    dry_run: bool,
    actions: &mut Vec<DeletionAction>,
) -> Result<(), EngineError> {
    for (name, kind) in folder.deleted() {
        let path = target.join(name);
        let applied = if dry_run {
            path.symlink_metadata().is_ok()
        } else {
            fs_ops::remove_path(&path, *kind == EntryKind::Folder).map_err(|e| {
                EngineError::Deletion {
                    path: path.clone(),
                    source: e,
                }
            })?
        };
        if applied {
            debug!(path = %path.display(), %kind, dry_run, "Deleted");
        } else {
            debug!(path = %path.display(), "Already gone");
        }
        actions.push(DeletionAction {
            path,
            kind: *kind,
            applied,
        });
    }

    for (name, entry) in folder.contents() {
        if let Entry::Folder(child) = entry {
            replay_folder(child, &target.join(name), dry_run, actions)?;
        }
    }
    Ok(())
}
