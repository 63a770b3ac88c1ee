//! Job orchestration module.
//!
//! This module provides the backup lifecycle functions:
//! - Creating a job from source/destination paths
//! - Planning a job (scanning the source and diffing against the baseline)
//! - Running a job (the volume-spanning transfer loop)
//!
//! `run_job` keeps invoking the transfer engine until the delta is consumed.
//! Every way out of an attempt (disk full, cancellation, per-entry failure,
//! completion) releases the space reservation and persists the baseline
//! first, so the snapshot on disk is always a valid point to resume from.

use std::error::Error as _;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::diff;
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{BackupJob, BackupOptions, FailedEntry, JobState, RunOutcome, RunReport};
use crate::progress::{ProgressCallback, VolumePrompt};
use crate::reserve::SpaceReservation;
use crate::shutdown::ShutdownCheck;
use crate::snapshot::Snapshot;
use crate::transfer::{FileCopier, Transfer};
use crate::tree::Folder;

/// Collaborators `run_job` talks to.
pub struct RunHooks<'a> {
    pub progress: Option<&'a dyn ProgressCallback>,
    pub volumes: &'a mut dyn VolumePrompt,
    pub shutdown: &'a dyn ShutdownCheck,
    pub copier: &'a dyn FileCopier,
}

/// Create a new backup job.
///
/// Validates that the source path exists and is a directory. The destination
/// may not exist yet; it is created when the first transfer attempt starts.
///
/// # Errors
/// Returns `InvalidPath` if the source is missing or not a directory, or the
/// destination is empty.
pub fn create_job<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    destination: Q,
    options: BackupOptions,
) -> Result<BackupJob, EngineError> {
    let source = source.as_ref();
    let destination = destination.as_ref();

    match fs::metadata(source) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::InvalidPath {
                path: source.to_path_buf(),
                reason: "Source must be a directory".to_string(),
            })
        }
        Err(e) => {
            return Err(EngineError::Scan {
                path: source.to_path_buf(),
                source: e,
            })
        }
    }

    if destination.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath {
            path: destination.to_path_buf(),
            reason: "Destination path is empty".to_string(),
        });
    }

    let source_path = fs::canonicalize(source).map_err(|e| EngineError::Scan {
        path: source.to_path_buf(),
        source: e,
    })?;
    let root_name = source_path
        .file_name()
        .map(OsStr::to_os_string)
        .ok_or_else(|| EngineError::InvalidPath {
            path: source_path.clone(),
            reason: "Source has no directory name".to_string(),
        })?;

    Ok(BackupJob {
        source_path,
        destination_path: destination.to_path_buf(),
        baseline: Snapshot::empty(root_name.clone()),
        delta: Folder::new(root_name.clone()),
        root_name,
        options,
        state: JobState::Pending,
        reservation_size: 0,
        planned_files: 0,
        planned_bytes: 0,
        report: RunReport::default(),
        created_at: Utc::now(),
        start_time: None,
        end_time: None,
    })
}

/// Plan a job: scan the source, load the baseline and compute the delta.
///
/// A missing snapshot means this is the first backup and the baseline starts
/// empty. Nothing on the destination is touched.
///
/// # Errors
/// Returns `Scan` if the source cannot be read, `SnapshotCorrupt` or
/// `UnsupportedSnapshotFormat` if the baseline cannot be decoded.
pub fn plan_job(
    job: &mut BackupJob,
    progress: Option<&dyn ProgressCallback>,
) -> Result<(), EngineError> {
    if job.state != JobState::Pending {
        return Err(EngineError::InvalidState(format!(
            "Job must be Pending to plan; current state: {}",
            job.state
        )));
    }

    transition(job, JobState::Scanning);
    let current = fs_ops::scan_folder(&job.source_path, progress)?;
    info!(
        files = current.file_count(),
        bytes = current.size(),
        "Source indexed"
    );

    transition(job, JobState::Diffing);
    let snapshot_path = job.snapshot_path();
    let mut baseline = Snapshot::load_if_exists(&snapshot_path)?
        .unwrap_or_else(|| Snapshot::empty(job.root_name.clone()));
    if baseline.root.name != job.root_name {
        warn!(
            snapshot = %baseline.root.name.to_string_lossy(),
            source = %job.root_name.to_string_lossy(),
            "Snapshot was taken from a differently named source"
        );
        baseline.root.name = job.root_name.clone();
    }

    job.delta = diff::delta(&current, &baseline.root);
    job.baseline = baseline;
    job.planned_files = job.delta.file_count();
    job.planned_bytes = job.delta.size();
    job.reservation_size =
        Snapshot::new(current).estimated_size() * job.options.reserve_multiplier;

    info!(
        files = job.planned_files,
        bytes = job.planned_bytes,
        reserve = job.reservation_size,
        "Delta computed"
    );
    transition(job, JobState::Planned);
    Ok(())
}

/// Run a planned job until the delta is consumed or the operator cancels.
///
/// Out-of-space releases the reservation, persists the baseline and asks
/// `hooks.volumes` for the next destination. Ordinary per-entry failures are
/// recorded in the report and the loop carries on.
///
/// Cancellation is checked before every attempt, so a stop requested while
/// scanning or while the volume prompt was open takes effect before anything
/// more is written.
///
/// # Errors
/// Returns fatal errors only: a failed final persist, a failed volume prompt,
/// a reservation that cannot be written, a destination that refuses writes
/// even after its protection was cleared, or `Stalled` when failures stop the
/// delta from shrinking.
pub fn run_job(job: &mut BackupJob, hooks: &mut RunHooks<'_>) -> Result<RunOutcome, EngineError> {
    if job.state != JobState::Planned {
        return Err(EngineError::InvalidState(format!(
            "Job must be Planned to run; current state: {}",
            job.state
        )));
    }

    job.start_time = Some(Utc::now());
    job.report.volumes_used = 1;
    let mut guard = SpaceReservation::for_destination(
        &job.destination_path,
        &job.root_name,
        job.reservation_size,
    );
    let mut transfer = Transfer::new(hooks.copier, hooks.shutdown)
        .with_progress(hooks.progress)
        .with_verification(job.options.verify);

    while !job.delta.is_empty() {
        let pending_before = job.delta.pending_count();
        if let Some(callback) = hooks.progress {
            callback.on_transfer_started(job.delta.file_count(), job.delta.size());
        }

        let attempt = attempt_transfer(job, &guard, hooks.shutdown, &mut transfer);
        absorb_stats(job, &transfer);

        match attempt {
            Ok(()) => {}
            Err(EngineError::SpaceExhausted { path, source }) => {
                transition(job, JobState::VolumeFull);
                warn!(path = %path.display(), error = %source, "Destination volume is full");
                guard.release();
                checkpoint(job);

                let next = hooks
                    .volumes
                    .next_volume(&job.destination_path)
                    .map_err(|e| EngineError::VolumePrompt { source: e })?;
                match next {
                    Some(destination) if destination != job.destination_path => {
                        info!(destination = %destination.display(), "Switching to a new volume");
                        job.destination_path = destination;
                        job.baseline.volume += 1;
                        job.report.volumes_used += 1;
                        guard.repoint(&job.destination_path, &job.root_name);
                    }
                    _ => info!("Retrying on the current destination"),
                }
            }
            Err(EngineError::Cancelled) => {
                transition(job, JobState::Interrupted);
                guard.release();
                persist(job)?;
                job.end_time = Some(Utc::now());
                return Ok(RunOutcome::Interrupted);
            }
            Err(e) if e.is_recoverable() => {
                transition(job, JobState::Errored);
                warn!(error = %describe(&e), "Entry skipped for this run");
                guard.release();
                checkpoint(job);
                job.report.failures.push(FailedEntry {
                    path: e.path().map(Path::to_path_buf),
                    message: describe(&e),
                });
                if job.delta.pending_count() >= pending_before {
                    error!("Transfer is not making progress, giving up");
                    return Err(EngineError::Stalled { last: Box::new(e) });
                }
            }
            Err(e) => {
                transition(job, JobState::Errored);
                guard.release();
                checkpoint(job);
                return Err(e);
            }
        }
    }

    transition(job, JobState::Complete);
    guard.release();
    persist(job)?;
    job.end_time = Some(Utc::now());
    if let Some(callback) = hooks.progress {
        callback.on_transfer_finished();
    }
    Ok(RunOutcome::Completed)
}

fn attempt_transfer(
    job: &mut BackupJob,
    guard: &SpaceReservation,
    shutdown: &dyn ShutdownCheck,
    transfer: &mut Transfer<'_>,
) -> Result<(), EngineError> {
    if shutdown.should_stop() {
        return Err(EngineError::Cancelled);
    }

    transition(job, JobState::Reserving);
    fs_ops::ensure_dir_exists(&job.destination_path)?;
    guard.reserve()?;

    transition(job, JobState::Transferring);
    let mirror = job.mirror_path();
    transfer.process(
        &mut job.delta,
        &mut job.baseline.root,
        &job.source_path,
        &mirror,
    )
}

fn absorb_stats(job: &mut BackupJob, transfer: &Transfer<'_>) {
    let stats = transfer.stats();
    job.report.files_copied = stats.files_copied;
    job.report.bytes_copied = stats.bytes_copied;
    job.report.deletions_recorded = stats.deletions_recorded;
}

fn transition(job: &mut BackupJob, state: JobState) {
    info!(from = %job.state, to = %state, "State change");
    job.state = state;
}

/// Persist the baseline; failure is fatal.
fn persist(job: &BackupJob) -> Result<(), EngineError> {
    job.baseline.save(&job.snapshot_path())
}

/// Persist the baseline on the way through a recoverable condition. A failure
/// here is logged; the next checkpoint gets another chance.
fn checkpoint(job: &BackupJob) {
    if let Err(e) = persist(job) {
        error!(error = %describe(&e), "Checkpoint failed");
    }
}

fn describe(e: &EngineError) -> String {
    match e.source() {
        Some(source) => format!("{}: {}", e, source),
        None => e.to_string(),
    }
}
