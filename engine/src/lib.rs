//! # Cartridge Engine - Incremental Volume-Spanning Backup Library
//!
//! A headless backup engine that mirrors a source directory onto one or more
//! removable destination volumes ("cartridges").
//! Designed as the foundation for front-ends (CLI, automation).
//!
//! ## Overview
//!
//! Each run scans the source into an in-memory tree, diffs it against the
//! snapshot saved by the previous run, and copies only what changed.
//! It features:
//! - Incremental change detection by modification time
//! - Deletion tracking without ever deleting from the destination
//! - Resumable transfers: the snapshot is checkpointed on every interruption
//! - Volume spanning: a full destination triggers a prompt for the next one
//! - A space reservation that keeps room for the final snapshot write
//! - Explicit, previewable replay of recorded deletions
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{create_job, plan_job, run_job, BackupOptions, FsCopier, NeverShutdown, RunHooks};
//! # use engine::VolumePrompt;
//! # struct NoSwap;
//! # use std::path::{Path, PathBuf};
//! # impl VolumePrompt for NoSwap {
//! #     fn next_volume(&mut self, _: &Path) -> std::io::Result<Option<PathBuf>> {
//! #         Ok(None)
//! #     }
//! # }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a job
//! let mut job = create_job("/home/me/photos", "/mnt/cartridge", BackupOptions::default())?;
//!
//! // Plan the job (scan the source and diff against the last snapshot)
//! plan_job(&mut job, None)?;
//! println!("Will copy {} files", job.planned_files);
//!
//! // Run the job (consume the delta, prompting for volumes as needed)
//! let mut volumes = NoSwap;
//! let mut hooks = RunHooks {
//!     progress: None,
//!     volumes: &mut volumes,
//!     shutdown: &NeverShutdown,
//!     copier: &FsCopier,
//! };
//! run_job(&mut job, &mut hooks)?;
//! println!("Copied {} files", job.report.files_copied);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **tree**: Folder/file entry tree with its deletion registry
//! - **diff**: Delta computation between two trees
//! - **snapshot**: Snapshot persistence (atomic JSON save/load)
//! - **reserve**: Space reservation placeholder on the destination
//! - **transfer**: Delta-consuming transfer engine
//! - **job**: Job orchestration (create, plan, run) across volumes
//! - **replay**: Deletion replay with dry-run preview
//! - **model**: Job data structures and run report
//! - **error**: Error types and classification
//! - **fs_ops**: Low-level filesystem operations
//! - **progress**: Progress and volume prompt traits
//! - **shutdown**: Cancellation checks (Ctrl+C)
//! - **checksums**: Optional verify-after-copy

pub mod checksums;
pub mod diff;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod progress;
pub mod replay;
pub mod reserve;
pub mod shutdown;
pub mod snapshot;
pub mod transfer;
pub mod tree;

// Re-export main types and functions
pub use checksums::ChecksumAlgorithm;
pub use error::EngineError;
pub use job::{create_job, plan_job, run_job, RunHooks};
pub use model::{BackupJob, BackupOptions, FailedEntry, JobState, RunOutcome, RunReport};
pub use progress::{ProgressCallback, VolumePrompt};
pub use replay::{replay_deletions, DeletionAction};
pub use shutdown::{NeverShutdown, ShutdownCheck, ShutdownFlag};
pub use snapshot::Snapshot;
pub use transfer::{FileCopier, FsCopier};
pub use tree::{Entry, EntryKind, FileEntry, Folder};
