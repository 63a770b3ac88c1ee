//! Cartridge - Command-line interface for the backup engine.
//!
//! Two subcommands:
//! - `backup`: scan, diff and transfer, prompting for a new cartridge when
//!   the destination fills up
//! - `restore-deletions`: preview recorded deletions and, after confirmation,
//!   apply them to a destination

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use engine::{
    create_job, plan_job, replay_deletions, run_job, BackupJob, BackupOptions, ChecksumAlgorithm,
    FsCopier, ProgressCallback, RunHooks, RunOutcome, ShutdownCheck, ShutdownFlag, Snapshot,
    VolumePrompt,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Cartridge - incremental backups spanning removable volumes
#[derive(Parser, Debug)]
#[command(name = "cartridge")]
#[command(version)]
#[command(about = "Incremental, resumable backups that span several destination volumes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up a directory, copying only what changed since the last run
    Backup(BackupArgs),

    /// Apply the deletions recorded in a snapshot to a destination
    RestoreDeletions(RestoreArgs),
}

#[derive(Args, Debug)]
struct BackupArgs {
    /// Source directory
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Destination directory (root of the first cartridge)
    #[arg(value_name = "DESTINATION")]
    destination: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Keep the snapshot at this path instead of on the active destination
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// Verify every copy with this checksum algorithm: sha256 or blake3
    #[arg(long, value_name = "ALGO")]
    verify: Option<ChecksumAlgorithm>,
}

#[derive(Args, Debug)]
struct RestoreArgs {
    /// Snapshot (.cbdef) file written by a previous backup
    #[arg(value_name = "SNAPSHOT_FILE")]
    snapshot_file: PathBuf,

    /// Directory the mirrored tree lives in
    #[arg(value_name = "DESTINATION")]
    destination: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn verbose(&self) -> bool {
        match &self.command {
            Command::Backup(args) => args.verbose,
            Command::RestoreDeletions(args) => args.verbose,
        }
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[derive(Debug)]
struct ProgressState {
    indexed: usize,
    pending_files: usize,
    pending_bytes: u64,
    copied_files: usize,
    copied_bytes: u64,
    last_update: Instant,
}

/// CLI implementation of ProgressCallback for displaying backup progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    state: Mutex<ProgressState>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        let now = Instant::now();
        CliProgress {
            verbose,
            start_time: now,
            state: Mutex::new(ProgressState {
                indexed: 0,
                pending_files: 0,
                pending_bytes: 0,
                copied_files: 0,
                copied_bytes: 0,
                last_update: now,
            }),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let percent = percent.min(100);
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!(
            "[{}{}] {}%",
            "=".repeat(filled),
            " ".repeat(empty),
            percent
        )
    }

    /// Throttle redraws to at most one per 200ms.
    fn due(state: &mut ProgressState) -> bool {
        if state.last_update.elapsed().as_millis() < 200 {
            return false;
        }
        state.last_update = Instant::now();
        true
    }
}

impl ProgressCallback for CliProgress {
    fn on_entry_indexed(&self, path: &Path) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.indexed += 1;
        if self.verbose {
            eprintln!("Indexing {}", path.display());
        } else if Self::due(&mut state) {
            eprint!("\rIndexing: {} files", state.indexed);
            let _ = io::stderr().flush();
        }
    }

    fn on_transfer_started(&self, pending_files: usize, pending_bytes: u64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.pending_files = pending_files;
        state.pending_bytes = pending_bytes;
        state.copied_files = 0;
        state.copied_bytes = 0;
        eprintln!();
        eprintln!(
            "Transferring {} files ({})",
            pending_files,
            Self::format_bytes(pending_bytes)
        );
    }

    fn on_file_copied(&self, path: &Path, bytes: u64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.copied_files += 1;
        state.copied_bytes += bytes;

        if self.verbose {
            eprintln!("[{:5}] Copied: {}", state.copied_files, path.display());
            return;
        }
        if !Self::due(&mut state) {
            return;
        }

        let total_bytes = state.pending_bytes.max(1);
        let percent = (state.copied_bytes as f64 / total_bytes as f64 * 100.0) as u32;
        eprint!(
            "\rProgress: {} | {}/{} files | {}/{}",
            Self::print_progress_bar(percent),
            state.copied_files,
            state.pending_files,
            Self::format_bytes(state.copied_bytes),
            Self::format_bytes(state.pending_bytes)
        );
        let _ = io::stderr().flush();
    }

    fn on_transfer_finished(&self) {
        eprintln!();
        eprintln!("Transfer complete!");
    }
}

/// Reads replacement destinations from a line-oriented input.
struct LineVolumePrompt<R> {
    reader: R,
}

impl<R: BufRead> LineVolumePrompt<R> {
    fn new(reader: R) -> Self {
        LineVolumePrompt { reader }
    }
}

impl<R: BufRead> VolumePrompt for LineVolumePrompt<R> {
    fn next_volume(&mut self, current: &Path) -> io::Result<Option<PathBuf>> {
        eprintln!();
        eprintln!("Destination {} is full.", current.display());
        eprint!("Insert the next cartridge and enter its path (empty to retry the current one): ");
        io::stderr().flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Input closed while waiting for a new destination",
            ));
        }
        let line = line.trim();
        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PathBuf::from(line)))
        }
    }
}

/// Parse arguments, set up logging, then run the subcommand
fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose());

    let exit_code = match run_cli(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability. Returns the exit code.
fn run_cli(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Command::Backup(args) => {
            let shutdown = ShutdownFlag::install();
            let mut volumes = LineVolumePrompt::new(io::stdin().lock());
            run_backup(args, &shutdown, &mut volumes)
        }
        Command::RestoreDeletions(args) => run_restore(args, &mut io::stdin().lock()),
    }
}

fn run_backup(
    args: &BackupArgs,
    shutdown: &dyn ShutdownCheck,
    volumes: &mut dyn VolumePrompt,
) -> Result<i32> {
    let options = BackupOptions {
        snapshot_path: args.snapshot.clone(),
        verify: args.verify,
        ..BackupOptions::default()
    };
    let mut job = create_job(&args.source, &args.destination, options)
        .context("Job creation failed")?;

    let progress = CliProgress::new(args.verbose);
    plan_job(&mut job, Some(&progress)).context("Job planning failed")?;

    eprintln!();
    eprintln!("Preparing backup...");
    eprintln!("  Source: {}", job.source_path.display());
    eprintln!("  Destination: {}", job.destination_path.display());
    eprintln!("  Snapshot: {}", job.snapshot_path().display());
    eprintln!(
        "  Changes: {} files ({}), {} deletions recorded",
        job.planned_files,
        CliProgress::format_bytes(job.planned_bytes),
        job.delta.deletion_count()
    );

    let mut hooks = RunHooks {
        progress: Some(&progress),
        volumes,
        shutdown,
        copier: &FsCopier,
    };
    let outcome = run_job(&mut job, &mut hooks).context("Backup failed")?;

    print_summary(&job, outcome, progress.start_time.elapsed());

    if outcome == RunOutcome::Completed && !job.report.failures.is_empty() {
        Ok(1)
    } else {
        Ok(0)
    }
}

fn print_summary(job: &BackupJob, outcome: RunOutcome, elapsed: std::time::Duration) {
    let report = &job.report;
    eprintln!();
    match outcome {
        RunOutcome::Completed => eprintln!("Backup complete!"),
        RunOutcome::Interrupted => eprintln!(
            "Backup interrupted. Progress saved to {}; run again to resume.",
            job.snapshot_path().display()
        ),
    }
    eprintln!(
        "Summary: {} copied, {} deletions recorded, {} failed",
        report.files_copied,
        report.deletions_recorded,
        report.failures.len()
    );
    eprintln!("Bytes copied: {}", CliProgress::format_bytes(report.bytes_copied));
    eprintln!("Volumes used: {}", report.volumes_used);
    eprintln!("Elapsed: {}", CliProgress::format_duration(elapsed));

    if !report.failures.is_empty() {
        eprintln!();
        eprintln!("Failed entries (retried on the next run):");
        for failure in &report.failures {
            match &failure.path {
                Some(path) => eprintln!("  {}: {}", path.display(), failure.message),
                None => eprintln!("  {}", failure.message),
            }
        }
    }
}

fn run_restore(args: &RestoreArgs, input: &mut dyn BufRead) -> Result<i32> {
    if !args.snapshot_file.is_file() {
        bail!(
            "Snapshot file not found: {}",
            args.snapshot_file.display()
        );
    }
    let snapshot = Snapshot::load(&args.snapshot_file).context("Could not load snapshot")?;

    let preview = replay_deletions(&snapshot, &args.destination, true)?;
    let pending: Vec<_> = preview.iter().filter(|action| action.applied).collect();
    if pending.is_empty() {
        println!("Nothing to delete.");
        return Ok(0);
    }

    println!("The following operations will be executed:");
    for action in &pending {
        println!("  delete {} {}", action.kind, action.path.display());
    }
    print!("Are you sure? [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    if !answer.trim().eq_ignore_ascii_case("y") {
        println!("Aborted, nothing was deleted.");
        return Ok(0);
    }

    let applied = replay_deletions(&snapshot, &args.destination, false)?;
    println!(
        "Deleted {} entries.",
        applied.iter().filter(|action| action.applied).count()
    );
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::NeverShutdown;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn backup_args(src: &Path, dst: &Path) -> BackupArgs {
        BackupArgs {
            source: src.to_path_buf(),
            destination: dst.to_path_buf(),
            verbose: false,
            snapshot: None,
            verify: None,
        }
    }

    fn no_volumes() -> LineVolumePrompt<Cursor<Vec<u8>>> {
        LineVolumePrompt::new(Cursor::new(Vec::new()))
    }

    #[test]
    fn test_parse_backup_command() {
        let cli = Cli::try_parse_from([
            "cartridge", "backup", "/data", "/mnt/cart", "-v", "--verify", "blake3",
        ])
        .expect("Arguments should parse");

        match cli.command {
            Command::Backup(args) => {
                assert_eq!(args.source, PathBuf::from("/data"));
                assert_eq!(args.destination, PathBuf::from("/mnt/cart"));
                assert!(args.verbose);
                assert_eq!(args.verify, Some(ChecksumAlgorithm::Blake3));
                assert_eq!(args.snapshot, None);
            }
            other => panic!("Unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_restore_command() {
        let cli = Cli::try_parse_from(["cartridge", "restore-deletions", "data.cbdef", "/mnt/cart"])
            .expect("Arguments should parse");

        assert!(!cli.verbose());
        assert!(matches!(cli.command, Command::RestoreDeletions(_)));
    }

    #[test]
    fn test_cli_rejects_invalid_hash_algorithm() {
        let result = Cli::try_parse_from([
            "cartridge", "backup", "/data", "/mnt/cart", "--verify", "md5",
        ]);
        assert!(result.is_err(), "CLI should reject invalid hash algorithm");
    }

    #[test]
    fn test_cli_with_valid_directories() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(src_dir.path().join("test.txt"), "hello").expect("Failed to write file");

        let code = run_backup(
            &backup_args(src_dir.path(), dst_dir.path()),
            &NeverShutdown,
            &mut no_volumes(),
        )
        .expect("CLI should succeed with valid directories");

        assert_eq!(code, 0);
        let root_name = fs::canonicalize(src_dir.path())
            .unwrap()
            .file_name()
            .unwrap()
            .to_owned();
        assert_eq!(
            fs::read_to_string(dst_dir.path().join(&root_name).join("test.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_cli_with_verification_and_pinned_snapshot() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let state_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(src_dir.path().join("test.txt"), "hello").expect("Failed to write file");

        let mut args = backup_args(src_dir.path(), dst_dir.path());
        args.verify = Some(ChecksumAlgorithm::Sha256);
        args.snapshot = Some(state_dir.path().join("pinned.cbdef"));

        let code = run_backup(&args, &NeverShutdown, &mut no_volumes())
            .expect("CLI should succeed with verification enabled");

        assert_eq!(code, 0);
        assert!(state_dir.path().join("pinned.cbdef").exists());
    }

    #[test]
    fn test_cli_rejects_missing_source() {
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let args = backup_args(Path::new("/nonexistent/path"), dst_dir.path());

        let result = run_backup(&args, &NeverShutdown, &mut no_volumes());
        assert!(result.is_err(), "CLI should reject missing source");
    }

    #[test]
    fn test_volume_prompt_reads_paths() {
        let mut prompt = LineVolumePrompt::new(Cursor::new(b"/mnt/cart2\n\n".to_vec()));

        assert_eq!(
            prompt.next_volume(Path::new("/mnt/cart1")).unwrap(),
            Some(PathBuf::from("/mnt/cart2"))
        );
        assert_eq!(prompt.next_volume(Path::new("/mnt/cart2")).unwrap(), None);
        assert!(prompt.next_volume(Path::new("/mnt/cart2")).is_err());
    }

    /// Back up a/b, delete a, back up again.
    /// Returns the temp dirs, the snapshot file and the mirror.
    fn backup_with_deletion() -> (TempDir, TempDir, PathBuf, PathBuf) {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(src_dir.path().join("a.txt"), "a").unwrap();
        fs::write(src_dir.path().join("b.txt"), "b").unwrap();
        let args = backup_args(src_dir.path(), dst_dir.path());
        run_backup(&args, &NeverShutdown, &mut no_volumes()).expect("First backup failed");

        fs::remove_file(src_dir.path().join("a.txt")).unwrap();
        run_backup(&args, &NeverShutdown, &mut no_volumes()).expect("Second backup failed");

        let job = create_job(src_dir.path(), dst_dir.path(), BackupOptions::default()).unwrap();
        let snapshot_file = job.snapshot_path();
        let mirror = job.mirror_path();
        assert!(mirror.join("a.txt").exists(), "backup must not delete");
        (src_dir, dst_dir, snapshot_file, mirror)
    }

    #[test]
    fn test_restore_deletions_requires_confirmation() {
        let (_src, dst_dir, snapshot_file, mirror) = backup_with_deletion();
        let args = RestoreArgs {
            snapshot_file,
            destination: dst_dir.path().to_path_buf(),
            verbose: false,
        };

        let code = run_restore(&args, &mut Cursor::new(b"\n".to_vec())).expect("Restore failed");
        assert_eq!(code, 0);
        assert!(mirror.join("a.txt").exists(), "empty answer must abort");

        run_restore(&args, &mut Cursor::new(b"yes\n".to_vec())).expect("Restore failed");
        assert!(mirror.join("a.txt").exists(), "only y/Y confirms");

        run_restore(&args, &mut Cursor::new(b"Y\n".to_vec())).expect("Restore failed");
        assert!(!mirror.join("a.txt").exists());
        assert!(mirror.join("b.txt").exists());
    }

    #[test]
    fn test_restore_deletions_rejects_missing_snapshot() {
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let args = RestoreArgs {
            snapshot_file: dst_dir.path().join("missing.cbdef"),
            destination: dst_dir.path().to_path_buf(),
            verbose: false,
        };

        let result = run_restore(&args, &mut Cursor::new(Vec::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(1536), "1.50 KB");
        assert_eq!(
            CliProgress::format_duration(std::time::Duration::from_secs(3725)),
            "1h 2m 5s"
        );
        assert_eq!(CliProgress::print_progress_bar(50), "[==========          ] 50%");
    }
}
