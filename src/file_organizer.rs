//! Placement engine: moves files into category folders.
//!
//! [`FileOrganizer`] owns an immutable [`Settings`] snapshot and exposes two
//! entry points: [`FileOrganizer::organize_one`] for a single file (also the
//! hook the folder watcher calls) and [`FileOrganizer::organize_directory`]
//! for a non-recursive bulk run.
//!
//! The engine takes no locks. Callers must not run two overlapping bulk runs
//! against the same destination root, and must feed watch events one at a
//! time, otherwise two movers can pick the same conflict-free name.

use crate::config::Settings;
use chrono::{DateTime, Local};
use filetime::FileTime;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// File name prefix marking a hidden file.
pub const HIDDEN_PREFIX: char = '.';

/// Why a file was deliberately left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Hidden file while the policy ignores hidden files.
    Hidden,
    /// File name matched an exclude pattern.
    Excluded { pattern: String },
    /// The file already sits in the folder it would be moved to.
    AlreadyInPlace,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Hidden => write!(f, "hidden file ignored"),
            SkipReason::Excluded { pattern } => write!(f, "matches exclude pattern '{}'", pattern),
            SkipReason::AlreadyInPlace => write!(f, "already organized"),
        }
    }
}

/// Errors that can occur while organizing a file or a directory.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// The path is missing or is not a regular file (or directory, for a batch root).
    #[error("Not found: {}", .path.display())]
    NotFound { path: PathBuf },
    /// A policy-driven no-op. Not a failure.
    #[error("Skipped {}: {reason}", display_name(.path))]
    Skipped { path: PathBuf, reason: SkipReason },
    /// Placement failed. The source file is left where it was.
    #[error("Failed to move {}: {source}", display_name(.path))]
    MoveFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The batch root exists but cannot be listed.
    #[error("Cannot read directory {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl OrganizeError {
    pub fn is_skip(&self) -> bool {
        matches!(self, OrganizeError::Skipped { .. })
    }

    fn move_failed(path: &Path, source: io::Error) -> Self {
        OrganizeError::MoveFailed {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for organize operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Where a file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Category the file was classified into.
    pub category: String,
    /// Absolute destination path.
    pub destination: PathBuf,
    /// Destination relative to the destination root, for display.
    pub relative: PathBuf,
    /// Set when the file was copied across filesystems but the source could
    /// not be removed afterwards. The destination is still complete.
    pub stale_source: Option<String>,
}

/// Outcome of a single `organize_one` call.
#[derive(Debug)]
pub struct OrganizeReport {
    pub source: PathBuf,
    pub outcome: OrganizeResult<Placement>,
}

impl OrganizeReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome.as_ref().is_err_and(OrganizeError::is_skip)
    }

    pub fn destination(&self) -> Option<&Path> {
        self.outcome
            .as_ref()
            .ok()
            .map(|placement| placement.destination.as_path())
    }
}

impl fmt::Display for OrganizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = display_name(&self.source);
        match &self.outcome {
            Ok(placement) => {
                write!(f, "✓ {} → {}", name, placement.relative.display())?;
                if let Some(stale) = &placement.stale_source {
                    write!(f, " (original left behind: {})", stale)?;
                }
                Ok(())
            }
            Err(OrganizeError::Skipped { reason, .. }) => {
                write!(f, "- {} skipped: {}", name, reason)
            }
            Err(e) => write!(f, "✗ {}", e),
        }
    }
}

/// Where a file would go, computed without touching the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub category: String,
    pub destination: PathBuf,
    pub relative: PathBuf,
}

/// Totals for one bulk run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub root: PathBuf,
    pub organized: usize,
    pub skipped: usize,
    pub errors: usize,
    /// The run stopped early because its cancellation token fired.
    pub cancelled: bool,
    /// Organized file count per category.
    pub by_category: BTreeMap<String, usize>,
}

impl BatchSummary {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ..Default::default()
        }
    }

    fn record(&mut self, report: &OrganizeReport) {
        match &report.outcome {
            Ok(placement) => {
                self.organized += 1;
                *self
                    .by_category
                    .entry(placement.category.clone())
                    .or_insert(0) += 1;
            }
            Err(e) if e.is_skip() => self.skipped += 1,
            Err(_) => self.errors += 1,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Summary: {} organized, {} skipped, {} errors",
            self.organized, self.skipped, self.errors
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Something an organize call reports to its sink.
#[derive(Debug, Clone, Copy)]
pub enum SinkMessage<'a> {
    /// A bulk run is about to process `total` files.
    Started { root: &'a Path, total: usize },
    /// One file was handled.
    File(&'a OrganizeReport),
    /// A bulk run finished.
    Finished(&'a BatchSummary),
}

impl fmt::Display for SinkMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkMessage::Started { root, total } => {
                write!(f, "Organizing {} files in {}", total, root.display())
            }
            SinkMessage::File(report) => fmt::Display::fmt(report, f),
            SinkMessage::Finished(summary) => fmt::Display::fmt(summary, f),
        }
    }
}

/// Receives a human-readable line per file outcome plus a final summary.
pub trait MessageSink: Send + Sync {
    fn message(&self, message: &SinkMessage<'_>);
}

impl<F> MessageSink for F
where
    F: Fn(&SinkMessage<'_>) + Send + Sync,
{
    fn message(&self, message: &SinkMessage<'_>) {
        self(message)
    }
}

fn emit(sink: Option<&dyn MessageSink>, message: SinkMessage<'_>) {
    if let Some(sink) = sink {
        sink.message(&message);
    }
}

/// Shared flag checked between files of a bulk run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A file that passed the policy checks, with its target folder.
struct Prepared {
    file_name: OsString,
    category: String,
    target_dir: PathBuf,
}

/// Organizes files by moving them into category subdirectories.
#[derive(Debug, Clone)]
pub struct FileOrganizer {
    settings: Arc<Settings>,
}

impl FileOrganizer {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Moves one file into its category folder under `destination_root` and
    /// reports the outcome to `sink`.
    ///
    /// Never panics or propagates: every failure is captured in the report.
    pub fn organize_one(
        &self,
        source: &Path,
        destination_root: &Path,
        sink: Option<&dyn MessageSink>,
    ) -> OrganizeReport {
        report_outcome(source, self.organize_file(source, destination_root), sink)
    }

    /// Moves one file into `destination_root/[date/]folder/`, renaming on conflict.
    ///
    /// # Errors
    ///
    /// * `NotFound` if `source` is not an existing regular file
    /// * `Skipped` if the policy says to leave the file alone
    /// * `MoveFailed` if creating the folder or moving the file fails; the
    ///   source is untouched in that case
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dirsort::config::Settings;
    /// use dirsort::file_organizer::FileOrganizer;
    /// use std::path::Path;
    /// use std::sync::Arc;
    ///
    /// let organizer = FileOrganizer::new(Arc::new(Settings::default()));
    /// match organizer.organize_file(Path::new("/tmp/in/a.pdf"), Path::new("/tmp/in")) {
    ///     Ok(placement) => println!("moved to {}", placement.relative.display()),
    ///     Err(e) => eprintln!("{}", e),
    /// }
    /// ```
    pub fn organize_file(
        &self,
        source: &Path,
        destination_root: &Path,
    ) -> OrganizeResult<Placement> {
        self.organize_file_with(source, destination_root, move_file)
    }

    /// `organize_file` with the final move step supplied by the caller.
    fn organize_file_with<M>(
        &self,
        source: &Path,
        destination_root: &Path,
        mover: M,
    ) -> OrganizeResult<Placement>
    where
        M: FnOnce(&Path, &Path) -> io::Result<Option<io::Error>>,
    {
        let prepared = self.prepare(source, destination_root)?;

        fs::create_dir_all(&prepared.target_dir)
            .map_err(|e| OrganizeError::move_failed(source, e))?;

        if source
            .parent()
            .is_some_and(|parent| same_directory(parent, &prepared.target_dir))
        {
            return Err(OrganizeError::Skipped {
                path: source.to_path_buf(),
                reason: SkipReason::AlreadyInPlace,
            });
        }

        let destination = resolve_conflict(&prepared.target_dir, &prepared.file_name);
        let stale =
            mover(source, &destination).map_err(|e| OrganizeError::move_failed(source, e))?;

        if let Some(e) = &stale {
            tracing::warn!(
                source = %source.display(),
                error = %e,
                "copied across filesystems but could not remove the original"
            );
        }

        Ok(Placement {
            category: prepared.category,
            relative: relative_to(&destination, destination_root),
            destination,
            stale_source: stale.map(|e| e.to_string()),
        })
    }

    /// Computes where `source` would go without creating or moving anything.
    pub fn plan_file(&self, source: &Path, destination_root: &Path) -> OrganizeResult<PlannedMove> {
        let prepared = self.prepare(source, destination_root)?;
        let destination = resolve_conflict(&prepared.target_dir, &prepared.file_name);
        Ok(PlannedMove {
            source: source.to_path_buf(),
            category: prepared.category,
            relative: relative_to(&destination, destination_root),
            destination,
        })
    }

    /// Organizes every regular file directly inside `dir`.
    ///
    /// Subdirectories are not entered. Files go under the policy's
    /// destination root, or under `dir` itself when none is set. One file
    /// failing does not stop the batch. `cancel` is checked before each file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `dir` is not an existing directory and
    /// `Unreadable` if it cannot be listed. Per-file failures are only counted.
    pub fn organize_directory(
        &self,
        dir: &Path,
        sink: Option<&dyn MessageSink>,
        cancel: Option<&CancellationToken>,
    ) -> OrganizeResult<BatchSummary> {
        let files = list_files(dir)?;
        let destination_root = self.destination_root_for(dir);

        tracing::info!(dir = %dir.display(), files = files.len(), "organizing directory");
        emit(
            sink,
            SinkMessage::Started {
                root: dir,
                total: files.len(),
            },
        );

        let mut summary = BatchSummary::new(dir);
        for file in &files {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::info!(dir = %dir.display(), "organize run cancelled");
                summary.cancelled = true;
                break;
            }
            let report = self.organize_one(file, &destination_root, sink);
            summary.record(&report);
        }

        emit(sink, SinkMessage::Finished(&summary));
        Ok(summary)
    }

    /// Plans every regular file directly inside `dir`.
    ///
    /// Conflict numbering only considers files already at the destination,
    /// not other files of the same plan.
    pub fn plan_directory(
        &self,
        dir: &Path,
    ) -> OrganizeResult<Vec<(PathBuf, OrganizeResult<PlannedMove>)>> {
        let destination_root = self.destination_root_for(dir);
        Ok(list_files(dir)?
            .into_iter()
            .map(|file| {
                let plan = self.plan_file(&file, &destination_root);
                (file, plan)
            })
            .collect())
    }

    /// The policy's destination root, or `dir` when none is configured.
    pub fn destination_root_for(&self, dir: &Path) -> PathBuf {
        self.settings
            .policy
            .destination_root
            .clone()
            .unwrap_or_else(|| dir.to_path_buf())
    }

    fn prepare(&self, source: &Path, destination_root: &Path) -> OrganizeResult<Prepared> {
        let not_found = || OrganizeError::NotFound {
            path: source.to_path_buf(),
        };
        let metadata = fs::metadata(source).map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        let file_name = source.file_name().ok_or_else(not_found)?;
        let name = file_name.to_string_lossy();
        let policy = &self.settings.policy;

        if policy.ignore_hidden && name.starts_with(HIDDEN_PREFIX) {
            return Err(OrganizeError::Skipped {
                path: source.to_path_buf(),
                reason: SkipReason::Hidden,
            });
        }
        if let Some(pattern) = policy.excluded_by(&name) {
            return Err(OrganizeError::Skipped {
                path: source.to_path_buf(),
                reason: SkipReason::Excluded {
                    pattern: pattern.as_str().to_string(),
                },
            });
        }

        let class = self.settings.rules.classify(file_name);
        tracing::debug!(file = %name, category = class.category, "classified");

        let mut target_dir = destination_root.to_path_buf();
        if policy.organize_by_date {
            let modified = metadata
                .modified()
                .map_err(|e| OrganizeError::move_failed(source, e))?;
            let folder = date_folder(modified.into(), &policy.date_format)
                .map_err(|e| OrganizeError::move_failed(source, e))?;
            target_dir.push(folder);
        }
        target_dir.push(class.folder);

        Ok(Prepared {
            file_name: file_name.to_os_string(),
            category: class.category.to_string(),
            target_dir,
        })
    }
}

/// Logs an outcome, wraps it in a report and hands it to `sink`.
fn report_outcome(
    source: &Path,
    outcome: OrganizeResult<Placement>,
    sink: Option<&dyn MessageSink>,
) -> OrganizeReport {
    match &outcome {
        Ok(placement) => tracing::info!(
            source = %source.display(),
            destination = %placement.destination.display(),
            "organized file"
        ),
        Err(e) if e.is_skip() => tracing::debug!(source = %source.display(), "{}", e),
        Err(e) => tracing::warn!(source = %source.display(), "{}", e),
    }
    let report = OrganizeReport {
        source: source.to_path_buf(),
        outcome,
    };
    emit(sink, SinkMessage::File(&report));
    report
}

/// Formats a modification time into the date folder name.
pub fn date_folder(modified: DateTime<Local>, format: &str) -> io::Result<String> {
    let mut folder = String::new();
    write!(folder, "{}", modified.format(format)).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid date format '{}'", format),
        )
    })?;
    Ok(folder)
}

/// First free name in `target_dir`: `name.ext`, then `name_1.ext`, `name_2.ext`, ...
///
/// The check is not atomic against a concurrent mover into the same folder.
pub fn resolve_conflict(target_dir: &Path, file_name: &OsStr) -> PathBuf {
    let candidate = target_dir.join(file_name);
    if !occupied(&candidate) {
        return candidate;
    }

    let original = Path::new(file_name);
    let stem = original.file_stem().unwrap_or(file_name);
    let extension = original.extension();

    let mut counter: u64 = 1;
    loop {
        let mut name = stem.to_os_string();
        name.push(format!("_{}", counter));
        if let Some(ext) = extension {
            name.push(".");
            name.push(ext);
        }
        let candidate = target_dir.join(name);
        if !occupied(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Dangling symlinks count as occupied.
fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Regular files directly inside `dir`, sorted by path.
fn list_files(dir: &Path) -> OrganizeResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(OrganizeError::NotFound {
            path: dir.to_path_buf(),
        });
    }
    let entries = fs::read_dir(dir).map_err(|source| OrganizeError::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| entry.path())
        .collect();
    files.sort();
    Ok(files)
}

/// Renames `source` to `destination`, copying across filesystems.
///
/// Returns `Ok(Some(err))` when the copy landed but the source could not be removed.
fn move_file(source: &Path, destination: &Path) -> io::Result<Option<io::Error>> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(source = %source.display(), "rename crosses devices, copying");
            copy_then_remove(source, destination)
        }
        Err(e) => Err(e),
    }
}

/// Copy, verify, then delete the source.
///
/// A failed copy removes the partial destination and leaves the source as it was.
pub(crate) fn copy_then_remove(
    source: &Path,
    destination: &Path,
) -> io::Result<Option<io::Error>> {
    copy_then_remove_with(source, destination, |path| fs::remove_file(path))
}

/// `copy_then_remove` with the source removal supplied by the caller.
fn copy_then_remove_with<R>(
    source: &Path,
    destination: &Path,
    remove: R,
) -> io::Result<Option<io::Error>>
where
    R: FnOnce(&Path) -> io::Result<()>,
{
    let expected = fs::metadata(source)?;
    let mut reader = File::open(source)?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;

    if let Err(e) = fill_destination(&mut reader, &mut writer, destination, &expected) {
        drop(writer);
        let _ = fs::remove_file(destination);
        return Err(e);
    }
    drop(writer);

    Ok(remove(source).err())
}

fn fill_destination(
    reader: &mut File,
    writer: &mut File,
    destination: &Path,
    expected: &fs::Metadata,
) -> io::Result<()> {
    io::copy(reader, writer)?;
    writer.sync_all()?;

    let written = fs::metadata(destination)?.len();
    if written != expected.len() {
        return Err(io::Error::other(format!(
            "copy verification failed: wrote {} of {} bytes",
            written,
            expected.len()
        )));
    }

    fs::set_permissions(destination, expected.permissions())?;
    filetime::set_file_mtime(destination, FileTime::from_last_modification_time(expected))?;
    Ok(())
}
