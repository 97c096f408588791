//! Import pipeline orchestration
//!
//! This module provides:
//! 1. Up-front validation of source files and the library root
//! 2. The per-file pipeline: hash, duplicate check, placement
//! 3. A sequential session driver with cooperative cancellation
//! 4. Session completion and journal-driven rollback

use std::cell::Cell;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::cancellation::CancellationToken;
use super::directory_organizer::{ExtensionClassifier, FileClassifier, destination_candidates, sanitize_filename};
use super::duplicate_index::{DuplicateIndex, DuplicateMatch};
use super::error::{
    ImportFileError, IoFailure, PlacementError, ProcessError, RollbackError, ValidationError,
};
use super::hash_engine::{Fingerprint, HashEngine, ProgressGate};
use super::progress::{self, HashProgress, ImportProgress, ImportStage, ProgressUpdate};
use super::rollback_journal::{RollbackJournal, RollbackReport};
use super::session::{
    DuplicatePolicy, FileStatus, ImportFileInfo, ImportResult, ImportSession, ManagementMode, SessionStatus,
    duration_millis,
};
use crate::logger::{LogEntryType, OperationStatus};

const PROBE_PREFIX: &str = ".model-importer-probe-";

/// Answer from a `DuplicateResolver`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateDecision {
    Skip,
    Import,
}

/// Decides duplicates when the session policy is `Prompt`
pub trait DuplicateResolver: Send + Sync {
    fn resolve(&self, file: &ImportFileInfo, duplicate: &DuplicateMatch) -> DuplicateDecision;
}

/// Tunables shared by every session a `FileManager` starts
#[derive(Clone)]
pub struct FileManagerConfig {
    pub hash_engine: HashEngine,
    pub classifier: Arc<dyn FileClassifier>,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            hash_engine: HashEngine::default(),
            classifier: Arc::new(ExtensionClassifier::default()),
        }
    }
}

impl fmt::Debug for FileManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileManagerConfig")
            .field("hash_engine", &self.hash_engine)
            .finish_non_exhaustive()
    }
}

/// Per-session choices made by the caller
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub mode: ManagementMode,
    pub root_directory: Option<PathBuf>,
    pub duplicate_policy: DuplicatePolicy,
}

impl SessionOptions {
    pub fn organized(root: impl Into<PathBuf>) -> Self {
        Self {
            mode: ManagementMode::Organized,
            root_directory: Some(root.into()),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    pub fn leave_in_place() -> Self {
        Self {
            mode: ManagementMode::LeaveInPlace,
            root_directory: None,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}

/// Why a chunked copy stopped early
enum CopyError {
    Canceled,
    Read(io::Error),
    Write(io::Error),
}

/// Maps byte progress of one stage into a slice of the file's 0-100 range
struct FileProgress<'a> {
    sink: &'a dyn ImportProgress,
    stage: ImportStage,
    index: usize,
    total_files: usize,
    range: (u8, u8),
    label: &'a str,
    last_percent: Cell<u8>,
}

impl<'a> FileProgress<'a> {
    fn new(
        sink: &'a dyn ImportProgress,
        stage: ImportStage,
        index: usize,
        total_files: usize,
        range: (u8, u8),
        label: &'a str,
    ) -> Self {
        Self {
            sink,
            stage,
            index,
            total_files,
            range,
            label,
            last_percent: Cell::new(range.0),
        }
    }

    fn report(&self, processed: u64, total: Option<u64>) {
        let (start, end) = self.range;
        let stage_percent = u16::from(progress::percent_of(processed, total.unwrap_or(processed)));
        let span = u16::from(end.saturating_sub(start));
        let percent = start.saturating_add((span * stage_percent / 100) as u8).min(100);
        self.last_percent.set(percent);

        emit(
            self.sink,
            self.stage,
            self.index,
            self.total_files,
            percent,
            format!("{} {}", self.stage, self.label),
        );
    }
}

impl HashProgress for FileProgress<'_> {
    fn on_bytes_hashed(&self, processed: u64, total: Option<u64>) {
        self.report(processed, total);
    }
}

fn emit(
    sink: &dyn ImportProgress,
    stage: ImportStage,
    current_index: usize,
    total_files: usize,
    file_percent: u8,
    message: String,
) {
    let update = ProgressUpdate {
        stage,
        current_index,
        total_files,
        file_percent,
        message,
    };
    progress::guarded("import_progress", || sink.on_progress(&update));
}

/// Drives import sessions through hashing, duplicate detection and placement
pub struct FileManager {
    config: FileManagerConfig,
    resolver: Option<Arc<dyn DuplicateResolver>>,
}

impl FileManager {
    pub fn new(config: FileManagerConfig) -> Self {
        Self {
            config,
            resolver: None,
        }
    }

    /// Resolver consulted for the `Prompt` duplicate policy
    pub fn with_resolver(mut self, resolver: Arc<dyn DuplicateResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &FileManagerConfig {
        &self.config
    }

    /// Validate the inputs and create a pending session.
    ///
    /// Nothing is written on failure. In organized mode the root (or its nearest
    /// existing ancestor when the root does not exist yet) is probed for write
    /// access exactly once here, never per file.
    pub fn start_session(
        &self,
        paths: Vec<PathBuf>,
        options: SessionOptions,
        index: Arc<dyn DuplicateIndex>,
    ) -> Result<ImportSession, ValidationError> {
        if paths.is_empty() {
            return Err(ValidationError::EmptyFileList);
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let byte_len = validate_source(&path)?;
            files.push(ImportFileInfo::new(path, byte_len));
        }

        let root = match options.mode {
            ManagementMode::Organized => {
                let root = options
                    .root_directory
                    .filter(|r| !r.as_os_str().is_empty())
                    .ok_or(ValidationError::MissingRootDirectory)?;
                validate_root(&root)?;
                Some(root)
            }
            ManagementMode::LeaveInPlace => options.root_directory,
        };

        let session = ImportSession::new(files, options.mode, root, options.duplicate_policy, index);
        info!(
            entry_type = %LogEntryType::Session,
            session_id = %session.id(),
            status = %OperationStatus::Started,
            mode = %session.mode(),
            duplicate_policy = %session.duplicate_policy(),
            files = session.total_files(),
            "Import session created"
        );
        Ok(session)
    }

    /// Run one pending file through the pipeline.
    ///
    /// Per-file failures, duplicates and cancellation are recorded on the file
    /// and reported through the returned status. `Err` is reserved for misuse:
    /// a closed session, a bad index, or a file that already left `Pending`.
    #[instrument(skip_all, fields(session_id = %session.id(), index = index))]
    pub fn process_file(
        &self,
        session: &mut ImportSession,
        index: usize,
        progress: &dyn ImportProgress,
        cancel: &CancellationToken,
    ) -> Result<FileStatus, ProcessError> {
        if !session.status().is_open() {
            return Err(ProcessError::SessionClosed {
                session_id: session.id(),
                status: session.status(),
            });
        }
        let total_files = session.total_files();
        let Some(file) = session.file(index) else {
            return Err(ProcessError::IndexOutOfRange {
                index,
                total: total_files,
            });
        };
        if file.status() != FileStatus::Pending {
            return Err(ProcessError::AlreadyProcessed {
                index,
                status: file.status(),
            });
        }

        let source = file.original_path().to_path_buf();
        let label = source.display().to_string();
        session.set_status(SessionStatus::Running);

        if cancel.is_canceled() {
            return Ok(self.finish_failed(session, index, ImportFileError::Canceled));
        }

        // Hashing
        update_file(session, index, |file| {
            file.transition(FileStatus::Hashing);
        });
        emit(progress, ImportStage::Hashing, index, total_files, 0, format!("hashing {label}"));

        let hash_range = match session.mode() {
            ManagementMode::Organized => (0, 50),
            ManagementMode::LeaveInPlace => (0, 100),
        };
        let hash_progress = FileProgress::new(progress, ImportStage::Hashing, index, total_files, hash_range, &label);
        let hashed = self.config.hash_engine.hash_file(&source, cancel, &hash_progress);
        update_file(session, index, |file| file.set_progress(hash_progress.last_percent.get()));

        let fingerprint = match (hashed.fingerprint, hashed.failure) {
            (Some(fingerprint), None) => fingerprint,
            (_, failure) => {
                let failure = failure.map(ImportFileError::from).unwrap_or(ImportFileError::NotProcessed);
                return Ok(self.finish_failed(session, index, failure));
            }
        };
        update_file(session, index, |file| file.set_hashed(fingerprint.clone(), hashed.byte_len));
        debug!(
            entry_type = %LogEntryType::Hash,
            status = %OperationStatus::Completed,
            file = %label,
            fingerprint = %fingerprint,
            bytes = hashed.byte_len,
            "File hashed"
        );

        // Duplicate check
        emit(
            progress,
            ImportStage::CheckingDuplicates,
            index,
            total_files,
            hash_range.1,
            format!("checking duplicates for {label}"),
        );
        if let Some(duplicate) = session.lookup_duplicate(&fingerprint) {
            if !self.accept_duplicate(session, index, &duplicate) {
                update_file(session, index, |file| {
                    file.transition(FileStatus::SkippedDuplicate);
                });
                info!(
                    entry_type = %LogEntryType::Duplicate,
                    status = %OperationStatus::Skipped,
                    file = %label,
                    duplicate_of = %duplicate.path().display(),
                    "Skipped duplicate file"
                );
                emit(progress, ImportStage::Finished, index, total_files, 100, format!("skipped duplicate {label}"));
                return Ok(FileStatus::SkippedDuplicate);
            }
            info!(
                entry_type = %LogEntryType::Duplicate,
                status = %OperationStatus::Completed,
                file = %label,
                duplicate_of = %duplicate.path().display(),
                "Importing duplicate file"
            );
            update_file(session, index, |file| file.set_duplicate_of(duplicate));
        }

        // Placement
        update_file(session, index, |file| {
            file.transition(FileStatus::Placing);
        });
        emit(progress, ImportStage::Placing, index, total_files, hash_range.1, format!("placing {label}"));

        let placed = match session.mode() {
            ManagementMode::LeaveInPlace => Ok(source.clone()),
            ManagementMode::Organized => {
                let copy_progress =
                    FileProgress::new(progress, ImportStage::Placing, index, total_files, (50, 100), &label);
                match session.root_directory().map(Path::to_path_buf) {
                    Some(root) => self.place_organized(
                        session.journal_mut(),
                        &root,
                        &source,
                        &fingerprint,
                        cancel,
                        &copy_progress,
                    ),
                    None => Err(PlacementError::NoRootDirectory.into()),
                }
            }
        };

        let destination = match placed {
            Ok(destination) => destination,
            Err(failure) => return Ok(self.finish_failed(session, index, failure)),
        };

        session.remember_fingerprint(fingerprint, index, destination.clone());
        update_file(session, index, |file| {
            file.set_destination(destination.clone());
            file.transition(FileStatus::Completed);
        });

        info!(
            entry_type = %LogEntryType::Placement,
            status = %OperationStatus::Completed,
            file = %label,
            destination = %destination.display(),
            "File imported"
        );
        emit(progress, ImportStage::Finished, index, total_files, 100, format!("imported {label}"));
        Ok(FileStatus::Completed)
    }

    /// Process every pending file in order, then complete the session.
    ///
    /// Cancellation is checked between files. Once observed, the remaining
    /// pending files are marked canceled without being touched. A request that
    /// arrives after the last file finished changes nothing: every file already
    /// reached its final state, so the result is judged on those states alone.
    #[instrument(skip_all, fields(session_id = %session.id()))]
    pub fn run_session(
        &self,
        mut session: ImportSession,
        progress: &dyn ImportProgress,
        cancel: &CancellationToken,
    ) -> ImportResult {
        let total_files = session.total_files();
        emit(progress, ImportStage::Validating, 0, total_files, 0, "starting import".to_string());

        let mut halted = false;
        let mut canceled = false;
        for index in 0..total_files {
            if cancel.is_canceled() {
                info!(
                    entry_type = %LogEntryType::Session,
                    status = %OperationStatus::Canceled,
                    completed_files = index,
                    "Cancellation observed between files"
                );
                halted = true;
                canceled = true;
                break;
            }
            if session.file(index).map(ImportFileInfo::status) != Some(FileStatus::Pending) {
                continue;
            }
            if let Err(e) = self.process_file(&mut session, index, progress, cancel) {
                error!(error = %e, "Stopping session");
                halted = true;
                break;
            }
        }

        if canceled {
            for index in 0..total_files {
                if session.file(index).map(ImportFileInfo::status) == Some(FileStatus::Pending) {
                    update_file(&mut session, index, |file| {
                        file.fail(ImportFileError::Canceled);
                    });
                }
            }
        }

        self.complete_session(session, !halted)
    }

    /// Finalize the session and tally the result.
    ///
    /// Files that never reached a terminal state are marked failed. A session
    /// that was already rolled back keeps that status.
    pub fn complete_session(&self, mut session: ImportSession, success: bool) -> ImportResult {
        for index in 0..session.total_files() {
            let unfinished = session.file(index).is_some_and(|f| !f.status().is_terminal());
            if unfinished {
                update_file(&mut session, index, |file| {
                    file.fail(ImportFileError::NotProcessed);
                });
            }
        }

        let failed = session.files().iter().filter(|f| f.status() == FileStatus::Failed).count();
        let canceled = session.files().iter().filter(|f| f.is_canceled()).count();
        let success = success && failed == 0;

        let error = if canceled > 0 {
            Some(format!("Import canceled, {} of {} files not imported", canceled, session.total_files()))
        } else if failed > 0 {
            Some(format!("{} of {} files failed to import", failed, session.total_files()))
        } else if !success {
            Some("Import was not completed successfully".to_string())
        } else {
            None
        };

        let status = if session.status() == SessionStatus::RolledBack {
            SessionStatus::RolledBack
        } else if success {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        session.mark_finished(status);

        let result = ImportResult::summarize(session, success, error);
        let outcome = if result.success() {
            OperationStatus::Completed
        } else {
            OperationStatus::Failed
        };
        info!(
            entry_type = %LogEntryType::Session,
            session_id = %result.session().id(),
            status = %outcome,
            total = result.total(),
            processed = result.processed(),
            failed = result.failed(),
            skipped = result.skipped(),
            canceled = result.canceled(),
            bytes = result.bytes_processed(),
            duration_ms = duration_millis(result.duration()),
            "Import session finished"
        );
        result
    }

    /// Reverse every filesystem change the session made, newest first.
    ///
    /// Reversal continues past failures; the error lists the entries left
    /// behind. A second call finds an empty journal and does nothing.
    #[instrument(skip_all, fields(session_id = %session.id()))]
    pub fn rollback_session(&self, session: &mut ImportSession) -> Result<RollbackReport, RollbackError> {
        let pending = session.journal().len();
        let (report, failures) = session.journal_mut().unwind();
        session.mark_finished(SessionStatus::RolledBack);

        if failures.is_empty() {
            info!(
                entry_type = %LogEntryType::Rollback,
                status = %OperationStatus::Completed,
                entries = pending,
                files_removed = report.files_removed,
                directories_removed = report.directories_removed,
                "Session rolled back"
            );
            Ok(report)
        } else {
            warn!(
                entry_type = %LogEntryType::Rollback,
                status = %OperationStatus::Failed,
                entries = pending,
                failures = failures.len(),
                "Session rollback left entries behind"
            );
            Err(RollbackError { report, failures })
        }
    }

    fn finish_failed(&self, session: &mut ImportSession, index: usize, failure: ImportFileError) -> FileStatus {
        let path = session
            .file(index)
            .map(|f| f.original_path().display().to_string())
            .unwrap_or_default();
        if failure.is_canceled() {
            info!(
                entry_type = %LogEntryType::Session,
                status = %OperationStatus::Canceled,
                file = %path,
                "File canceled"
            );
        } else {
            warn!(
                entry_type = %LogEntryType::Placement,
                status = %OperationStatus::Failed,
                file = %path,
                error = %failure,
                "File failed"
            );
        }
        update_file(session, index, |file| {
            file.fail(failure);
        });
        FileStatus::Failed
    }

    fn accept_duplicate(&self, session: &ImportSession, index: usize, duplicate: &DuplicateMatch) -> bool {
        match session.duplicate_policy() {
            DuplicatePolicy::Skip => false,
            DuplicatePolicy::Overwrite => true,
            DuplicatePolicy::Prompt => {
                let (Some(resolver), Some(file)) = (&self.resolver, session.file(index)) else {
                    debug!("No duplicate resolver configured, skipping");
                    return false;
                };
                resolver.resolve(file, duplicate) == DuplicateDecision::Import
            }
        }
    }

    /// Copy `source` into its category folder under `root`
    fn place_organized(
        &self,
        journal: &mut RollbackJournal,
        root: &Path,
        source: &Path,
        fingerprint: &Fingerprint,
        cancel: &CancellationToken,
        progress: &FileProgress<'_>,
    ) -> Result<PathBuf, ImportFileError> {
        let category = self.config.classifier.category_for(source);
        let directory = root.join(&category);
        ensure_directory(journal, &directory)?;

        let file_name = source
            .file_name()
            .map(|n| sanitize_filename(&n.to_string_lossy()))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PlacementError::InvalidSourceName(source.to_path_buf()))?;

        let (destination, target) = open_destination(&directory, &file_name, fingerprint)?;
        journal.record_copy(&destination, source);

        let copy_failure = |failure: io::Error| PlacementError::Copy {
            from: source.to_path_buf(),
            to: destination.clone(),
            failure: IoFailure::from(failure),
        };

        let reader = File::open(source).map_err(&copy_failure)?;
        let total_len = reader.metadata().ok().map(|m| m.len());
        let chunk_size = self.config.hash_engine.chunk_policy().chunk_size_for(total_len);
        let step = self.config.hash_engine.progress_step_percent();

        match copy_chunked(reader, &target, chunk_size, total_len, step, cancel, progress) {
            Ok(bytes) => debug!(
                entry_type = %LogEntryType::Placement,
                from = %source.display(),
                to = %destination.display(),
                bytes,
                "Copied file"
            ),
            Err(CopyError::Canceled) => return Err(ImportFileError::Canceled),
            Err(CopyError::Read(e)) | Err(CopyError::Write(e)) => return Err(copy_failure(e).into()),
        }
        target.sync_all().map_err(&copy_failure)?;

        Ok(destination)
    }
}

fn update_file(session: &mut ImportSession, index: usize, update: impl FnOnce(&mut ImportFileInfo)) {
    if let Some(file) = session.file_mut(index) {
        update(file);
    }
}

fn validate_source(path: &Path) -> Result<u64, ValidationError> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ValidationError::SourceNotFound(path.to_path_buf()),
        _ => ValidationError::SourceUnreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    if !metadata.is_file() {
        return Err(ValidationError::SourceNotAFile(path.to_path_buf()));
    }
    File::open(path).map_err(|e| ValidationError::SourceUnreadable {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(metadata.len())
}

fn validate_root(root: &Path) -> Result<(), ValidationError> {
    let probe_dir = match fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => root.to_path_buf(),
        Ok(_) => return Err(ValidationError::RootNotADirectory(root.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let ancestor = nearest_existing_ancestor(root)
                .filter(|a| a.is_dir())
                .ok_or_else(|| ValidationError::RootNotCreatable(root.to_path_buf()))?;
            debug!(root = %root.display(), ancestor = %ancestor.display(), "Root will be created on first placement");
            ancestor
        }
        Err(e) => {
            return Err(ValidationError::RootNotWritable {
                path: root.to_path_buf(),
                source: e,
            });
        }
    };

    probe_writable(&probe_dir).map_err(|e| ValidationError::RootNotWritable {
        path: probe_dir.clone(),
        source: e,
    })
}

fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors().skip(1).find_map(|ancestor| {
        let ancestor = if ancestor.as_os_str().is_empty() {
            Path::new(".")
        } else {
            ancestor
        };
        ancestor.try_exists().ok().filter(|exists| *exists).map(|_| ancestor.to_path_buf())
    })
}

fn probe_writable(directory: &Path) -> io::Result<()> {
    let probe = directory.join(format!("{PROBE_PREFIX}{}", Uuid::new_v4()));
    OpenOptions::new().write(true).create_new(true).open(&probe)?;
    fs::remove_file(&probe)
}

/// Create every missing level of `directory`, journaling each one
fn ensure_directory(journal: &mut RollbackJournal, directory: &Path) -> Result<(), PlacementError> {
    let mut missing = Vec::new();
    let mut current = Some(directory);

    while let Some(path) = current {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => break,
            Ok(_) => {
                return Err(PlacementError::CreateDirectory {
                    path: path.to_path_buf(),
                    failure: IoFailure::new(
                        io::ErrorKind::NotADirectory,
                        format!("{} exists and is not a directory", path.display()),
                    ),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                missing.push(path);
                current = path.parent().filter(|p| !p.as_os_str().is_empty());
            }
            Err(e) => {
                return Err(PlacementError::CreateDirectory {
                    path: path.to_path_buf(),
                    failure: IoFailure::from(e),
                });
            }
        }
    }

    for path in missing.into_iter().rev() {
        match fs::create_dir(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Created directory");
                journal.record_directory(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {}
            Err(e) => {
                return Err(PlacementError::CreateDirectory {
                    path: path.to_path_buf(),
                    failure: IoFailure::from(e),
                });
            }
        }
    }

    Ok(())
}

/// Create the first free candidate name. Existing files are never opened for writing.
fn open_destination(
    directory: &Path,
    file_name: &str,
    fingerprint: &Fingerprint,
) -> Result<(PathBuf, File), PlacementError> {
    for candidate in destination_candidates(directory, file_name, fingerprint) {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(candidate = %candidate.display(), "Destination name taken");
            }
            Err(e) => {
                return Err(PlacementError::Copy {
                    from: PathBuf::from(file_name),
                    to: candidate,
                    failure: IoFailure::from(e),
                });
            }
        }
    }

    Err(PlacementError::NoFreeName {
        file_name: file_name.to_string(),
        directory: directory.to_path_buf(),
    })
}

/// Copy with one chunk-sized buffer, checking cancellation before every read
fn copy_chunked<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    chunk_size: usize,
    total_len: Option<u64>,
    progress_step: u8,
    cancel: &CancellationToken,
    progress: &dyn HashProgress,
) -> Result<u64, CopyError> {
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut gate = ProgressGate::new(progress_step);
    let mut copied = 0u64;

    loop {
        if cancel.is_canceled() {
            return Err(CopyError::Canceled);
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buffer[..read]).map_err(CopyError::Write)?;
        copied += read as u64;

        if gate.on_chunk(copied, total_len) {
            progress.on_bytes_hashed(copied, total_len);
        }
    }
    writer.flush().map_err(CopyError::Write)?;

    if !gate.completed() {
        progress.on_bytes_hashed(copied, Some(total_len.unwrap_or(copied)));
    }
    Ok(copied)
}
