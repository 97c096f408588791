//! Import session state
//!
//! This module provides:
//! 1. The per-file record and its monotonic status machine
//! 2. The session aggregate that owns the files and the rollback journal
//! 3. The immutable summary produced when a session is completed

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{error, warn};
use uuid::Uuid;

use super::duplicate_index::{DuplicateIndex, DuplicateMatch};
use super::error::ImportFileError;
use super::hash_engine::Fingerprint;
use super::rollback_journal::RollbackJournal;

/// How accepted files are managed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagementMode {
    /// Copy into a categorized tree under the library root
    #[default]
    Organized,
    /// Track the file at its original location
    LeaveInPlace,
}

impl ManagementMode {
    /// Parse mode from config string
    pub fn from_config_string(s: &str) -> Self {
        match s.to_lowercase().replace('-', "_").as_str() {
            "organized" | "organize" | "copy" => ManagementMode::Organized,
            "leave_in_place" | "in_place" | "leave" => ManagementMode::LeaveInPlace,
            other => {
                warn!("Unknown management mode '{}', using default", other);
                ManagementMode::default()
            }
        }
    }
}

impl fmt::Display for ManagementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagementMode::Organized => write!(f, "organized"),
            ManagementMode::LeaveInPlace => write!(f, "leave_in_place"),
        }
    }
}

/// What to do with a file whose content is already known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Leave the file out of the import
    #[default]
    Skip,
    /// Import it anyway and record which record it duplicates
    Overwrite,
    /// Ask the configured resolver
    Prompt,
}

impl DuplicatePolicy {
    /// Parse policy from config string
    pub fn from_config_string(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "skip" => DuplicatePolicy::Skip,
            "overwrite" | "replace" => DuplicatePolicy::Overwrite,
            "prompt" | "ask" => DuplicatePolicy::Prompt,
            other => {
                warn!("Unknown duplicate policy '{}', using default", other);
                DuplicatePolicy::default()
            }
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicatePolicy::Skip => write!(f, "skip"),
            DuplicatePolicy::Overwrite => write!(f, "overwrite"),
            DuplicatePolicy::Prompt => write!(f, "prompt"),
        }
    }
}

/// Per-file status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Hashing,
    Placing,
    Completed,
    Failed,
    SkippedDuplicate,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed | FileStatus::SkippedDuplicate
        )
    }

    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        use FileStatus::*;
        matches!(
            (*self, next),
            (Pending, Hashing)
                | (Pending, Failed)
                | (Hashing, Placing)
                | (Hashing, Failed)
                | (Hashing, SkippedDuplicate)
                | (Placing, Completed)
                | (Placing, Failed)
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Hashing => write!(f, "hashing"),
            FileStatus::Placing => write!(f, "placing"),
            FileStatus::Completed => write!(f, "completed"),
            FileStatus::Failed => write!(f, "failed"),
            FileStatus::SkippedDuplicate => write!(f, "skipped_duplicate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl SessionStatus {
    /// Whether files may still be processed
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration_millis(*duration))
}

/// One file in an import session
#[derive(Debug, Clone, Serialize)]
pub struct ImportFileInfo {
    original_path: PathBuf,
    byte_len: u64,
    fingerprint: Option<Fingerprint>,
    destination: Option<PathBuf>,
    status: FileStatus,
    #[serde(serialize_with = "serialize_display")]
    error: Option<ImportFileError>,
    duplicate_of: Option<DuplicateMatch>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    progress_percent: u8,
}

impl ImportFileInfo {
    pub(crate) fn new(original_path: PathBuf, byte_len: u64) -> Self {
        Self {
            original_path,
            byte_len,
            fingerprint: None,
            destination: None,
            status: FileStatus::Pending,
            error: None,
            duplicate_of: None,
            started_at: None,
            finished_at: None,
            progress_percent: 0,
        }
    }

    pub fn original_path(&self) -> &Path {
        &self.original_path
    }

    /// Size seen at session start, updated to the hashed length once hashed
    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn error(&self) -> Option<&ImportFileError> {
        self.error.as_ref()
    }

    /// Set when the file matched known content and was imported anyway
    pub fn duplicate_of(&self) -> Option<&DuplicateMatch> {
        self.duplicate_of.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn is_canceled(&self) -> bool {
        self.error.as_ref().is_some_and(ImportFileError::is_canceled)
    }

    /// Move to `next`, returning false (and changing nothing) if the move is not allowed
    pub(crate) fn transition(&mut self, next: FileStatus) -> bool {
        if !self.status.can_transition_to(next) {
            error!(
                file = %self.original_path.display(),
                from = %self.status,
                to = %next,
                "Rejected file status transition"
            );
            return false;
        }

        let now = Utc::now();
        if self.status == FileStatus::Pending {
            self.started_at = Some(now);
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
            if next != FileStatus::Failed {
                self.progress_percent = 100;
            }
        }
        true
    }

    pub(crate) fn fail(&mut self, error: ImportFileError) -> bool {
        if self.transition(FileStatus::Failed) {
            self.error = Some(error);
            true
        } else {
            false
        }
    }

    pub(crate) fn set_hashed(&mut self, fingerprint: Fingerprint, byte_len: u64) {
        self.fingerprint = Some(fingerprint);
        self.byte_len = byte_len;
    }

    pub(crate) fn set_destination(&mut self, destination: PathBuf) {
        self.destination = Some(destination);
    }

    pub(crate) fn set_duplicate_of(&mut self, duplicate: DuplicateMatch) {
        self.duplicate_of = Some(duplicate);
    }

    pub(crate) fn set_progress(&mut self, percent: u8) {
        self.progress_percent = percent.min(100);
    }
}

/// In-memory aggregate for one batch of files
#[derive(Serialize)]
pub struct ImportSession {
    id: Uuid,
    mode: ManagementMode,
    root_directory: Option<PathBuf>,
    duplicate_policy: DuplicatePolicy,
    files: Vec<ImportFileInfo>,
    journal: RollbackJournal,
    status: SessionStatus,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    index: Arc<dyn DuplicateIndex>,
    /// Fingerprints accepted earlier in this session
    #[serde(skip)]
    seen: HashMap<Fingerprint, (usize, PathBuf)>,
}

impl fmt::Debug for ImportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("root_directory", &self.root_directory)
            .field("duplicate_policy", &self.duplicate_policy)
            .field("status", &self.status)
            .field("files", &self.files.len())
            .field("journal", &self.journal.len())
            .finish()
    }
}

impl ImportSession {
    pub(crate) fn new(
        files: Vec<ImportFileInfo>,
        mode: ManagementMode,
        root_directory: Option<PathBuf>,
        duplicate_policy: DuplicatePolicy,
        index: Arc<dyn DuplicateIndex>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            root_directory,
            duplicate_policy,
            files,
            journal: RollbackJournal::new(),
            status: SessionStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            index,
            seen: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ManagementMode {
        self.mode
    }

    pub fn root_directory(&self) -> Option<&Path> {
        self.root_directory.as_deref()
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    /// Files in the order they were supplied
    pub fn files(&self) -> &[ImportFileInfo] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Option<&ImportFileInfo> {
        self.files.get(index)
    }

    pub fn total_files(&self) -> usize {
        self.files.len()
    }

    pub fn journal(&self) -> &RollbackJournal {
        &self.journal
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub(crate) fn file_mut(&mut self, index: usize) -> Option<&mut ImportFileInfo> {
        self.files.get_mut(index)
    }

    pub(crate) fn journal_mut(&mut self) -> &mut RollbackJournal {
        &mut self.journal
    }

    pub(crate) fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub(crate) fn mark_finished(&mut self, status: SessionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Catalog snapshot first, then files accepted earlier in this session
    pub(crate) fn lookup_duplicate(&self, fingerprint: &Fingerprint) -> Option<DuplicateMatch> {
        if let Some(record) = self.index.lookup(fingerprint) {
            return Some(DuplicateMatch::Catalog(record));
        }
        self.seen.get(fingerprint).map(|(index, path)| DuplicateMatch::Session {
            index: *index,
            path: path.clone(),
        })
    }

    pub(crate) fn remember_fingerprint(&mut self, fingerprint: Fingerprint, index: usize, path: PathBuf) {
        self.seen.entry(fingerprint).or_insert((index, path));
    }
}

/// Summary of a finished session
#[derive(Debug, Serialize)]
pub struct ImportResult {
    success: bool,
    total: usize,
    processed: usize,
    failed: usize,
    skipped: usize,
    canceled: usize,
    bytes_processed: u64,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    duration: Duration,
    error: Option<String>,
    session: ImportSession,
}

impl ImportResult {
    /// Tally the final file states. `success` is forced to false when any file failed.
    pub(crate) fn summarize(session: ImportSession, success: bool, error: Option<String>) -> Self {
        let mut processed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut canceled = 0;
        let mut bytes_processed = 0;

        for file in session.files() {
            match file.status() {
                FileStatus::Completed => {
                    processed += 1;
                    bytes_processed += file.byte_len();
                }
                FileStatus::Failed => {
                    failed += 1;
                    if file.is_canceled() {
                        canceled += 1;
                    }
                }
                FileStatus::SkippedDuplicate => skipped += 1,
                _ => {}
            }
        }

        let finished = session.finished_at().unwrap_or_else(Utc::now);
        let duration = (finished - session.started_at()).to_std().unwrap_or(Duration::ZERO);

        Self {
            success: success && failed == 0,
            total: session.total_files(),
            processed,
            failed,
            skipped,
            canceled,
            bytes_processed,
            duration,
            error,
            session,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Failed files whose reason is cancellation
    pub fn canceled(&self) -> usize {
        self.canceled
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn session(&self) -> &ImportSession {
        &self.session
    }

    /// Take the session back, e.g. to roll it back
    pub fn into_session(self) -> ImportSession {
        self.session
    }
}
