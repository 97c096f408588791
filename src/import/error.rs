//! Error taxonomy for the import pipeline
//!
//! Validation errors abort `start_session` before any side effect. Hash and
//! placement errors are recorded per file and never stop sibling files.
//! Rollback errors are collected while the rest of the journal is reversed.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use super::rollback_journal::{JournalEntry, RollbackReport};
use super::session::{FileStatus, SessionStatus};

/// Clonable snapshot of an `io::Error`, kept on per-file records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoFailure {
    pub kind: io::ErrorKind,
    pub message: String,
}

impl IoFailure {
    pub fn new(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&io::Error> for IoFailure {
    fn from(err: &io::Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<io::Error> for IoFailure {
    fn from(err: io::Error) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}

/// Errors raised by `start_session` before a session exists
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("No files were supplied for import")]
    EmptyFileList,

    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Source is not a regular file: {}", .0.display())]
    SourceNotAFile(PathBuf),

    #[error("Source file is not readable: {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Organized mode requires a root directory")]
    MissingRootDirectory,

    #[error("Root path exists but is not a directory: {}", .0.display())]
    RootNotADirectory(PathBuf),

    #[error("Root directory cannot be created, no existing parent directory: {}", .0.display())]
    RootNotCreatable(PathBuf),

    #[error("Root directory is not writable: {}: {source}", .path.display())]
    RootNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a fingerprint could not be produced
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("hashing canceled")]
    Canceled,

    #[error("source not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("I/O error: {0}")]
    Io(IoFailure),
}

impl HashError {
    pub(crate) fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => HashError::NotFound,
            io::ErrorKind::PermissionDenied => HashError::PermissionDenied,
            _ => HashError::Io(IoFailure::from(err)),
        }
    }
}

/// I/O failure while creating directories or copying into the organized tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("Failed to create directory {}: {failure}", .path.display())]
    CreateDirectory { path: PathBuf, failure: IoFailure },

    #[error("Failed to copy {} to {}: {failure}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        failure: IoFailure,
    },

    #[error("No free destination name for {file_name} in {}", .directory.display())]
    NoFreeName { file_name: String, directory: PathBuf },

    #[error("Source path has no usable file name: {}", .0.display())]
    InvalidSourceName(PathBuf),

    #[error("Session has no root directory to place files under")]
    NoRootDirectory,
}

/// Terminal failure reason stored on a failed `ImportFileInfo`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportFileError {
    #[error("canceled")]
    Canceled,

    #[error("Hashing failed: {0}")]
    Hash(HashError),

    #[error("Placement failed: {0}")]
    Placement(PlacementError),

    #[error("Session completed before this file was processed")]
    NotProcessed,
}

impl ImportFileError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ImportFileError::Canceled)
    }
}

impl From<HashError> for ImportFileError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::Canceled => ImportFileError::Canceled,
            other => ImportFileError::Hash(other),
        }
    }
}

impl From<PlacementError> for ImportFileError {
    fn from(err: PlacementError) -> Self {
        ImportFileError::Placement(err)
    }
}

/// Programming-invariant violations from `process_file`.
///
/// Per-file I/O failures never surface here; they are recorded on the file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Session {session_id} is {status} and cannot process files")]
    SessionClosed {
        session_id: Uuid,
        status: SessionStatus,
    },

    #[error("File index {index} is out of range for a session of {total} files")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("File {index} was already processed (status: {status})")]
    AlreadyProcessed { index: usize, status: FileStatus },
}

/// A single journal entry that could not be reversed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    pub entry: JournalEntry,
    pub failure: IoFailure,
}

impl fmt::Display for RollbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entry, self.failure)
    }
}

/// Rollback finished, but some entries need manual cleanup
#[derive(Error, Debug, Clone)]
#[error("{} journal entries could not be reversed", .failures.len())]
pub struct RollbackError {
    /// What was reversed successfully
    pub report: RollbackReport,
    /// Entries left behind, in the order they were attempted
    pub failures: Vec<RollbackFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_error_from_io_kinds() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(HashError::from_io(&not_found), HashError::NotFound);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(HashError::from_io(&denied), HashError::PermissionDenied);

        let other = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        match HashError::from_io(&other) {
            HashError::Io(failure) => {
                assert_eq!(failure.kind, io::ErrorKind::UnexpectedEof);
                assert!(failure.message.contains("short read"));
            }
            e => panic!("unexpected variant: {:?}", e),
        }
    }

    #[test]
    fn test_canceled_hash_maps_to_canceled_file_error() {
        let err: ImportFileError = HashError::Canceled.into();
        assert!(err.is_canceled());

        let err: ImportFileError = HashError::NotFound.into();
        assert_eq!(err, ImportFileError::Hash(HashError::NotFound));
    }
}
