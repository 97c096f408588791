//! Import pipeline
//! Hashing, duplicate detection, placement and rollback for one import session at a time

pub mod cancellation;
pub mod directory_organizer;
pub mod duplicate_index;
pub mod error;
pub mod file_manager;
pub mod hash_engine;
pub mod progress;
pub mod rollback_journal;
pub mod session;

#[cfg(test)]
mod tests;

// Re-export commonly used types for convenience
pub use cancellation::CancellationToken;

pub use directory_organizer::{
    ExtensionClassifier, FileClassifier,
    sanitize_filename, destination_candidates,
};

pub use duplicate_index::{
    DuplicateIndex, DuplicateIndexError, DuplicateIndexResult,
    DuplicateMatch, ExistingRecord, InMemoryDuplicateIndex,
};

pub use error::{
    HashError, ImportFileError, IoFailure, PlacementError,
    ProcessError, RollbackError, RollbackFailure, ValidationError,
};

pub use file_manager::{
    DuplicateDecision, DuplicateResolver,
    FileManager, FileManagerConfig, SessionOptions,
};

pub use hash_engine::{
    ChunkPolicy, Fingerprint, FingerprintAlgorithm, FingerprintParseError,
    HashEngine, HashResult, StreamingHasher,
};

pub use progress::{HashProgress, ImportProgress, ImportStage, NoProgress, ProgressUpdate};

pub use rollback_journal::{JournalEntry, RollbackJournal, RollbackReport};

pub use session::{
    DuplicatePolicy, FileStatus, ImportFileInfo, ImportResult,
    ImportSession, ManagementMode, SessionStatus,
};
