//! Model Importer
//!
//! Ingests batches of model asset files into a managed collection:
//! 1. Streaming, cancellable content fingerprinting
//! 2. Duplicate detection against a caller-supplied catalog snapshot
//! 3. Placement into an organized category tree, or tracking in place
//! 4. Journaled filesystem side effects that can be rolled back as a whole

pub mod config_loader;
pub mod import;
pub mod logger;

pub use config_loader::{AppConfig, ConfigError, ConfigManager, ConfigResult, init_config};
pub use import::{
    CancellationToken, ChunkPolicy, DuplicateIndex, DuplicateMatch, DuplicatePolicy,
    ExistingRecord, FileManager, FileManagerConfig, FileStatus, Fingerprint,
    FingerprintAlgorithm, HashEngine, HashResult, ImportFileInfo, ImportProgress,
    ImportResult, ImportSession, InMemoryDuplicateIndex, ManagementMode, SessionOptions,
    SessionStatus,
};
pub use logger::{Logger, LoggerError, LoggerResult};
