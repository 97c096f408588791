//! Progress reporting seams.
//!
//! Callbacks run on whichever thread drives the pipeline. A panicking callback
//! is caught and logged so it can never abort hashing or placement.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tracing::warn;

/// Pipeline stage reported alongside each progress update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Validating,
    Hashing,
    CheckingDuplicates,
    Placing,
    Finished,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportStage::Validating => write!(f, "validating"),
            ImportStage::Hashing => write!(f, "hashing"),
            ImportStage::CheckingDuplicates => write!(f, "checking_duplicates"),
            ImportStage::Placing => write!(f, "placing"),
            ImportStage::Finished => write!(f, "finished"),
        }
    }
}

/// One progress tick for the file set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub stage: ImportStage,
    /// Zero-based position of the current file in session order
    pub current_index: usize,
    pub total_files: usize,
    /// 0-100 for the current file
    pub file_percent: u8,
    pub message: String,
}

/// Receives per-file and per-file-set progress for an import session
pub trait ImportProgress: Send + Sync {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

/// Receives byte-level progress while a single source is hashed.
/// `total` is `None` when the source length is unknown.
pub trait HashProgress {
    fn on_bytes_hashed(&self, _processed: u64, _total: Option<u64>) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ImportProgress for NoProgress {}

impl HashProgress for NoProgress {}

impl<F> ImportProgress for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

impl<F> HashProgress for F
where
    F: Fn(u64, Option<u64>),
{
    fn on_bytes_hashed(&self, processed: u64, total: Option<u64>) {
        self(processed, total)
    }
}

/// Run a consumer callback, swallowing and logging any panic it raises
pub(crate) fn guarded<F: FnOnce()>(callback: &str, f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        warn!(callback = callback, reason = %reason, "Progress callback panicked, continuing");
    }
}

/// Integer percentage of `processed` over `total`, capped at 100
pub(crate) fn percent_of(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (processed.min(total) as u128 * 100) / total as u128;
    pct as u8
}
