//! Read-only fingerprint lookup against records that already exist in the catalog

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::cancellation::CancellationToken;
use super::hash_engine::{Fingerprint, HashEngine};
use super::progress::NoProgress;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum DuplicateIndexError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Snapshot error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("Library scan canceled")]
    Canceled,
}

pub type DuplicateIndexResult<T> = Result<T, DuplicateIndexError>;

/// A record the catalog already holds for some content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingRecord {
    pub id: String,
    pub path: PathBuf,
    pub byte_len: u64,
}

/// Fingerprint lookup supplied by the caller at session start.
///
/// Implementations are shared across sessions and must be safe to read concurrently.
pub trait DuplicateIndex: Send + Sync {
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<ExistingRecord>;
}

/// What a file duplicated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DuplicateMatch {
    /// A record in the caller's snapshot
    Catalog(ExistingRecord),
    /// A file completed earlier in the same session
    Session { index: usize, path: PathBuf },
}

impl DuplicateMatch {
    pub fn path(&self) -> &Path {
        match self {
            DuplicateMatch::Catalog(record) => &record.path,
            DuplicateMatch::Session { path, .. } => path,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    fingerprint: Fingerprint,
    record: ExistingRecord,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<SnapshotEntry>,
}

/// Snapshot index held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDuplicateIndex {
    records: HashMap<Fingerprint, ExistingRecord>,
}

impl InMemoryDuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = (Fingerprint, ExistingRecord)>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// Insert a record, returning the one it replaced
    pub fn insert(&mut self, fingerprint: Fingerprint, record: ExistingRecord) -> Option<ExistingRecord> {
        self.records.insert(fingerprint, record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load a snapshot written by `save_json`
    pub fn load_json(path: &Path) -> DuplicateIndexResult<Self> {
        let file = fs::File::open(path)?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DuplicateIndexError::UnsupportedVersion(snapshot.version));
        }

        let index = Self::from_records(snapshot.entries.into_iter().map(|e| (e.fingerprint, e.record)));
        info!(path = %path.display(), records = index.len(), "Loaded duplicate index snapshot");
        Ok(index)
    }

    /// Write the index as a JSON snapshot, entries sorted by record id
    pub fn save_json(&self, path: &Path) -> DuplicateIndexResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut entries: Vec<SnapshotEntry> = self
            .records
            .iter()
            .map(|(fingerprint, record)| SnapshotEntry {
                fingerprint: fingerprint.clone(),
                record: record.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.record.id.cmp(&b.record.id));

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries,
        };
        let writer = BufWriter::new(fs::File::create(path)?);
        serde_json::to_writer_pretty(writer, &snapshot)?;
        info!(path = %path.display(), records = self.len(), "Saved duplicate index snapshot");
        Ok(())
    }

    /// Build an index by fingerprinting every regular file under `root`.
    ///
    /// Record ids are paths relative to `root`. Files that cannot be hashed are
    /// logged and left out. When two files share content, the first in walk
    /// order wins.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn scan_directory(
        root: &Path,
        engine: &HashEngine,
        cancel: &CancellationToken,
    ) -> DuplicateIndexResult<Self> {
        let mut index = Self::new();

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            if cancel.is_canceled() {
                return Err(DuplicateIndexError::Canceled);
            }

            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let result = engine.hash_file(entry.path(), cancel, &NoProgress);
            if result.is_canceled() {
                return Err(DuplicateIndexError::Canceled);
            }
            let Some(fingerprint) = result.fingerprint else {
                if let Some(failure) = &result.failure {
                    warn!(file = %entry.path().display(), error = %failure, "Skipping unreadable library file");
                }
                continue;
            };

            let id = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let record = ExistingRecord {
                id,
                path: entry.path().to_path_buf(),
                byte_len: result.byte_len,
            };

            if index.records.contains_key(&fingerprint) {
                debug!(file = %record.path.display(), "Library already holds identical content");
                continue;
            }
            index.records.insert(fingerprint, record);
        }

        info!(records = index.len(), "Library scan complete");
        Ok(index)
    }
}

impl DuplicateIndex for InMemoryDuplicateIndex {
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<ExistingRecord> {
        self.records.get(fingerprint).cloned()
    }
}
