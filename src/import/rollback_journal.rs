use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{IoFailure, RollbackFailure};

/// One filesystem side effect of a session, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    /// A directory that did not exist before the session
    CreatedDirectory { path: PathBuf },
    /// A destination file created by the session, recorded before any bytes were written
    CopiedFile { path: PathBuf, source: PathBuf },
}

impl JournalEntry {
    pub fn path(&self) -> &Path {
        match self {
            JournalEntry::CreatedDirectory { path } => path,
            JournalEntry::CopiedFile { path, .. } => path,
        }
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalEntry::CreatedDirectory { path } => {
                write!(f, "created directory {}", path.display())
            }
            JournalEntry::CopiedFile { path, source } => {
                write!(f, "copied {} to {}", source.display(), path.display())
            }
        }
    }
}

/// Counts of reversed side effects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub files_removed: usize,
    pub directories_removed: usize,
}

/// Append-only record of created paths, reversed newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackJournal {
    entries: Vec<JournalEntry>,
}

impl RollbackJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_directory(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(JournalEntry::CreatedDirectory { path: path.into() });
    }

    pub fn record_copy(&mut self, path: impl Into<PathBuf>, source: impl Into<PathBuf>) {
        self.entries.push(JournalEntry::CopiedFile {
            path: path.into(),
            source: source.into(),
        });
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reverse every entry, newest first, draining the journal.
    ///
    /// A failing entry does not stop the remaining ones. Directories are only
    /// removed when empty; anything placed in them by someone else stays.
    pub fn unwind(&mut self) -> (RollbackReport, Vec<RollbackFailure>) {
        let mut report = RollbackReport::default();
        let mut failures = Vec::new();

        while let Some(entry) = self.entries.pop() {
            let outcome = match &entry {
                JournalEntry::CopiedFile { path, .. } => remove_file(path).map(|removed| {
                    if removed {
                        report.files_removed += 1;
                    }
                }),
                JournalEntry::CreatedDirectory { path } => remove_empty_directory(path).map(|removed| {
                    if removed {
                        report.directories_removed += 1;
                    }
                }),
            };

            match outcome {
                Ok(()) => debug!(entry = %entry, "Reversed journal entry"),
                Err(failure) => {
                    warn!(entry = %entry, error = %failure, "Failed to reverse journal entry");
                    failures.push(RollbackFailure { entry, failure });
                }
            }
        }

        (report, failures)
    }
}

/// Ok(false) when the file is already gone
fn remove_file(path: &Path) -> Result<bool, IoFailure> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(IoFailure::from(e)),
    }
}

fn remove_empty_directory(path: &Path) -> Result<bool, IoFailure> {
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(IoFailure::from(e)),
    };

    if entries.next().is_some() {
        return Err(IoFailure::new(
            io::ErrorKind::DirectoryNotEmpty,
            format!("{} contains files not created by this session", path.display()),
        ));
    }

    fs::remove_dir(path).map(|()| true).map_err(IoFailure::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unwind_reverses_in_lifo_order() {
        let dir = tempdir().unwrap();
        let category = dir.path().join("stl");
        let nested = category.join("parts");
        let file = nested.join("bracket.stl");

        let mut journal = RollbackJournal::new();
        fs::create_dir(&category).unwrap();
        journal.record_directory(&category);
        fs::create_dir(&nested).unwrap();
        journal.record_directory(&nested);
        fs::write(&file, b"solid").unwrap();
        journal.record_copy(&file, "/src/bracket.stl");

        let (report, failures) = journal.unwind();

        assert!(failures.is_empty());
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.directories_removed, 2);
        assert!(!category.exists());
        assert!(journal.is_empty());
    }

    #[test]
    fn test_unwind_keeps_foreign_files_and_reports_directory() {
        let dir = tempdir().unwrap();
        let category = dir.path().join("obj");
        fs::create_dir(&category).unwrap();

        let mut journal = RollbackJournal::new();
        journal.record_directory(&category);
        fs::write(category.join("someone_else.obj"), b"v 0 0 0").unwrap();

        let (report, failures) = journal.unwind();

        assert_eq!(report, RollbackReport::default());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].failure.kind, io::ErrorKind::DirectoryNotEmpty);
        assert!(category.join("someone_else.obj").exists());
    }

    #[test]
    fn test_unwind_tolerates_already_removed_paths() {
        let dir = tempdir().unwrap();
        let mut journal = RollbackJournal::new();
        journal.record_directory(dir.path().join("gone"));
        journal.record_copy(dir.path().join("gone/file.stl"), "/src/file.stl");

        let (report, failures) = journal.unwind();

        assert!(failures.is_empty());
        assert_eq!(report, RollbackReport::default());
    }

    #[test]
    fn test_entries_serialize_with_kind_tag() {
        let entry = JournalEntry::CreatedDirectory {
            path: PathBuf::from("/lib/stl"),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"created_directory\""));
    }
}
