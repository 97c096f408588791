//! Session scenario tests
//!
//! Each test drives a full session through `FileManager` against files in a
//! temporary directory.

#[cfg(test)]
mod tests {
    use crate::import::*;

    use std::cell::Cell;
    use std::fs;
    use std::io::{self, Cursor, Read};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::tempdir;
    use walkdir::WalkDir;

    const MIB: usize = 1024 * 1024;

    /// Helper to write a file with deterministic content
    fn write_file(dir: &Path, name: &str, len: usize, seed: u8) -> PathBuf {
        let path = dir.join(name);
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
        fs::write(&path, data).unwrap();
        path
    }

    /// Every path under `root`, relative and sorted
    fn tree_snapshot(root: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
            .collect();
        paths.sort();
        paths
    }

    fn manager() -> FileManager {
        FileManager::new(FileManagerConfig::default())
    }

    fn empty_index() -> Arc<dyn DuplicateIndex> {
        Arc::new(InMemoryDuplicateIndex::new())
    }

    #[test]
    fn test_catalog_duplicate_is_skipped_and_never_copied() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        let a = write_file(input.path(), "A.stl", 10 * MIB, 1);
        let b = write_file(input.path(), "B.stl", 5 * MIB, 2);

        let engine = HashEngine::default();
        let b_fingerprint = engine.hash_bytes(&fs::read(&b).unwrap());
        let index = InMemoryDuplicateIndex::from_records([(
            b_fingerprint,
            ExistingRecord {
                id: "catalog-42".to_string(),
                path: PathBuf::from("/catalog/B.stl"),
                byte_len: 5 * MIB as u64,
            },
        )]);

        let manager = manager();
        let session = manager
            .start_session(vec![a, b], SessionOptions::organized(library.path()), Arc::new(index))
            .unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        assert!(result.success());
        assert_eq!(result.processed(), 1);
        assert_eq!(result.skipped(), 1);
        assert_eq!(result.failed(), 0);
        assert_eq!(result.bytes_processed(), 10 * MIB as u64);

        let files = result.session().files();
        assert_eq!(files[1].status(), FileStatus::SkippedDuplicate);
        assert!(files[1].destination().is_none());
        assert!(library.path().join("stl/A.stl").is_file());
        assert!(!library.path().join("stl/B.stl").exists());
        assert_eq!(result.session().journal().len(), 2);
    }

    #[test]
    fn test_rollback_after_failed_placement_restores_root() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        let files = vec![
            write_file(input.path(), "bracket.stl", 4096, 1),
            write_file(input.path(), "bolt.obj", 4096, 2),
            write_file(input.path(), "scan.ply", 4096, 3),
        ];
        // A regular file where the obj category folder should go
        fs::write(library.path().join("obj"), b"occupied").unwrap();
        let before = tree_snapshot(library.path());

        let manager = manager();
        let session = manager
            .start_session(files, SessionOptions::organized(library.path()), empty_index())
            .unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        assert!(!result.success());
        assert_eq!(result.processed(), 2);
        assert_eq!(result.failed(), 1);
        assert!(matches!(
            result.session().files()[1].error(),
            Some(ImportFileError::Placement(PlacementError::CreateDirectory { .. }))
        ));
        assert!(result.error().is_some());

        let mut session = result.into_session();
        let report = manager.rollback_session(&mut session).unwrap();

        assert_eq!(report.files_removed, 2);
        assert_eq!(report.directories_removed, 2);
        assert_eq!(session.status(), SessionStatus::RolledBack);
        assert_eq!(tree_snapshot(library.path()), before);
        assert_eq!(fs::read(library.path().join("obj")).unwrap(), b"occupied");
    }

    #[test]
    fn test_rollback_removes_root_created_by_session() {
        let input = tempdir().unwrap();
        let parent = tempdir().unwrap();
        let root = parent.path().join("library/models");
        let source = write_file(input.path(), "part.3mf", 100, 9);

        let manager = manager();
        let session = manager
            .start_session(vec![source], SessionOptions::organized(&root), empty_index())
            .unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());
        assert!(result.success());
        assert!(root.join("3mf/part.3mf").is_file());

        let mut session = result.into_session();
        let report = manager.rollback_session(&mut session).unwrap();

        assert_eq!(report.directories_removed, 3);
        assert!(tree_snapshot(parent.path()).is_empty());
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        let source = write_file(input.path(), "gear.stl", 2048, 4);

        let manager = manager();
        let session = manager
            .start_session(vec![source], SessionOptions::organized(library.path()), empty_index())
            .unwrap();
        let mut session = manager.run_session(session, &NoProgress, &CancellationToken::new()).into_session();

        let first = manager.rollback_session(&mut session).unwrap();
        let second = manager.rollback_session(&mut session).unwrap();

        assert_eq!(first.files_removed, 1);
        assert_eq!(second, RollbackReport::default());
        assert!(session.journal().is_empty());
        assert!(matches!(
            manager.process_file(&mut session, 0, &NoProgress, &CancellationToken::new()),
            Err(ProcessError::SessionClosed { .. })
        ));
    }

    #[test]
    fn test_leave_in_place_records_source_and_never_writes() {
        let input = tempdir().unwrap();
        let source = write_file(input.path(), "figure.obj", 64 * 1024, 5);
        let mtime_before = fs::metadata(&source).unwrap().modified().unwrap();
        let tree_before = tree_snapshot(input.path());

        let manager = manager();
        let session = manager
            .start_session(vec![source.clone()], SessionOptions::leave_in_place(), empty_index())
            .unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        assert!(result.success());
        assert_eq!(result.processed(), 1);
        assert_eq!(result.session().files()[0].destination(), Some(source.as_path()));
        assert!(result.session().journal().is_empty());
        assert_eq!(fs::metadata(&source).unwrap().modified().unwrap(), mtime_before);
        assert_eq!(tree_snapshot(input.path()), tree_before);
    }

    #[test]
    fn test_identical_files_in_one_session_are_deduplicated() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        let first = write_file(input.path(), "a.stl", 1000, 7);
        let second = input.path().join("copy_of_a.stl");
        fs::copy(&first, &second).unwrap();

        let manager = manager();
        let session = manager
            .start_session(vec![first, second], SessionOptions::organized(library.path()), empty_index())
            .unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        assert_eq!(result.processed(), 1);
        assert_eq!(result.skipped(), 1);
        assert_eq!(
            result.session().files()[0].fingerprint(),
            result.session().files()[1].fingerprint()
        );
        assert!(!library.path().join("stl/copy_of_a.stl").exists());
    }

    #[test]
    fn test_overwrite_policy_imports_and_links_duplicate() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        let first = write_file(input.path(), "a.stl", 1000, 7);
        let second = input.path().join("b.stl");
        fs::copy(&first, &second).unwrap();

        let manager = manager();
        let options = SessionOptions::organized(library.path()).with_duplicate_policy(DuplicatePolicy::Overwrite);
        let session = manager.start_session(vec![first, second], options, empty_index()).unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        assert_eq!(result.processed(), 2);
        let duplicate = result.session().files()[1].duplicate_of().unwrap();
        assert!(matches!(duplicate, DuplicateMatch::Session { index: 0, .. }));
        assert_eq!(duplicate.path(), library.path().join("stl/a.stl"));
    }

    struct CountingResolver {
        decision: DuplicateDecision,
        calls: AtomicUsize,
    }

    impl DuplicateResolver for CountingResolver {
        fn resolve(&self, _file: &ImportFileInfo, _duplicate: &DuplicateMatch) -> DuplicateDecision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.decision
        }
    }

    #[test]
    fn test_prompt_policy_asks_resolver() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        let first = write_file(input.path(), "a.ply", 500, 3);
        let second = input.path().join("b.ply");
        fs::copy(&first, &second).unwrap();

        let resolver = Arc::new(CountingResolver {
            decision: DuplicateDecision::Import,
            calls: AtomicUsize::new(0),
        });
        let manager = manager().with_resolver(resolver.clone());
        let options = SessionOptions::organized(library.path()).with_duplicate_policy(DuplicatePolicy::Prompt);
        let session = manager.start_session(vec![first, second], options, empty_index()).unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.processed(), 2);
        assert!(library.path().join("ply/b.ply").is_file());
    }

    #[test]
    fn test_prompt_policy_without_resolver_skips() {
        let input = tempdir().unwrap();
        let first = write_file(input.path(), "a.ply", 500, 3);
        let second = input.path().join("b.ply");
        fs::copy(&first, &second).unwrap();

        let manager = manager();
        let options = SessionOptions::leave_in_place().with_duplicate_policy(DuplicatePolicy::Prompt);
        let session = manager.start_session(vec![first, second], options, empty_index()).unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        assert_eq!(result.processed(), 1);
        assert_eq!(result.skipped(), 1);
    }

    #[test]
    fn test_same_name_different_content_gets_fingerprint_suffix() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        fs::create_dir(input.path().join("one")).unwrap();
        fs::create_dir(input.path().join("two")).unwrap();
        let first = write_file(&input.path().join("one"), "gear.stl", 300, 1);
        let second = write_file(&input.path().join("two"), "gear.stl", 300, 2);

        let manager = manager();
        let session = manager
            .start_session(vec![first, second], SessionOptions::organized(library.path()), empty_index())
            .unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        let second_info = &result.session().files()[1];
        let short = second_info.fingerprint().unwrap().short();
        assert_eq!(
            second_info.destination(),
            Some(library.path().join(format!("stl/gear_{short}.stl")).as_path())
        );
        assert_eq!(fs::read(library.path().join("stl/gear.stl")).unwrap().len(), 300);
    }

    #[test]
    fn test_source_removed_after_start_fails_only_that_file() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        let doomed = write_file(input.path(), "doomed.stl", 100, 1);
        let kept = write_file(input.path(), "kept.stl", 100, 2);

        let manager = manager();
        let session = manager
            .start_session(vec![doomed.clone(), kept], SessionOptions::organized(library.path()), empty_index())
            .unwrap();
        fs::remove_file(&doomed).unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        assert!(!result.success());
        assert_eq!(result.failed(), 1);
        assert_eq!(result.processed(), 1);
        assert_eq!(
            result.session().files()[0].error(),
            Some(&ImportFileError::Hash(HashError::NotFound))
        );
    }

    #[test]
    fn test_cancel_during_second_file_cancels_the_rest() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        let files = vec![
            write_file(input.path(), "a.stl", 1000, 1),
            write_file(input.path(), "b.stl", 1000, 2),
            write_file(input.path(), "c.stl", 1000, 3),
        ];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let sink = move |update: &ProgressUpdate| {
            if update.stage == ImportStage::Hashing && update.current_index == 1 {
                trigger.request_cancel();
            }
        };

        let manager = manager();
        let session = manager
            .start_session(files, SessionOptions::organized(library.path()), empty_index())
            .unwrap();
        let result = manager.run_session(session, &sink, &cancel);

        assert!(!result.success());
        assert_eq!(result.processed(), 1);
        assert_eq!(result.failed(), 2);
        assert_eq!(result.canceled(), 2);
        assert_eq!(result.processed() + result.failed() + result.skipped(), result.total());
        assert!(library.path().join("stl/a.stl").is_file());
        assert!(!library.path().join("stl/b.stl").exists());
        assert_eq!(result.session().status(), SessionStatus::Failed);
    }

    #[test]
    fn test_cancel_mid_copy_leaves_journaled_partial_file_for_rollback() {
        let input = tempdir().unwrap();
        let library = tempdir().unwrap();
        let len = 200 * 1024;
        let source = write_file(input.path(), "part.stl", len, 4);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let sink = move |update: &ProgressUpdate| {
            if update.stage == ImportStage::Placing && update.file_percent > 50 {
                trigger.request_cancel();
            }
        };

        let manager = FileManager::new(FileManagerConfig {
            hash_engine: HashEngine::new(FingerprintAlgorithm::Xxh64, ChunkPolicy::Fixed(1024)),
            ..FileManagerConfig::default()
        });
        let session = manager
            .start_session(vec![source], SessionOptions::organized(library.path()), empty_index())
            .unwrap();
        let result = manager.run_session(session, &sink, &cancel);

        let partial = library.path().join("stl/part.stl");
        assert!(!result.success());
        assert_eq!(result.canceled(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.session().files()[0].error(), Some(&ImportFileError::Canceled));
        let partial_len = fs::metadata(&partial).unwrap().len();
        assert!(partial_len > 0 && partial_len < len as u64);
        assert_eq!(result.session().journal().len(), 2);
        assert_eq!(result.session().journal().entries()[1].path(), partial.as_path());

        let mut session = result.into_session();
        let report = manager.rollback_session(&mut session).unwrap();

        assert_eq!(
            report,
            RollbackReport {
                files_removed: 1,
                directories_removed: 1,
            }
        );
        assert!(tree_snapshot(library.path()).is_empty());
    }

    #[test]
    fn test_cancel_after_last_file_keeps_result_successful() {
        let input = tempdir().unwrap();
        let files = vec![
            write_file(input.path(), "a.stl", 100, 1),
            write_file(input.path(), "b.stl", 100, 2),
        ];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let sink = move |update: &ProgressUpdate| {
            if update.stage == ImportStage::Finished && update.current_index == 1 {
                trigger.request_cancel();
            }
        };

        let manager = manager();
        let session = manager.start_session(files, SessionOptions::leave_in_place(), empty_index()).unwrap();
        let result = manager.run_session(session, &sink, &cancel);

        assert!(cancel.is_canceled());
        assert!(result.success());
        assert_eq!(result.processed(), 2);
        assert_eq!(result.canceled(), 0);
        assert!(result.error().is_none());
        assert_eq!(result.session().status(), SessionStatus::Completed);
    }

    #[test]
    fn test_progress_callbacks_arrive_in_file_order() {
        let input = tempdir().unwrap();
        let files = vec![
            write_file(input.path(), "a.obj", 100, 1),
            write_file(input.path(), "b.obj", 100, 2),
        ];
        let seen = Mutex::new(Vec::new());
        let sink = |update: &ProgressUpdate| {
            seen.lock().unwrap().push((update.current_index, update.stage, update.file_percent));
        };

        let manager = manager();
        let session = manager.start_session(files, SessionOptions::leave_in_place(), empty_index()).unwrap();
        manager.run_session(session, &sink, &CancellationToken::new());

        let seen = seen.into_inner().unwrap();
        let indices: Vec<usize> = seen.iter().skip(1).map(|(i, _, _)| *i).collect();
        let mut sorted = indices.clone();
        sorted.sort();
        assert_eq!(indices, sorted);
        assert!(seen.iter().all(|(_, _, pct)| *pct <= 100));
        assert_eq!(seen.last().map(|(i, stage, pct)| (*i, *stage, *pct)), Some((1, ImportStage::Finished, 100)));
    }

    #[test]
    fn test_panicking_import_progress_does_not_abort_session() {
        let input = tempdir().unwrap();
        let source = write_file(input.path(), "a.stl", 100, 1);
        let sink = |_update: &ProgressUpdate| {
            if true {
                panic!("ui bug");
            }
        };

        let manager = manager();
        let session = manager.start_session(vec![source], SessionOptions::leave_in_place(), empty_index()).unwrap();
        let result = manager.run_session(session, &sink, &CancellationToken::new());

        assert!(result.success());
    }

    #[test]
    fn test_complete_session_marks_unprocessed_files() {
        let input = tempdir().unwrap();
        let files = vec![
            write_file(input.path(), "a.stl", 100, 1),
            write_file(input.path(), "b.stl", 100, 2),
        ];

        let manager = manager();
        let mut session = manager.start_session(files, SessionOptions::leave_in_place(), empty_index()).unwrap();
        manager
            .process_file(&mut session, 0, &NoProgress, &CancellationToken::new())
            .unwrap();
        let result = manager.complete_session(session, true);

        assert!(!result.success());
        assert_eq!(result.processed(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.canceled(), 0);
        assert_eq!(result.session().files()[1].error(), Some(&ImportFileError::NotProcessed));
    }

    #[test]
    fn test_import_result_serializes_for_catalog() {
        let input = tempdir().unwrap();
        let source = write_file(input.path(), "a.stl", 100, 1);

        let manager = manager();
        let session = manager.start_session(vec![source], SessionOptions::leave_in_place(), empty_index()).unwrap();
        let result = manager.run_session(session, &NoProgress, &CancellationToken::new());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["processed"], 1);
        assert_eq!(json["session"]["files"][0]["status"], "completed");
        assert!(json["session"]["files"][0]["fingerprint"].is_string());
    }

    /// Reader that cancels the token on its Nth read
    struct CancelOnRead<R> {
        inner: R,
        reads: usize,
        cancel_at: usize,
        token: CancellationToken,
    }

    impl<R: Read> Read for CancelOnRead<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            if self.reads == self.cancel_at {
                self.token.request_cancel();
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn test_cancellation_stops_within_one_chunk() {
        let token = CancellationToken::new();
        let chunk = 1024;
        let reader = CancelOnRead {
            inner: io::repeat(0xAB).take(64 * MIB as u64),
            reads: 0,
            cancel_at: 3,
            token: token.clone(),
        };

        let engine = HashEngine::new(FingerprintAlgorithm::Xxh64, ChunkPolicy::Fixed(chunk));
        let result = engine.hash_reader("large", reader, Some(64 * MIB as u64), &token, &NoProgress);

        assert!(result.is_canceled());
        assert!(result.fingerprint.is_none());
        assert_eq!(result.byte_len, 3 * chunk as u64);
    }

    /// Reader that records the largest buffer it was asked to fill
    struct MaxReadTracker<'a, R> {
        inner: R,
        largest: &'a Cell<usize>,
    }

    impl<R: Read> Read for MaxReadTracker<'_, R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.largest.set(self.largest.get().max(buf.len()));
            self.inner.read(buf)
        }
    }

    #[test]
    fn test_hash_memory_is_bounded_by_chunk_size() {
        let total = 16 * MIB as u64;
        let largest = Cell::new(0);

        let engine = HashEngine::new(FingerprintAlgorithm::Blake3, ChunkPolicy::Fixed(4096));
        let reader = MaxReadTracker {
            inner: io::repeat(1).take(total),
            largest: &largest,
        };
        let result = engine.hash_reader("synthetic", reader, Some(total), &CancellationToken::new(), &NoProgress);

        assert!(result.success());
        assert_eq!(result.byte_len, total);
        assert_eq!(largest.get(), 4096);

        largest.set(0);
        let adaptive = HashEngine::default();
        let reader = MaxReadTracker {
            inner: io::repeat(1).take(total),
            largest: &largest,
        };
        adaptive.hash_reader("synthetic", reader, Some(total), &CancellationToken::new(), &NoProgress);
        assert_eq!(largest.get(), ChunkPolicy::Adaptive.chunk_size_for(Some(total)));
    }

    #[test]
    fn test_fingerprint_ignores_name_and_location() {
        let input = tempdir().unwrap();
        fs::create_dir(input.path().join("nested")).unwrap();
        let a = write_file(input.path(), "one.stl", 20_000, 6);
        let b = write_file(&input.path().join("nested"), "two.obj", 20_000, 6);

        let engine = HashEngine::new(FingerprintAlgorithm::Xxh64, ChunkPolicy::Fixed(333));
        let fa = engine.hash_file(&a, &CancellationToken::new(), &NoProgress);
        let fb = HashEngine::default().hash_reader(
            "stream",
            Cursor::new(fs::read(&b).unwrap()),
            None,
            &CancellationToken::new(),
            &NoProgress,
        );

        assert_eq!(fa.fingerprint, fb.fingerprint);
    }
}
