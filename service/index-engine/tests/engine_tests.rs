use std::fs;
use std::io::Write as _;
use std::sync::Arc;

use embedding_provider::{Embedder, HashEmbedder};
use index_engine::{Engine, EngineConfig, EngineError};
use index_model::ChunkStrategy;
use metadata_store::MetadataFilter;
use vector_index::Tier;

const DIM: usize = 32;

fn test_engine(data_dir: &std::path::Path) -> Engine {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIM).unwrap());
    Engine::new(EngineConfig::with_data_dir(data_dir), Some(embedder)).unwrap()
}

#[test]
fn empty_directory_scan_is_a_clean_success() {
    let data = tempfile::tempdir().unwrap();
    let empty = tempfile::tempdir().unwrap();
    let engine = test_engine(data.path());

    let run = engine.scan_directory(empty.path(), 4, false).unwrap();
    assert_eq!(run.total_files, 0);
    assert_eq!(run.successful_files, 0);
    assert_eq!(run.failed_files, 0);
    assert!(!run.interrupted);
    assert!(run.duration_s >= 0.0);
    assert!((run.success_rate() - 100.0).abs() < f64::EPSILON);
}

#[test]
fn single_file_ingest_then_unchanged_rescan() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    let file = tree.path().join("a.py");
    fs::write(&file, "import os\n\ndef main():\n    print(os.getcwd())\n    return 0\n").unwrap();

    let engine = test_engine(data.path());
    let run = engine.scan_directory(tree.path(), 4, false).unwrap();
    assert_eq!(run.total_files, 1);
    assert_eq!(run.successful_files, 1);
    assert_eq!(run.failed_files, 0);

    let canonical = file.canonicalize().unwrap();
    let info = engine
        .queries()
        .get_file_info(&canonical.to_string_lossy())
        .unwrap()
        .expect("file record exists");
    assert!(info.record.is_text);
    assert!(info.chunk_count >= 1);
    let chunks = engine
        .queries()
        .get_file_chunks(&canonical.to_string_lossy(), None)
        .unwrap();
    assert_eq!(
        chunks[0].metadata.chunk_strategy,
        ChunkStrategy::CodeDiscrete
    );

    // Second run without force: nothing is a candidate, the file counts as
    // skipped-unchanged.
    let rerun = engine.scan_directory(tree.path(), 4, false).unwrap();
    assert_eq!(rerun.total_files, 0);
    assert_eq!(rerun.skipped_unchanged, 1);
    assert_eq!(rerun.successful_files, 0);
}

#[test]
fn modification_is_detected_and_old_vectors_go_stale() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    let file = tree.path().join("a.py");
    fs::write(&file, "def one():\n    return 1\n").unwrap();

    let engine = test_engine(data.path());
    engine.scan_directory(tree.path(), 2, false).unwrap();

    let canonical = file.canonicalize().unwrap().to_string_lossy().into_owned();
    let state = engine.vector_index().state_snapshot().unwrap();
    let old_ids = state.indexed_files[&canonical].vector_ids.clone();
    assert!(!old_ids.is_empty());

    // Ensure the appended file's mtime lands past the run watermark even on
    // coarse-granularity filesystems.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let mut handle = fs::OpenOptions::new().append(true).open(&file).unwrap();
    writeln!(handle, "def two():\n    return 2").unwrap();
    drop(handle);

    let rerun = engine.scan_directory(tree.path(), 2, false).unwrap();
    assert_eq!(rerun.total_files, 1);
    assert_eq!(rerun.successful_files, 1);

    let state = engine.vector_index().state_snapshot().unwrap();
    for id in &old_ids {
        assert!(
            state.stale_vector_ids.contains(id),
            "old vector {id} should be stale after re-index"
        );
    }
    let entry = &state.indexed_files[&canonical];
    assert_eq!(entry.tier, Tier::Minor);
    assert!(entry.vector_ids.iter().all(|id| !old_ids.contains(id)));
}

#[test]
fn semantic_search_round_trips_through_the_index() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    fs::write(
        tree.path().join("alpha.md"),
        "The vector index keeps a stable major tier.",
    )
    .unwrap();
    fs::write(
        tree.path().join("beta.md"),
        "Scanners prune hidden directories during discovery.",
    )
    .unwrap();

    let engine = test_engine(data.path());
    engine.scan_directory(tree.path(), 2, false).unwrap();

    // The deterministic embedder maps identical text to identical vectors,
    // so querying with a chunk's exact content must return that chunk first.
    let hits = engine
        .queries()
        .semantic_search("The vector index keeps a stable major tier.", 5)
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].file_path.ends_with("alpha.md"));
    assert!((hits[0].similarity - 1.0).abs() < 1e-4);
}

#[test]
fn semantic_search_without_embedder_is_a_typed_error() {
    let data = tempfile::tempdir().unwrap();
    let engine = Engine::new(EngineConfig::with_data_dir(data.path()), None).unwrap();
    match engine.queries().semantic_search("anything", 5) {
        Err(EngineError::EmbedderUnavailable) => {}
        other => panic!("expected EmbedderUnavailable, got {other:?}"),
    }
}

#[test]
fn query_surfaces_cover_store_paths() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    fs::write(
        tree.path().join("notes.md"),
        "Retrieval quality depends on chunk boundaries.\n\nOverlap helps prose retrieval.",
    )
    .unwrap();

    let engine = test_engine(data.path());
    engine.scan_directory(tree.path(), 2, false).unwrap();
    let queries = engine.queries();

    let fts = queries.full_text_search("retrieval", 10).unwrap();
    assert!(!fts.is_empty());
    assert!(fts[0].snippet.contains(">>>"));

    let files = queries
        .search_files(
            &MetadataFilter {
                name_pattern: Some("notes".into()),
                ..Default::default()
            },
            10,
        )
        .unwrap();
    assert_eq!(files.len(), 1);

    let dirs = queries.list_directories(None, 10).unwrap();
    assert_eq!(dirs.len(), 1);
    assert_eq!(dirs[0].file_count, 1);

    let stats = queries.get_stats().unwrap();
    assert_eq!(stats.store.total_files, 1);
    assert!(stats.index.total_vectors >= 1);
}

#[test]
fn rebuild_major_from_store_resets_tiers() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    fs::write(tree.path().join("a.md"), "alpha content for the index").unwrap();
    fs::write(tree.path().join("b.md"), "beta content for the index").unwrap();

    let engine = test_engine(data.path());
    engine.scan_directory(tree.path(), 2, false).unwrap();

    let before = engine.vector_index().get_stats();
    assert!(before.minor.vector_count > 0);

    let report = engine.rebuild_major_from_store().unwrap();
    assert_eq!(report.indexed_files, 2);
    assert_eq!(report.total_vectors, before.total_vectors);

    let after = engine.vector_index().get_stats();
    assert_eq!(after.minor.vector_count, 0);
    assert_eq!(after.major.vector_count, report.total_vectors);
    assert_eq!(after.stale_vectors, 0);
}

#[test]
fn cancellation_yields_partial_interrupted_run() {
    let data = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    for i in 0..5 {
        fs::write(tree.path().join(format!("f{i}.txt")), "body").unwrap();
    }

    let engine = test_engine(data.path());
    engine.request_shutdown();
    let run = engine.scan_directory(tree.path(), 2, false).unwrap();
    assert!(run.interrupted);
    assert_eq!(run.successful_files, 0);
}
