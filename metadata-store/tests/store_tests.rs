use index_model::{
    now_utc, ChunkEnvelope, ChunkMetadata, ChunkStrategy, ContentAnalysis, FileRecord,
    ProcessingRun, ProcessingStatus,
};
use metadata_store::{MetadataFilter, Store};

fn sample_record(path: &str, name: &str) -> FileRecord {
    FileRecord {
        path: path.to_string(),
        name: name.to_string(),
        directory: std::path::Path::new(path)
            .parent()
            .unwrap()
            .to_string_lossy()
            .into_owned(),
        size: 120,
        file_type: ".py".into(),
        mime: "text/x-python".into(),
        created_at: "2025-01-01T00:00:00Z".into(),
        modified_at: "2025-01-02T00:00:00Z".into(),
        accessed_at: "2025-01-03T00:00:00Z".into(),
        permissions: "644".into(),
        hash: "abc123".into(),
        is_text: true,
        encoding: Some("utf-8".into()),
        processing_status: ProcessingStatus::Success,
        error_message: None,
        indexed_at: now_utc(),
    }
}

fn sample_envelopes(filename: &str, texts: &[&str]) -> Vec<ChunkEnvelope> {
    let total = texts.len();
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| ChunkEnvelope {
            metadata: ChunkMetadata {
                filename: filename.to_string(),
                chunk_index: i,
                total_chunks: total,
                chunk_size: text.chars().count(),
                chunk_strategy: ChunkStrategy::CodeDiscrete,
                overlap_chars: 0,
                file_type: "py".into(),
                file_hash: "deadbeef".into(),
                created_at: now_utc(),
                ai_metadata: serde_json::Map::new(),
            },
            content: text.to_string(),
        })
        .collect()
}

fn sample_analysis(path: &str) -> ContentAnalysis {
    ContentAnalysis {
        path: path.to_string(),
        hash: "abc123".into(),
        word_count: 20,
        char_count: 120,
        language: "en".into(),
        summary: "A short module.".into(),
        keywords: vec!["retrieval".into(), "chunks".into()],
        tfidf_keywords: vec![("retrieval engine".into(), 0.4)],
        topics: vec![(0, vec![("retrieval".into(), 1.2)])],
        processing_time_s: 0.01,
    }
}

fn open_store(dir: &tempfile::TempDir) -> Store {
    Store::open(&dir.path().join("file_metadata.sqlite3")).unwrap()
}

#[test]
fn upsert_and_get_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let record = sample_record("/data/proj/a.py", "a.py");

    store.upsert_file(&record).unwrap();
    let got = store.get_file("/data/proj/a.py").unwrap().unwrap();
    assert_eq!(got.name, "a.py");
    assert_eq!(got.hash, "abc123");
    assert_eq!(got.processing_status, ProcessingStatus::Success);
    assert_eq!(
        store.get_file_modified("/data/proj/a.py").unwrap().unwrap(),
        "2025-01-02T00:00:00Z"
    );
    assert!(store.get_file("/data/proj/missing.py").unwrap().is_none());
}

#[test]
fn upsert_replaces_dependent_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let path = "/data/proj/a.py";

    store.upsert_file(&sample_record(path, "a.py")).unwrap();
    store
        .replace_chunks(path, &sample_envelopes("a.py", &["one chunk", "two chunk"]), None)
        .unwrap();
    store.put_analysis(&sample_analysis(path), 0.01).unwrap();
    assert_eq!(store.chunk_count(path).unwrap(), 2);

    // Re-upserting the file clears chunks, analysis and FTS rows.
    store.upsert_file(&sample_record(path, "a.py")).unwrap();
    assert_eq!(store.chunk_count(path).unwrap(), 0);
    assert!(store.get_analysis(path).unwrap().is_none());
    assert!(store.fts_search("chunk", 10).unwrap().is_empty());
}

#[test]
fn chunks_round_trip_with_adjacency() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let path = "/data/proj/b.py";
    store.upsert_file(&sample_record(path, "b.py")).unwrap();

    let envelopes = sample_envelopes("b.py", &["zero", "one", "two", "three", "four"]);
    store.replace_chunks(path, &envelopes, None).unwrap();

    let all = store.get_chunks(path).unwrap();
    assert_eq!(all.len(), 5);
    for (i, env) in all.iter().enumerate() {
        assert_eq!(env.metadata.chunk_index, i);
    }

    let one = store.get_chunk(path, 2).unwrap().unwrap();
    assert_eq!(one.content, "two");

    let adjacent = store.get_adjacent(path, 2, 1, 1).unwrap();
    assert_eq!(
        adjacent.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
        vec!["one", "two", "three"]
    );

    // Edges clamp instead of erroring.
    let at_start = store.get_adjacent(path, 0, 2, 1).unwrap();
    assert_eq!(at_start.len(), 2);
}

#[test]
fn full_text_search_returns_delimited_snippets() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let path = "/data/docs/notes.md";
    store.upsert_file(&sample_record(path, "notes.md")).unwrap();
    store
        .replace_chunks(
            path,
            &sample_envelopes(
                "notes.md",
                &["the quick brown fox jumps", "over the lazy dog"],
            ),
            None,
        )
        .unwrap();

    let hits = store.fts_search("fox", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, path);
    assert!(hits[0].snippet.contains(">>>fox<<<"));
    assert!(hits[0].chunk_index.is_none());

    // Boolean operators are FTS5-native.
    assert_eq!(store.fts_search("fox AND dog", 10).unwrap().len(), 1);
    assert!(store.fts_search("fox AND zebra", 10).unwrap().is_empty());

    let chunk_hits = store.chunk_fts_search("lazy", 10).unwrap();
    assert_eq!(chunk_hits.len(), 1);
    assert_eq!(chunk_hits[0].0.metadata.chunk_index, 1);
}

#[test]
fn metadata_search_is_conjunctive() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let mut small = sample_record("/data/proj/small.py", "small.py");
    small.size = 10;
    let mut big = sample_record("/data/proj/big_module.py", "big_module.py");
    big.size = 5000;
    store.upsert_file(&small).unwrap();
    store.upsert_file(&big).unwrap();

    let filter = MetadataFilter {
        name_pattern: Some("big".into()),
        min_size: Some(1000),
        ..Default::default()
    };
    let hits = store.metadata_search(&filter, 20).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "big_module.py");

    let none = MetadataFilter {
        name_pattern: Some("big".into()),
        max_size: Some(100),
        ..Default::default()
    };
    assert!(store.metadata_search(&none, 20).unwrap().is_empty());
}

#[test]
fn keyword_search_reports_matches() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let path = "/data/proj/a.py";
    store.upsert_file(&sample_record(path, "a.py")).unwrap();
    store.put_analysis(&sample_analysis(path), 0.01).unwrap();

    let hits = store
        .keyword_search(&["retrieval".into(), "nonexistent".into()], 10)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].matched, vec!["retrieval".to_string()]);

    assert!(store
        .keyword_search(&["nothing-here".into()], 10)
        .unwrap()
        .is_empty());
}

#[test]
fn processing_runs_feed_last_scan_time() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let mut run = ProcessingRun {
        session_id: "scan_1".into(),
        directory: "/data/proj".into(),
        started_at: "2025-02-01T00:00:00Z".into(),
        ended_at: "2025-02-01T00:01:00Z".into(),
        duration_s: 60.0,
        ..Default::default()
    };
    run.record(ProcessingStatus::Success);
    store.record_run(&run).unwrap();

    // Interrupted runs do not move the watermark.
    let interrupted = ProcessingRun {
        session_id: "scan_2".into(),
        directory: "/data/proj".into(),
        started_at: "2025-02-02T00:00:00Z".into(),
        ended_at: "2025-02-02T00:01:00Z".into(),
        interrupted: true,
        ..Default::default()
    };
    store.record_run(&interrupted).unwrap();

    assert_eq!(
        store.last_scan_time("/data/proj").unwrap().unwrap(),
        "2025-02-01T00:01:00Z"
    );
    assert!(store.last_scan_time("/other").unwrap().is_none());
}

#[test]
fn stats_and_directory_aggregation() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store
        .upsert_file(&sample_record("/data/proj/a.py", "a.py"))
        .unwrap();
    store
        .upsert_file(&sample_record("/data/proj/b.py", "b.py"))
        .unwrap();
    store
        .upsert_file(&sample_record("/data/other/c.py", "c.py"))
        .unwrap();

    let stats = store.get_stats().unwrap();
    assert_eq!(stats.total_files, 3);
    assert_eq!(stats.total_directories, 2);
    assert_eq!(stats.top_file_types[0].0, ".py");

    let dirs = store.list_directories(None, 10).unwrap();
    assert_eq!(dirs.len(), 2);
    assert_eq!(dirs[0].directory, "/data/proj");
    assert_eq!(dirs[0].file_count, 2);

    let under = store.list_directories(Some("/data/other"), 10).unwrap();
    assert_eq!(under.len(), 1);

    assert!(store.update_directory_stats("/data/proj").unwrap());
}

#[test]
fn rebuild_feed_joins_chunks_with_embeddings() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let path = "/data/proj/a.py";
    store.upsert_file(&sample_record(path, "a.py")).unwrap();

    let envelopes = sample_envelopes("a.py", &["alpha body", "beta body"]);
    let embeddings = vec![vec![1.0f32, 0.0], vec![0.0f32, 1.0]];
    store
        .replace_chunks(path, &envelopes, Some(&embeddings))
        .unwrap();
    store.put_analysis(&sample_analysis(path), 0.01).unwrap();

    let feed = store.chunks_for_rebuild().unwrap();
    assert_eq!(feed.len(), 2);
    assert_eq!(feed[0].chunk_index, 0);
    assert_eq!(feed[0].embedding, vec![1.0, 0.0]);
    assert_eq!(feed[0].name, "a.py");
    assert_eq!(feed[1].text, "beta body");
    assert!(feed[0].keywords.contains(&"retrieval".to_string()));
}

#[test]
fn analysis_round_trips_json_fields() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let path = "/data/proj/a.py";
    store.upsert_file(&sample_record(path, "a.py")).unwrap();
    store.put_analysis(&sample_analysis(path), 0.25).unwrap();

    let analysis = store.get_analysis(path).unwrap().unwrap();
    assert_eq!(analysis.keywords, vec!["retrieval", "chunks"]);
    assert_eq!(analysis.tfidf_keywords[0].0, "retrieval engine");
    assert_eq!(analysis.topics[0].0, 0);
    assert!((analysis.processing_time_s - 0.25).abs() < 1e-9);
}
