use vector_index::{ChunkInsert, Tier, TwoTierIndex};

const DIM: usize = 8;

fn one_hot(i: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[i % DIM] = 1.0;
    v
}

/// Distinct directions that are not axis-aligned; injective for i < 64 so
/// no two test vectors tie at similarity 1.0.
fn blended(i: usize) -> Vec<f32> {
    let mut v = vec![0.05f32; DIM];
    v[i % DIM] += 2.0;
    v[(i / DIM) % DIM] += 1.0;
    v
}

fn chunks_for(path: &str, n: usize) -> Vec<ChunkInsert> {
    (0..n)
        .map(|i| ChunkInsert {
            file_path: path.to_string(),
            file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            file_type: "py".into(),
            chunk_index: i,
            total_chunks: n,
            chunk_text: format!("chunk {i} of {path}"),
            keywords: vec![],
            file_hash: format!("hash-{path}"),
        })
        .collect()
}

#[test]
fn vector_ids_are_monotonic_and_never_reused() {
    let dir = tempfile::tempdir().unwrap();
    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();

    index
        .add(&chunks_for("/a.py", 3), &[one_hot(0), one_hot(1), one_hot(2)], Some("h1"))
        .unwrap();
    index
        .add(&chunks_for("/b.py", 2), &[one_hot(3), one_hot(4)], Some("h2"))
        .unwrap();

    let state = index.state_snapshot().unwrap();
    assert_eq!(state.indexed_files["/a.py"].vector_ids, vec![0, 1, 2]);
    assert_eq!(state.indexed_files["/b.py"].vector_ids, vec![3, 4]);

    // Re-adding /a.py allocates fresh ids past the live total and stales
    // the old ones. live ∪ stale covers every id ever allocated.
    index
        .add(&chunks_for("/a.py", 2), &[one_hot(5), one_hot(6)], Some("h1b"))
        .unwrap();
    let state = index.state_snapshot().unwrap();
    assert_eq!(state.indexed_files["/a.py"].vector_ids, vec![5, 6]);
    assert_eq!(
        state.stale_vector_ids.iter().copied().collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    let mut all: Vec<u64> = state
        .indexed_files
        .values()
        .flat_map(|e| e.vector_ids.iter().copied())
        .chain(state.stale_vector_ids.iter().copied())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (0..7).collect::<Vec<u64>>());
}

#[test]
fn length_and_dimension_mismatches_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();

    let err = index
        .add(&chunks_for("/a.py", 2), &[one_hot(0)], None)
        .unwrap_err();
    assert!(err.to_string().contains("2 chunks but 1 embeddings"));

    let err = index
        .add(&chunks_for("/a.py", 1), &[vec![1.0; DIM + 1]], None)
        .unwrap_err();
    assert!(err.to_string().contains("dimension mismatch"));
}

#[test]
fn two_tier_search_fusion_tags_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();

    // Major: 10 vectors for file X via rebuild.
    let x_chunks = chunks_for("/x.py", 10);
    let x_vectors: Vec<Vec<f32>> = (0..10).map(blended).collect();
    index.rebuild_major(&x_chunks, &x_vectors).unwrap();

    // Minor: 5 vectors for file Y.
    let y_chunks = chunks_for("/y.py", 5);
    let y_vectors: Vec<Vec<f32>> = (10..15).map(blended).collect();
    index.add(&y_chunks, &y_vectors, Some("hy")).unwrap();

    // Querying with X's first vector returns that exact chunk, from major.
    let hits = index.search(&x_vectors[0], 3, true).unwrap();
    assert_eq!(hits[0].file_path, "/x.py");
    assert_eq!(hits[0].chunk_index, 0);
    assert_eq!(hits[0].tier, Tier::Major);
    assert!((hits[0].similarity - 1.0).abs() < 1e-4);

    // Querying with Y's first vector returns a Y chunk from minor.
    let hits = index.search(&y_vectors[0], 3, true).unwrap();
    assert_eq!(hits[0].file_path, "/y.py");
    assert_eq!(hits[0].tier, Tier::Minor);
    assert!((hits[0].similarity - 1.0).abs() < 1e-4);

    // Results are sorted by similarity and contain no duplicate keys.
    let hits = index.search(&x_vectors[0], 10, true).unwrap();
    for pair in hits.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
    let mut keys: Vec<(String, usize)> = hits
        .iter()
        .map(|h| (h.file_path.clone(), h.chunk_index))
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), hits.len());
}

#[test]
fn re_add_deduplicates_and_stales_previous_ids() {
    let dir = tempfile::tempdir().unwrap();
    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();

    let chunks = chunks_for("/z.py", 3);
    index
        .add(&chunks, &[blended(0), blended(1), blended(2)], Some("v1"))
        .unwrap();
    index
        .add(&chunks, &[blended(3), blended(4), blended(5)], Some("v2"))
        .unwrap();

    let state = index.state_snapshot().unwrap();
    assert_eq!(
        state.stale_vector_ids.iter().copied().collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    let hits = index.search(&blended(3), 10, true).unwrap();
    let z_hits: Vec<_> = hits.iter().filter(|h| h.file_path == "/z.py").collect();
    assert!(z_hits.len() <= 3, "dedupe by (path, chunk_index) failed");
    for hit in z_hits {
        assert!(hit.vector_id >= 3, "stale vector leaked into results");
    }
}

#[test]
fn marking_stale_hides_a_file_until_reindexed() {
    let dir = tempfile::tempdir().unwrap();
    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();

    index
        .add(&chunks_for("/gone.py", 2), &[one_hot(0), one_hot(1)], Some("h"))
        .unwrap();
    assert!(index.is_file_indexed("/gone.py", None));

    let stale = index.mark_file_stale("/gone.py").unwrap();
    assert_eq!(stale, vec![0, 1]);
    assert!(!index.is_file_indexed("/gone.py", None));

    let hits = index.search(&one_hot(0), 10, true).unwrap();
    assert!(hits.iter().all(|h| h.file_path != "/gone.py"));

    // Unfiltered search still sees the physical vectors.
    let hits = index.search(&one_hot(0), 10, false).unwrap();
    assert!(hits.iter().any(|h| h.file_path == "/gone.py"));

    // Re-ingesting brings the file back.
    index
        .add(&chunks_for("/gone.py", 1), &[one_hot(0)], Some("h2"))
        .unwrap();
    let hits = index.search(&one_hot(0), 10, true).unwrap();
    assert!(hits.iter().any(|h| h.file_path == "/gone.py"));
}

#[test]
fn is_file_indexed_is_hash_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();
    index
        .add(&chunks_for("/a.py", 1), &[one_hot(0)], Some("hash-a"))
        .unwrap();

    assert!(index.is_file_indexed("/a.py", None));
    assert!(index.is_file_indexed("/a.py", Some("hash-a")));
    assert!(!index.is_file_indexed("/a.py", Some("other")));
    assert!(!index.is_file_indexed("/missing.py", None));
}

#[test]
fn compaction_preserves_counts_and_staleness() {
    let dir = tempfile::tempdir().unwrap();
    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();

    index
        .rebuild_major(&chunks_for("/base.py", 4), &(0..4).map(blended).collect::<Vec<_>>())
        .unwrap();
    index
        .add(&chunks_for("/new.py", 3), &(4..7).map(blended).collect::<Vec<_>>(), Some("hn"))
        .unwrap();
    // Stale one id before compaction; it must remain stale after.
    index.mark_file_stale("/new.py").unwrap();
    index
        .add(&chunks_for("/new.py", 2), &(7..9).map(blended).collect::<Vec<_>>(), Some("hn2"))
        .unwrap();

    assert!(index.needs_compaction(1)); // minor/major ratio over 10%
    let report = index.compact().unwrap();
    assert!(report.compacted);
    assert_eq!(report.post_major, report.pre_major + report.pre_minor);

    let state = index.state_snapshot().unwrap();
    assert_eq!(state.minor_vector_count, 0);
    assert_eq!(state.major_vector_count, report.post_major);
    assert!(!state.stale_vector_ids.is_empty(), "stale ids survive compaction");
    for entry in state.indexed_files.values() {
        assert_eq!(entry.tier, Tier::Major);
    }
    assert!(!dir.path().join("file_search_minor.faiss").exists());

    // Second compact is a no-op.
    let report = index.compact().unwrap();
    assert!(!report.compacted);
}

#[test]
fn rebuild_resets_ids_and_staleness() {
    let dir = tempfile::tempdir().unwrap();
    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();

    index
        .add(&chunks_for("/a.py", 2), &[blended(0), blended(1)], Some("h"))
        .unwrap();
    index.mark_file_stale("/a.py").unwrap();

    let mut chunks = chunks_for("/a.py", 2);
    chunks.extend(chunks_for("/b.py", 2));
    let vectors: Vec<Vec<f32>> = (0..4).map(blended).collect();
    let report = index.rebuild_major(&chunks, &vectors).unwrap();
    assert_eq!(report.total_vectors, 4);
    assert_eq!(report.indexed_files, 2);

    let state = index.state_snapshot().unwrap();
    assert!(state.stale_vector_ids.is_empty());
    let mut all_ids: Vec<u64> = state
        .indexed_files
        .values()
        .flat_map(|e| e.vector_ids.iter().copied())
        .collect();
    all_ids.sort_unstable();
    assert_eq!(all_ids, vec![0, 1, 2, 3]);
}

#[test]
fn index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let index = TwoTierIndex::open(dir.path(), DIM).unwrap();
        index
            .rebuild_major(&chunks_for("/a.py", 3), &(0..3).map(blended).collect::<Vec<_>>())
            .unwrap();
        index
            .add(&chunks_for("/b.py", 2), &(3..5).map(blended).collect::<Vec<_>>(), Some("hb"))
            .unwrap();
    }

    let reopened = TwoTierIndex::open(dir.path(), DIM).unwrap();
    let stats = reopened.get_stats();
    assert_eq!(stats.major.vector_count, 3);
    assert_eq!(stats.minor.vector_count, 2);
    assert_eq!(stats.total_vectors, 5);

    let hits = reopened.search(&blended(4), 2, true).unwrap();
    assert_eq!(hits[0].file_path, "/b.py");
    assert_eq!(hits[0].tier, Tier::Minor);
}

#[test]
fn legacy_layout_migrates_once() {
    let dir = tempfile::tempdir().unwrap();

    // Build a single-tier index, then rewind it to the legacy layout.
    {
        let index = TwoTierIndex::open(dir.path(), DIM).unwrap();
        index
            .rebuild_major(&chunks_for("/old.py", 3), &(0..3).map(blended).collect::<Vec<_>>())
            .unwrap();
    }
    std::fs::rename(
        dir.path().join("file_search_major.faiss"),
        dir.path().join("file_search.faiss"),
    )
    .unwrap();
    std::fs::rename(
        dir.path().join("file_search_major_meta.json"),
        dir.path().join("file_search_meta.json"),
    )
    .unwrap();
    std::fs::remove_file(dir.path().join("file_search_index_state.json")).unwrap();

    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();
    assert!(index.migrate_from_legacy().unwrap());
    assert!(dir.path().join("file_search_major.faiss").exists());
    assert!(!dir.path().join("file_search.faiss").exists());

    let state = index.state_snapshot().unwrap();
    assert_eq!(state.major_vector_count, 3);
    assert_eq!(state.indexed_files["/old.py"].vector_ids, vec![0, 1, 2]);
    assert_eq!(state.indexed_files["/old.py"].tier, Tier::Major);

    // Running the migration again is a no-op.
    assert!(!index.migrate_from_legacy().unwrap());

    // A fresh open reports the migrated count.
    let reopened = TwoTierIndex::open(dir.path(), DIM).unwrap();
    assert_eq!(reopened.get_stats().major.vector_count, 3);
}

#[test]
fn needs_compaction_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let index = TwoTierIndex::open(dir.path(), DIM).unwrap();

    assert!(!index.needs_compaction(1000));
    index
        .rebuild_major(&chunks_for("/big.py", 20), &(0..20).map(blended).collect::<Vec<_>>())
        .unwrap();
    index
        .add(&chunks_for("/inc.py", 3), &(20..23).map(blended).collect::<Vec<_>>(), None)
        .unwrap();

    // 3/20 = 15% of major: ratio rule fires even under the count threshold.
    assert!(index.needs_compaction(1000));
}
