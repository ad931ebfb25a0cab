//! The two-tier index proper: in-memory HNSW graphs per tier, durable
//! slabs + metadata JSON + state JSON on disk.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{SecondsFormat, Utc};
use hnsw_rs::prelude::*;

use crate::slab;
use crate::state::{BuildInfo, FileEntry, IndexState, MetaFile, Tier, VectorMeta};
use crate::{l2_normalize, IndexError, DEFAULT_COMPACTION_THRESHOLD};

const HNSW_MAX_NB_CONNECTION: usize = 16;
const HNSW_MAX_LAYER: usize = 16;
const HNSW_EF_CONSTRUCTION: usize = 200;
const HNSW_EF_SEARCH_FLOOR: usize = 100;
const HNSW_CAPACITY_HINT: usize = 10_000;

/// What callers hand to `add` / `rebuild_major` for each chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkInsert {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Cached preview stored with the vector.
    pub chunk_text: String,
    pub keywords: Vec<String>,
    pub file_hash: String,
}

/// One fused search hit. `tier` names the container it came from.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub vector_id: u64,
    pub file_path: String,
    pub chunk_index: usize,
    pub chunk_text: String,
    pub similarity: f32,
    pub tier: Tier,
    pub meta: VectorMeta,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionReport {
    pub compacted: bool,
    pub pre_major: usize,
    pub pre_minor: usize,
    pub post_major: usize,
    pub stale_vectors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RebuildReport {
    pub total_vectors: usize,
    pub indexed_files: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierStats {
    pub exists: bool,
    pub vector_count: usize,
    pub build_timestamp: Option<String>,
    pub file_size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub major: TierStats,
    pub minor: TierStats,
    pub total_vectors: usize,
    pub indexed_files: usize,
    pub stale_vectors: usize,
    pub needs_compaction: bool,
}

struct TierData {
    vectors: Vec<Vec<f32>>,
    meta: Vec<VectorMeta>,
    graph: Hnsw<'static, f32, DistCosine>,
}

fn new_graph(capacity: usize) -> Hnsw<'static, f32, DistCosine> {
    Hnsw::<f32, DistCosine>::new(
        HNSW_MAX_NB_CONNECTION,
        capacity.max(1),
        HNSW_MAX_LAYER,
        HNSW_EF_CONSTRUCTION,
        DistCosine {},
    )
}

impl TierData {
    fn empty() -> TierData {
        TierData {
            vectors: Vec::new(),
            meta: Vec::new(),
            graph: new_graph(HNSW_CAPACITY_HINT),
        }
    }

    fn from_parts(vectors: Vec<Vec<f32>>, meta: Vec<VectorMeta>) -> TierData {
        let graph = new_graph(vectors.len().max(HNSW_CAPACITY_HINT));
        let data: Vec<(&Vec<f32>, usize)> =
            vectors.iter().enumerate().map(|(i, v)| (v, i)).collect();
        if !data.is_empty() {
            graph.parallel_insert(&data);
        }
        TierData {
            vectors,
            meta,
            graph,
        }
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn push(&mut self, vector: Vec<f32>, meta: VectorMeta) {
        let position = self.vectors.len();
        self.graph.insert((&vector, position));
        self.vectors.push(vector);
        self.meta.push(meta);
    }

    /// k-NN by position within the tier; similarity is 1 − cosine distance.
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if self.len() == 0 || k == 0 {
            return Vec::new();
        }
        let ef = k.max(HNSW_EF_SEARCH_FLOOR);
        self.graph
            .search(query, k, ef)
            .into_iter()
            .filter(|n| n.d_id < self.meta.len())
            .map(|n| (n.d_id, 1.0 - n.distance))
            .collect()
    }
}

struct Inner {
    major: TierData,
    minor: TierData,
    state: IndexState,
}

/// Two independent ANN containers over one id space, with staleness
/// filtering and query-time fusion. All writes take the write lock; search
/// runs under the read lock (the graph search itself is `&self`).
pub struct TwoTierIndex {
    dim: usize,
    data_dir: PathBuf,
    inner: RwLock<Inner>,
}

impl TwoTierIndex {
    pub fn open(data_dir: &Path, dim: usize) -> Result<TwoTierIndex, IndexError> {
        std::fs::create_dir_all(data_dir)?;
        let index = TwoTierIndex {
            dim,
            data_dir: data_dir.to_path_buf(),
            inner: RwLock::new(Inner {
                major: TierData::empty(),
                minor: TierData::empty(),
                state: IndexState::default(),
            }),
        };

        let mut state = index.load_state();
        let major = index.load_tier(&index.major_index_path(), &index.major_meta_path())?;
        let minor = index.load_tier(&index.minor_index_path(), &index.minor_meta_path())?;

        // The binaries' vector counts are authoritative after a crash.
        if state.major_vector_count != major.len() || state.minor_vector_count != minor.len() {
            tracing::warn!(
                state_major = state.major_vector_count,
                binary_major = major.len(),
                state_minor = state.minor_vector_count,
                binary_minor = minor.len(),
                "index state disagreed with binaries, trusting binaries"
            );
            state.major_vector_count = major.len();
            state.minor_vector_count = minor.len();
        }

        {
            let mut inner = index.inner.write().map_err(|_| IndexError::Poisoned)?;
            inner.major = major;
            inner.minor = minor;
            inner.state = state;
        }
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn major_index_path(&self) -> PathBuf {
        self.data_dir.join("file_search_major.faiss")
    }
    fn major_meta_path(&self) -> PathBuf {
        self.data_dir.join("file_search_major_meta.json")
    }
    fn minor_index_path(&self) -> PathBuf {
        self.data_dir.join("file_search_minor.faiss")
    }
    fn minor_meta_path(&self) -> PathBuf {
        self.data_dir.join("file_search_minor_meta.json")
    }
    fn state_path(&self) -> PathBuf {
        self.data_dir.join("file_search_index_state.json")
    }
    fn legacy_index_path(&self) -> PathBuf {
        self.data_dir.join("file_search.faiss")
    }
    fn legacy_meta_path(&self) -> PathBuf {
        self.data_dir.join("file_search_meta.json")
    }

    fn load_state(&self) -> IndexState {
        let path = self.state_path();
        if !path.exists() {
            return IndexState::default();
        }
        match std::fs::read_to_string(&path)
            .map_err(IndexError::from)
            .and_then(|s| serde_json::from_str(&s).map_err(IndexError::from))
        {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "could not load index state, starting fresh");
                IndexState::default()
            }
        }
    }

    fn load_tier(&self, index_path: &Path, meta_path: &Path) -> Result<TierData, IndexError> {
        if !index_path.exists() {
            return Ok(TierData::empty());
        }
        let mut vectors = slab::read_slab(index_path, self.dim)?;
        let mut meta: Vec<VectorMeta> = if meta_path.exists() {
            let raw = std::fs::read_to_string(meta_path)?;
            // Both shapes occur on disk: the build_info wrapper and a bare
            // metadata list from the legacy layout.
            match serde_json::from_str::<MetaFile>(&raw) {
                Ok(file) => file.vectors,
                Err(_) => serde_json::from_str(&raw)?,
            }
        } else {
            Vec::new()
        };

        if meta.len() != vectors.len() {
            tracing::warn!(
                index = %index_path.display(),
                vectors = vectors.len(),
                meta = meta.len(),
                "tier metadata count disagrees with binary, truncating"
            );
            let n = meta.len().min(vectors.len());
            vectors.truncate(n);
            meta.truncate(n);
        }
        Ok(TierData::from_parts(vectors, meta))
    }

    fn persist_tier(&self, tier: Tier, data: &TierData) -> Result<(), IndexError> {
        let (index_path, meta_path) = match tier {
            Tier::Major => (self.major_index_path(), self.major_meta_path()),
            Tier::Minor => (self.minor_index_path(), self.minor_meta_path()),
        };
        // Binary first; the state file is only written after this succeeds.
        slab::write_slab(&index_path, self.dim, &data.vectors)?;
        let meta = MetaFile {
            build_info: BuildInfo {
                build_timestamp: now_utc(),
                total_vectors: data.len(),
                tier,
            },
            vectors: data.meta.clone(),
        };
        write_json(&meta_path, &meta)
    }

    fn save_state(&self, state: &IndexState) -> Result<(), IndexError> {
        write_json(&self.state_path(), state)
    }

    fn validate(
        &self,
        chunks: &[ChunkInsert],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        if embeddings.len() != chunks.len() {
            return Err(IndexError::LengthMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }
        for embedding in embeddings {
            if embedding.len() != self.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dim,
                    got: embedding.len(),
                });
            }
        }
        Ok(())
    }

    /// Add one file's chunks to the Minor tier. Vector ids are allocated as
    /// `major_count + minor_count + i`; a re-indexed file's previous ids
    /// move to the stale set.
    pub fn add(
        &self,
        chunks: &[ChunkInsert],
        embeddings: &[Vec<f32>],
        file_hash: Option<&str>,
    ) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.validate(chunks, embeddings)?;

        let mut normalized = embeddings.to_vec();
        for v in &mut normalized {
            l2_normalize(v);
        }

        let mut inner = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        let base_id = (inner.major.len() + inner.minor.len()) as u64;

        let mut new_ids = Vec::with_capacity(chunks.len());
        for (i, (chunk, vector)) in chunks.iter().zip(normalized).enumerate() {
            let id = base_id + i as u64;
            new_ids.push(id);
            inner.minor.push(
                vector,
                VectorMeta {
                    id,
                    file_path: chunk.file_path.clone(),
                    file_name: chunk.file_name.clone(),
                    file_type: chunk.file_type.clone(),
                    chunk_index: chunk.chunk_index,
                    total_chunks: chunk.total_chunks,
                    chunk_text: chunk.chunk_text.clone(),
                    keywords: chunk.keywords.clone(),
                },
            );
        }

        inner.state.minor_vector_count = inner.minor.len();
        inner.state.minor_build_timestamp = Some(now_utc());

        let file_path = chunks[0].file_path.clone();
        let previous_ids = inner
            .state
            .indexed_files
            .get(&file_path)
            .map(|entry| entry.vector_ids.clone());
        if let Some(ids) = previous_ids {
            inner.state.stale_vector_ids.extend(ids);
        }
        inner.state.indexed_files.insert(
            file_path,
            FileEntry {
                hash: file_hash.unwrap_or("").to_string(),
                tier: Tier::Minor,
                vector_ids: new_ids,
            },
        );

        self.persist_tier(Tier::Minor, &inner.minor)?;
        self.save_state(&inner.state)?;
        tracing::debug!(added = chunks.len(), minor = inner.minor.len(), "vectors added to minor tier");
        Ok(chunks.len())
    }

    /// Query both tiers with `2·top_k` each, filter stale ids, merge, sort
    /// by similarity descending (stable, so Major wins ties), deduplicate by
    /// `(path, chunk_index)` keeping the best score, truncate to `top_k`.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter_stale: bool,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        let inner = self.inner.read().map_err(|_| IndexError::Poisoned)?;
        let mut results: Vec<SearchResult> = Vec::new();

        for (tier_tag, tier) in [(Tier::Major, &inner.major), (Tier::Minor, &inner.minor)] {
            if tier.len() == 0 {
                continue;
            }
            let k = (top_k * 2).min(tier.len());
            for (position, similarity) in tier.search(&normalized, k) {
                let meta = &tier.meta[position];
                if filter_stale && inner.state.stale_vector_ids.contains(&meta.id) {
                    continue;
                }
                results.push(SearchResult {
                    vector_id: meta.id,
                    file_path: meta.file_path.clone(),
                    chunk_index: meta.chunk_index,
                    chunk_text: meta.chunk_text.clone(),
                    similarity,
                    tier: tier_tag,
                    meta: meta.clone(),
                });
            }
        }

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen: HashSet<(String, usize)> = HashSet::new();
        results.retain(|r| seen.insert((r.file_path.clone(), r.chunk_index)));
        results.truncate(top_k);
        Ok(results)
    }

    /// Move every vector of `path` into the stale set and drop the file
    /// from tracking. Returns the ids that became stale.
    pub fn mark_file_stale(&self, path: &str) -> Result<Vec<u64>, IndexError> {
        let mut inner = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        let Some(entry) = inner.state.indexed_files.remove(path) else {
            return Ok(Vec::new());
        };
        inner
            .state
            .stale_vector_ids
            .extend(entry.vector_ids.iter().copied());
        self.save_state(&inner.state)?;
        Ok(entry.vector_ids)
    }

    /// Hash-sensitive when `file_hash` is given: true only if the path is
    /// tracked and the stored hash matches.
    pub fn is_file_indexed(&self, path: &str, file_hash: Option<&str>) -> bool {
        let Ok(inner) = self.inner.read() else {
            return false;
        };
        match inner.state.indexed_files.get(path) {
            None => false,
            Some(entry) => match file_hash {
                Some(hash) => entry.hash == hash,
                None => true,
            },
        }
    }

    pub fn needs_compaction(&self, threshold: usize) -> bool {
        let Ok(inner) = self.inner.read() else {
            return false;
        };
        let minor = inner.minor.len();
        let major = inner.major.len();
        minor >= threshold || (major > 0 && minor as f64 / major as f64 > 0.10)
    }

    /// Append every Minor vector into Major preserving id order, retag
    /// tracked files, delete the Minor files. The stale set is retained.
    pub fn compact(&self) -> Result<CompactionReport, IndexError> {
        let mut inner = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        let pre_major = inner.major.len();
        let pre_minor = inner.minor.len();

        if pre_minor == 0 {
            return Ok(CompactionReport {
                compacted: false,
                pre_major,
                pre_minor,
                post_major: pre_major,
                stale_vectors: inner.state.stale_vector_ids.len(),
            });
        }

        let minor = std::mem::replace(&mut inner.minor, TierData::empty());
        for (vector, meta) in minor.vectors.into_iter().zip(minor.meta) {
            inner.major.push(vector, meta);
        }

        inner.state.major_vector_count = inner.major.len();
        inner.state.major_build_timestamp = Some(now_utc());
        inner.state.minor_vector_count = 0;
        inner.state.minor_build_timestamp = None;
        for entry in inner.state.indexed_files.values_mut() {
            if entry.tier == Tier::Minor {
                entry.tier = Tier::Major;
            }
        }

        self.persist_tier(Tier::Major, &inner.major)?;
        remove_if_exists(&self.minor_index_path())?;
        remove_if_exists(&self.minor_meta_path())?;
        self.save_state(&inner.state)?;

        tracing::info!(
            merged = pre_minor,
            post_major = inner.major.len(),
            "compacted minor tier into major"
        );
        Ok(CompactionReport {
            compacted: true,
            pre_major,
            pre_minor,
            post_major: inner.major.len(),
            stale_vectors: inner.state.stale_vector_ids.len(),
        })
    }

    /// Full rebuild of the Major tier from scratch: ids restart at zero,
    /// Minor is cleared and the stale set is emptied.
    pub fn rebuild_major(
        &self,
        chunks: &[ChunkInsert],
        embeddings: &[Vec<f32>],
    ) -> Result<RebuildReport, IndexError> {
        self.validate(chunks, embeddings)?;

        let mut normalized = embeddings.to_vec();
        for v in &mut normalized {
            l2_normalize(v);
        }

        let mut major = TierData::from_parts(Vec::new(), Vec::new());
        let mut indexed_files: BTreeMap<String, FileEntry> = BTreeMap::new();
        for (i, (chunk, vector)) in chunks.iter().zip(normalized).enumerate() {
            let id = i as u64;
            major.push(
                vector,
                VectorMeta {
                    id,
                    file_path: chunk.file_path.clone(),
                    file_name: chunk.file_name.clone(),
                    file_type: chunk.file_type.clone(),
                    chunk_index: chunk.chunk_index,
                    total_chunks: chunk.total_chunks,
                    chunk_text: chunk.chunk_text.clone(),
                    keywords: chunk.keywords.clone(),
                },
            );
            indexed_files
                .entry(chunk.file_path.clone())
                .or_insert_with(|| FileEntry {
                    hash: chunk.file_hash.clone(),
                    tier: Tier::Major,
                    vector_ids: Vec::new(),
                })
                .vector_ids
                .push(id);
        }

        let mut inner = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        let indexed_file_count = indexed_files.len();
        inner.state = IndexState {
            major_build_timestamp: Some(now_utc()),
            minor_build_timestamp: None,
            major_vector_count: major.len(),
            minor_vector_count: 0,
            indexed_files,
            stale_vector_ids: Default::default(),
        };
        inner.major = major;
        inner.minor = TierData::empty();

        self.persist_tier(Tier::Major, &inner.major)?;
        remove_if_exists(&self.minor_index_path())?;
        remove_if_exists(&self.minor_meta_path())?;
        self.save_state(&inner.state)?;

        tracing::info!(total = inner.major.len(), "rebuilt major tier");
        Ok(RebuildReport {
            total_vectors: inner.major.len(),
            indexed_files: indexed_file_count,
        })
    }

    /// One-time migration from the single-index predecessor layout:
    /// rename `file_search.faiss` / `file_search_meta.json` to the Major
    /// names and re-derive file tracking from the metadata.
    pub fn migrate_from_legacy(&self) -> Result<bool, IndexError> {
        let mut inner = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        if self.major_index_path().exists() {
            return Ok(false);
        }
        if !self.legacy_index_path().exists() {
            return Ok(false);
        }

        tracing::info!("migrating legacy single-index layout to two tiers");
        std::fs::rename(self.legacy_index_path(), self.major_index_path())?;
        if self.legacy_meta_path().exists() {
            std::fs::rename(self.legacy_meta_path(), self.major_meta_path())?;
        }

        let major = self.load_tier(&self.major_index_path(), &self.major_meta_path())?;
        for meta in &major.meta {
            inner
                .state
                .indexed_files
                .entry(meta.file_path.clone())
                .or_insert_with(|| FileEntry {
                    hash: String::new(),
                    tier: Tier::Major,
                    vector_ids: Vec::new(),
                })
                .vector_ids
                .push(meta.id);
        }
        inner.state.major_build_timestamp = Some(now_utc());
        inner.state.major_vector_count = major.len();
        inner.major = major;

        self.save_state(&inner.state)?;
        Ok(true)
    }

    pub fn get_stats(&self) -> IndexStats {
        let Ok(inner) = self.inner.read() else {
            return IndexStats::default();
        };
        let major_path = self.major_index_path();
        let minor_path = self.minor_index_path();
        let minor = inner.minor.len();
        let major = inner.major.len();
        IndexStats {
            major: TierStats {
                exists: major_path.exists(),
                vector_count: major,
                build_timestamp: inner.state.major_build_timestamp.clone(),
                file_size_bytes: file_size(&major_path),
            },
            minor: TierStats {
                exists: minor_path.exists(),
                vector_count: minor,
                build_timestamp: inner.state.minor_build_timestamp.clone(),
                file_size_bytes: file_size(&minor_path),
            },
            total_vectors: major + minor,
            indexed_files: inner.state.indexed_files.len(),
            stale_vectors: inner.state.stale_vector_ids.len(),
            needs_compaction: minor >= DEFAULT_COMPACTION_THRESHOLD
                || (major > 0 && minor as f64 / major as f64 > 0.10),
        }
    }

    /// Snapshot of the persisted state, mostly for diagnostics and tests.
    pub fn state_snapshot(&self) -> Result<IndexState, IndexError> {
        let inner = self.inner.read().map_err(|_| IndexError::Poisoned)?;
        Ok(inner.state.clone())
    }
}

fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), IndexError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
