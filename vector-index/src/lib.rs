//! Two-tier approximate-nearest-neighbour index.
//!
//! Major holds the bulk of vectors and changes rarely; Minor absorbs
//! incremental additions until compaction folds it into Major. Both tiers
//! share one monotonic vector-id space (`major_count + minor_count + i` at
//! insert time), ids are never reused, and modified files are handled by a
//! staleness set filtered at query time; the graphs never remove entries.

mod index;
mod slab;
mod state;

pub use index::{ChunkInsert, CompactionReport, IndexStats, RebuildReport, SearchResult, TierStats, TwoTierIndex};
pub use state::{FileEntry, IndexState, Tier, VectorMeta};

/// Compaction triggers at this many Minor vectors (or >10% of Major).
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("mismatch: {chunks} chunks but {embeddings} embeddings")]
    LengthMismatch { chunks: usize, embeddings: usize },
    #[error("corrupt index file {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("index lock poisoned")]
    Poisoned,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Scale a vector to unit length in place. Zero vectors are left as-is.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
