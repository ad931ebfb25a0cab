//! Persistent index state and per-vector metadata records.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Which ANN container currently owns a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Major,
    Minor,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Major => "major",
            Tier::Minor => "minor",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata stored alongside each vector in the tier meta files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMeta {
    pub id: u64,
    pub file_path: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    pub chunk_index: usize,
    #[serde(default = "default_total_chunks")]
    pub total_chunks: usize,
    #[serde(default)]
    pub chunk_text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_total_chunks() -> usize {
    1
}

/// Per-file tracking: content hash, owning tier, and the live vector ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub hash: String,
    pub tier: Tier,
    pub vector_ids: Vec<u64>,
}

/// State persisted next to the ANN binaries. Binary writes always precede
/// the state write, so a fresh open can trust the binaries' vector counts
/// over these fields after a crash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    pub major_build_timestamp: Option<String>,
    pub minor_build_timestamp: Option<String>,
    pub major_vector_count: usize,
    pub minor_vector_count: usize,
    #[serde(default)]
    pub indexed_files: BTreeMap<String, FileEntry>,
    #[serde(default)]
    pub stale_vector_ids: BTreeSet<u64>,
}

/// On-disk layout of the `*_meta.json` files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaFile {
    pub build_info: BuildInfo,
    pub vectors: Vec<VectorMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    pub build_timestamp: String,
    pub total_vectors: usize,
    pub tier: Tier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_with_contract_names() {
        let mut state = IndexState::default();
        state.major_vector_count = 3;
        state.stale_vector_ids.insert(7);
        state.indexed_files.insert(
            "/a.py".into(),
            FileEntry {
                hash: "h".into(),
                tier: Tier::Minor,
                vector_ids: vec![1, 2],
            },
        );
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"major_vector_count\":3"));
        assert!(json.contains("\"stale_vector_ids\":[7]"));
        assert!(json.contains("\"tier\":\"minor\""));

        let back: IndexState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
