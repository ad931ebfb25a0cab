//! Engine configuration with environment overrides.
//!
//! `FILE_METADATA_DB`, `FAISS_DATA_DIR` and `KG_PATH` override the
//! defaults, which live under `~/data`.

use std::path::{Path, PathBuf};

use file_scanner::ScanPolicy;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub index_dir: PathBuf,
    pub kg_path: PathBuf,
    pub scan_policy: ScanPolicy,
    /// Used when no embedder is configured (MiniLM-class default).
    pub embedding_dimension: usize,
    pub compaction_threshold: usize,
    /// Compact automatically after a scan when the minor tier is due.
    pub auto_compact: bool,
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_root = default_data_root();
        Self {
            db_path: data_root.join("file_metadata.sqlite3"),
            index_dir: data_root.clone(),
            kg_path: data_root.join("knowledge_graph"),
            scan_policy: ScanPolicy::default(),
            embedding_dimension: 384,
            compaction_threshold: vector_index::DEFAULT_COMPACTION_THRESHOLD,
            auto_compact: true,
            workers: 4,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment-variable overrides applied.
    pub fn from_env() -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(db) = std::env::var_os("FILE_METADATA_DB") {
            config.db_path = PathBuf::from(db);
        }
        if let Some(dir) = std::env::var_os("FAISS_DATA_DIR") {
            config.index_dir = PathBuf::from(dir);
        }
        if let Some(kg) = std::env::var_os("KG_PATH") {
            config.kg_path = PathBuf::from(kg);
        }
        config
    }

    /// Everything rooted under one directory; used by tests and ad-hoc
    /// installs.
    pub fn with_data_dir(dir: &Path) -> EngineConfig {
        EngineConfig {
            db_path: dir.join("file_metadata.sqlite3"),
            index_dir: dir.to_path_buf(),
            kg_path: dir.join("knowledge_graph"),
            ..EngineConfig::default()
        }
    }
}

fn default_data_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("data"))
        .unwrap_or_else(|| PathBuf::from("data"))
}
