//! Engine wiring: owns the store path, the two-tier vector index, the
//! extractor/chunker/analyzer pipeline, the optional embedder capability,
//! the knowledge graph and the cancel flag. Signal handlers (CLI-side)
//! only flip the cancel flag.

mod config;
mod orchestrator;
mod query;

pub use config::EngineConfig;
pub use query::{EngineStats, FileInfo, QueryService};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use autograph_kg::AutographKg;
use content_analyzer::Analyzer;
use embedding_provider::Embedder;
use file_chunker::{Chunker, ExtractorRegistry};
use index_model::ProcessingRun;
use metadata_store::Store;
use vector_index::TwoTierIndex;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not a directory: {0}")]
    InvalidRoot(String),
    #[error("semantic search unavailable: no embedder configured")]
    EmbedderUnavailable,
    #[error(transparent)]
    Store(#[from] metadata_store::StoreError),
    #[error(transparent)]
    Index(#[from] vector_index::IndexError),
    #[error(transparent)]
    Scan(#[from] file_scanner::ScanError),
    #[error(transparent)]
    Graph(#[from] autograph_kg::KgError),
    #[error("embedder error: {0}")]
    Embedder(#[from] embedding_provider::EmbedderError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counting semaphore gating every operation that opens a file, regardless
/// of worker count.
pub(crate) struct FdGate {
    permits: Mutex<usize>,
    available: Condvar,
}

impl FdGate {
    fn new(permits: usize) -> FdGate {
        FdGate {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) -> FdPermit<'_> {
        let mut permits = lock_or_recover(&self.permits);
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *permits -= 1;
        FdPermit { gate: self }
    }
}

pub(crate) struct FdPermit<'a> {
    gate: &'a FdGate,
}

impl Drop for FdPermit<'_> {
    fn drop(&mut self) {
        let mut permits = lock_or_recover(&self.gate.permits);
        *permits += 1;
        self.gate.available.notify_one();
    }
}

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) index: Arc<TwoTierIndex>,
    pub(crate) embedder: Option<Arc<dyn Embedder>>,
    pub(crate) chunker: Chunker,
    pub(crate) analyzer: Analyzer,
    pub(crate) extractors: ExtractorRegistry,
    pub(crate) kg: Mutex<AutographKg>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) fd_gate: FdGate,
}

impl Engine {
    /// Build an engine. `embedder` is a detected capability; `None` makes
    /// semantic search and context recall degraded outcomes, not errors.
    pub fn new(
        config: EngineConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Engine, EngineError> {
        // Ensure the schema exists and the database is reachable up front.
        let store = Store::open(&config.db_path)?;
        store.ping()?;

        let dimension = embedder
            .as_ref()
            .map(|e| e.info().dimension)
            .unwrap_or(config.embedding_dimension);
        let index = Arc::new(TwoTierIndex::open(&config.index_dir, dimension)?);
        if index.migrate_from_legacy()? {
            tracing::info!("legacy single-file index migrated to the two-tier layout");
        }
        let kg = AutographKg::open(&config.kg_path, embedder.clone())?;

        tracing::info!(
            db = %config.db_path.display(),
            index_dir = %config.index_dir.display(),
            dimension,
            embedder = embedder.is_some(),
            "engine ready"
        );

        Ok(Engine {
            config,
            index,
            embedder,
            chunker: Chunker::default(),
            analyzer: Analyzer::new(),
            extractors: ExtractorRegistry::new(),
            kg: Mutex::new(kg),
            cancel: Arc::new(AtomicBool::new(false)),
            fd_gate: FdGate::new(50),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared cancel flag; signal handlers set it and workers observe it
    /// between files.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn request_shutdown(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Each caller (thread) opens its own connection.
    pub fn open_store(&self) -> Result<Store, EngineError> {
        Ok(Store::open(&self.config.db_path)?)
    }

    pub fn vector_index(&self) -> &TwoTierIndex {
        &self.index
    }

    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    pub fn autograph(&self) -> &Mutex<AutographKg> {
        &self.kg
    }

    pub fn queries(&self) -> QueryService<'_> {
        QueryService::new(self)
    }

    /// Ingest a directory tree with bounded parallelism.
    pub fn scan_directory(
        &self,
        root: &Path,
        workers: usize,
        force: bool,
    ) -> Result<ProcessingRun, EngineError> {
        orchestrator::scan_directory(self, root, workers, force)
    }

    /// Rebuild the Major tier from every chunk + embedding stored in the
    /// database. Clears Minor and the stale set.
    pub fn rebuild_major_from_store(&self) -> Result<vector_index::RebuildReport, EngineError> {
        let store = self.open_store()?;
        let feed = store.chunks_for_rebuild()?;
        let mut chunks = Vec::with_capacity(feed.len());
        let mut embeddings = Vec::with_capacity(feed.len());
        for item in feed {
            chunks.push(vector_index::ChunkInsert {
                file_path: item.path,
                file_name: item.name,
                file_type: item.file_type,
                chunk_index: item.chunk_index,
                total_chunks: 0,
                chunk_text: item.text,
                keywords: item.keywords,
                file_hash: item.file_hash,
            });
            embeddings.push(item.embedding);
        }
        // total_chunks per file is recovered from the per-file group sizes.
        let mut per_file: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for chunk in &chunks {
            *per_file.entry(chunk.file_path.clone()).or_insert(0) += 1;
        }
        for chunk in &mut chunks {
            chunk.total_chunks = per_file[&chunk.file_path];
        }
        Ok(self.index.rebuild_major(&chunks, &embeddings)?)
    }

    pub fn compact_index(&self) -> Result<vector_index::CompactionReport, EngineError> {
        Ok(self.index.compact()?)
    }

    pub fn migrate_legacy_index(&self) -> Result<bool, EngineError> {
        Ok(self.index.migrate_from_legacy()?)
    }
}
