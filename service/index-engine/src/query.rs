//! Unified read path over the store and the vector index. Result ordering
//! is whatever the underlying component returns; nothing re-sorts here.

use index_model::{ChunkEnvelope, ContentAnalysis, FileRecord};
use metadata_store::{DirectorySummary, FtsHit, KeywordHit, MetadataFilter, StoreStats};
use vector_index::{IndexStats, SearchResult};

use crate::{Engine, EngineError};

/// FileRecord joined with its analysis and chunk count.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub record: FileRecord,
    pub analysis: Option<ContentAnalysis>,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub store: StoreStats,
    pub index: IndexStats,
}

pub struct QueryService<'a> {
    engine: &'a Engine,
}

impl<'a> QueryService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> QueryService<'a> {
        QueryService { engine }
    }

    pub fn search_files(
        &self,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<FileRecord>, EngineError> {
        Ok(self.engine.open_store()?.metadata_search(filter, limit)?)
    }

    pub fn full_text_search(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>, EngineError> {
        Ok(self.engine.open_store()?.fts_search(query, limit)?)
    }

    pub fn chunk_text_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(ChunkEnvelope, f64, String)>, EngineError> {
        Ok(self.engine.open_store()?.chunk_fts_search(query, limit)?)
    }

    pub fn get_file_info(&self, path: &str) -> Result<Option<FileInfo>, EngineError> {
        let store = self.engine.open_store()?;
        let Some(record) = store.get_file(path)? else {
            return Ok(None);
        };
        let analysis = store.get_analysis(path)?;
        let chunk_count = store.chunk_count(path)?;
        Ok(Some(FileInfo {
            record,
            analysis,
            chunk_count,
        }))
    }

    pub fn get_file_chunks(
        &self,
        path: &str,
        chunk_index: Option<usize>,
    ) -> Result<Vec<ChunkEnvelope>, EngineError> {
        let store = self.engine.open_store()?;
        match chunk_index {
            Some(index) => Ok(store.get_chunk(path, index)?.into_iter().collect()),
            None => Ok(store.get_chunks(path)?),
        }
    }

    pub fn get_adjacent_chunks(
        &self,
        path: &str,
        chunk_index: usize,
        before: usize,
        after: usize,
    ) -> Result<Vec<ChunkEnvelope>, EngineError> {
        Ok(self
            .engine
            .open_store()?
            .get_adjacent(path, chunk_index, before, after)?)
    }

    pub fn list_directories(
        &self,
        parent: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DirectorySummary>, EngineError> {
        Ok(self.engine.open_store()?.list_directories(parent, limit)?)
    }

    pub fn search_by_keywords(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<KeywordHit>, EngineError> {
        Ok(self.engine.open_store()?.keyword_search(keywords, limit)?)
    }

    /// Embed the query and fuse results from both index tiers. Errors with
    /// `EmbedderUnavailable` when no embedder capability is configured.
    pub fn semantic_search(
        &self,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let embedder = self
            .engine
            .embedder
            .as_ref()
            .ok_or(EngineError::EmbedderUnavailable)?;
        let query = embedder.embed(query_text)?;
        Ok(self.engine.index.search(&query, limit, true)?)
    }

    pub fn get_stats(&self) -> Result<EngineStats, EngineError> {
        Ok(EngineStats {
            store: self.engine.open_store()?.get_stats()?,
            index: self.engine.index.get_stats(),
        })
    }
}
