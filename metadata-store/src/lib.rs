//! Durable metadata, chunk and analysis store on SQLite.
//!
//! Single writer, many readers: WAL journaling with a 5-second busy timeout,
//! plus an application-level retry with exponential backoff on busy/locked.
//! Each `Store` value owns one connection; worker threads open their own.

mod search;
mod store;

pub use search::{DirectorySummary, FtsHit, KeywordHit, MetadataFilter};
pub use store::{FileChunkStats, RebuildChunk, Store, StoreStats};

/// Busy/locked writes retry this many times before surfacing.
pub const MAX_RETRIES: usize = 5;
/// Base delay for the exponential backoff between retries.
pub const RETRY_BASE_DELAY_MS: u64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database busy after {0} attempts")]
    Busy(usize),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
