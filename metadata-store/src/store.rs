//! Core store operations: schema, per-file replacement, chunk retrieval,
//! processing-run bookkeeping.

use std::path::{Path, PathBuf};
use std::time::Duration;

use index_model::{ChunkEnvelope, ContentAnalysis, FileRecord, ProcessingRun, ProcessingStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{StoreError, MAX_RETRIES, RETRY_BASE_DELAY_MS};

pub struct Store {
    conn: Connection,
    path: PathBuf,
}

/// Aggregate chunk statistics for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChunkStats {
    pub chunk_count: usize,
    pub strategy: String,
    pub total_chunks: usize,
    pub file_hash: String,
    pub total_size: usize,
    pub avg_size: f64,
    pub min_size: usize,
    pub max_size: usize,
}

/// One chunk with its stored embedding, as fed to a major-index rebuild.
#[derive(Debug, Clone)]
pub struct RebuildChunk {
    pub path: String,
    pub chunk_index: usize,
    pub text: String,
    pub file_hash: String,
    pub name: String,
    pub file_type: String,
    pub keywords: Vec<String>,
    pub embedding: Vec<f32>,
}

/// Database-wide counts for status reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub top_file_types: Vec<(String, usize)>,
    pub files_with_analysis: usize,
    pub total_chunks: usize,
    pub total_directories: usize,
}

impl Store {
    /// Open (creating if needed) the store at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Store, StoreError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        // WAL allows concurrent readers during writes; the busy timeout is
        // the first line of defense before the application-level retry.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let store = Store {
            conn,
            path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Connectivity probe used before long runs.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS file_metadata (
                file_path TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                directory TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                file_type TEXT,
                mime_type TEXT,
                created_date TEXT,
                modified_date TEXT,
                accessed_date TEXT,
                permissions TEXT,
                file_hash TEXT,
                is_text_file BOOLEAN,
                encoding TEXT,
                processing_status TEXT DEFAULT 'success',
                error_message TEXT,
                indexed_date TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS directory_structure (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                directory_path TEXT UNIQUE NOT NULL,
                parent_directory TEXT,
                file_count INTEGER DEFAULT 0,
                total_size INTEGER DEFAULT 0,
                last_updated TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS content_analysis (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                word_count INTEGER,
                char_count INTEGER,
                language TEXT,
                topic_summary TEXT,
                keywords TEXT,
                tfidf_keywords TEXT,
                lda_topics TEXT,
                processing_status TEXT DEFAULT 'success',
                error_message TEXT,
                analysis_date TEXT DEFAULT CURRENT_TIMESTAMP,
                processing_time_seconds REAL,
                FOREIGN KEY (file_path) REFERENCES file_metadata (file_path)
            );

            CREATE TABLE IF NOT EXISTS text_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_text TEXT NOT NULL,
                chunk_embedding BLOB,
                FOREIGN KEY (file_path) REFERENCES file_metadata (file_path)
            );

            CREATE TABLE IF NOT EXISTS text_chunks_v2 (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_envelope TEXT NOT NULL,
                chunk_strategy TEXT,
                chunk_size INTEGER,
                total_chunks INTEGER,
                file_hash TEXT,
                file_type TEXT,
                created_at TEXT,
                embedding BLOB
            );

            CREATE TABLE IF NOT EXISTS embeddings_index (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                embedding TEXT NOT NULL,
                metadata TEXT
            );

            CREATE TABLE IF NOT EXISTS processing_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                directory TEXT,
                total_files INTEGER,
                successful_files INTEGER,
                failed_files INTEGER,
                permission_denied_files INTEGER,
                size_limit_exceeded_files INTEGER,
                encoding_error_files INTEGER,
                file_not_found_files INTEGER,
                timeout_files INTEGER,
                unknown_error_files INTEGER,
                skipped_unchanged INTEGER,
                interrupted INTEGER DEFAULT 0,
                start_time TEXT,
                end_time TEXT,
                duration_seconds REAL
            );

            CREATE INDEX IF NOT EXISTS idx_file_type ON file_metadata(file_type);
            CREATE INDEX IF NOT EXISTS idx_directory ON file_metadata(directory);
            CREATE INDEX IF NOT EXISTS idx_processing_status ON file_metadata(processing_status);
            CREATE INDEX IF NOT EXISTS idx_content_file_path ON content_analysis(file_path);
            CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON text_chunks(file_path);
            CREATE INDEX IF NOT EXISTS idx_chunks_v2_file_path ON text_chunks_v2(file_path, chunk_index);
            CREATE INDEX IF NOT EXISTS idx_embeddings_file_path ON embeddings_index(file_path, chunk_index);

            CREATE VIRTUAL TABLE IF NOT EXISTS content_fts USING fts5(
                file_path,
                content,
                content_id UNINDEXED
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                file_path UNINDEXED,
                chunk_index UNINDEXED,
                chunk_text
            );
            "#,
        )?;
        Ok(())
    }

    /// Run a write closure, retrying on busy/locked with exponential
    /// backoff before surfacing.
    pub(crate) fn with_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        for attempt in 0..MAX_RETRIES {
            match op(&self.conn) {
                Ok(value) => return Ok(value),
                Err(err) if is_busy(&err) && attempt + 1 < MAX_RETRIES => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "database busy/locked, retrying"
                    );
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::Busy(MAX_RETRIES))
    }

    /// Insert or replace a file record. Replacement deletes every dependent
    /// row for the path in the same transaction, so readers never see a file
    /// whose chunks or analysis disagree with its metadata.
    pub fn upsert_file(&self, record: &FileRecord) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM content_analysis WHERE file_path = ?1",
                params![record.path],
            )?;
            tx.execute(
                "DELETE FROM text_chunks WHERE file_path = ?1",
                params![record.path],
            )?;
            tx.execute(
                "DELETE FROM chunks_fts WHERE rowid IN (SELECT id FROM text_chunks_v2 WHERE file_path = ?1)",
                params![record.path],
            )?;
            tx.execute(
                "DELETE FROM text_chunks_v2 WHERE file_path = ?1",
                params![record.path],
            )?;
            tx.execute(
                "DELETE FROM embeddings_index WHERE file_path = ?1",
                params![record.path],
            )?;
            tx.execute(
                "DELETE FROM content_fts WHERE file_path = ?1",
                params![record.path],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO file_metadata (
                    file_path, file_name, directory, file_size, file_type,
                    mime_type, created_date, modified_date, accessed_date,
                    permissions, file_hash, is_text_file, encoding,
                    processing_status, error_message, indexed_date
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    record.path,
                    record.name,
                    record.directory,
                    record.size as i64,
                    record.file_type,
                    record.mime,
                    record.created_at,
                    record.modified_at,
                    record.accessed_at,
                    record.permissions,
                    record.hash,
                    record.is_text,
                    record.encoding,
                    record.processing_status.as_str(),
                    record.error_message,
                    record.indexed_at,
                ],
            )?;
            tx.commit()
        })
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                "SELECT * FROM file_metadata WHERE file_path = ?1",
                params![path],
                row_to_file_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_file_modified(&self, path: &str) -> Result<Option<String>, StoreError> {
        let modified = self
            .conn
            .query_row(
                "SELECT modified_date FROM file_metadata WHERE file_path = ?1",
                params![path],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(modified)
    }

    /// Atomically replace all chunk rows for a file: legacy flat rows, v2
    /// envelope rows, the embeddings feed, and both FTS mirrors.
    pub fn replace_chunks(
        &self,
        path: &str,
        envelopes: &[ChunkEnvelope],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<(), StoreError> {
        let prepared = PreparedChunks::new(envelopes, embeddings);
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            write_chunks_tx(&tx, path, envelopes, embeddings, &prepared)?;
            tx.commit()
        })
    }

    pub fn put_analysis(
        &self,
        analysis: &ContentAnalysis,
        processing_time_s: f64,
    ) -> Result<(), StoreError> {
        let prepared = PreparedAnalysis::new(analysis)?;
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            write_analysis_tx(&tx, analysis, &prepared, processing_time_s)?;
            tx.commit()
        })
    }

    /// Replace chunks and analysis in one transaction, so readers never see
    /// a file whose chunks and analysis disagree.
    pub fn replace_chunks_with_analysis(
        &self,
        path: &str,
        envelopes: &[ChunkEnvelope],
        embeddings: Option<&[Vec<f32>]>,
        analysis: &ContentAnalysis,
        processing_time_s: f64,
    ) -> Result<(), StoreError> {
        let prepared_chunks = PreparedChunks::new(envelopes, embeddings);
        let prepared_analysis = PreparedAnalysis::new(analysis)?;
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            write_chunks_tx(&tx, path, envelopes, embeddings, &prepared_chunks)?;
            write_analysis_tx(&tx, analysis, &prepared_analysis, processing_time_s)?;
            tx.commit()
        })
    }

    pub fn get_analysis(&self, path: &str) -> Result<Option<ContentAnalysis>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT file_path, file_hash, word_count, char_count, language,
                        topic_summary, keywords, tfidf_keywords, lda_topics,
                        processing_time_seconds
                 FROM content_analysis WHERE file_path = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<f64>>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some((path, hash, words, chars, language, summary, keywords, tfidf, topics, time)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(ContentAnalysis {
            path,
            hash,
            word_count: words.unwrap_or(0) as usize,
            char_count: chars.unwrap_or(0) as usize,
            language: language.unwrap_or_default(),
            summary: summary.unwrap_or_default(),
            keywords: parse_json_or_default(keywords.as_deref()),
            tfidf_keywords: parse_json_or_default(tfidf.as_deref()),
            topics: parse_json_or_default(topics.as_deref()),
            processing_time_s: time.unwrap_or(0.0),
        }))
    }

    pub fn get_chunk(
        &self,
        path: &str,
        chunk_index: usize,
    ) -> Result<Option<ChunkEnvelope>, StoreError> {
        let json = self
            .conn
            .query_row(
                "SELECT chunk_envelope FROM text_chunks_v2
                 WHERE file_path = ?1 AND chunk_index = ?2",
                params![path, chunk_index as i64],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(ChunkEnvelope::from_json(&json)?)),
            None => Ok(None),
        }
    }

    pub fn get_chunks(&self, path: &str) -> Result<Vec<ChunkEnvelope>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_envelope FROM text_chunks_v2
             WHERE file_path = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            out.push(ChunkEnvelope::from_json(&json?)?);
        }
        Ok(out)
    }

    pub fn get_adjacent(
        &self,
        path: &str,
        chunk_index: usize,
        before: usize,
        after: usize,
    ) -> Result<Vec<ChunkEnvelope>, StoreError> {
        let start = chunk_index.saturating_sub(before) as i64;
        let end = (chunk_index + after) as i64;
        let mut stmt = self.conn.prepare(
            "SELECT chunk_envelope FROM text_chunks_v2
             WHERE file_path = ?1 AND chunk_index BETWEEN ?2 AND ?3
             ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![path, start, end], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            out.push(ChunkEnvelope::from_json(&json?)?);
        }
        Ok(out)
    }

    pub fn chunk_count(&self, path: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM text_chunks_v2 WHERE file_path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn chunks_by_strategy(
        &self,
        strategy: &str,
        limit: usize,
    ) -> Result<Vec<ChunkEnvelope>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_envelope FROM text_chunks_v2
             WHERE chunk_strategy = ?1
             ORDER BY file_path, chunk_index LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![strategy, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for json in rows {
            out.push(ChunkEnvelope::from_json(&json?)?);
        }
        Ok(out)
    }

    pub fn file_chunk_stats(&self, path: &str) -> Result<Option<FileChunkStats>, StoreError> {
        let stats = self
            .conn
            .query_row(
                "SELECT COUNT(*), chunk_strategy, total_chunks, file_hash,
                        SUM(chunk_size), AVG(chunk_size), MIN(chunk_size), MAX(chunk_size)
                 FROM text_chunks_v2
                 WHERE file_path = ?1
                 GROUP BY file_path",
                params![path],
                |row| {
                    Ok(FileChunkStats {
                        chunk_count: row.get::<_, i64>(0)? as usize,
                        strategy: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        total_chunks: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as usize,
                        file_hash: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        total_size: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as usize,
                        avg_size: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                        min_size: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as usize,
                        max_size: row.get::<_, Option<i64>>(7)?.unwrap_or(0) as usize,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    /// Everything needed to rebuild the major vector tier from scratch:
    /// chunk text plus the stored embedding and a light metadata mirror.
    pub fn chunks_for_rebuild(&self) -> Result<Vec<RebuildChunk>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT tc.file_path, tc.chunk_index, tc.chunk_envelope, ei.embedding,
                    fm.file_name, fm.file_type, ca.keywords
             FROM text_chunks_v2 tc
             JOIN embeddings_index ei
               ON ei.file_path = tc.file_path AND ei.chunk_index = tc.chunk_index
             LEFT JOIN file_metadata fm ON fm.file_path = tc.file_path
             LEFT JOIN content_analysis ca ON ca.file_path = tc.file_path
             ORDER BY tc.file_path, tc.chunk_index",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (path, chunk_index, envelope_json, embedding_json, name, file_type, keywords) =
                row?;
            let envelope = ChunkEnvelope::from_json(&envelope_json)?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
            out.push(RebuildChunk {
                path,
                chunk_index: chunk_index as usize,
                text: envelope.content,
                file_hash: envelope.metadata.file_hash,
                name: name.unwrap_or_default(),
                file_type: file_type.unwrap_or_default(),
                keywords: parse_json_or_default(keywords.as_deref()),
                embedding,
            });
        }
        Ok(out)
    }

    pub fn record_run(&self, run: &ProcessingRun) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO processing_stats (
                    session_id, directory, total_files, successful_files, failed_files,
                    permission_denied_files, size_limit_exceeded_files, encoding_error_files,
                    file_not_found_files, timeout_files, unknown_error_files,
                    skipped_unchanged, interrupted, start_time, end_time, duration_seconds
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    run.session_id,
                    run.directory,
                    run.total_files as i64,
                    run.successful_files as i64,
                    run.failed_files as i64,
                    run.permission_denied_files as i64,
                    run.size_limit_exceeded_files as i64,
                    run.encoding_error_files as i64,
                    run.file_not_found_files as i64,
                    run.timeout_files as i64,
                    run.unknown_error_files as i64,
                    run.skipped_unchanged as i64,
                    run.interrupted,
                    run.started_at,
                    run.ended_at,
                    run.duration_s,
                ],
            )
            .map(|_| ())
        })
    }

    /// End time of the most recent uninterrupted run for `directory`.
    pub fn last_scan_time(&self, directory: &str) -> Result<Option<String>, StoreError> {
        let t = self
            .conn
            .query_row(
                "SELECT end_time FROM processing_stats
                 WHERE directory = ?1 AND interrupted = 0
                 ORDER BY id DESC LIMIT 1",
                params![directory],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(t)
    }

    pub fn update_directory_stats(&self, directory: &str) -> Result<bool, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(file_size), 0)
                 FROM file_metadata WHERE directory = ?1",
                params![directory],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((file_count, total_size)) = row else {
            return Ok(false);
        };
        let parent = Path::new(directory)
            .parent()
            .map(|p| p.to_string_lossy().into_owned());
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO directory_structure (
                    directory_path, parent_directory, file_count, total_size, last_updated
                ) VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)",
                params![directory, parent, file_count, total_size],
            )
            .map(|_| ())
        })?;
        Ok(true)
    }

    pub fn get_stats(&self) -> Result<StoreStats, StoreError> {
        let total_files: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM file_metadata", [], |r| r.get(0))?;
        let total_size: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(file_size), 0) FROM file_metadata",
            [],
            |r| r.get(0),
        )?;
        let files_with_analysis: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM content_analysis", [], |r| r.get(0))?;
        let total_chunks: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM text_chunks_v2", [], |r| r.get(0))?;
        let total_directories: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT directory) FROM file_metadata",
            [],
            |r| r.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT file_type, COUNT(*) AS n FROM file_metadata
             GROUP BY file_type ORDER BY n DESC LIMIT 10",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                row.get::<_, i64>(1)? as usize,
            ))
        })?;
        let mut top_file_types = Vec::new();
        for row in rows {
            top_file_types.push(row?);
        }

        Ok(StoreStats {
            total_files: total_files as usize,
            total_size_bytes: total_size as u64,
            top_file_types,
            files_with_analysis: files_with_analysis as usize,
            total_chunks: total_chunks as usize,
            total_directories: total_directories as usize,
        })
    }
}

pub(crate) fn row_to_file_record(row: &Row<'_>) -> Result<FileRecord, rusqlite::Error> {
    Ok(FileRecord {
        path: row.get("file_path")?,
        name: row.get("file_name")?,
        directory: row.get("directory")?,
        size: row.get::<_, i64>("file_size")? as u64,
        file_type: row.get::<_, Option<String>>("file_type")?.unwrap_or_default(),
        mime: row.get::<_, Option<String>>("mime_type")?.unwrap_or_default(),
        created_at: row
            .get::<_, Option<String>>("created_date")?
            .unwrap_or_default(),
        modified_at: row
            .get::<_, Option<String>>("modified_date")?
            .unwrap_or_default(),
        accessed_at: row
            .get::<_, Option<String>>("accessed_date")?
            .unwrap_or_default(),
        permissions: row
            .get::<_, Option<String>>("permissions")?
            .unwrap_or_default(),
        hash: row.get::<_, Option<String>>("file_hash")?.unwrap_or_default(),
        is_text: row.get::<_, Option<bool>>("is_text_file")?.unwrap_or(false),
        encoding: row.get("encoding")?,
        processing_status: ProcessingStatus::parse(
            &row.get::<_, Option<String>>("processing_status")?
                .unwrap_or_default(),
        ),
        error_message: row.get("error_message")?,
        indexed_at: row
            .get::<_, Option<String>>("indexed_date")?
            .unwrap_or_default(),
    })
}

pub(crate) fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(
    json: Option<&str>,
) -> T {
    json.and_then(|j| serde_json::from_str(j).ok())
        .unwrap_or_default()
}

/// JSON projections computed once, outside the retry loop.
struct PreparedChunks {
    envelope_json: Vec<String>,
    embedding_json: Vec<Option<String>>,
}

impl PreparedChunks {
    fn new(envelopes: &[ChunkEnvelope], embeddings: Option<&[Vec<f32>]>) -> PreparedChunks {
        PreparedChunks {
            envelope_json: envelopes.iter().map(|e| e.to_json()).collect(),
            embedding_json: (0..envelopes.len())
                .map(|i| {
                    embeddings
                        .and_then(|all| all.get(i))
                        .map(|v| serde_json::to_string(v).unwrap_or_default())
                })
                .collect(),
        }
    }
}

struct PreparedAnalysis {
    keywords: String,
    tfidf: String,
    topics: String,
}

impl PreparedAnalysis {
    fn new(analysis: &ContentAnalysis) -> Result<PreparedAnalysis, StoreError> {
        Ok(PreparedAnalysis {
            keywords: serde_json::to_string(&analysis.keywords)?,
            tfidf: serde_json::to_string(&analysis.tfidf_keywords)?,
            topics: serde_json::to_string(&analysis.topics)?,
        })
    }
}

fn write_chunks_tx(
    tx: &Connection,
    path: &str,
    envelopes: &[ChunkEnvelope],
    embeddings: Option<&[Vec<f32>]>,
    prepared: &PreparedChunks,
) -> Result<(), rusqlite::Error> {
    tx.execute(
        "DELETE FROM chunks_fts WHERE rowid IN (SELECT id FROM text_chunks_v2 WHERE file_path = ?1)",
        params![path],
    )?;
    tx.execute("DELETE FROM text_chunks WHERE file_path = ?1", params![path])?;
    tx.execute(
        "DELETE FROM text_chunks_v2 WHERE file_path = ?1",
        params![path],
    )?;
    tx.execute(
        "DELETE FROM embeddings_index WHERE file_path = ?1",
        params![path],
    )?;
    tx.execute("DELETE FROM content_fts WHERE file_path = ?1", params![path])?;

    for (i, envelope) in envelopes.iter().enumerate() {
        let blob = embeddings
            .and_then(|all| all.get(i))
            .map(|v| vector_to_blob(v));

        tx.execute(
            "INSERT INTO text_chunks (file_path, chunk_index, chunk_text, chunk_embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![path, i as i64, envelope.content, blob],
        )?;
        tx.execute(
            "INSERT INTO text_chunks_v2 (
                file_path, chunk_index, chunk_envelope, chunk_strategy,
                chunk_size, total_chunks, file_hash, file_type, created_at, embedding
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                path,
                envelope.metadata.chunk_index as i64,
                prepared.envelope_json[i],
                envelope.metadata.chunk_strategy.as_str(),
                envelope.metadata.chunk_size as i64,
                envelope.metadata.total_chunks as i64,
                envelope.metadata.file_hash,
                envelope.metadata.file_type,
                envelope.metadata.created_at,
                blob,
            ],
        )?;
        let rowid = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO chunks_fts (rowid, file_path, chunk_index, chunk_text)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                rowid,
                path,
                envelope.metadata.chunk_index as i64,
                envelope.content
            ],
        )?;
        if let Some(json) = &prepared.embedding_json[i] {
            tx.execute(
                "INSERT INTO embeddings_index (file_path, chunk_index, embedding, metadata)
                 VALUES (?1, ?2, ?3, NULL)",
                params![path, envelope.metadata.chunk_index as i64, json],
            )?;
        }
    }

    if !envelopes.is_empty() {
        let full_content: Vec<&str> = envelopes.iter().map(|e| e.content.as_str()).collect();
        tx.execute(
            "INSERT INTO content_fts (file_path, content, content_id)
             VALUES (?1, ?2, ?3)",
            params![path, full_content.join(" "), envelopes[0].metadata.file_hash],
        )?;
    }
    Ok(())
}

fn write_analysis_tx(
    tx: &Connection,
    analysis: &ContentAnalysis,
    prepared: &PreparedAnalysis,
    processing_time_s: f64,
) -> Result<(), rusqlite::Error> {
    tx.execute(
        "DELETE FROM content_analysis WHERE file_path = ?1",
        params![analysis.path],
    )?;
    tx.execute(
        "INSERT INTO content_analysis (
            file_path, file_hash, word_count, char_count, language,
            topic_summary, keywords, tfidf_keywords, lda_topics,
            processing_status, error_message, processing_time_seconds
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'success', NULL, ?10)",
        params![
            analysis.path,
            analysis.hash,
            analysis.word_count as i64,
            analysis.char_count as i64,
            analysis.language,
            analysis.summary,
            prepared.keywords,
            prepared.tfidf,
            prepared.topics,
            processing_time_s,
        ],
    )?;
    Ok(())
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}
