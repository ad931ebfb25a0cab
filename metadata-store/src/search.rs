//! Read-side queries: metadata filtering, full-text search with snippets,
//! keyword projection search, directory aggregation.

use index_model::{ChunkEnvelope, FileRecord};
use rusqlite::params;

use crate::store::{parse_json_or_default, row_to_file_record, Store};
use crate::StoreError;

/// Conjunctive metadata filter. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    /// Substring match on the file name.
    pub name_pattern: Option<String>,
    /// Substring match on extension or MIME type.
    pub file_type: Option<String>,
    /// Substring match on the directory.
    pub directory: Option<String>,
    pub created_since: Option<String>,
    pub modified_since: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub permissions: Option<String>,
}

/// One full-text hit. `chunk_index` is `None` for file-level matches.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub path: String,
    pub chunk_index: Option<usize>,
    pub rank: f64,
    pub snippet: String,
    pub name: String,
    pub file_type: String,
    pub modified_at: String,
}

/// Keyword-projection hit with the matching keywords echoed back.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub path: String,
    pub name: String,
    pub file_type: String,
    pub modified_at: String,
    pub keywords: Vec<String>,
    pub tfidf_keywords: Vec<(String, f64)>,
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectorySummary {
    pub directory: String,
    pub file_count: usize,
    pub total_size: u64,
}

impl Store {
    /// Conjunctive metadata search ordered by modification time descending.
    pub fn metadata_search(
        &self,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let mut sql = String::from("SELECT * FROM file_metadata WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = &filter.name_pattern {
            sql.push_str(" AND file_name LIKE ?");
            args.push(Box::new(format!("%{name}%")));
        }
        if let Some(ft) = &filter.file_type {
            sql.push_str(" AND (file_type LIKE ? OR mime_type LIKE ?)");
            args.push(Box::new(format!("%{ft}%")));
            args.push(Box::new(format!("%{ft}%")));
        }
        if let Some(dir) = &filter.directory {
            sql.push_str(" AND directory LIKE ?");
            args.push(Box::new(format!("%{dir}%")));
        }
        if let Some(since) = &filter.created_since {
            sql.push_str(" AND created_date >= ?");
            args.push(Box::new(since.clone()));
        }
        if let Some(since) = &filter.modified_since {
            sql.push_str(" AND modified_date >= ?");
            args.push(Box::new(since.clone()));
        }
        if let Some(min) = filter.min_size {
            sql.push_str(" AND file_size >= ?");
            args.push(Box::new(min as i64));
        }
        if let Some(max) = filter.max_size {
            sql.push_str(" AND file_size <= ?");
            args.push(Box::new(max as i64));
        }
        if let Some(perms) = &filter.permissions {
            sql.push_str(" AND permissions = ?");
            args.push(Box::new(perms.clone()));
        }
        sql.push_str(" ORDER BY modified_date DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let mut stmt = self.conn_ref().prepare(&sql)?;
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt.query_map(&arg_refs[..], row_to_file_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// File-level full-text search over `content_fts`. Supports FTS5 phrase
    /// queries and AND/OR/NOT. Snippets are `>>>`/`<<<` delimited, about 64
    /// tokens.
    pub fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT fts.file_path,
                    snippet(content_fts, 1, '>>>', '<<<', '...', 64) AS snip,
                    fm.file_name, fm.file_type, fm.modified_date,
                    bm25(content_fts) AS rank
             FROM content_fts fts
             LEFT JOIN file_metadata fm ON fts.file_path = fm.file_path
             WHERE content_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok(FtsHit {
                path: row.get(0)?,
                chunk_index: None,
                snippet: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                file_type: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                modified_at: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                rank: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Chunk-level full-text search over `chunks_fts`, returning whole
    /// envelopes with their snippets.
    pub fn chunk_fts_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(ChunkEnvelope, f64, String)>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT tc.chunk_envelope,
                    bm25(chunks_fts) AS rank,
                    snippet(chunks_fts, 2, '>>>', '<<<', '...', 32) AS snip
             FROM chunks_fts f
             JOIN text_chunks_v2 tc ON tc.id = f.rowid
             WHERE chunks_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (json, rank, snippet) = row?;
            out.push((ChunkEnvelope::from_json(&json)?, rank, snippet));
        }
        Ok(out)
    }

    /// Find files whose keyword projections mention any of `keywords`.
    pub fn keyword_search(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<KeywordHit>, StoreError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let mut conditions = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        for kw in keywords {
            conditions.push("(ca.keywords LIKE ? OR ca.tfidf_keywords LIKE ?)");
            args.push(Box::new(format!("%\"{kw}\"%")));
            args.push(Box::new(format!("%\"{kw}\"%")));
        }
        let sql = format!(
            "SELECT fm.file_path, fm.file_name, fm.file_type, fm.modified_date,
                    ca.keywords, ca.tfidf_keywords
             FROM file_metadata fm
             JOIN content_analysis ca ON fm.file_path = ca.file_path
             WHERE {}
             ORDER BY fm.modified_date DESC
             LIMIT ?",
            conditions.join(" OR ")
        );
        args.push(Box::new(limit as i64));

        let mut stmt = self.conn_ref().prepare(&sql)?;
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt.query_map(&arg_refs[..], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (path, name, file_type, modified_at, kw_json, tfidf_json) = row?;
            let file_keywords: Vec<String> = parse_json_or_default(kw_json.as_deref());
            let tfidf_keywords: Vec<(String, f64)> = parse_json_or_default(tfidf_json.as_deref());
            let matched: Vec<String> = keywords
                .iter()
                .filter(|kw| {
                    file_keywords.iter().any(|k| k == *kw)
                        || tfidf_keywords.iter().any(|(t, _)| t == *kw)
                })
                .cloned()
                .collect();
            out.push(KeywordHit {
                path,
                name,
                file_type,
                modified_at,
                keywords: file_keywords,
                tfidf_keywords,
                matched,
            });
        }
        Ok(out)
    }

    /// Aggregate indexed files by directory, largest file count first.
    pub fn list_directories(
        &self,
        parent: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DirectorySummary>, StoreError> {
        let map = |row: &rusqlite::Row<'_>| {
            Ok(DirectorySummary {
                directory: row.get(0)?,
                file_count: row.get::<_, i64>(1)? as usize,
                total_size: row.get::<_, i64>(2)? as u64,
            })
        };

        let mut out = Vec::new();
        match parent {
            Some(parent) => {
                let mut stmt = self.conn_ref().prepare(
                    "SELECT directory, COUNT(*) AS n, COALESCE(SUM(file_size), 0)
                     FROM file_metadata
                     WHERE directory LIKE ?1
                     GROUP BY directory ORDER BY n DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![format!("{parent}%"), limit as i64], map)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn_ref().prepare(
                    "SELECT directory, COUNT(*) AS n, COALESCE(SUM(file_size), 0)
                     FROM file_metadata
                     GROUP BY directory ORDER BY n DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], map)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }
}
