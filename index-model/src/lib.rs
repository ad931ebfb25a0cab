//! Shared record types used across the indexing workspace.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Per-file processing outcome. String forms are the canonical values stored
/// in the database and reported in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Success,
    Skipped,
    PermissionDenied,
    FileNotFound,
    EncodingError,
    SizeLimitExceeded,
    Timeout,
    UnknownError,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::Skipped => "skipped",
            ProcessingStatus::PermissionDenied => "permission_denied",
            ProcessingStatus::FileNotFound => "file_not_found",
            ProcessingStatus::EncodingError => "encoding_error",
            ProcessingStatus::SizeLimitExceeded => "size_limit_exceeded",
            ProcessingStatus::Timeout => "timeout",
            ProcessingStatus::UnknownError => "unknown_error",
        }
    }

    pub fn parse(s: &str) -> ProcessingStatus {
        match s {
            "success" => ProcessingStatus::Success,
            "skipped" => ProcessingStatus::Skipped,
            "permission_denied" => ProcessingStatus::PermissionDenied,
            "file_not_found" => ProcessingStatus::FileNotFound,
            "encoding_error" => ProcessingStatus::EncodingError,
            "size_limit_exceeded" => ProcessingStatus::SizeLimitExceeded,
            "timeout" => ProcessingStatus::Timeout,
            _ => ProcessingStatus::UnknownError,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-level metadata record, unique by `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute, canonicalized path.
    pub path: String,
    pub name: String,
    pub directory: String,
    pub size: u64,
    /// Lowercased extension including the dot, e.g. ".py". Empty when none.
    pub file_type: String,
    pub mime: String,
    pub created_at: String,
    pub modified_at: String,
    pub accessed_at: String,
    /// POSIX octal triplet on unix, `r|w|x` subset elsewhere.
    pub permissions: String,
    /// MD5 of content up to 10 MiB, or one of the sentinel strings
    /// `too_large` / `permission_denied` / `file_not_found` / `error`.
    pub hash: String,
    pub is_text: bool,
    pub encoding: Option<String>,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub indexed_at: String,
}

/// Per-file content analysis, 1:1 with a text FileRecord.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub path: String,
    pub hash: String,
    pub word_count: usize,
    pub char_count: usize,
    pub language: String,
    /// Short extractive summary, ~200 chars.
    pub summary: String,
    /// Up to 10 most frequent content-bearing terms, ordered.
    pub keywords: Vec<String>,
    /// Top terms by mean TF-IDF across the file's chunks.
    pub tfidf_keywords: Vec<(String, f64)>,
    /// Topic clusters: (topic_id, weighted terms).
    pub topics: Vec<(usize, Vec<(String, f64)>)>,
    pub processing_time_s: f64,
}

/// Chunking strategy discriminator carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    CodeDiscrete,
    ProseDiscrete,
    ProseOverlap,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::CodeDiscrete => "code_discrete",
            ChunkStrategy::ProseDiscrete => "prose_discrete",
            ChunkStrategy::ProseOverlap => "prose_overlap",
        }
    }
}

impl std::fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata half of a chunk envelope. Serialized field names match the
/// on-disk JSON contract exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub filename: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub chunk_size: usize,
    pub chunk_strategy: ChunkStrategy,
    pub overlap_chars: usize,
    /// Extension without the dot, "txt" when none.
    pub file_type: String,
    /// SHA-256 of the whole file's text, hex.
    pub file_hash: String,
    pub created_at: String,
    /// Open map of statistical, positional and retrieval hints.
    #[serde(default)]
    pub ai_metadata: serde_json::Map<String, serde_json::Value>,
}

/// Self-describing unit of stored text: metadata plus content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    pub metadata: ChunkMetadata,
    pub content: String,
}

impl ChunkEnvelope {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(s: &str) -> Result<ChunkEnvelope, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Statistics for one ingestion run over a directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRun {
    pub session_id: String,
    pub directory: String,
    pub total_files: usize,
    pub successful_files: usize,
    pub failed_files: usize,
    pub permission_denied_files: usize,
    pub size_limit_exceeded_files: usize,
    pub encoding_error_files: usize,
    pub file_not_found_files: usize,
    pub timeout_files: usize,
    pub unknown_error_files: usize,
    pub skipped_unchanged: usize,
    pub started_at: String,
    pub ended_at: String,
    pub duration_s: f64,
    pub interrupted: bool,
}

impl ProcessingRun {
    /// Fold one per-file outcome into the counters. Skipped files are not
    /// counted as failures.
    pub fn record(&mut self, status: ProcessingStatus) {
        match status {
            ProcessingStatus::Success => self.successful_files += 1,
            ProcessingStatus::Skipped => self.skipped_unchanged += 1,
            ProcessingStatus::PermissionDenied => self.permission_denied_files += 1,
            ProcessingStatus::SizeLimitExceeded => self.size_limit_exceeded_files += 1,
            ProcessingStatus::EncodingError => self.encoding_error_files += 1,
            ProcessingStatus::FileNotFound => self.file_not_found_files += 1,
            ProcessingStatus::Timeout => self.timeout_files += 1,
            ProcessingStatus::UnknownError => self.unknown_error_files += 1,
        }
        if status != ProcessingStatus::Success && status != ProcessingStatus::Skipped {
            self.failed_files += 1;
        }
    }

    /// Files that were actually processed (not skipped as unchanged).
    pub fn processed_files(&self) -> usize {
        self.successful_files + self.failed_files
    }

    /// Success rate over processed files, in percent. 100 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        let processed = self.processed_files();
        if processed == 0 {
            100.0
        } else {
            self.successful_files as f64 / processed as f64 * 100.0
        }
    }
}

/// Current UTC time as ISO-8601 with a trailing `Z`.
pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert a filesystem timestamp to the canonical UTC string form.
pub fn system_time_utc(t: std::time::SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ProcessingStatus::Success,
            ProcessingStatus::Skipped,
            ProcessingStatus::PermissionDenied,
            ProcessingStatus::FileNotFound,
            ProcessingStatus::EncodingError,
            ProcessingStatus::SizeLimitExceeded,
            ProcessingStatus::Timeout,
            ProcessingStatus::UnknownError,
        ] {
            assert_eq!(ProcessingStatus::parse(status.as_str()), status);
        }
        assert_eq!(
            ProcessingStatus::parse("something else"),
            ProcessingStatus::UnknownError
        );
    }

    #[test]
    fn envelope_json_uses_contract_field_names() {
        let envelope = ChunkEnvelope {
            metadata: ChunkMetadata {
                filename: "a.py".into(),
                chunk_index: 0,
                total_chunks: 1,
                chunk_size: 11,
                chunk_strategy: ChunkStrategy::CodeDiscrete,
                overlap_chars: 0,
                file_type: "py".into(),
                file_hash: "abc".into(),
                created_at: "2025-01-01T00:00:00Z".into(),
                ai_metadata: serde_json::Map::new(),
            },
            content: "print('hi')".into(),
        };
        let json = envelope.to_json();
        assert!(json.contains("\"chunk_strategy\":\"code_discrete\""));
        assert!(json.contains("\"chunk_size\":11"));
        let back = ChunkEnvelope::from_json(&json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn run_counters_separate_skips_from_failures() {
        let mut run = ProcessingRun::default();
        run.record(ProcessingStatus::Success);
        run.record(ProcessingStatus::Skipped);
        run.record(ProcessingStatus::PermissionDenied);
        assert_eq!(run.successful_files, 1);
        assert_eq!(run.skipped_unchanged, 1);
        assert_eq!(run.failed_files, 1);
        assert_eq!(run.processed_files(), 2);
        assert!((run.success_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn timestamps_carry_trailing_z() {
        assert!(now_utc().ends_with('Z'));
    }
}
