//! Chunking strategies and envelope construction.
//!
//! Code files pack whole lines up to [`CODE_TARGET`] chars with no overlap;
//! prose packs paragraphs up to [`PROSE_TARGET`], splitting oversized
//! paragraphs at sentence terminators. The sliding-window overlap strategy is
//! only used when explicitly requested.

use std::path::Path;

use index_model::{now_utc, ChunkEnvelope, ChunkMetadata, ChunkStrategy};
use serde_json::{json, Map, Value};
use sha2::Digest;

pub const CODE_TARGET: usize = 350;
pub const PROSE_TARGET: usize = 800;
pub const PROSE_OVERLAP_PERCENT: f64 = 0.15;

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "c", "cpp", "h", "hpp", "rs", "go", "rb", "php", "swift", "kt",
    "scala", "sh", "bash", "zsh", "sql", "r", "m", "cs",
];

/// Whether a filename selects the code strategy (by extension).
pub fn is_code_file(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .map(|ext| CODE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    code_target: usize,
    prose_target: usize,
    overlap_percent: f64,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            code_target: CODE_TARGET,
            prose_target: PROSE_TARGET,
            overlap_percent: PROSE_OVERLAP_PERCENT,
        }
    }
}

impl Chunker {
    pub fn new(code_target: usize, prose_target: usize, overlap_percent: f64) -> Self {
        Self {
            code_target,
            prose_target,
            overlap_percent,
        }
    }

    /// Main entry: pick a strategy from the filename and produce envelopes.
    pub fn chunk_file(
        &self,
        filename: &str,
        content: &str,
        force_prose: bool,
    ) -> Vec<ChunkEnvelope> {
        if content.is_empty() {
            return Vec::new();
        }
        if force_prose || !is_code_file(filename) {
            let pieces = self.prose_discrete_pieces(content);
            self.make_envelopes(pieces, filename, content, ChunkStrategy::ProseDiscrete, 0)
        } else {
            let pieces = self.code_pieces(content);
            self.make_envelopes(pieces, filename, content, ChunkStrategy::CodeDiscrete, 0)
        }
    }

    /// Sliding-window prose chunking with 15% overlap. Only used when a
    /// caller asks for it explicitly.
    pub fn chunk_file_overlap(&self, filename: &str, content: &str) -> Vec<ChunkEnvelope> {
        if content.is_empty() {
            return Vec::new();
        }
        let (pieces, overlap_chars) = self.prose_overlap_pieces(content);
        self.make_envelopes(
            pieces,
            filename,
            content,
            ChunkStrategy::ProseOverlap,
            overlap_chars,
        )
    }

    /// Line-oriented packing: flush when the next line would push the chunk
    /// over the target. Single lines longer than the target stay whole.
    fn code_pieces(&self, content: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_size = 0usize;

        for line in content.split('\n') {
            let line_size = line.chars().count() + 1;
            if current_size + line_size > self.code_target && !current.is_empty() {
                chunks.push(current.join("\n"));
                current = vec![line];
                current_size = line_size;
            } else {
                current.push(line);
                current_size += line_size;
            }
        }
        if !current.is_empty() {
            chunks.push(current.join("\n"));
        }
        chunks
    }

    /// Paragraph packing; paragraphs over the target are re-split at
    /// sentence terminators and packed to the same target.
    fn prose_discrete_pieces(&self, content: &str) -> Vec<String> {
        let paragraphs = split_paragraphs(content);
        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_size = 0usize;

        for para in paragraphs {
            let para_size = para.chars().count();

            if para_size > self.prose_target {
                if !current.is_empty() {
                    chunks.push(current.join("\n\n"));
                    current.clear();
                    current_size = 0;
                }
                let mut sentence_chunk = String::new();
                let mut sentence_size = 0usize;
                for sentence in split_sentences(&para) {
                    let n = sentence.chars().count();
                    if sentence_size + n > self.prose_target && !sentence_chunk.is_empty() {
                        let piece = sentence_chunk.trim();
                        if !piece.is_empty() {
                            chunks.push(piece.to_string());
                        }
                        sentence_chunk = sentence;
                        sentence_size = n;
                    } else {
                        sentence_chunk.push_str(&sentence);
                        sentence_size += n;
                    }
                }
                let piece = sentence_chunk.trim();
                if !piece.is_empty() {
                    chunks.push(piece.to_string());
                }
            } else if current_size + para_size > self.prose_target && !current.is_empty() {
                chunks.push(current.join("\n\n"));
                current_size = para_size;
                current = vec![para];
            } else {
                current_size += para_size + 2;
                current.push(para);
            }
        }
        if !current.is_empty() {
            chunks.push(current.join("\n\n"));
        }
        chunks
    }

    fn prose_overlap_pieces(&self, content: &str) -> (Vec<String>, usize) {
        let overlap = (self.prose_target as f64 * self.overlap_percent) as usize;
        let chars: Vec<char> = content.chars().collect();
        let len = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < len {
            let mut end = start + self.prose_target;
            if end < len {
                // Snap the window end to a blank-line boundary when one is
                // within ±100 chars.
                if let Some(pos) =
                    find_blank_line(&chars, end.saturating_sub(100), (end + 100).min(len))
                {
                    end = pos;
                }
            }
            let slice_end = end.min(len);
            let piece: String = chars[start..slice_end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }
            if end.saturating_sub(overlap) <= start {
                break;
            }
            start = end - overlap;
            if start >= len {
                break;
            }
        }
        (chunks, overlap)
    }

    fn make_envelopes(
        &self,
        pieces: Vec<String>,
        filename: &str,
        content: &str,
        strategy: ChunkStrategy,
        overlap_chars: usize,
    ) -> Vec<ChunkEnvelope> {
        let file_hash = sha256_hex(content);
        let file_type = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "txt".to_string());
        let total_chunks = pieces.len();
        let file_total_size = content.chars().count();
        let avg_chunk_size = if total_chunks > 0 {
            round2(file_total_size as f64 / total_chunks as f64)
        } else {
            0.0
        };
        let created_at = now_utc();

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let char_count = piece.chars().count();
                let position = if i == 0 {
                    "start"
                } else if i == total_chunks - 1 {
                    "end"
                } else {
                    "middle"
                };

                let mut ai_metadata = Map::new();
                ai_metadata.insert(
                    "line_count".into(),
                    json!(piece.matches('\n').count() + 1),
                );
                ai_metadata.insert(
                    "word_count".into(),
                    json!(piece.split_whitespace().count()),
                );
                ai_metadata.insert("char_count".into(), json!(char_count));
                ai_metadata.insert("avg_chunk_size".into(), json!(avg_chunk_size));
                ai_metadata.insert("file_total_size".into(), json!(file_total_size));
                ai_metadata.insert("chunk_position".into(), json!(position));
                ai_metadata.insert("has_previous".into(), json!(i > 0));
                ai_metadata.insert("has_next".into(), json!(i + 1 < total_chunks));
                ai_metadata.insert(
                    "previous_chunk_index".into(),
                    if i > 0 { json!(i - 1) } else { Value::Null },
                );
                ai_metadata.insert(
                    "next_chunk_index".into(),
                    if i + 1 < total_chunks {
                        json!(i + 1)
                    } else {
                        Value::Null
                    },
                );
                ai_metadata.insert("starts_with".into(), json!(head_chars(&piece, 50)));
                ai_metadata.insert("ends_with".into(), json!(tail_chars(&piece, 50)));
                ai_metadata.insert(
                    "adjacent_chunk_indexes".into(),
                    json!((i.saturating_sub(2)..(i + 3).min(total_chunks)).collect::<Vec<_>>()),
                );
                ai_metadata.insert(
                    "retrieval_context_suggestion".into(),
                    json!(if total_chunks > 3 {
                        "adjacent_1"
                    } else {
                        "full_file"
                    }),
                );

                ChunkEnvelope {
                    metadata: ChunkMetadata {
                        filename: filename.to_string(),
                        chunk_index: i,
                        total_chunks,
                        chunk_size: char_count,
                        chunk_strategy: strategy,
                        overlap_chars,
                        file_type: file_type.clone(),
                        file_hash: file_hash.clone(),
                        created_at: created_at.clone(),
                        ai_metadata,
                    },
                    content: piece,
                }
            })
            .collect()
    }
}

/// Slice of `envelopes` around `chunk_index`, including the target.
pub fn adjacent_chunks(
    envelopes: &[ChunkEnvelope],
    chunk_index: usize,
    before: usize,
    after: usize,
) -> &[ChunkEnvelope] {
    let start = chunk_index.saturating_sub(before);
    let end = (chunk_index + after + 1).min(envelopes.len());
    if start >= end {
        &[]
    } else {
        &envelopes[start..end]
    }
}

/// SHA-256 of the text body, hex encoded.
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in text.split('\n') {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                out.push(current.trim().to_string());
            }
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

/// Split after runs of `. ! ?` followed by whitespace, keeping the
/// terminator and trailing whitespace with the preceding piece.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let chars: Vec<char> = paragraph.chars().collect();
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i;
            while j + 1 < chars.len() && matches!(chars[j + 1], '.' | '!' | '?') {
                j += 1;
            }
            let mut k = j;
            let mut saw_whitespace = false;
            while k + 1 < chars.len() && chars[k + 1].is_whitespace() {
                saw_whitespace = true;
                k += 1;
            }
            if saw_whitespace {
                out.push(chars[start..=k].iter().collect());
                start = k + 1;
                i = k + 1;
                continue;
            }
            i = j + 1;
            continue;
        }
        i += 1;
    }
    if start < chars.len() {
        out.push(chars[start..].iter().collect());
    }
    out
}

/// First index of a blank line (`\n\n`) within `[lo, hi)`.
fn find_blank_line(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    let hi = hi.min(chars.len().saturating_sub(1));
    (lo..hi).find(|&i| chars[i] == '\n' && chars[i + 1] == '\n')
}

fn head_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_sample() -> String {
        let mut s = String::new();
        for i in 0..40 {
            s.push_str(&format!("fn item_{i}() {{ do_work({i}); }}\n"));
        }
        s
    }

    #[test]
    fn code_chunks_respect_target_and_reconstruct() {
        let chunker = Chunker::default();
        let content = code_sample();
        let envelopes = chunker.chunk_file("a.rs", &content, false);

        assert!(envelopes.len() > 1);
        for env in &envelopes {
            assert_eq!(env.metadata.chunk_strategy, ChunkStrategy::CodeDiscrete);
            assert_eq!(env.metadata.overlap_chars, 0);
        }
        // Every non-final chunk stays within the target.
        for env in &envelopes[..envelopes.len() - 1] {
            assert!(
                env.metadata.chunk_size <= CODE_TARGET,
                "chunk {} has {} chars",
                env.metadata.chunk_index,
                env.metadata.chunk_size
            );
        }
        // Concatenation reconstructs the input up to per-chunk boundaries.
        let joined: String = envelopes
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(joined.trim_end(), content.trim_end());
    }

    #[test]
    fn long_code_line_stays_whole() {
        let chunker = Chunker::default();
        let long_line = "x".repeat(CODE_TARGET * 2);
        let envelopes = chunker.chunk_file("b.py", &long_line, false);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].metadata.chunk_size, CODE_TARGET * 2);
    }

    #[test]
    fn prose_packs_paragraphs_to_target() {
        let chunker = Chunker::default();
        let para = "Sentences fill this paragraph with ordinary words. ".repeat(6);
        let content = format!("{p}\n\n{p}\n\n{p}\n\n{p}", p = para.trim());
        let envelopes = chunker.chunk_file("notes.md", &content, false);

        assert!(envelopes.len() > 1);
        for env in &envelopes {
            assert_eq!(env.metadata.chunk_strategy, ChunkStrategy::ProseDiscrete);
        }
        for env in &envelopes[..envelopes.len() - 1] {
            assert!(env.metadata.chunk_size <= PROSE_TARGET);
        }
    }

    #[test]
    fn oversized_paragraph_splits_at_sentences() {
        let chunker = Chunker::default();
        let content = "A short declarative sentence that keeps going for a while. ".repeat(30);
        let envelopes = chunker.chunk_file("essay.txt", &content, false);
        assert!(envelopes.len() > 1);
        for env in &envelopes[..envelopes.len() - 1] {
            assert!(env.metadata.chunk_size <= PROSE_TARGET);
        }
    }

    #[test]
    fn force_prose_overrides_code_extension() {
        let chunker = Chunker::default();
        let envelopes = chunker.chunk_file("a.py", "print('x')\n\nprint('y')", true);
        assert_eq!(
            envelopes[0].metadata.chunk_strategy,
            ChunkStrategy::ProseDiscrete
        );
    }

    #[test]
    fn overlap_windows_carry_overlap_chars() {
        let chunker = Chunker::default();
        let content = "word ".repeat(600);
        let envelopes = chunker.chunk_file_overlap("long.txt", &content);
        assert!(envelopes.len() > 1);
        let expected = (PROSE_TARGET as f64 * PROSE_OVERLAP_PERCENT) as usize;
        for env in &envelopes {
            assert_eq!(env.metadata.chunk_strategy, ChunkStrategy::ProseOverlap);
            assert_eq!(env.metadata.overlap_chars, expected);
        }
    }

    #[test]
    fn envelope_indices_are_dense_and_positional() {
        let chunker = Chunker::default();
        let content = code_sample();
        let envelopes = chunker.chunk_file("a.rs", &content, false);
        let total = envelopes.len();

        for (i, env) in envelopes.iter().enumerate() {
            assert_eq!(env.metadata.chunk_index, i);
            assert_eq!(env.metadata.total_chunks, total);
            let position = env.metadata.ai_metadata["chunk_position"].as_str().unwrap();
            if i == 0 {
                assert_eq!(position, "start");
            } else if i == total - 1 {
                assert_eq!(position, "end");
            } else {
                assert_eq!(position, "middle");
            }
            assert_eq!(
                env.metadata.ai_metadata["has_previous"].as_bool().unwrap(),
                i > 0
            );
            assert_eq!(
                env.metadata.ai_metadata["has_next"].as_bool().unwrap(),
                i + 1 < total
            );
        }
    }

    #[test]
    fn adjacent_chunks_clamps_at_edges() {
        let chunker = Chunker::default();
        let envelopes = chunker.chunk_file("a.rs", &code_sample(), false);
        assert!(envelopes.len() >= 3);

        let around_first = adjacent_chunks(&envelopes, 0, 1, 1);
        assert_eq!(around_first.len(), 2);
        assert_eq!(around_first[0].metadata.chunk_index, 0);

        let last = envelopes.len() - 1;
        let around_last = adjacent_chunks(&envelopes, last, 1, 1);
        assert_eq!(around_last.len(), 2);
        assert_eq!(around_last[1].metadata.chunk_index, last);
    }
}
