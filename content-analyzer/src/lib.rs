//! Per-file content analysis: keyword frequency, TF-IDF over a file's
//! chunks, deterministic topic clusters, and a short extractive summary.
//!
//! Every sub-step is independent; a failing step leaves its field empty
//! rather than failing the file.

mod stopwords;
mod tfidf;

use index_model::ContentAnalysis;

pub use stopwords::is_stop_word;
pub use tfidf::{tfidf_keywords, topic_clusters};

pub const MAX_KEYWORDS: usize = 10;
pub const MAX_TFIDF_KEYWORDS: usize = 20;
pub const MAX_TOPICS: usize = 5;
pub const SUMMARY_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Default)]
pub struct Analyzer;

impl Analyzer {
    pub fn new() -> Analyzer {
        Analyzer
    }

    /// Analyze one file. `chunks` are the file's chunk texts, treated as the
    /// corpus for TF-IDF and topics. `file_hash` is the FileRecord hash so
    /// readers can correlate analysis with the file snapshot.
    pub fn analyze(
        &self,
        path: &str,
        file_hash: &str,
        content: &str,
        chunks: &[String],
    ) -> ContentAnalysis {
        let word_count = content.split_whitespace().count();
        let char_count = content.chars().count();

        let cleaned = clean_text(content);
        let keywords = extract_keywords(&cleaned, MAX_KEYWORDS);
        let summary = summarize(content, SUMMARY_MAX_CHARS);

        let (tfidf, topics) = if chunks.iter().filter(|c| !c.trim().is_empty()).count() >= 2 {
            (
                tfidf_keywords(chunks, MAX_TFIDF_KEYWORDS),
                topic_clusters(chunks, MAX_TOPICS),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        ContentAnalysis {
            path: path.to_string(),
            hash: file_hash.to_string(),
            word_count,
            char_count,
            language: detect_language(content).to_string(),
            summary,
            keywords,
            tfidf_keywords: tfidf,
            topics,
            processing_time_s: 0.0,
        }
    }
}

/// Lowercase, collapse whitespace, strip everything but word characters and
/// common punctuation.
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        let mapped = if ch.is_whitespace() {
            if last_was_space {
                continue;
            }
            last_was_space = true;
            ' '
        } else if ch.is_alphanumeric()
            || matches!(ch, '_' | '.' | '!' | '?' | ',' | ';' | ':' | '-' | '(' | ')')
        {
            last_was_space = false;
            ch.to_ascii_lowercase()
        } else {
            continue;
        };
        out.push(mapped);
    }
    out.trim().to_string()
}

/// Most frequent content-bearing terms: alphabetic, at least three chars,
/// stop-word filtered. Ties break by first occurrence.
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    let mut counts: Vec<(String, usize, usize)> = Vec::new();
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let token = raw.to_lowercase();
        if token.len() < 3 || !token.chars().all(|c| c.is_alphabetic()) {
            continue;
        }
        if is_stop_word(&token) {
            continue;
        }
        match index.get(&token) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(token.clone(), counts.len());
                counts.push((token, 1, counts.len()));
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    counts
        .into_iter()
        .take(max_keywords)
        .map(|(term, _, _)| term)
        .collect()
}

/// Extractive summary: leading sentences up to `max_chars`.
pub fn summarize(text: &str, max_chars: usize) -> String {
    if text.trim().is_empty() {
        return "No content to summarize".into();
    }
    let sentences = split_sentences(text);
    let mut out = String::new();
    for sentence in &sentences {
        let candidate_len = out.chars().count() + sentence.chars().count() + usize::from(!out.is_empty());
        if candidate_len > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(sentence);
    }
    if out.is_empty() {
        return sentences
            .first()
            .map(|s| s.chars().take(max_chars).collect())
            .unwrap_or_else(|| text.chars().take(max_chars).collect());
    }
    out
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let boundary = chars.peek().map(|c| c.is_whitespace()).unwrap_or(true);
            if boundary {
                let s = current.trim();
                if !s.is_empty() {
                    out.push(s.to_string());
                }
                current.clear();
            }
        }
    }
    let s = current.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
    out
}

fn detect_language(text: &str) -> &'static str {
    // ASCII-dominant content is assumed English; anything else is unknown.
    let total = text.chars().take(4096).count();
    if total == 0 {
        return "unknown";
    }
    let ascii = text.chars().take(4096).filter(|c| c.is_ascii()).count();
    if ascii * 10 >= total * 9 {
        "en"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_rank_by_frequency() {
        let text = "parser parser parser tokenizer tokenizer lexer the and of";
        let kws = extract_keywords(text, 10);
        assert_eq!(kws[0], "parser");
        assert_eq!(kws[1], "tokenizer");
        assert_eq!(kws[2], "lexer");
        assert!(!kws.contains(&"the".to_string()));
    }

    #[test]
    fn keywords_skip_short_and_numeric_tokens() {
        let kws = extract_keywords("ab 123 x9y valid words words", 10);
        assert_eq!(kws, vec!["words".to_string(), "valid".to_string()]);
    }

    #[test]
    fn summary_takes_leading_sentences() {
        let text = "First sentence here. Second one follows. Third is longer and will not fit \
                    under such a small cap, so it gets dropped.";
        let summary = summarize(text, 45);
        assert_eq!(summary, "First sentence here. Second one follows.");
    }

    #[test]
    fn summary_truncates_single_long_sentence() {
        let text = "word ".repeat(100);
        let summary = summarize(&text, 50);
        assert!(summary.chars().count() <= 50);
        assert!(!summary.is_empty());
    }

    #[test]
    fn analyze_gates_corpus_features_on_chunk_count() {
        let analyzer = Analyzer::new();
        let one_chunk = vec!["only one chunk of text".to_string()];
        let analysis = analyzer.analyze("/tmp/a.txt", "h", "only one chunk of text", &one_chunk);
        assert!(analysis.tfidf_keywords.is_empty());
        assert!(analysis.topics.is_empty());
        assert_eq!(analysis.language, "en");
        assert_eq!(analysis.word_count, 5);
    }

    #[test]
    fn analyze_produces_corpus_features_for_multiple_chunks() {
        let analyzer = Analyzer::new();
        let chunks = vec![
            "the indexing engine stores chunk envelopes".to_string(),
            "vector search merges major and minor tiers".to_string(),
            "keyword extraction filters stop words".to_string(),
        ];
        let content = chunks.join("\n\n");
        let analysis = analyzer.analyze("/tmp/doc.md", "h", &content, &chunks);
        assert!(!analysis.tfidf_keywords.is_empty());
        assert!(!analysis.topics.is_empty());
        assert!(analysis.topics.len() <= MAX_TOPICS);
    }
}
