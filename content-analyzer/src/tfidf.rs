//! TF-IDF over a file's chunks and a deterministic topic grouping.
//!
//! Parameters follow the analysis pipeline this replaces: unigrams and
//! bigrams, min_df 1, max_df 0.95, max_features capped at 1000, smoothed
//! idf, l2-normalized document vectors, scores averaged across documents.

use std::collections::HashMap;

use crate::stopwords::is_stop_word;

const MAX_FEATURES: usize = 1000;
const MAX_DF: f64 = 0.95;
const MAX_TOPIC_TERMS: usize = 10;

struct Corpus {
    /// Feature vocabulary, sorted for stable output.
    terms: Vec<String>,
    /// Per-document l2-normalized tf-idf vectors, dense over `terms`.
    doc_vectors: Vec<Vec<f64>>,
}

fn tokenize(doc: &str) -> Vec<String> {
    doc.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.len() >= 2 && !is_stop_word(t))
        .collect()
}

/// Unigram + bigram counts for one document.
fn term_counts(doc: &str) -> HashMap<String, usize> {
    let tokens = tokenize(doc);
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in &tokens {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    for pair in tokens.windows(2) {
        *counts.entry(format!("{} {}", pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

fn build_corpus(docs: &[String]) -> Option<Corpus> {
    let doc_counts: Vec<HashMap<String, usize>> = docs
        .iter()
        .filter(|d| !d.trim().is_empty())
        .map(|d| term_counts(d))
        .collect();
    let n_docs = doc_counts.len();
    if n_docs < 2 {
        return None;
    }

    // Document frequency and corpus frequency per term.
    let mut df: HashMap<&str, usize> = HashMap::new();
    let mut cf: HashMap<&str, usize> = HashMap::new();
    for counts in &doc_counts {
        for (term, count) in counts {
            *df.entry(term).or_insert(0) += 1;
            *cf.entry(term).or_insert(0) += count;
        }
    }

    // Drop terms that appear in more than max_df of the documents.
    let df_cap = MAX_DF * n_docs as f64;
    let mut candidates: Vec<(&str, usize)> = df
        .iter()
        .filter(|(_, &d)| (d as f64) <= df_cap)
        .map(|(&term, _)| (term, cf[term]))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    // Keep the most frequent features, ties resolved alphabetically.
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    candidates.truncate(MAX_FEATURES);
    let mut terms: Vec<String> = candidates.iter().map(|(t, _)| t.to_string()).collect();
    terms.sort_unstable();

    let term_index: HashMap<&str, usize> = terms
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();

    // Smoothed idf, then l2-normalized tf-idf rows.
    let idf: Vec<f64> = terms
        .iter()
        .map(|t| {
            let d = df[t.as_str()] as f64;
            ((1.0 + n_docs as f64) / (1.0 + d)).ln() + 1.0
        })
        .collect();

    let doc_vectors: Vec<Vec<f64>> = doc_counts
        .iter()
        .map(|counts| {
            let mut row = vec![0.0f64; terms.len()];
            for (term, &count) in counts {
                if let Some(&i) = term_index.get(term.as_str()) {
                    row[i] = count as f64 * idf[i];
                }
            }
            let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for v in &mut row {
                    *v /= norm;
                }
            }
            row
        })
        .collect();

    Some(Corpus { terms, doc_vectors })
}

/// Top terms by mean TF-IDF across the document set. Empty when fewer than
/// two non-empty documents or no surviving features.
pub fn tfidf_keywords(docs: &[String], max_keywords: usize) -> Vec<(String, f64)> {
    let corpus = match build_corpus(docs) {
        Some(c) => c,
        None => return Vec::new(),
    };
    let n = corpus.doc_vectors.len() as f64;
    let mut scored: Vec<(String, f64)> = corpus
        .terms
        .iter()
        .enumerate()
        .map(|(i, term)| {
            let mean = corpus.doc_vectors.iter().map(|row| row[i]).sum::<f64>() / n;
            (term.clone(), mean)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(max_keywords);
    scored
}

/// Deterministic topic grouping: documents are bucketed round-robin into at
/// most `max_topics` groups and each topic exposes its group's strongest
/// terms by summed TF-IDF weight.
pub fn topic_clusters(
    docs: &[String],
    max_topics: usize,
) -> Vec<(usize, Vec<(String, f64)>)> {
    let corpus = match build_corpus(docs) {
        Some(c) => c,
        None => return Vec::new(),
    };
    let n_docs = corpus.doc_vectors.len();
    let n_topics = max_topics.min(n_docs).max(1);

    let mut topics = Vec::with_capacity(n_topics);
    for topic_id in 0..n_topics {
        let mut weights = vec![0.0f64; corpus.terms.len()];
        for (doc_idx, row) in corpus.doc_vectors.iter().enumerate() {
            if doc_idx % n_topics != topic_id {
                continue;
            }
            for (i, v) in row.iter().enumerate() {
                weights[i] += v;
            }
        }
        let mut terms: Vec<(String, f64)> = corpus
            .terms
            .iter()
            .enumerate()
            .filter(|(i, _)| weights[*i] > 0.0)
            .map(|(i, t)| (t.clone(), weights[i]))
            .collect();
        terms.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        terms.truncate(MAX_TOPIC_TERMS);
        if !terms.is_empty() {
            topics.push((topic_id, terms));
        }
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<String> {
        vec![
            "vector index compaction merges minor vectors".to_string(),
            "the scanner walks directory trees and prunes hidden entries".to_string(),
            "chunk envelopes carry positional metadata for retrieval".to_string(),
            "vector search deduplicates results across tiers".to_string(),
        ]
    }

    #[test]
    fn tfidf_is_deterministic_and_bounded() {
        let a = tfidf_keywords(&docs(), 20);
        let b = tfidf_keywords(&docs(), 20);
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert!(a.len() <= 20);
        // Scores descend.
        for pair in a.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn tfidf_includes_bigrams() {
        let docs = vec![
            "vector index vector index holds data".to_string(),
            "something entirely different lives here".to_string(),
            "vector index appears again in this one".to_string(),
        ];
        let terms = tfidf_keywords(&docs, 50);
        assert!(terms.iter().any(|(t, _)| t == "vector index"));
    }

    #[test]
    fn single_document_yields_nothing() {
        let one = vec!["just one document".to_string()];
        assert!(tfidf_keywords(&one, 20).is_empty());
        assert!(topic_clusters(&one, 5).is_empty());
    }

    #[test]
    fn topics_are_capped_and_weighted() {
        let topics = topic_clusters(&docs(), 5);
        assert!(!topics.is_empty());
        assert!(topics.len() <= 4);
        for (_, terms) in &topics {
            assert!(terms.len() <= 10);
            for pair in terms.windows(2) {
                assert!(pair[0].1 >= pair[1].1);
            }
        }
    }
}
