//! Append-only knowledge graph of grounding decisions.
//!
//! Each logged decision relates a context node (`context:<md5[:8]>`) to
//! source nodes (`file:<basename>`) with an outcome edge. Storage is two
//! append-only CSVs plus a JSON config and an optional dense embedding file
//! used for semantic recall of prior contexts. Read failures degrade to
//! empty results; write failures propagate.

mod npy;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use embedding_provider::Embedder;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum KgError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt embedding store: {0}")]
    Corrupt(String),
    #[error("embedder error: {0}")]
    Embedder(#[from] embedding_provider::EmbedderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Context,
    File,
    Concept,
    Session,
    Web,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Accepted,
    Rejected,
    Ignored,
    Discusses,
}

/// CSV row in `nodes.csv`; field order is the file's header contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub node_id: String,
    pub node_type: NodeType,
    pub label: String,
    pub embedding_id: Option<String>,
    pub created: String,
    pub last_seen: String,
    pub metadata: String,
}

/// CSV row in `edges.csv` (one autograph entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub timestamp: String,
    pub source_node: String,
    pub edge_type: EdgeType,
    pub target_node: String,
    pub weight: f64,
    pub context_summary: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KgSettings {
    pub decay_factor: f64,
    pub auto_suggest_threshold: f64,
    pub auto_include_threshold: f64,
    pub max_suggestions: usize,
}

impl Default for KgSettings {
    fn default() -> Self {
        Self {
            decay_factor: 0.95,
            auto_suggest_threshold: 0.5,
            auto_include_threshold: 0.8,
            max_suggestions: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeWeights {
    pub accepted: f64,
    pub rejected: f64,
    pub ignored: f64,
    pub discusses: f64,
}

impl Default for EdgeWeights {
    fn default() -> Self {
        Self {
            accepted: 1.0,
            rejected: -0.5,
            ignored: 0.0,
            discusses: 0.5,
        }
    }
}

impl EdgeWeights {
    pub fn for_edge(&self, edge_type: EdgeType) -> f64 {
        match edge_type {
            EdgeType::Accepted => self.accepted,
            EdgeType::Rejected => self.rejected,
            EdgeType::Ignored => self.ignored,
            EdgeType::Discusses => self.discusses,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KgConfig {
    #[serde(default)]
    pub settings: KgSettings,
    #[serde(default)]
    pub edge_weights: EdgeWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogOutcome {
    pub context_node: String,
    pub edges_created: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub ignored: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeMatch {
    pub edge: KnowledgeEdge,
    pub context_similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub source: String,
    pub confidence: f64,
    pub total_weight: f64,
    pub accept_count: f64,
    pub reject_count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KgStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_types: BTreeMap<String, usize>,
    pub edge_types: BTreeMap<String, usize>,
    pub bootstrap_phase: String,
    pub embeddings_available: bool,
    pub embeddings_count: usize,
}

pub struct AutographKg {
    kg_path: PathBuf,
    config: KgConfig,
    embedder: Option<Arc<dyn Embedder>>,
    embeddings: Vec<Vec<f32>>,
    embedding_index: BTreeMap<String, usize>,
}

impl AutographKg {
    pub fn open(kg_path: &Path, embedder: Option<Arc<dyn Embedder>>) -> Result<AutographKg, KgError> {
        std::fs::create_dir_all(kg_path)?;

        let config_path = kg_path.join("config.json");
        let config = if config_path.exists() {
            match std::fs::read_to_string(&config_path)
                .map_err(KgError::from)
                .and_then(|s| serde_json::from_str(&s).map_err(KgError::from))
            {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(%err, "unreadable knowledge-graph config, using defaults");
                    KgConfig::default()
                }
            }
        } else {
            let config = KgConfig::default();
            std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
            config
        };

        let mut kg = AutographKg {
            kg_path: kg_path.to_path_buf(),
            config,
            embedder,
            embeddings: Vec::new(),
            embedding_index: BTreeMap::new(),
        };
        kg.load_embeddings();
        Ok(kg)
    }

    pub fn config(&self) -> &KgConfig {
        &self.config
    }

    fn nodes_path(&self) -> PathBuf {
        self.kg_path.join("nodes.csv")
    }
    fn edges_path(&self) -> PathBuf {
        self.kg_path.join("edges.csv")
    }
    fn embeddings_path(&self) -> PathBuf {
        self.kg_path.join("embeddings.npy")
    }
    fn embedding_index_path(&self) -> PathBuf {
        self.kg_path.join("embedding_index.json")
    }

    fn load_embeddings(&mut self) {
        let npy = self.embeddings_path();
        let idx = self.embedding_index_path();
        if !npy.exists() || !idx.exists() {
            return;
        }
        let loaded = npy::read_npy(&npy).and_then(|rows| {
            let index: BTreeMap<String, usize> =
                serde_json::from_str(&std::fs::read_to_string(&idx)?)?;
            Ok((rows, index))
        });
        match loaded {
            Ok((rows, index)) => {
                self.embeddings = rows;
                self.embedding_index = index;
            }
            Err(err) => {
                tracing::warn!(%err, "could not load context embeddings, similarity recall disabled");
            }
        }
    }

    fn save_embeddings(&self) -> Result<(), KgError> {
        let dim = self.embeddings.first().map(|r| r.len()).unwrap_or(0);
        npy::write_npy(&self.embeddings_path(), &self.embeddings, dim)?;
        std::fs::write(
            self.embedding_index_path(),
            serde_json::to_string(&self.embedding_index)?,
        )?;
        Ok(())
    }

    /// Log one grounding decision. Sources that were offered but neither
    /// accepted nor rejected become `ignored` edges.
    pub fn log(
        &mut self,
        context_summary: &str,
        command: &str,
        offered: &[String],
        accepted: &[String],
        rejected: &[String],
    ) -> Result<LogOutcome, KgError> {
        let timestamp = now_utc();
        let digest = format!("{:x}", md5::compute(context_summary.as_bytes()));
        let context_node = format!("context:{}", &digest[..8]);

        self.get_or_create_node(&context_node, NodeType::Context, context_summary)?;

        let mut edges_created = 0;
        for source in accepted {
            self.append_source_edge(
                &timestamp,
                &context_node,
                EdgeType::Accepted,
                source,
                context_summary,
                command,
            )?;
            edges_created += 1;
        }
        for source in rejected {
            self.append_source_edge(
                &timestamp,
                &context_node,
                EdgeType::Rejected,
                source,
                context_summary,
                command,
            )?;
            edges_created += 1;
        }
        let ignored: Vec<&String> = offered
            .iter()
            .filter(|s| !accepted.contains(s) && !rejected.contains(s))
            .collect();
        for source in &ignored {
            self.append_source_edge(
                &timestamp,
                &context_node,
                EdgeType::Ignored,
                source,
                context_summary,
                command,
            )?;
            edges_created += 1;
        }

        Ok(LogOutcome {
            context_node,
            edges_created,
            accepted: accepted.len(),
            rejected: rejected.len(),
            ignored: ignored.len(),
        })
    }

    fn append_source_edge(
        &mut self,
        timestamp: &str,
        context_node: &str,
        edge_type: EdgeType,
        source: &str,
        context_summary: &str,
        command: &str,
    ) -> Result<(), KgError> {
        let node_id = format!("file:{}", basename(source));
        self.get_or_create_node(&node_id, NodeType::File, source)?;
        self.append_edge(&KnowledgeEdge {
            timestamp: timestamp.to_string(),
            source_node: context_node.to_string(),
            edge_type,
            target_node: node_id,
            weight: self.config.edge_weights.for_edge(edge_type),
            context_summary: context_summary.to_string(),
            command: command.to_string(),
        })
    }

    fn get_or_create_node(
        &mut self,
        node_id: &str,
        node_type: NodeType,
        label: &str,
    ) -> Result<(), KgError> {
        if self.read_nodes().iter().any(|n| n.node_id == node_id) {
            return Ok(());
        }

        let embedding_id = if node_type == NodeType::Context {
            self.add_context_embedding(node_id, label)?
        } else {
            None
        };

        let now = now_utc();
        self.append_node(&KnowledgeNode {
            node_id: node_id.to_string(),
            node_type,
            label: label.to_string(),
            embedding_id,
            created: now.clone(),
            last_seen: now,
            metadata: "{}".to_string(),
        })
    }

    fn add_context_embedding(
        &mut self,
        node_id: &str,
        label: &str,
    ) -> Result<Option<String>, KgError> {
        let Some(embedder) = self.embedder.clone() else {
            return Ok(None);
        };
        let vector = embedder.embed(label)?;
        let row = self.embeddings.len();
        self.embeddings.push(vector);
        self.embedding_index.insert(node_id.to_string(), row);
        self.save_embeddings()?;
        Ok(Some(format!("emb:{node_id}")))
    }

    fn append_node(&self, node: &KnowledgeNode) -> Result<(), KgError> {
        let path = self.nodes_path();
        let exists = path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        writer.serialize(node)?;
        writer.flush()?;
        Ok(())
    }

    fn append_edge(&self, edge: &KnowledgeEdge) -> Result<(), KgError> {
        let path = self.edges_path();
        let exists = path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        writer.serialize(edge)?;
        writer.flush()?;
        Ok(())
    }

    fn read_nodes(&self) -> Vec<KnowledgeNode> {
        read_csv(&self.nodes_path())
    }

    fn read_edges(&self) -> Vec<KnowledgeEdge> {
        read_csv(&self.edges_path())
    }

    /// Top contexts by cosine similarity to `query`. Empty when no embedder
    /// or no stored embeddings.
    fn find_similar_contexts(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };
        if self.embeddings.is_empty() {
            return Vec::new();
        }
        let query_vec = match embedder.embed(query) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, "query embedding failed");
                return Vec::new();
            }
        };

        let mut scored: Vec<(String, f64)> = self
            .embedding_index
            .iter()
            .filter_map(|(node_id, &row)| {
                self.embeddings
                    .get(row)
                    .map(|v| (node_id.clone(), cosine(&query_vec, v)))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        scored
    }

    /// Edges of contexts similar to `context`, sorted by (similarity,
    /// weight) descending. Falls back to substring matching on the stored
    /// context summaries when no embedder is available.
    pub fn query(&self, context: &str, limit: usize) -> Result<Vec<EdgeMatch>, KgError> {
        let similar = self.find_similar_contexts(context, limit);
        let edges = self.read_edges();

        if similar.is_empty() {
            let needle = context.to_lowercase();
            return Ok(edges
                .into_iter()
                .filter(|e| e.context_summary.to_lowercase().contains(&needle))
                .take(limit)
                .map(|edge| EdgeMatch {
                    edge,
                    context_similarity: None,
                })
                .collect());
        }

        let mut results = Vec::new();
        for (node_id, similarity) in &similar {
            for edge in &edges {
                if edge.source_node == *node_id {
                    results.push(EdgeMatch {
                        edge: edge.clone(),
                        context_similarity: Some(*similarity),
                    });
                }
            }
        }
        results.sort_by(|a, b| {
            let sa = a.context_similarity.unwrap_or(0.0);
            let sb = b.context_similarity.unwrap_or(0.0);
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.edge
                        .weight
                        .partial_cmp(&a.edge.weight)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Sources frequently accepted in similar contexts, filtered by
    /// confidence = Σsim·accept / (Σsim·accept + Σsim·reject).
    pub fn suggest(
        &self,
        context: &str,
        threshold: Option<f64>,
    ) -> Result<Vec<Suggestion>, KgError> {
        let threshold = threshold.unwrap_or(self.config.settings.auto_suggest_threshold);
        let max_suggestions = self.config.settings.max_suggestions;

        let similar = self.find_similar_contexts(context, 20);
        if similar.is_empty() {
            return Ok(Vec::new());
        }

        let edges = self.read_edges();
        let mut scores: BTreeMap<String, (f64, f64, f64)> = BTreeMap::new();
        for (node_id, similarity) in &similar {
            if *similarity < threshold {
                continue;
            }
            for edge in &edges {
                if edge.source_node != *node_id {
                    continue;
                }
                let entry = scores.entry(edge.target_node.clone()).or_insert((0.0, 0.0, 0.0));
                match edge.edge_type {
                    EdgeType::Accepted => {
                        entry.0 += similarity;
                        entry.2 += edge.weight * similarity;
                    }
                    EdgeType::Rejected => {
                        entry.1 += similarity;
                        entry.2 += edge.weight * similarity;
                    }
                    EdgeType::Ignored | EdgeType::Discusses => {}
                }
            }
        }

        let mut suggestions: Vec<Suggestion> = scores
            .into_iter()
            .filter_map(|(source, (accept, reject, total_weight))| {
                let total = accept + reject;
                if total <= 0.0 {
                    return None;
                }
                let confidence = accept / total;
                if confidence < threshold {
                    return None;
                }
                Some(Suggestion {
                    source,
                    confidence: round3(confidence),
                    total_weight: round3(total_weight),
                    accept_count: round2(accept),
                    reject_count: round2(reject),
                })
            })
            .collect();

        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.total_weight
                        .partial_cmp(&a.total_weight)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        suggestions.truncate(max_suggestions);
        Ok(suggestions)
    }

    pub fn stats(&self) -> KgStats {
        let nodes = self.read_nodes();
        let edges = self.read_edges();

        let mut node_types: BTreeMap<String, usize> = BTreeMap::new();
        for node in &nodes {
            let key = serde_json::to_value(node.node_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            *node_types.entry(key).or_insert(0) += 1;
        }
        let mut edge_types: BTreeMap<String, usize> = BTreeMap::new();
        for edge in &edges {
            let key = serde_json::to_value(edge.edge_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            *edge_types.entry(key).or_insert(0) += 1;
        }

        let bootstrap_phase = match edges.len() {
            0 => "Cold",
            n if n < 10 => "Learning",
            n if n < 50 => "Warm",
            _ => "Hot",
        };

        KgStats {
            total_nodes: nodes.len(),
            total_edges: edges.len(),
            node_types,
            edge_types,
            bootstrap_phase: bootstrap_phase.to_string(),
            embeddings_available: self.embedder.is_some(),
            embeddings_count: self.embedding_index.len(),
        }
    }
}

fn read_csv<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    if !path.exists() {
        return Vec::new();
    }
    let reader = match csv::ReaderBuilder::new().has_headers(true).from_path(path) {
        Ok(r) => r,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "could not open graph CSV");
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for row in reader.into_deserialize() {
        match row {
            Ok(value) => out.push(value),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "skipping malformed CSV row");
            }
        }
    }
    out
}

fn basename(source: &str) -> String {
    Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string())
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
