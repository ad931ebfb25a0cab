//! Deterministic hash-projection embedder.
//!
//! Produces stable unit vectors from text alone. Identical inputs map to
//! identical vectors, so tests and embedder-less installs get reproducible
//! similarity behavior without model assets.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::{l2_normalize, Embedder, EmbedderError, EmbedderInfo, ProviderKind};

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    info: EmbedderInfo,
    max_input_length: usize,
    base_seed: u64,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<HashEmbedder, EmbedderError> {
        HashEmbedder::with_seed(dimension, 0)
    }

    pub fn with_seed(dimension: usize, base_seed: u64) -> Result<HashEmbedder, EmbedderError> {
        if dimension == 0 {
            return Err(EmbedderError::InvalidConfiguration {
                message: "dimension must be greater than zero".into(),
            });
        }
        Ok(HashEmbedder {
            info: EmbedderInfo {
                provider: ProviderKind::DeterministicHash,
                model_id: "deterministic-hash".into(),
                dimension,
            },
            max_input_length: 1_000_000,
            base_seed,
        })
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.info.dimension);
        for index in 0..self.info.dimension {
            let mut hasher = DefaultHasher::new();
            self.base_seed.hash(&mut hasher);
            index.hash(&mut hasher);
            text.hash(&mut hasher);
            out.push(component_from_hash(hasher.finish()));
        }
        l2_normalize(&mut out);
        out
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let actual_length = text.chars().count();
        if actual_length > self.max_input_length {
            return Err(EmbedderError::InputTooLong {
                max_length: self.max_input_length,
                actual_length,
            });
        }
        Ok(self.generate(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn info(&self) -> &EmbedderInfo {
        &self.info
    }
}

fn component_from_hash(value: u64) -> f32 {
    let normalized = (value as f64) / (u64::MAX as f64);
    (normalized * 2.0 - 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_map_to_identical_unit_vectors() {
        let embedder = HashEmbedder::new(64).unwrap();
        let a = embedder.embed("the same text").unwrap();
        let b = embedder.embed("the same text").unwrap();
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn distinct_inputs_diverge() {
        let embedder = HashEmbedder::new(64).unwrap();
        let a = embedder.embed("alpha").unwrap();
        let b = embedder.embed("omega").unwrap();
        let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!(dot < 0.99, "unrelated texts should not be near-identical");
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(
            HashEmbedder::new(0),
            Err(EmbedderError::InvalidConfiguration { .. })
        ));
    }
}
