//! Shared embedder defaults and capability detection.

use std::path::PathBuf;
use std::sync::Arc;

use crate::{Embedder, HashEmbedder, OnnxConfig, OnnxEmbedder};

/// Default settings for the local ONNX embedder (MiniLM-class model).
#[derive(Debug, Clone, Copy)]
pub struct OnnxDefaults {
    pub model_path: &'static str,
    pub tokenizer_path: &'static str,
    pub runtime_library_path: &'static str,
    pub embedding_dimension: usize,
    pub max_input_tokens: usize,
    pub model_id: &'static str,
}

/// Shared defaults so the CLI, engine and tests stay in sync.
pub const ONNX_DEFAULTS: OnnxDefaults = OnnxDefaults {
    model_path: "models/all-MiniLM-L6-v2/model.onnx",
    tokenizer_path: "models/all-MiniLM-L6-v2/tokenizer.json",
    runtime_library_path: "lib/libonnxruntime.so",
    embedding_dimension: 384,
    max_input_tokens: 512,
    model_id: "all-MiniLM-L6-v2-onnx",
};

/// Build an [`OnnxConfig`] from the shared defaults, rooted at `base`.
pub fn default_onnx_config(base: &std::path::Path) -> OnnxConfig {
    OnnxConfig {
        model_path: base.join(ONNX_DEFAULTS.model_path),
        tokenizer_path: base.join(ONNX_DEFAULTS.tokenizer_path),
        runtime_library_path: base.join(ONNX_DEFAULTS.runtime_library_path),
        dimension: ONNX_DEFAULTS.embedding_dimension,
        max_input_length: ONNX_DEFAULTS.max_input_tokens,
        model_id: ONNX_DEFAULTS.model_id.into(),
    }
}

/// Detect the best available embedder. The ONNX provider is used when its
/// assets exist; otherwise `None`. Callers treat the absence as a degraded
/// capability, not an error.
pub fn detect_embedder(base: &std::path::Path) -> Option<Arc<dyn Embedder>> {
    let config = default_onnx_config(base);
    if config.model_path.exists() && config.tokenizer_path.exists() {
        match OnnxEmbedder::new(config) {
            Ok(embedder) => return Some(Arc::new(embedder)),
            Err(err) => {
                tracing::warn!(%err, "ONNX embedder present but failed to load");
            }
        }
    }
    None
}

/// Deterministic embedder with the default dimension; always available.
pub fn deterministic_embedder() -> Arc<dyn Embedder> {
    Arc::new(
        HashEmbedder::new(ONNX_DEFAULTS.embedding_dimension)
            .unwrap_or_else(|_| unreachable!("default dimension is non-zero")),
    )
}

/// Resolve the asset base directory: `$EMBEDDER_ASSET_DIR` or the manifest
/// directory.
pub fn asset_base() -> PathBuf {
    std::env::var_os("EMBEDDER_ASSET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}
