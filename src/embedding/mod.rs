/// Embedding generation
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction over backends
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2 by default)
/// - Embedder for batching, normalization and dimension pinning
mod embedder;
mod provider;

pub use embedder::{normalize_rows, similarity, EncodeOptions, Embedder};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

impl From<&EmbeddingConfig> for EncodeOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            normalize: config.normalize,
            show_progress: config.show_progress,
        }
    }
}

/// Load the configured FastEmbed model and wrap it in an [`Embedder`]
///
/// Failing to load the model is fatal here; callers decide how to degrade.
pub fn load_embedder(config: &EmbeddingConfig) -> Result<Embedder, EmbeddingError> {
    let provider = FastEmbedProvider::new(&config.model)?;

    if provider.dimension() != config.dimension {
        tracing::warn!(
            "Configured dimension {} differs from {} output dimension {}",
            config.dimension,
            provider.model_name(),
            provider.dimension()
        );
    }

    Ok(Embedder::new(Arc::new(provider), EncodeOptions::from(config)))
}
