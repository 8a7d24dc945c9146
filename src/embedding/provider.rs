/// Embedding provider trait and FastEmbed implementation
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Allows abstraction over different embedding backends. Implementations
/// return one raw vector per input text, in input order.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for multiple texts
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Models the FastEmbed backend can serve, with dimension and rough size
const SUPPORTED_MODELS: &[(&str, usize, usize)] = &[
    ("all-MiniLM-L6-v2", 384, 90),
    ("bge-small-en-v1.5", 384, 130),
    ("bge-base-en-v1.5", 768, 440),
];

/// FastEmbed provider for local embedding generation
///
/// Models are downloaded on demand to the fastembed cache on first use.
/// Hub-style ids such as `sentence-transformers/all-MiniLM-L6-v2` are
/// accepted and resolve to the bare model name.
pub struct FastEmbedProvider {
    model: TextEmbedding,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let bare = model_name
            .trim()
            .strip_prefix("sentence-transformers/")
            .or_else(|| model_name.trim().strip_prefix("BAAI/"))
            .unwrap_or(model_name.trim());

        let embedding_model = match bare.to_lowercase().as_str() {
            "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            _ => {
                let supported: Vec<&str> = SUPPORTED_MODELS.iter().map(|m| m.0).collect();
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: {}",
                    model_name,
                    supported.join(", ")
                )));
            }
        };

        let (canonical, dimension, size_mb) = SUPPORTED_MODELS
            .iter()
            .copied()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(bare))
            .ok_or_else(|| EmbeddingError::InitializationError(model_name.to_string()))?;

        tracing::info!(
            "Initializing embedding model: {} ({}D, ~{}MB download if not cached)",
            canonical,
            dimension,
            size_mb
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model,
            model_name: canonical.to_string(),
            dimension,
        })
    }

    /// Expected dimension of a supported model, without loading it
    pub fn known_dimension(model_name: &str) -> Option<usize> {
        let bare = model_name.rsplit('/').next().unwrap_or(model_name);
        SUPPORTED_MODELS
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(bare))
            .map(|(_, dim, _)| *dim)
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Backend returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
