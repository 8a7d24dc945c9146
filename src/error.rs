use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::index::VectorIndexError;

/// Main error type for Exemplar
#[derive(Error, Debug)]
pub enum ExemplarError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Embedding backend errors (model load, generation)
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Vector index errors (topology, training, search)
    #[error("Vector index error: {0}")]
    Index(#[from] VectorIndexError),

    /// Embedding dimension disagrees with the configured index dimension
    #[error("Dimension mismatch: index expects {expected}, embeddings have {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embeddings and texts handed to the index differ in length
    #[error("Length mismatch: {embeddings} embeddings for {texts} texts")]
    LengthMismatch { embeddings: usize, texts: usize },

    /// Persisted index or metadata file is missing
    #[error("Index file not found: {path}")]
    IndexNotFound { path: PathBuf },

    /// Persisted index or metadata file is corrupt or inconsistent
    #[error("Serialization error in {path}: {message}")]
    Serialization { path: PathBuf, message: String },

    /// Retriever could not load its index
    #[error("Retriever unavailable: {reason}")]
    RetrieverUnavailable { reason: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Downstream code generator errors
    #[error("Generator error: {0}")]
    Generator(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExemplarError {
    pub(crate) fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Serialization {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Exemplar operations
pub type Result<T> = std::result::Result<T, ExemplarError>;
