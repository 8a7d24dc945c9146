//! Configuration management for Exemplar
//!
//! One `RagConfig` is loaded per process (file, then environment overrides)
//! and handed to every component that needs it. After loading it changes
//! only through the explicit setters below.

use crate::embedding::FastEmbedProvider;
use crate::error::{ExemplarError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Environment variable selecting the config file used by [`RagConfig::load_default`]
pub const ENV_CONFIG_PATH: &str = "RAG_CONFIG_PATH";
/// Environment variable overriding `embedding.model`
pub const ENV_EMBEDDING_MODEL: &str = "RAG_EMBEDDING_MODEL";
/// Environment variable overriding `retrieval.top_k`
pub const ENV_TOP_K: &str = "RAG_TOP_K";
/// Environment variable overriding `paths.data_dir` (cache and index dirs follow it)
pub const ENV_DATA_DIR: &str = "RAG_DATA_DIR";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_sources")]
    pub datasets: Vec<DatasetSource>,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub normalize: bool,
    pub batch_size: usize,
    pub show_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            normalize: true,
            batch_size: 32,
            show_progress: true,
        }
    }
}

/// One named external corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSource {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default = "default_split")]
    pub split: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_samples: Option<usize>,
}

impl DatasetSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            requires_auth: false,
            split: default_split(),
            max_samples: None,
        }
    }

    pub fn gated(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = Some(max_samples);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_split() -> String {
    "train".to_string()
}

/// Default corpus list: four public instruction/solution coding corpora
pub fn default_sources() -> Vec<DatasetSource> {
    vec![
        DatasetSource::new("gss1147/Elite_GOD_Coder_100k"),
        DatasetSource::new("QuixiAI/dolphin-coder").gated(),
        DatasetSource::new("nvidia/OpenCodeInstruct"),
        DatasetSource::new("HuggingFaceH4/codealpaca_20k"),
    ]
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Topology name, e.g. "IndexFlatIP", "IndexFlatL2", "IndexIVFFlat", "IndexHNSW"
    #[serde(rename = "type")]
    pub index_type: String,
    pub metric: String,
    /// Inverted lists for IVF topologies
    pub nlist: usize,
    /// Lists probed per IVF search
    pub nprobe: usize,
    /// HNSW connections per layer
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    /// Capacity hint for the HNSW graph
    pub hnsw_max_elements: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_type: "IndexFlatIP".to_string(),
            metric: "inner_product".to_string(),
            nlist: 100,
            nprobe: 10,
            hnsw_m: 32,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            hnsw_max_elements: 200_000,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.3,
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub index_dir: PathBuf,
    pub index_file: String,
    pub metadata_file: String,
    pub config_file: String,
}

impl PathsConfig {
    /// Paths rooted at `data_dir`, with cache and index beneath it
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            cache_dir: data_dir.join("cache"),
            index_dir: data_dir.join("index"),
            data_dir,
            index_file: "vectors.idx".to_string(),
            metadata_file: "metadata.bin".to_string(),
            config_file: "config.toml".to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::rooted_at("rag_data")
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            datasets: default_sources(),
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl RagConfig {
    /// Load configuration from a file, falling back to defaults when the
    /// file is missing or unreadable. Malformed or invalid files are errors.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            Self::default()
        } else {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let mut config: RagConfig = toml::from_str(&content)?;
                    if config.datasets.is_empty() {
                        config.datasets = default_sources();
                    }
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("Cannot read config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load from `RAG_CONFIG_PATH` if set, else from the default location
    pub fn load_default() -> Result<Self> {
        let path = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::default_path()?,
        };
        Self::load(&path)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ExemplarError::io(e, format!("Failed to create config directory: {:?}", parent))
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| ExemplarError::io(e, format!("Failed to write config file: {:?}", path)))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Create data, cache and index directories. Idempotent.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.paths.data_dir,
            &self.paths.cache_dir,
            &self.paths.index_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| {
                ExemplarError::io(e, format!("Failed to create directory: {}", dir.display()))
            })?;
        }
        tracing::debug!("Ensured directories under {}", self.paths.data_dir.display());
        Ok(())
    }

    /// Enabled sources, in configured order
    pub fn enabled_sources(&self) -> Vec<&DatasetSource> {
        self.datasets.iter().filter(|ds| ds.enabled).collect()
    }

    pub fn index_path(&self) -> PathBuf {
        self.paths.index_dir.join(&self.paths.index_file)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.paths.index_dir.join(&self.paths.metadata_file)
    }

    pub fn config_path(&self) -> PathBuf {
        self.paths.data_dir.join(&self.paths.config_file)
    }

    /// Switch embedding model. The dimension travels with the model, and an
    /// index built with another dimension must be rebuilt.
    pub fn set_embedding_model(&mut self, model: impl Into<String>, dimension: usize) {
        self.embedding.model = model.into();
        self.embedding.dimension = dimension;
    }

    pub fn set_top_k(&mut self, top_k: usize) {
        self.retrieval.top_k = top_k;
    }

    pub fn set_min_score(&mut self, min_score: f32) {
        self.retrieval.min_score = min_score;
    }

    pub fn set_index_type(&mut self, index_type: impl Into<String>) {
        self.index.index_type = index_type.into();
    }

    /// Move the data directory; cache and index directories move with it
    pub fn set_data_dir(&mut self, data_dir: impl Into<PathBuf>) {
        let data_dir = data_dir.into();
        self.paths.cache_dir = data_dir.join("cache");
        self.paths.index_dir = data_dir.join("index");
        self.paths.data_dir = data_dir;
    }

    /// Enable or disable a source by name. Returns false if no source matched.
    pub fn set_source_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.datasets.iter_mut().find(|ds| ds.name == name) {
            Some(source) => {
                source.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `RAG_*` overrides from key/value pairs
    pub fn apply_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            if let Err(e) = self.set_value_from_env(key, value) {
                tracing::warn!("Failed to apply env override {}: {}", key, e);
            }
        }
    }

    fn set_value_from_env(&mut self, key: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }

        match key {
            ENV_EMBEDDING_MODEL => {
                let dimension = FastEmbedProvider::known_dimension(value)
                    .unwrap_or(self.embedding.dimension);
                self.set_embedding_model(value, dimension);
            }
            ENV_TOP_K => {
                self.retrieval.top_k =
                    value.parse().map_err(|_| ExemplarError::InvalidConfigValue {
                        path: key.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            ENV_DATA_DIR => {
                self.set_data_dir(value);
            }
            _ => {}
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            ExemplarError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("exemplar").join("config.toml"))
    }
}
