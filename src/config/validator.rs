use crate::config::RagConfig;
use crate::error::{ExemplarError, Result, ValidationError};
use crate::index::{IndexTopology, HNSW_MAX_CONNECTIONS};
use std::collections::HashSet;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every violation at once
    pub fn validate(config: &RagConfig) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_embedding(config, &mut errors);
        Self::validate_datasets(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_paths(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ExemplarError::ConfigValidation { errors })
        }
    }

    fn validate_embedding(config: &RagConfig, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_datasets(config: &RagConfig, errors: &mut Vec<ValidationError>) {
        let mut seen = HashSet::new();
        for (idx, source) in config.datasets.iter().enumerate() {
            if source.name.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("datasets[{}].name", idx),
                    "Dataset name cannot be empty",
                ));
            } else if !seen.insert(source.name.as_str()) {
                errors.push(ValidationError::new(
                    format!("datasets[{}].name", idx),
                    format!("Duplicate dataset name: {}", source.name),
                ));
            }

            if source.split.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("datasets[{}].split", idx),
                    "Split cannot be empty",
                ));
            }

            if source.max_samples == Some(0) {
                errors.push(ValidationError::new(
                    format!("datasets[{}].max_samples", idx),
                    "max_samples must be greater than 0 when set",
                ));
            }
        }
    }

    fn validate_index(config: &RagConfig, errors: &mut Vec<ValidationError>) {
        // Unknown topology names are not errors: the index falls back to
        // exact inner product at creation time.
        if IndexTopology::parse(&config.index.index_type).is_none() {
            tracing::warn!(
                "Unknown index type '{}' will fall back to IndexFlatIP",
                config.index.index_type
            );
        }

        if config.index.nlist == 0 {
            errors.push(ValidationError::new(
                "index.nlist",
                "nlist must be greater than 0",
            ));
        }

        if config.index.nprobe == 0 {
            errors.push(ValidationError::new(
                "index.nprobe",
                "nprobe must be greater than 0",
            ));
        }

        if config.index.hnsw_m == 0 || config.index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                "HNSW parameters must be greater than 0",
            ));
        }

        if config.index.hnsw_m > HNSW_MAX_CONNECTIONS {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                format!("hnsw_m must be at most {}", HNSW_MAX_CONNECTIONS),
            ));
        }
    }

    fn validate_retrieval(config: &RagConfig, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        let min_score = config.retrieval.min_score;
        if !min_score.is_finite() || !(-1.0..=1.0).contains(&min_score) {
            errors.push(ValidationError::new(
                "retrieval.min_score",
                format!("min_score must be within [-1, 1], got {}", min_score),
            ));
        }
    }

    fn validate_paths(config: &RagConfig, errors: &mut Vec<ValidationError>) {
        if config.paths.index_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "paths.index_file",
                "Index file name cannot be empty",
            ));
        }

        if config.paths.metadata_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "paths.metadata_file",
                "Metadata file name cannot be empty",
            ));
        }

        if config.paths.index_file == config.paths.metadata_file {
            errors.push(ValidationError::new(
                "paths.metadata_file",
                "Index and metadata files must differ",
            ));
        }
    }
}
