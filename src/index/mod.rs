//! Vector index construction, persistence and search
//!
//! Vector `i` in the index and `metadata[i]` always describe the same chunk.
//! Both are append-only; removing material means rebuilding from scratch.

mod ivf;
pub mod persist;
mod topology;

pub use ivf::IvfLists;
pub use topology::{
    HnswParams, IndexSpec, IndexTopology, VectorIndex, VectorIndexError, HNSW_MAX_CONNECTIONS,
};

use crate::config::RagConfig;
use crate::embedding::Embedder;
use crate::error::{ExemplarError, Result};
use crate::ingest::{CorpusLoader, DatasetIngestor, IngestStats};
use ndarray::{ArrayView1, ArrayView2};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHit {
    pub id: usize,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub index_type: String,
    pub metadata_count: usize,
    pub is_trained: bool,
    pub build_id: Option<Uuid>,
}

/// Ingestion counters merged with indexing results
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BuildStats {
    #[serde(flatten)]
    pub ingest: IngestStats,
    pub vectors_indexed: usize,
    pub batches: usize,
    pub elapsed_secs: f64,
}

/// Owns the vector index and the ordered chunk texts beside it
pub struct IndexBuilder {
    config: Arc<RagConfig>,
    embedder: Arc<Embedder>,
    index: Option<VectorIndex>,
    metadata: Vec<String>,
    build_id: Option<Uuid>,
}

impl IndexBuilder {
    pub fn new(config: Arc<RagConfig>, embedder: Arc<Embedder>) -> Self {
        Self {
            config,
            embedder,
            index: None,
            metadata: Vec::new(),
            build_id: None,
        }
    }

    pub fn config(&self) -> &Arc<RagConfig> {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    /// Ordered chunk texts; position `i` belongs to vector `i`
    pub fn metadata(&self) -> &[String] {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.index.as_ref().map_or(0, VectorIndex::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build id of the last saved or loaded file pair
    pub fn build_id(&self) -> Option<Uuid> {
        self.build_id
    }

    fn index_mut(&mut self) -> &mut VectorIndex {
        let config = &self.config;
        self.index.get_or_insert_with(|| {
            VectorIndex::new(IndexSpec::from_config(
                &config.index,
                config.embedding.dimension,
            ))
        })
    }

    /// Append embeddings and their texts, training first when needed
    pub fn add_vectors(&mut self, embeddings: ArrayView2<f32>, texts: &[String]) -> Result<()> {
        if embeddings.nrows() != texts.len() {
            return Err(ExemplarError::LengthMismatch {
                embeddings: embeddings.nrows(),
                texts: texts.len(),
            });
        }

        let expected = self.config.embedding.dimension;
        if embeddings.ncols() != expected {
            return Err(ExemplarError::DimensionMismatch {
                expected,
                actual: embeddings.ncols(),
            });
        }
        if texts.is_empty() {
            return Ok(());
        }

        let contiguous = embeddings.as_standard_layout();
        let rows = contiguous
            .as_slice()
            .ok_or_else(|| ExemplarError::Config("embedding matrix is not contiguous".into()))?;

        let index = self.index_mut();
        if !index.is_trained() {
            index.train(rows)?;
        }
        index.add(rows)?;
        let total = index.len();

        self.metadata.extend(texts.iter().cloned());
        tracing::info!("Added {} vectors to index (total: {})", texts.len(), total);
        Ok(())
    }

    /// Encode `texts` and add them; returns how many were added
    pub fn build_from_texts(&mut self, texts: &[String]) -> Result<usize> {
        if texts.is_empty() {
            tracing::warn!("No texts provided for indexing");
            return Ok(0);
        }

        tracing::info!("Building index from {} texts", texts.len());
        let embeddings = self.embedder.encode_default(texts)?;
        self.add_vectors(embeddings.view(), texts)?;
        Ok(texts.len())
    }

    /// Stream chunks from every enabled source into the index
    ///
    /// Chunks are embedded in groups of `embedding.batch_size`, so at most
    /// one batch of texts is held in memory at a time.
    pub fn build_from_datasets(
        &mut self,
        loader: &dyn CorpusLoader,
        max_chunks: Option<usize>,
    ) -> Result<BuildStats> {
        let started = Instant::now();
        let batch_size = self.config.embedding.batch_size.max(1);
        let options = self.embedder.defaults();
        let limit = max_chunks.unwrap_or(usize::MAX);

        let mut ingestor = DatasetIngestor::new(Arc::clone(&self.config));
        let mut batch: Vec<String> = Vec::with_capacity(batch_size);
        let mut indexed = 0;
        let mut batches = 0;

        for chunk in ingestor.chunks(loader).take(limit) {
            batch.push(chunk.into_text());
            if batch.len() == batch_size {
                let embeddings = self.embedder.encode(&batch, options)?;
                self.add_vectors(embeddings.view(), &batch)?;
                indexed += batch.len();
                batches += 1;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            let embeddings = self.embedder.encode(&batch, options)?;
            self.add_vectors(embeddings.view(), &batch)?;
            indexed += batch.len();
            batches += 1;
        }

        if max_chunks.is_some_and(|max| indexed >= max) {
            tracing::info!("Reached max_chunks limit: {}", limit);
        }
        if indexed == 0 {
            tracing::warn!("No chunks loaded from datasets");
        }

        Ok(BuildStats {
            ingest: ingestor.stats(),
            vectors_indexed: indexed,
            batches,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// Write index and metadata under a fresh build id
    pub fn save(&mut self, index_path: &Path, metadata_path: &Path) -> Result<Uuid> {
        let build_id = Uuid::new_v4();
        let config = Arc::clone(&self.config);
        let index = self.index_mut();

        persist::write_index(index_path, index, build_id)?;
        tracing::info!("Saved index to {}", index_path.display());

        persist::write_metadata(metadata_path, build_id, &self.metadata)?;
        tracing::info!(
            "Saved metadata ({} entries) to {}",
            self.metadata.len(),
            metadata_path.display()
        );
        tracing::debug!(build_id = %build_id, model = %config.embedding.model, "Build saved");

        self.build_id = Some(build_id);
        Ok(build_id)
    }

    /// Replace the in-memory state with a persisted file pair
    pub fn load(&mut self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        for path in [index_path, metadata_path] {
            if !path.exists() {
                return Err(ExemplarError::IndexNotFound {
                    path: path.to_path_buf(),
                });
            }
        }

        let (index, header) = persist::read_index(index_path)?;
        let (metadata_build, metadata) = persist::read_metadata(metadata_path)?;

        if metadata_build != header.build_id {
            return Err(ExemplarError::serialization(
                metadata_path,
                format!(
                    "build id {} does not match index build {}",
                    metadata_build, header.build_id
                ),
            ));
        }
        if metadata.len() != index.len() {
            return Err(ExemplarError::serialization(
                metadata_path,
                format!(
                    "{} metadata entries for {} vectors",
                    metadata.len(),
                    index.len()
                ),
            ));
        }
        if index.dimension() != self.config.embedding.dimension {
            return Err(ExemplarError::DimensionMismatch {
                expected: self.config.embedding.dimension,
                actual: index.dimension(),
            });
        }

        let configured = IndexTopology::parse(&self.config.index.index_type);
        if configured.is_some_and(|t| t != index.topology()) {
            tracing::warn!(
                "Index on disk is {}, configuration asks for {}",
                index.topology(),
                self.config.index.index_type
            );
        }

        tracing::info!(
            "Loaded index from {} ({} vectors, built {})",
            index_path.display(),
            index.len(),
            header.built_at
        );

        self.index = Some(index);
        self.metadata = metadata;
        self.build_id = Some(header.build_id);
        Ok(())
    }

    /// Top `k` hits for `query`, highest score first
    pub fn search(&self, query: ArrayView1<f32>, k: usize) -> Result<Vec<IndexHit>> {
        let Some(index) = self.index.as_ref() else {
            return Ok(Vec::new());
        };

        let query = query.to_vec();
        let hits = index
            .search(&query, k)?
            .into_iter()
            .map(|(id, score)| IndexHit {
                id,
                score,
                text: self.metadata.get(id).cloned().unwrap_or_default(),
            })
            .collect();

        Ok(hits)
    }

    pub fn stats(&self) -> IndexStats {
        match self.index.as_ref() {
            Some(index) => IndexStats {
                total_vectors: index.len(),
                dimension: index.dimension(),
                index_type: index.topology().name().to_string(),
                metadata_count: self.metadata.len(),
                is_trained: index.is_trained(),
                build_id: self.build_id,
            },
            None => IndexStats {
                total_vectors: 0,
                dimension: self.embedder.dimension(),
                index_type: self.config.index.index_type.clone(),
                metadata_count: self.metadata.len(),
                is_trained: false,
                build_id: self.build_id,
            },
        }
    }
}

/// Build the index from every enabled source and optionally persist it
///
/// Saving writes the index, the metadata and the configuration that produced
/// them. Nothing is written when no vectors were indexed.
pub fn build_index(
    config: Arc<RagConfig>,
    embedder: Arc<Embedder>,
    loader: &dyn CorpusLoader,
    max_chunks: Option<usize>,
    save: bool,
) -> Result<BuildStats> {
    config.ensure_directories()?;

    tracing::info!(
        model = %config.embedding.model,
        index_type = %config.index.index_type,
        datasets = config.enabled_sources().len(),
        "Starting index build"
    );

    let mut builder = IndexBuilder::new(Arc::clone(&config), embedder);
    let stats = builder.build_from_datasets(loader, max_chunks)?;

    if save && stats.vectors_indexed > 0 {
        builder.save(&config.index_path(), &config.metadata_path())?;
        config.save(&config.config_path())?;
    }

    tracing::info!(
        datasets_loaded = stats.ingest.datasets_loaded,
        datasets_failed = stats.ingest.datasets_failed,
        chunks_created = stats.ingest.chunks_created,
        vectors_indexed = stats.vectors_indexed,
        "Index build complete"
    );

    Ok(stats)
}
