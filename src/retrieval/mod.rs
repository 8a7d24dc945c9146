//! Query-time retrieval over a persisted index
//!
//! A retriever is created cheap and loads its index on first use, exactly
//! once. If loading fails the retriever stays unavailable for the rest of
//! its life and every call reports why.

mod context;
mod patterns;
mod result;

pub use context::format_context;
pub use patterns::{relevant_patterns, PATTERN_INDICATORS};
pub use result::RetrievalResult;

use crate::config::RagConfig;
use crate::embedding::{load_embedder, Embedder};
use crate::error::{ExemplarError, Result};
use crate::index::{IndexBuilder, IndexStats};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

enum RetrieverState {
    Ready(Box<IndexBuilder>),
    Unavailable(String),
}

/// Availability plus index statistics
#[derive(Debug, Clone, Serialize)]
pub struct RetrieverStats {
    pub available: bool,
    #[serde(flatten)]
    pub index: Option<IndexStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Retriever {
    config: Arc<RagConfig>,
    embedder: Option<Arc<Embedder>>,
    state: OnceLock<RetrieverState>,
}

impl Retriever {
    /// Retriever that loads the configured embedding model on first use
    pub fn new(config: Arc<RagConfig>) -> Self {
        Self {
            config,
            embedder: None,
            state: OnceLock::new(),
        }
    }

    /// Retriever that encodes queries with `embedder`
    pub fn with_embedder(config: Arc<RagConfig>, embedder: Arc<Embedder>) -> Self {
        Self {
            config,
            embedder: Some(embedder),
            state: OnceLock::new(),
        }
    }

    /// Retriever over an index that is already in memory
    pub fn from_builder(builder: IndexBuilder) -> Self {
        let config = Arc::clone(builder.config());
        let embedder = Arc::clone(builder.embedder());
        let state = OnceLock::new();
        let _ = state.set(RetrieverState::Ready(Box::new(builder)));
        Self {
            config,
            embedder: Some(embedder),
            state,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Load the index if that has not been attempted yet
    ///
    /// Later calls return the outcome of the first attempt without retrying.
    pub fn initialize(&self) -> Result<&IndexBuilder> {
        match self.state.get_or_init(|| self.load()) {
            RetrieverState::Ready(builder) => Ok(&**builder),
            RetrieverState::Unavailable(reason) => Err(ExemplarError::RetrieverUnavailable {
                reason: reason.clone(),
            }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    fn load(&self) -> RetrieverState {
        let index_path = self.config.index_path();
        if !index_path.exists() {
            tracing::warn!(
                "RAG index not found at {}. Run `exemplar build` first.",
                index_path.display()
            );
            return RetrieverState::Unavailable(format!(
                "Index file not found: {}",
                index_path.display()
            ));
        }

        let embedder = match &self.embedder {
            Some(embedder) => Arc::clone(embedder),
            None => match load_embedder(&self.config.embedding) {
                Ok(embedder) => Arc::new(embedder),
                Err(e) => {
                    tracing::error!("Failed to load embedding model: {}", e);
                    return RetrieverState::Unavailable(e.to_string());
                }
            },
        };

        let mut builder = IndexBuilder::new(Arc::clone(&self.config), embedder);
        match builder.load(&index_path, &self.config.metadata_path()) {
            Ok(()) => {
                tracing::info!("RAG retriever initialized");
                RetrieverState::Ready(Box::new(builder))
            }
            Err(e) => {
                tracing::error!("Failed to load RAG index: {}", e);
                RetrieverState::Unavailable(e.to_string())
            }
        }
    }

    /// Retrieve examples for `query`
    ///
    /// `top_k` and `min_score` default to the configured values. Hits below
    /// `min_score` or with empty text are dropped and the survivors are
    /// ranked 1..n in the order the index returned them.
    pub fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<RetrievalResult>> {
        let builder = self.initialize()?;
        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        let min_score = min_score.unwrap_or(self.config.retrieval.min_score);

        tracing::debug!(
            "Retrieving for query: {}",
            crate::ingest::chunk::truncate_chars(query, 100)
        );

        let query_vector = builder.embedder().encode_query(query)?;
        let results: Vec<RetrievalResult> = builder
            .search(query_vector.view(), top_k)?
            .into_iter()
            .filter(|hit| hit.score >= min_score && !hit.text.is_empty())
            .enumerate()
            .map(|(i, hit)| RetrievalResult::new(hit.text, hit.score, i + 1))
            .collect();

        tracing::info!("Retrieved {} results for query", results.len());
        Ok(results)
    }

    /// Retrieve for several queries, one result list per query
    pub fn retrieve_batch(
        &self,
        queries: &[String],
        top_k: Option<usize>,
    ) -> Result<Vec<Vec<RetrievalResult>>> {
        queries
            .iter()
            .map(|query| self.retrieve(query, top_k, None))
            .collect()
    }

    pub fn format_context(&self, results: &[RetrievalResult], max_examples: Option<usize>) -> String {
        format_context(results, max_examples)
    }

    pub fn relevant_patterns(&self, results: &[RetrievalResult]) -> BTreeSet<String> {
        relevant_patterns(results)
    }

    /// Whether retrieval can be attempted; does not load anything
    ///
    /// Before the first load this only checks that the index file exists.
    /// After a failed load it stays false.
    pub fn is_available(&self) -> bool {
        match self.state.get() {
            Some(RetrieverState::Ready(_)) => true,
            Some(RetrieverState::Unavailable(_)) => false,
            None => self.config.index_path().exists(),
        }
    }

    pub fn stats(&self) -> RetrieverStats {
        if !self.is_available() {
            return RetrieverStats {
                available: false,
                index: None,
                error: None,
            };
        }

        match self.initialize() {
            Ok(builder) => RetrieverStats {
                available: true,
                index: Some(builder.stats()),
                error: None,
            },
            Err(e) => RetrieverStats {
                available: false,
                index: None,
                error: Some(e.to_string()),
            },
        }
    }
}
