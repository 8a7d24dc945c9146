//! Shared fixtures for integration tests
#![allow(dead_code)]

use exemplar::config::{DatasetSource, PathsConfig, RagConfig};
use exemplar::embedding::{EmbeddingError, EmbeddingProvider, EncodeOptions, Embedder};
use exemplar::ingest::format_chunk_text;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

pub const DIM: usize = 256;
pub const SOURCE: &str = "local/code-pairs";

/// Bag-of-words embedding: each token bumps one hashed coordinate
pub struct HashingProvider {
    dim: usize,
}

impl HashingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let slot = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            v[slot % self.dim] += 1.0;
        }
        v
    }
}

impl EmbeddingProvider for HashingProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "hashing-test"
    }
}

pub fn embedder() -> Arc<Embedder> {
    embedder_with_dim(DIM)
}

pub fn embedder_with_dim(dim: usize) -> Arc<Embedder> {
    Arc::new(Embedder::new(
        Arc::new(HashingProvider::new(dim)),
        EncodeOptions {
            batch_size: 4,
            normalize: true,
            show_progress: false,
        },
    ))
}

/// Profile rooted at `data_dir` with a single local source
pub fn config(data_dir: &Path) -> RagConfig {
    let mut config = RagConfig::default();
    config.embedding.model = "hashing-test".to_string();
    config.embedding.dimension = DIM;
    config.embedding.batch_size = 4;
    config.embedding.show_progress = false;
    config.datasets = vec![DatasetSource::new(SOURCE)];
    config.retrieval.min_score = 0.0;
    config.paths = PathsConfig::rooted_at(data_dir);
    config
}

pub fn config_with_topology(data_dir: &Path, index_type: &str) -> RagConfig {
    let mut config = config(data_dir);
    config.index.index_type = index_type.to_string();
    config
}

const TOPICS: &[&str] = &[
    "reverse a linked list in place",
    "parse json from an http response",
    "binary search over a sorted array",
    "connect to a postgres database with a pool",
    "write unit tests for a parser",
    "spawn async tasks and join them",
    "read a csv file and sum a column",
    "implement a thread safe counter with a mutex",
    "validate an email address with a regex",
    "serialize a struct to yaml",
    "compute fibonacci numbers with memoization",
    "sort records by timestamp descending",
];

pub fn instruction(i: usize) -> String {
    format!("{} variant{}", TOPICS[i % TOPICS.len()], i)
}

pub fn response(i: usize) -> String {
    format!("fn solution{i}() {{ /* step{i} */ }}")
}

/// Rows in the instruction/output shape
pub fn rows(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "instruction": instruction(i), "output": response(i) }))
        .collect()
}

/// Text of the chunk built from row `i`
pub fn chunk_text(i: usize) -> String {
    format_chunk_text(SOURCE, &instruction(i), &response(i))
}
