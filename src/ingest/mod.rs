//! Corpus ingestion: raw records in, normalized chunks out
//!
//! Sources are visited in configuration order. A source that fails to load is
//! logged and counted, never fatal. Rows are pulled lazily so a consumer that
//! stops early leaves the counters describing only what it actually saw.

pub mod chunk;
pub mod corpus;
pub mod extract;

pub use chunk::{format_chunk_text, Chunk, ChunkSections};
pub use corpus::{
    CorpusLoader, DatasetError, FailureKind, HubCorpus, InMemoryCorpus, JsonlCorpus, Record,
    RowIter,
};
pub use extract::{extract_instruction_response, Extraction};

use crate::config::{DatasetSource, RagConfig};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Running ingestion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub datasets_loaded: u64,
    pub datasets_failed: u64,
    pub chunks_created: u64,
    pub rows_processed: u64,
    pub rows_skipped: u64,
}

/// Turns the enabled corpus sources of a profile into chunks
pub struct DatasetIngestor {
    config: Arc<RagConfig>,
    stats: IngestStats,
}

impl DatasetIngestor {
    pub fn new(config: Arc<RagConfig>) -> Self {
        Self {
            config,
            stats: IngestStats::default(),
        }
    }

    /// Lazily stream chunks from every enabled source, in order
    pub fn chunks<'a>(&'a mut self, loader: &'a dyn CorpusLoader) -> ChunkStream<'a> {
        let sources: Vec<DatasetSource> = self
            .config
            .enabled_sources()
            .into_iter()
            .cloned()
            .collect();

        tracing::info!("Ingesting from {} enabled sources", sources.len());

        ChunkStream {
            sources: sources.into_iter(),
            loader,
            stats: &mut self.stats,
            active: None,
        }
    }

    /// Drain up to `max_chunks` chunk texts
    pub fn collect_texts(
        &mut self,
        loader: &dyn CorpusLoader,
        max_chunks: Option<usize>,
    ) -> Vec<String> {
        let limit = max_chunks.unwrap_or(usize::MAX);
        self.chunks(loader).take(limit).map(Chunk::into_text).collect()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = IngestStats::default();
    }
}

struct ActiveSource<'a> {
    source: DatasetSource,
    rows: std::iter::Enumerate<std::iter::Take<RowIter<'a>>>,
}

/// Iterator of chunks produced by [`DatasetIngestor::chunks`]
pub struct ChunkStream<'a> {
    sources: std::vec::IntoIter<DatasetSource>,
    loader: &'a dyn CorpusLoader,
    stats: &'a mut IngestStats,
    active: Option<ActiveSource<'a>>,
}

impl<'a> ChunkStream<'a> {
    /// Open the next loadable source, counting failures on the way
    fn open_next(&mut self) -> Option<ActiveSource<'a>> {
        for source in self.sources.by_ref() {
            match self.loader.load(&source) {
                Ok(rows) => {
                    self.stats.datasets_loaded += 1;
                    tracing::info!(
                        dataset = %source.name,
                        split = %source.split,
                        "Loaded dataset"
                    );
                    let cap = source.max_samples.unwrap_or(usize::MAX);
                    return Some(ActiveSource {
                        rows: rows.take(cap).enumerate(),
                        source,
                    });
                }
                Err(e) => {
                    self.stats.datasets_failed += 1;
                    match e.kind() {
                        FailureKind::Gated => tracing::warn!(
                            "Skipping gated dataset {} (requires_auth={}): {}",
                            source.name,
                            source.requires_auth,
                            e
                        ),
                        FailureKind::NotFound => {
                            tracing::warn!("Skipping missing dataset {}", source.name)
                        }
                        FailureKind::Other => {
                            tracing::error!("Failed to load dataset {}: {}", source.name, e)
                        }
                    }
                }
            }
        }
        None
    }
}

impl Iterator for ChunkStream<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            if self.active.is_none() {
                self.active = Some(self.open_next()?);
            }
            let active = self.active.as_mut()?;

            let Some((row_index, row)) = active.rows.next() else {
                tracing::debug!("Finished dataset {}", active.source.name);
                self.active = None;
                continue;
            };

            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    tracing::debug!("Skipping row: {}", e);
                    self.stats.rows_skipped += 1;
                    continue;
                }
            };

            let Some((instruction, response)) = extract_instruction_response(&row).into_pair()
            else {
                self.stats.rows_skipped += 1;
                continue;
            };

            let mut metadata = BTreeMap::new();
            metadata.insert("dataset".to_string(), Value::from(active.source.name.as_str()));
            metadata.insert("split".to_string(), Value::from(active.source.split.as_str()));
            metadata.insert("row_index".to_string(), Value::from(row_index));

            self.stats.rows_processed += 1;
            self.stats.chunks_created += 1;
            return Some(Chunk::new(
                active.source.name.as_str(),
                &instruction,
                &response,
                metadata,
            ));
        }
    }
}
