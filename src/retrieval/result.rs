//! Retrieval result with lazily parsed chunk sections

use crate::ingest::ChunkSections;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::OnceLock;

/// A single hit kept after score filtering
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// Full chunk text as stored in the index metadata
    pub text: String,

    /// Similarity score (higher is better)
    pub score: f32,

    /// 1-indexed position among the kept results
    pub rank: usize,

    sections: OnceLock<ChunkSections>,
}

impl RetrievalResult {
    pub fn new(text: impl Into<String>, score: f32, rank: usize) -> Self {
        Self {
            text: text.into(),
            score,
            rank,
            sections: OnceLock::new(),
        }
    }

    fn sections(&self) -> &ChunkSections {
        self.sections.get_or_init(|| ChunkSections::parse(&self.text))
    }

    /// Dataset the chunk came from, empty when the text has no Source line
    pub fn source(&self) -> &str {
        &self.sections().source
    }

    pub fn instruction(&self) -> &str {
        &self.sections().instruction
    }

    pub fn response(&self) -> &str {
        &self.sections().response
    }
}

impl Serialize for RetrievalResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RetrievalResult", 6)?;
        state.serialize_field("text", &self.text)?;
        state.serialize_field("score", &self.score)?;
        state.serialize_field("rank", &self.rank)?;
        state.serialize_field("source", self.source())?;
        state.serialize_field("instruction", self.instruction())?;
        state.serialize_field("response", self.response())?;
        state.end()
    }
}
