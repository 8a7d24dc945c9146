//! Exemplar - retrieval-augmented example store
//!
//! Ingests instruction/response coding corpora, embeds them into a vector
//! index, and at query time retrieves the most relevant examples to enrich a
//! downstream code generator's request.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod integration;
pub mod retrieval;

pub use error::{ExemplarError, Result};
