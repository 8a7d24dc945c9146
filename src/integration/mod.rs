//! Retrieval-augmented wrapper around a code generator
//!
//! The wrapper implements [`CodeGenerator`] itself, so it can stand in
//! wherever the wrapped generator was used. Retrieval problems never reach
//! the caller: they are logged and the request proceeds without context.

use crate::error::Result;
use crate::retrieval::{RetrievalResult, Retriever, RetrieverStats};
use ahash::AHashSet;
use serde::Serialize;
use serde_json::{Map, Value};

/// Structured requirement analysis produced by a generator
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analysis {
    /// Detected pattern tags, in detection order
    pub patterns: Vec<String>,
    pub rag_enabled: bool,
    pub rag_context: String,
    pub rag_patterns: Vec<String>,
    pub rag_examples_count: usize,
    /// Generator-specific fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-call generation settings
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub context: Map<String, Value>,
    pub refinement_passes: u32,
    /// Overrides the wrapper's own setting for one call
    pub use_rag: Option<bool>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            context: Map::new(),
            refinement_passes: 5,
            use_rag: None,
        }
    }
}

/// Capabilities the wrapper needs from a downstream generator
pub trait CodeGenerator {
    fn name(&self) -> &str;

    fn analyze_requirements(&self, requirements: &str) -> Result<Analysis>;

    fn generate_code(&self, requirements: &str, options: &GenerationOptions) -> Result<String>;

    fn skills(&self) -> Vec<String>;
}

/// Code, analysis and how retrieval took part
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub code: String,
    pub analysis: Analysis,
    pub rag_enabled: bool,
    pub rag_patterns: Vec<String>,
    pub rag_context_used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorStats {
    pub name: String,
    pub rag_enabled: bool,
    pub rag_available: bool,
    pub base_generator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_stats: Option<RetrieverStats>,
}

/// Context retrieved for one request
struct RetrievedContext {
    context: String,
    patterns: Vec<String>,
    examples: usize,
}

pub struct RagEnhancedGenerator<G> {
    name: String,
    inner: G,
    retriever: Retriever,
    use_rag: bool,
}

impl<G: CodeGenerator> RagEnhancedGenerator<G> {
    pub fn new(inner: G, retriever: Retriever) -> Self {
        let available = retriever.is_available();
        if available {
            tracing::info!("RAG retriever ready for {}", inner.name());
        } else {
            tracing::warn!(
                "RAG index not found. Run `exemplar build` first. Continuing without RAG enhancement."
            );
        }

        Self {
            name: "RagEnhancedGenerator".to_string(),
            inner,
            retriever,
            use_rag: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_rag(mut self, use_rag: bool) -> Self {
        self.use_rag = use_rag;
        self
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn rag_available(&self) -> bool {
        self.retriever.is_available()
    }

    /// Retrieve context for `requirements`; failures degrade to `None`
    fn retrieve_context(&self, requirements: &str) -> Option<RetrievedContext> {
        if !self.rag_available() {
            return None;
        }

        let results: Vec<RetrievalResult> =
            match self.retriever.retrieve(requirements, None, None) {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!("RAG retrieval failed: {}", e);
                    return None;
                }
            };

        if results.is_empty() {
            tracing::debug!("No relevant RAG examples found");
            return None;
        }

        let context = self.retriever.format_context(&results, None);
        let patterns: Vec<String> = self.retriever.relevant_patterns(&results).into_iter().collect();
        tracing::info!(
            "Retrieved {} RAG examples, patterns: {:?}",
            results.len(),
            patterns
        );

        Some(RetrievedContext {
            context,
            patterns,
            examples: results.len(),
        })
    }

    /// Analyze, generate, and report how retrieval took part
    pub fn generate_with_analysis(
        &self,
        requirements: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationReport> {
        let analysis = self.analyze_requirements(requirements)?;
        let code = self.generate_code(requirements, options)?;

        Ok(GenerationReport {
            code,
            rag_enabled: analysis.rag_enabled,
            rag_patterns: analysis.rag_patterns.clone(),
            rag_context_used: !analysis.rag_context.is_empty(),
            analysis,
        })
    }

    /// The wrapped generator's skills plus retrieval skills when available
    pub fn capabilities(&self) -> Vec<String> {
        let mut capabilities = self.inner.skills();
        if self.rag_available() {
            capabilities.push("rag_retrieval".to_string());
            capabilities.push("example_based_generation".to_string());
        }
        capabilities
    }

    pub fn stats(&self) -> GeneratorStats {
        let rag_available = self.rag_available();
        GeneratorStats {
            name: self.name.clone(),
            rag_enabled: self.use_rag,
            rag_available,
            base_generator: self.inner.name().to_string(),
            rag_stats: rag_available.then(|| self.retriever.stats()),
        }
    }
}

impl<G: CodeGenerator> CodeGenerator for RagEnhancedGenerator<G> {
    fn name(&self) -> &str {
        &self.name
    }

    fn analyze_requirements(&self, requirements: &str) -> Result<Analysis> {
        let mut analysis = self.inner.analyze_requirements(requirements)?;

        let retrieved = if self.use_rag && self.rag_available() {
            analysis.rag_enabled = true;
            self.retrieve_context(requirements)
        } else {
            analysis.rag_enabled = false;
            None
        };

        match retrieved {
            Some(retrieved) => {
                analysis.patterns = merge_patterns(&analysis.patterns, &retrieved.patterns);
                analysis.rag_context = retrieved.context;
                analysis.rag_patterns = retrieved.patterns;
                analysis.rag_examples_count = retrieved.examples;
            }
            None => {
                analysis.rag_context.clear();
                analysis.rag_patterns.clear();
                analysis.rag_examples_count = 0;
            }
        }

        Ok(analysis)
    }

    fn generate_code(&self, requirements: &str, options: &GenerationOptions) -> Result<String> {
        let use_rag = options.use_rag.unwrap_or(self.use_rag);

        let enhanced = match use_rag.then(|| self.retrieve_context(requirements)).flatten() {
            Some(retrieved) => {
                tracing::info!("Enhanced requirements with RAG context");
                format!("{}\n\n{}", requirements, retrieved.context)
            }
            None => requirements.to_string(),
        };

        self.inner.generate_code(&enhanced, options)
    }

    fn skills(&self) -> Vec<String> {
        self.capabilities()
    }
}

/// `existing` followed by new entries of `extra`, without duplicates
fn merge_patterns(existing: &[String], extra: &[String]) -> Vec<String> {
    let mut seen = AHashSet::with_capacity(existing.len() + extra.len());
    existing
        .iter()
        .chain(extra)
        .filter(|p| seen.insert(p.as_str()))
        .cloned()
        .collect()
}
