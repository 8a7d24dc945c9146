//! Chunk type and the text template that gets embedded

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Stored instruction length, in characters
pub const MAX_INSTRUCTION_CHARS: usize = 1000;
/// Stored response length, in characters
pub const MAX_RESPONSE_CHARS: usize = 4000;

const HEADER: &str = "CODING REFERENCE";
const SOURCE_LABEL: &str = "Source: ";
const TASK_LABEL: &str = "Task: ";
const SOLUTION_LABEL: &str = "Solution & Reasoning: ";

/// Render the deterministic chunk template
///
/// ```text
/// CODING REFERENCE
/// Source: <source>
/// Task: <instruction>
/// Solution & Reasoning: <response>
/// ```
pub fn format_chunk_text(source: &str, instruction: &str, response: &str) -> String {
    format!(
        "{HEADER}\n{SOURCE_LABEL}{source}\n{TASK_LABEL}{instruction}\n{SOLUTION_LABEL}{response}"
    )
}

/// Prefix of `s` holding at most `max` characters
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// One normalized corpus example. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    text: String,
    source: String,
    instruction: String,
    instruction_chars: usize,
    response: String,
    response_chars: usize,
    metadata: BTreeMap<String, Value>,
}

impl Chunk {
    /// Build a chunk, truncating instruction and response to their stored
    /// limits and rendering the template from the truncated parts
    pub fn new(
        source: impl Into<String>,
        instruction: &str,
        response: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        let source = source.into();
        let stored_instruction = truncate_chars(instruction, MAX_INSTRUCTION_CHARS);
        let stored_response = truncate_chars(response, MAX_RESPONSE_CHARS);

        Self {
            text: format_chunk_text(&source, stored_instruction, stored_response),
            source,
            instruction: stored_instruction.to_string(),
            instruction_chars: instruction.chars().count(),
            response: stored_response.to_string(),
            response_chars: response.chars().count(),
            metadata,
        }
    }

    /// The formatted text that is embedded and indexed
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Character count of the instruction before truncation
    pub fn instruction_chars(&self) -> usize {
        self.instruction_chars
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    /// Character count of the response before truncation
    pub fn response_chars(&self) -> usize {
        self.response_chars
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

/// Labeled sections recovered from a chunk's text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSections {
    pub source: String,
    pub instruction: String,
    pub response: String,
}

impl ChunkSections {
    /// Parse the template back out of `text`. Text that does not follow the
    /// template yields empty sections.
    pub fn parse(text: &str) -> Self {
        let Some(caps) = sections_regex().and_then(|re| re.captures(text)) else {
            return Self::default();
        };

        let field = |name: &str| {
            caps.name(name)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default()
        };

        Self {
            source: field("source"),
            instruction: field("task"),
            response: field("solution"),
        }
    }
}

/// The task runs up to the last solution label; instructions may quote it
fn sections_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"(?s)^{header}\n{source}(?P<source>[^\n]*)\n{task}(?P<task>.*)\n{solution}(?P<solution>.*)$",
            header = regex::escape(HEADER),
            source = regex::escape(SOURCE_LABEL),
            task = regex::escape(TASK_LABEL),
            solution = regex::escape(SOLUTION_LABEL),
        );
        Regex::new(&pattern).ok()
    })
    .as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_template() {
        let chunk = Chunk::new(
            "HuggingFaceH4/codealpaca_20k",
            "Write a hello world function",
            "def hello():\n    print('world')",
            BTreeMap::new(),
        );

        assert_eq!(
            chunk.text(),
            "CODING REFERENCE\n\
             Source: HuggingFaceH4/codealpaca_20k\n\
             Task: Write a hello world function\n\
             Solution & Reasoning: def hello():\n    print('world')"
        );
    }

    #[test]
    fn test_length_limits_keep_original_counts() {
        let instruction = "x".repeat(2000);
        let response = "y".repeat(5000);
        let chunk = Chunk::new("src", &instruction, &response, BTreeMap::new());

        assert_eq!(chunk.instruction().chars().count(), MAX_INSTRUCTION_CHARS);
        assert_eq!(chunk.response().chars().count(), MAX_RESPONSE_CHARS);
        assert_eq!(chunk.instruction_chars(), 2000);
        assert_eq!(chunk.response_chars(), 5000);
        assert!(!chunk.text().contains(&"x".repeat(1001)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_sections_roundtrip_multiline() {
        let chunk = Chunk::new(
            "nvidia/OpenCodeInstruct",
            "Sort a list\nin place",
            "```python\nxs.sort()\n```",
            BTreeMap::new(),
        );

        let sections = ChunkSections::parse(chunk.text());
        assert_eq!(sections.source, "nvidia/OpenCodeInstruct");
        assert_eq!(sections.instruction, "Sort a list\nin place");
        assert_eq!(sections.response, "```python\nxs.sort()\n```");
    }

    #[test]
    fn test_instruction_quoting_the_solution_label() {
        let instruction = "Explain this template:\nSolution & Reasoning: <your answer>";
        let chunk = Chunk::new("src", instruction, "fn answer() {}", BTreeMap::new());

        let sections = ChunkSections::parse(chunk.text());
        assert_eq!(sections.instruction, instruction);
        assert_eq!(sections.response, "fn answer() {}");
    }

    #[test]
    fn test_sections_of_free_text_are_empty() {
        assert_eq!(ChunkSections::parse("just some text"), ChunkSections::default());
    }
}
