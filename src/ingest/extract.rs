//! Schema-agnostic extraction of (instruction, response) pairs
//!
//! Corpora disagree on field names, so extraction is an ordered list of
//! strategies. Each list is tried top to bottom and the first field holding a
//! non-empty value wins; values from different fields are never merged.

use super::corpus::Record;
use serde_json::Value;

/// Fields searched for the instruction, in priority order
pub const INSTRUCTION_FIELDS: &[&str] = &[
    "instruction",
    "input",
    "prompt",
    "question",
    "text",
    "query",
    "problem",
    "task",
];

/// Fields searched for the response, in priority order
pub const RESPONSE_FIELDS: &[&str] = &[
    "response",
    "output",
    "answer",
    "code",
    "solution",
    "completion",
    "result",
    "generated",
];

/// Markers that introduce a response embedded in the instruction text.
/// The first marker present wins and stays at the head of the response.
pub const INLINE_RESPONSE_MARKERS: &[&str] =
    &["### Response:", "### Answer:", "### Output:", "```"];

/// Raw outcome of field scanning; either side may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub instruction: Option<String>,
    pub response: Option<String>,
}

impl Extraction {
    /// Both sides, when both were found
    pub fn into_pair(self) -> Option<(String, String)> {
        match (self.instruction, self.response) {
            (Some(instruction), Some(response)) => Some((instruction, response)),
            _ => None,
        }
    }
}

/// Scan a record for an instruction and a response
pub fn extract_instruction_response(row: &Record) -> Extraction {
    let mut instruction = first_non_empty(row, INSTRUCTION_FIELDS);
    let mut response = first_non_empty(row, RESPONSE_FIELDS);

    if response.is_none() {
        if let Some((task, inline)) = instruction.as_deref().and_then(split_inline_response) {
            instruction = Some(task);
            response = Some(inline);
        }
    }

    Extraction {
        instruction: instruction.filter(|s| !s.is_empty()),
        response: response.filter(|s| !s.is_empty()),
    }
}

/// Split `text` at the first inline response marker, keeping the marker
fn split_inline_response(text: &str) -> Option<(String, String)> {
    INLINE_RESPONSE_MARKERS.iter().find_map(|marker| {
        text.split_once(marker).map(|(before, after)| {
            (
                before.trim().to_string(),
                format!("{}{}", marker, after.trim()),
            )
        })
    })
}

fn first_non_empty(row: &Record, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|field| row.get(*field))
        .find_map(value_text)
}

/// Text of a field value, or None when the value counts as empty
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null | Value::Bool(false) => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) if n.as_f64() == Some(0.0) => return None,
        Value::Array(items) if items.is_empty() => return None,
        Value::Object(map) if map.is_empty() => return None,
        other => other.to_string(),
    };

    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_standard_fields() {
        let row = record(json!({
            "instruction": "Write a hello world function",
            "response": "def hello(): print('world')",
        }));

        let pair = extract_instruction_response(&row).into_pair().unwrap();
        assert_eq!(pair.0, "Write a hello world function");
        assert_eq!(pair.1, "def hello(): print('world')");
    }

    #[test]
    fn test_alternative_fields() {
        let row = record(json!({"prompt": "Create a function", "output": "def func(): pass"}));
        let pair = extract_instruction_response(&row).into_pair().unwrap();
        assert_eq!(pair, ("Create a function".to_string(), "def func(): pass".to_string()));
    }

    #[test]
    fn test_first_match_wins_and_skips_empty() {
        let row = record(json!({
            "instruction": "  ",
            "input": "",
            "prompt": "use the prompt",
            "question": "not this one",
            "response": null,
            "output": "first output",
            "answer": "not this either",
        }));

        let pair = extract_instruction_response(&row).into_pair().unwrap();
        assert_eq!(pair.0, "use the prompt");
        assert_eq!(pair.1, "first output");
    }

    #[test]
    fn test_missing_fields() {
        let row = record(json!({"other_field": "value"}));
        let extraction = extract_instruction_response(&row);
        assert_eq!(extraction, Extraction::default());
        assert!(extraction.into_pair().is_none());
    }

    #[test]
    fn test_inline_response_marker_split() {
        let row = record(json!({
            "text": "### Instruction: reverse a string\n### Response: s[::-1]",
        }));

        let (instruction, response) = extract_instruction_response(&row).into_pair().unwrap();
        assert_eq!(instruction, "### Instruction: reverse a string");
        assert_eq!(response, "### Response:s[::-1]");
    }

    #[test]
    fn test_inline_fenced_block_split() {
        let row = record(json!({"problem": "Add two numbers\n```python\nprint(1 + 2)\n```"}));

        let (instruction, response) = extract_instruction_response(&row).into_pair().unwrap();
        assert_eq!(instruction, "Add two numbers");
        assert!(response.starts_with("```python"));
    }

    #[test]
    fn test_instruction_only_without_marker() {
        let row = record(json!({"question": "What is a monad?"}));
        let extraction = extract_instruction_response(&row);
        assert_eq!(extraction.instruction.as_deref(), Some("What is a monad?"));
        assert!(extraction.response.is_none());
    }

    #[test]
    fn test_non_string_values() {
        let row = record(json!({"task": "sum", "result": 42}));
        let (_, response) = extract_instruction_response(&row).into_pair().unwrap();
        assert_eq!(response, "42");
    }
}
