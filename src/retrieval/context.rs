//! Rendering retrieved examples into a prompt context block

use super::RetrievalResult;
use crate::ingest::chunk::truncate_chars;

const TASK_PREVIEW_CHARS: usize = 500;
const SOLUTION_PREVIEW_CHARS: usize = 2000;

/// Render `results` (at most `max_examples` of them) as a context block.
/// Empty input renders as an empty string.
pub fn format_context(results: &[RetrievalResult], max_examples: Option<usize>) -> String {
    if results.is_empty() {
        return String::new();
    }

    let limit = max_examples.filter(|&m| m > 0).unwrap_or(results.len());
    let examples: Vec<String> = results.iter().take(limit).map(format_example).collect();

    format!(
        "\n=== RELEVANT CODING EXAMPLES ===\n\n{}\n\n=== END EXAMPLES ===\n",
        examples.join("\n")
    )
}

fn format_example(result: &RetrievalResult) -> String {
    let source = non_empty_or(result.source(), "Unknown");
    let task = non_empty_or(truncate_chars(result.instruction(), TASK_PREVIEW_CHARS), "N/A");
    let solution = if result.response().is_empty() {
        truncate_chars(&result.text, SOLUTION_PREVIEW_CHARS)
    } else {
        truncate_chars(result.response(), SOLUTION_PREVIEW_CHARS)
    };

    format!(
        "\n--- Example {} (Relevance: {:.2}) ---\nSource: {}\nTask: {}\nSolution:\n{}\n",
        result.rank, result.score, source, task, solution
    )
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::format_chunk_text;

    fn result(rank: usize, score: f32, task: &str) -> RetrievalResult {
        RetrievalResult::new(format_chunk_text("org/data", task, "pass"), score, rank)
    }

    #[test]
    fn test_empty_results_render_nothing() {
        assert_eq!(format_context(&[], None), "");
    }

    #[test]
    fn test_examples_in_rank_order() {
        let results = vec![result(1, 0.91, "first task"), result(2, 0.74, "second task")];
        let context = format_context(&results, None);

        assert!(context.starts_with("\n=== RELEVANT CODING EXAMPLES ==="));
        assert!(context.ends_with("=== END EXAMPLES ===\n"));
        assert_eq!(context.matches("--- Example").count(), 2);

        let first = context.find("Example 1 (Relevance: 0.91)").unwrap();
        let second = context.find("Example 2 (Relevance: 0.74)").unwrap();
        assert!(first < second);
        assert!(context.contains("Task: first task"));
        assert!(context.contains("Source: org/data"));
    }

    #[test]
    fn test_max_examples_caps_output() {
        let results = vec![result(1, 0.9, "a"), result(2, 0.8, "b"), result(3, 0.7, "c")];
        let context = format_context(&results, Some(1));
        assert_eq!(context.matches("--- Example").count(), 1);
    }

    #[test]
    fn test_unstructured_text_falls_back() {
        let results = vec![RetrievalResult::new("loose snippet", 0.5, 1)];
        let context = format_context(&results, None);
        assert!(context.contains("Source: Unknown"));
        assert!(context.contains("Task: N/A"));
        assert!(context.contains("Solution:\nloose snippet"));
    }

    #[test]
    fn test_long_fields_are_truncated() {
        let long_task = "t".repeat(800);
        let results = vec![result(1, 0.5, &long_task)];
        let context = format_context(&results, None);
        assert!(context.contains(&"t".repeat(500)));
        assert!(!context.contains(&"t".repeat(501)));
    }
}
