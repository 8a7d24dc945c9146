//! Pattern tags inferred from retrieved example text

use super::RetrievalResult;
use std::collections::BTreeSet;

/// Indicator substrings per pattern name; matching is case-insensitive
pub const PATTERN_INDICATORS: &[(&str, &[&str])] = &[
    ("api", &["fastapi", "flask", "django", "@app.route", "@router"]),
    ("async", &["async def", "await", "asyncio"]),
    ("database", &["sqlalchemy", "session", "query", "model", "orm"]),
    ("testing", &["pytest", "unittest", "test_", "assert"]),
    ("error_handling", &["try:", "except", "raise", "exception"]),
    ("logging", &["logging", "logger", "log."]),
    (
        "type_hints",
        &["-> ", ": str", ": int", ": list", ": dict", "optional["],
    ),
    ("dataclass", &["@dataclass", "dataclasses"]),
    ("pydantic", &["basemodel", "pydantic", "validator"]),
    ("authentication", &["jwt", "token", "auth", "password", "login"]),
    ("caching", &["cache", "redis", "lru_cache", "@cached"]),
    (
        "ml",
        &["sklearn", "tensorflow", "pytorch", "model.fit", "model.predict"],
    ),
];

/// Every pattern with at least one indicator in any result's text
pub fn relevant_patterns(results: &[RetrievalResult]) -> BTreeSet<String> {
    let mut found = BTreeSet::new();

    for result in results {
        let text = result.text.to_lowercase();
        for (pattern, indicators) in PATTERN_INDICATORS {
            if !found.contains(*pattern) && indicators.iter().any(|ind| text.contains(ind)) {
                found.insert(pattern.to_string());
            }
        }
    }

    found
}
