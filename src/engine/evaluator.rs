// src/engine/evaluator.rs

use crate::models::response::Verdict;

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Compares a stored response with the canonical answer.
///
/// A canonical `na` accepts anything, even an empty response. A canonical
/// answer containing commas accepts any one of its alternatives.
pub fn evaluate(response: &str, canonical: &str) -> Verdict {
    let canonical = normalize(canonical);
    if canonical == "na" {
        return Verdict::Correct;
    }

    let response = normalize(response);
    if response.is_empty() {
        return Verdict::Skipped;
    }

    let matched = if canonical.contains(',') {
        canonical.split(',').map(str::trim).any(|alt| alt == response)
    } else {
        canonical == response
    };

    if matched {
        Verdict::Correct
    } else {
        Verdict::Incorrect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_literal_cases() {
        assert_eq!(evaluate("b", "na"), Verdict::Correct);
        assert_eq!(evaluate("c", "a,c"), Verdict::Correct);
        assert_eq!(evaluate("B", "b"), Verdict::Correct);
        assert_eq!(evaluate("", "a"), Verdict::Skipped);
        assert_eq!(evaluate("d", "a"), Verdict::Incorrect);
    }

    #[test]
    fn test_evaluate_single_answer() {
        assert_eq!(evaluate("b", "B"), Verdict::Correct);
        assert_eq!(evaluate("  B ", "b"), Verdict::Correct);
        assert_eq!(evaluate("c", "b"), Verdict::Incorrect);
    }

    #[test]
    fn test_evaluate_multiple_alternatives() {
        assert_eq!(evaluate("c", "a, c"), Verdict::Correct);
        assert_eq!(evaluate("A", "a,c"), Verdict::Correct);
        assert_eq!(evaluate("b", "a,c"), Verdict::Incorrect);
        assert_eq!(evaluate("a,c", "a,c"), Verdict::Incorrect);
    }

    #[test]
    fn test_evaluate_na_always_correct() {
        assert_eq!(evaluate("d", "NA"), Verdict::Correct);
        assert_eq!(evaluate("", "na"), Verdict::Correct);
    }

    #[test]
    fn test_evaluate_empty_is_skipped() {
        assert_eq!(evaluate("", "a"), Verdict::Skipped);
        assert_eq!(evaluate("   ", "a,b"), Verdict::Skipped);
    }
}
