//! Content normalization and tokenization.
//!
//! Pipeline: lowercase, replace non-word characters with spaces, collapse
//! whitespace, split, drop tokens of length <= 2, drop stop words.

use std::collections::HashMap;

use mailvane_protocol::payload::Language;

use crate::stopwords::is_stop_word;

const MIN_TOKEN_CHARS: usize = 3;

/// Lowercase and map every non-word character to a space, collapsing runs.
/// Idempotent: normalizing normalized content is a no-op.
pub fn normalize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut pending_space = false;
    for ch in content.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

pub fn tokenize(content: &str, language: Language) -> Vec<String> {
    normalize(content)
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !is_stop_word(language, token))
        .map(str::to_string)
        .collect()
}

/// Occurrences per term.
pub fn term_frequencies(tokens: &[String]) -> HashMap<String, usize> {
    let mut tf = HashMap::new();
    for token in tokens {
        *tf.entry(token.clone()).or_insert(0) += 1;
    }
    tf
}

/// TF score with saturation and length normalization: stable across
/// re-indexing of the same content.
pub fn content_score(frequency: usize, content_len: usize) -> f64 {
    if content_len == 0 {
        return 0.0;
    }
    (1.0 + frequency as f64).ln() / (content_len as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_replaces_punctuation() {
        assert_eq!(normalize("Hello, World!"), "hello world");
        assert_eq!(normalize("a--b..c"), "a b c");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "Hello, World! How's it going?",
            "  spaced   out\ttabs\nnewlines  ",
            "MiXeD_case_with_underscores",
            "",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_tokenize_drops_short_tokens_and_stop_words() {
        let tokens = tokenize("The cat sat on an old mat", Language::En);
        assert_eq!(tokens, vec!["cat", "sat", "old", "mat"]);
    }

    #[test]
    fn test_tokenize_idempotent_over_normalize() {
        let content = "Quarterly Report: revenue UP 12%, costs down!";
        assert_eq!(
            tokenize(content, Language::En),
            tokenize(&normalize(content), Language::En)
        );
    }

    #[test]
    fn test_term_frequencies_counts_repeats() {
        let tokens = tokenize("hello world hello", Language::En);
        let tf = term_frequencies(&tokens);
        assert_eq!(tf.get("hello"), Some(&2));
        assert_eq!(tf.get("world"), Some(&1));
    }

    #[test]
    fn test_content_score_formula() {
        let content = "Hello world hello";
        let score = content_score(2, content.chars().count());
        let expected = 3.0f64.ln() / (17.0f64).sqrt();
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_content_score_empty_content() {
        assert_eq!(content_score(3, 0), 0.0);
    }
}
