// src/heuristics/features.rs

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::PatternLibrary;

pub type FeatureVector = BTreeMap<String, f64>;

const DOCUMENT_KEYWORDS: [&str; 7] = ["invoice", "bill", "receipt", "total", "amount", "tax", "vat"];

static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[$€£]|\b(?:usd|eur|gbp)\b").expect("valid regex"));
static DATE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}").expect("valid regex"));

/// Compute the feature vector over preprocessed text.
pub fn compute(text: &str, library: &PatternLibrary) -> FeatureVector {
    let mut features = FeatureVector::new();

    let length = text.chars().count();
    let digits = text.chars().filter(char::is_ascii_digit).count();
    features.insert("text_length".into(), length as f64);
    features.insert("word_count".into(), text.split_whitespace().count() as f64);
    features.insert("line_count".into(), text.lines().count() as f64);
    features.insert(
        "digit_ratio".into(),
        if length == 0 {
            0.0
        } else {
            digits as f64 / length as f64
        },
    );
    features.insert(
        "currency_count".into(),
        CURRENCY_RE.find_iter(text).count() as f64,
    );
    features.insert(
        "date_count".into(),
        DATE_TOKEN_RE.find_iter(text).count() as f64,
    );

    let lower = text.to_lowercase();
    for keyword in DOCUMENT_KEYWORDS {
        let present = if lower.contains(keyword) { 1.0 } else { 0.0 };
        features.insert(format!("has_{keyword}"), present);
    }

    for (field, hits) in library.hit_counts(text) {
        features.insert(format!("{field}_pattern_matches"), hits as f64);
    }

    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features() {
        let lib = PatternLibrary::builtin().unwrap();
        let f = compute("Invoice 12/01/2024\nTotal: $50", &lib);
        assert_eq!(f["line_count"], 2.0);
        assert_eq!(f["word_count"], 4.0);
        assert_eq!(f["currency_count"], 1.0);
        assert_eq!(f["date_count"], 1.0);
        assert_eq!(f["has_invoice"], 1.0);
        assert_eq!(f["has_vat"], 0.0);
        assert!(f["digit_ratio"] > 0.0 && f["digit_ratio"] < 1.0);
        assert!(f.contains_key("total_amount_pattern_matches"));
    }

    #[test]
    fn test_empty_text() {
        let lib = PatternLibrary::builtin().unwrap();
        let f = compute("", &lib);
        assert_eq!(f["text_length"], 0.0);
        assert_eq!(f["digit_ratio"], 0.0);
    }
}
