use std::collections::BTreeMap;

use super::fields;

/// Characters of context inspected on each side of a match.
pub const CONTEXT_WINDOW: usize = 50;

/// Context score for fields without a keyword set.
pub const NEUTRAL_CONTEXT: f64 = 0.7;

/// Confidence assumed for a present field that was never scored.
pub const UNSCORED_DEFAULT: f64 = 0.5;

/// Relative importance of each field in the overall score.
pub const FIELD_WEIGHTS: [(&str, f64); 6] = [
    (fields::INVOICE_NUMBER, 0.20),
    (fields::DATE, 0.15),
    (fields::SUPPLIER_NAME, 0.15),
    (fields::TOTAL_AMOUNT, 0.20),
    (fields::SUBTOTAL, 0.10),
    (fields::VAT_AMOUNT, 0.10),
];

/// `max(0, 0.9 - 0.1 * rank)`
pub fn pattern_confidence(rank: usize) -> f64 {
    (0.9 - 0.1 * rank as f64).max(0.0)
}

/// Keyword evidence around a match at byte span `start..end` of `text`.
pub fn context_confidence(text: &str, start: usize, end: usize, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return NEUTRAL_CONTEXT;
    }

    let before: String = {
        let mut chars: Vec<char> = text[..start].chars().rev().take(CONTEXT_WINDOW).collect();
        chars.reverse();
        chars.into_iter().collect()
    };
    let after: String = text[end..].chars().take(CONTEXT_WINDOW).collect();
    let window = format!("{before}{}{after}", &text[start..end]).to_lowercase();

    let hits = keywords
        .iter()
        .filter(|k| window.contains(k.to_lowercase().as_str()))
        .count();
    (0.5 + 0.2 * hits as f64).min(1.0)
}

/// Fill in the default for present fields that carry no score.
pub fn fill_unscored(values: &BTreeMap<String, String>, confidence: &mut BTreeMap<String, f64>) {
    for (field, value) in values {
        if !value.is_empty() {
            confidence.entry(field.clone()).or_insert(UNSCORED_DEFAULT);
        }
    }
}

/// Weighted mean over the fields present in the weight table; 0 if none are.
pub fn overall_confidence(confidence: &BTreeMap<String, f64>) -> f64 {
    let (weighted, total) = FIELD_WEIGHTS
        .iter()
        .filter_map(|(field, weight)| confidence.get(*field).map(|c| (c, weight)))
        .fold((0.0, 0.0), |(sum, norm), (c, w)| {
            (sum + c.clamp(0.0, 1.0) * w, norm + w)
        });
    if total > 0.0 {
        (weighted / total).clamp(0.0, 1.0)
    } else {
        0.0
    }
}
