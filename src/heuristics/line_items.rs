// src/heuristics/line_items.rs

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::LineItem;
use super::normalize::collapse_whitespace;

/// Lines shorter than this are never rows.
const MIN_LINE_CHARS: usize = 5;

/// Row shapes, most specific first, with the confidence each one earns.
static ROW_PATTERNS: LazyLock<[(Regex, f64); 3]> = LazyLock::new(|| {
    const NUM: &str = r"(?:[$€£]\s*)?([0-9][0-9,]*(?:\.[0-9]+)?)";
    let row = |tail: &str| Regex::new(&format!(r"^(.{{3,60}}?){tail}$")).expect("valid regex");
    [
        // description, quantity, unit price, total
        (row(&format!(r"\s+(\d+)\s+{NUM}\s+{NUM}")), 0.9),
        // description, quantity, price
        (row(&format!(r"\s+(\d+)\s+{NUM}")), 0.8),
        // description, price
        (row(&format!(r"\s+{NUM}")), 0.7),
    ]
});

/// Summary rows that look like items but are not.
static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:sub\s*-?\s*total|grand\s*total|total|vat|tax|gst|sales\s*tax|balance|amount\s*due|invoice|due\s*date|date)\b",
    )
    .expect("valid regex")
});

/// Parse itemized rows from raw document text.
///
/// First matching row shape wins per line; duplicates (case-insensitive
/// description) keep the earliest row; descriptions of two characters or
/// fewer are dropped.
pub fn parse_line_items(text: &str) -> Vec<LineItem> {
    let mut items = Vec::new();

    for raw in text.lines() {
        let line = collapse_whitespace(raw);
        if line.chars().count() < MIN_LINE_CHARS {
            continue;
        }
        if let Some(item) = parse_row(&line) {
            items.push(item);
        }
    }

    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| item.description.chars().count() > 2)
        .filter(|item| seen.insert(item.description.to_lowercase()))
        .collect()
}

fn parse_row(line: &str) -> Option<LineItem> {
    for (pattern, confidence) in ROW_PATTERNS.iter() {
        let Some(caps) = pattern.captures(line) else {
            continue;
        };
        let description = caps[1].trim().to_string();
        if SUMMARY_RE.is_match(&description) {
            return None;
        }

        let numbers: Option<Vec<f64>> = caps
            .iter()
            .skip(2)
            .flatten()
            .map(|m| parse_number(m.as_str()))
            .collect();
        let Some(numbers) = numbers else {
            continue;
        };

        let item = match numbers.as_slice() {
            [qty, unit_price, total] => {
                let Some(quantity) = to_quantity(*qty) else {
                    continue;
                };
                LineItem {
                    description,
                    quantity,
                    unit_price: *unit_price,
                    total: *total,
                    confidence: *confidence,
                }
            }
            [qty, price] => {
                let Some(quantity) = to_quantity(*qty) else {
                    continue;
                };
                LineItem {
                    description,
                    quantity,
                    unit_price: *price,
                    total: round_cents(quantity as f64 * price),
                    confidence: *confidence,
                }
            }
            [price] => LineItem {
                description,
                quantity: 1,
                unit_price: *price,
                total: *price,
                confidence: *confidence,
            },
            _ => continue,
        };
        return Some(item);
    }
    None
}

fn parse_number(s: &str) -> Option<f64> {
    s.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

fn to_quantity(v: f64) -> Option<u32> {
    (v.fract() == 0.0 && v >= 0.0 && v <= u32::MAX as f64).then_some(v as u32)
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
