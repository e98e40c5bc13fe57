// src/heuristics/normalize.rs

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::sync::LazyLock;
use time::{Date, Month};

use super::FieldKind;

static THOUSANDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d),(\d{3})\b").expect("valid regex"));
static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("valid regex"));
static NUMERIC_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,4})[/\-.](\d{1,2})[/\-.](\d{1,4})$").expect("valid regex"));
static DAY_NAME_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[\s\-]+([A-Za-z]+)\.?,?[\s\-]+(\d{2,4})$").expect("valid regex")
});
static NAME_DAY_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]+)\.?\s+(\d{1,2}),?\s+(\d{2,4})$").expect("valid regex")
});
static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(?:\.\d+)?$").expect("valid regex"));
static INVOICE_NO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9\-/._]+$").expect("valid regex"));

/// Date layouts accepted for the `date` field, tried in configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    /// 2024-01-15, 2024/01/15
    Iso,
    /// 15/01/2024, 15-01-24, 15.01.2024
    DayMonthYear,
    /// 01/15/2024
    MonthDayYear,
    /// 15 January 2024, 15th Jan 2024
    DayMonthNameYear,
    /// January 15, 2024
    MonthNameDayYear,
}

impl DateFormat {
    pub const ALL: [DateFormat; 5] = [
        DateFormat::Iso,
        DateFormat::DayMonthYear,
        DateFormat::MonthDayYear,
        DateFormat::DayMonthNameYear,
        DateFormat::MonthNameDayYear,
    ];
}

/// Prepare raw document text for pattern matching.
///
/// Keeps line structure; collapses horizontal whitespace, drops blank lines,
/// masks unusual symbols and strips thousands separators from numbers.
pub fn preprocess(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            let masked: String = line
                .chars()
                .map(|c| if is_kept_char(c) { c } else { ' ' })
                .collect();
            collapse_whitespace(&masked)
        })
        .filter(|line| !line.is_empty())
        .collect();

    strip_thousands_separators(&lines.join("\n"))
}

fn is_kept_char(c: char) -> bool {
    c.is_alphanumeric()
        || c == '_'
        || c.is_whitespace()
        || ".-$#/:,()%&@'\"€£".contains(c)
}

/// `3,700` -> `3700`, `1,234,567` -> `1234567`.
pub fn strip_thousands_separators(text: &str) -> String {
    let mut out = text.to_string();
    while THOUSANDS_RE.is_match(&out) {
        out = THOUSANDS_RE.replace_all(&out, "$1$2").into_owned();
    }
    out
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a raw captured value for its field. `None` rejects the candidate.
pub fn normalize_value(kind: FieldKind, raw: &str, formats: &[DateFormat]) -> Option<String> {
    match kind {
        FieldKind::Date => parse_date(raw, formats).map(format_date),
        FieldKind::Amount => {
            let amount = parse_amount(raw)?;
            (amount >= 0.0).then(|| format!("{amount:.2}"))
        }
        FieldKind::InvoiceNumber => normalize_invoice_number(raw),
        FieldKind::Text => {
            let collapsed = collapse_whitespace(raw);
            let trimmed = collapsed.trim_end_matches([',', ';', ':', '-', ' ']);
            (trimmed.chars().count() >= 2).then(|| trimmed.to_string())
        }
    }
}

/// Upper-cased, restricted charset, at least three characters.
pub fn normalize_invoice_number(raw: &str) -> Option<String> {
    let value = raw.trim().trim_end_matches(['.', ',']).to_uppercase();
    is_valid_invoice_number(&value).then_some(value)
}

pub fn is_valid_invoice_number(value: &str) -> bool {
    value.len() >= 3 && INVOICE_NO_RE.is_match(value)
}

/// Parse a monetary value, tolerating currency symbols/codes and separators.
/// Negative values parse so that validation can report them.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | ',' | ' '))
        .collect();
    if !AMOUNT_RE.is_match(&cleaned) {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a date against the accepted formats, first valid interpretation wins.
pub fn parse_date(raw: &str, formats: &[DateFormat]) -> Option<Date> {
    let cleaned = ORDINAL_RE.replace_all(raw.trim().trim_end_matches(['.', ',']), "$1");
    let cleaned = collapse_whitespace(&cleaned);

    formats
        .iter()
        .find_map(|format| parse_date_as(&cleaned, *format))
}

fn parse_date_as(s: &str, format: DateFormat) -> Option<Date> {
    match format {
        DateFormat::Iso => {
            let c = NUMERIC_DATE_RE.captures(s)?;
            if c[1].len() != 4 {
                return None;
            }
            build_date(&c[1], c[2].parse().ok()?, &c[3])
        }
        DateFormat::DayMonthYear | DateFormat::MonthDayYear => {
            let c = NUMERIC_DATE_RE.captures(s)?;
            if c[1].len() > 2 {
                return None;
            }
            let (day, month) = if format == DateFormat::DayMonthYear {
                (&c[1], &c[2])
            } else {
                (&c[2], &c[1])
            };
            build_date(&c[3], month.parse().ok()?, day)
        }
        DateFormat::DayMonthNameYear => {
            let c = DAY_NAME_YEAR_RE.captures(s)?;
            build_date(&c[3], month_from_name(&c[2])?, &c[1])
        }
        DateFormat::MonthNameDayYear => {
            let c = NAME_DAY_YEAR_RE.captures(s)?;
            build_date(&c[3], month_from_name(&c[1])?, &c[2])
        }
    }
}

fn build_date(year: &str, month: u8, day: &str) -> Option<Date> {
    let year: i32 = match year.len() {
        2 => 2000 + year.parse::<i32>().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day.parse().ok()?).ok()
}

fn month_from_name(name: &str) -> Option<u8> {
    const MONTHS: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    let name = name.to_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(name.as_str()))
        .map(|i| i as u8 + 1)
}

/// Canonical `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[DateFormat] = &DateFormat::ALL;

    #[test]
    fn test_preprocess_keeps_lines_and_strips_separators() {
        let text = "Invoice   #INV-1\r\n\n   Total:\t$1,234,567.50  \n";
        assert_eq!(preprocess(text), "Invoice #INV-1\nTotal: $1234567.50");
    }

    #[test]
    fn test_preprocess_masks_symbols() {
        assert_eq!(preprocess("Qty * 3 | ok"), "Qty 3 ok");
    }

    #[test]
    fn test_dates() {
        let iso = |s| parse_date(s, ALL).map(format_date);
        assert_eq!(iso("2024-01-15").as_deref(), Some("2024-01-15"));
        assert_eq!(iso("15/01/2024").as_deref(), Some("2024-01-15"));
        // day-first wins when both readings are valid
        assert_eq!(iso("03/04/2024").as_deref(), Some("2024-04-03"));
        assert_eq!(iso("01/15/2024").as_deref(), Some("2024-01-15"));
        assert_eq!(iso("15.01.24").as_deref(), Some("2024-01-15"));
        assert_eq!(iso("15th January 2024").as_deref(), Some("2024-01-15"));
        assert_eq!(iso("3 Sept 2024").as_deref(), Some("2024-09-03"));
        assert_eq!(iso("Jan 5, 2024").as_deref(), Some("2024-01-05"));
        assert_eq!(iso("31/02/2024"), None);
        assert_eq!(iso("Smarch 5, 2024"), None);
        assert_eq!(iso("yesterday"), None);
    }

    #[test]
    fn test_date_formats_restrict() {
        assert!(parse_date("01/15/2024", &[DateFormat::Iso]).is_none());
        assert!(parse_date("2024-01-15", &[DateFormat::Iso]).is_some());
    }

    #[test]
    fn test_amounts() {
        assert_eq!(parse_amount("$3,700"), Some(3700.0));
        assert_eq!(parse_amount("USD 12.50"), Some(12.5));
        assert_eq!(parse_amount("-5"), Some(-5.0));
        assert_eq!(parse_amount("12a34"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(
            normalize_value(FieldKind::Amount, "4,070", ALL).as_deref(),
            Some("4070.00")
        );
        assert_eq!(normalize_value(FieldKind::Amount, "-1", ALL), None);
    }

    #[test]
    fn test_invoice_numbers() {
        assert_eq!(
            normalize_invoice_number("inv-2024-001.").as_deref(),
            Some("INV-2024-001")
        );
        assert_eq!(normalize_invoice_number("AB"), None);
        assert_eq!(normalize_invoice_number("INV 001"), None);
    }

    #[test]
    fn test_text_values() {
        assert_eq!(
            normalize_value(FieldKind::Text, "  Acme   Supplies Ltd, ", ALL).as_deref(),
            Some("Acme Supplies Ltd")
        );
        assert_eq!(normalize_value(FieldKind::Text, "A", ALL), None);
    }
}
