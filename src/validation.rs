// src/validation.rs

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, ValidationConfig};
use crate::heuristics::fields;
use crate::heuristics::normalize::{self, DateFormat};
use crate::heuristics::ExtractionResult;

/// Absorbs binary floating point noise in tolerance comparisons.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingRequiredField,
    MalformedFieldValue,
    ArithmeticInconsistency,
    DuplicateInvoiceNumber,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn new(kind: IssueKind, field: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.map(str::to_string),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub is_valid: bool,
}

impl ValidationReport {
    pub fn new(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn has_error(&self, kind: IssueKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    pub fn has_warning(&self, kind: IssueKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}

/// Fields whose absence makes a result unusable.
const CRITICAL_FIELDS: [&str; 2] = [fields::INVOICE_NUMBER, fields::TOTAL_AMOUNT];

#[derive(Debug, Clone)]
pub struct CrossFieldValidator {
    settings: ValidationConfig,
    required_fields: Vec<String>,
    date_formats: Vec<DateFormat>,
}

#[derive(Default)]
struct Issues {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Issues {
    fn error(&mut self, kind: IssueKind, field: Option<&str>, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(kind, field, message));
    }

    fn warn(&mut self, kind: IssueKind, field: Option<&str>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::new(kind, field, message));
    }
}

impl CrossFieldValidator {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: config.validation.clone(),
            required_fields: config.required_fields.clone(),
            date_formats: stored_date_formats(&config.date_formats),
        }
    }

    /// Validate one result, optionally against a batch of prior results
    /// (which may include this one) for duplicate detection.
    pub fn validate(
        &self,
        result: &ExtractionResult,
        batch_history: Option<&[ExtractionResult]>,
    ) -> ValidationReport {
        let mut issues = Issues::default();

        self.check_presence(result, &mut issues);
        self.check_formats(result, &mut issues);
        self.check_arithmetic(result, &mut issues);
        if let Some(history) = batch_history {
            check_duplicates(result, history, &mut issues);
        }

        debug!(
            errors = issues.errors.len(),
            warnings = issues.warnings.len(),
            "Validation complete"
        );
        ValidationReport::new(issues.errors, issues.warnings)
    }

    fn check_presence(&self, result: &ExtractionResult, issues: &mut Issues) {
        for field in &self.required_fields {
            if !result.field(field).trim().is_empty() {
                continue;
            }
            let message = format!("Missing required field: {field}");
            if CRITICAL_FIELDS.contains(&field.as_str()) {
                issues.error(IssueKind::MissingRequiredField, Some(field), message);
            } else {
                issues.warn(IssueKind::MissingRequiredField, Some(field), message);
            }
        }
    }

    fn check_formats(&self, result: &ExtractionResult, issues: &mut Issues) {
        for field in fields::AMOUNTS {
            let raw = result.field(field);
            if raw.is_empty() {
                continue;
            }
            match normalize::parse_amount(raw) {
                None => issues.error(
                    IssueKind::MalformedFieldValue,
                    Some(field),
                    format!("Invalid amount format for {field}: {raw}"),
                ),
                Some(v) if v < 0.0 => issues.error(
                    IssueKind::MalformedFieldValue,
                    Some(field),
                    format!("{field} cannot be negative: {raw}"),
                ),
                Some(v) if v > self.settings.amount_ceiling => issues.error(
                    IssueKind::MalformedFieldValue,
                    Some(field),
                    format!(
                        "{field} exceeds the plausible ceiling of {:.2}: {raw}",
                        self.settings.amount_ceiling
                    ),
                ),
                Some(_) => {}
            }
        }

        let date = result.field(fields::DATE);
        if !date.is_empty() && normalize::parse_date(date, &self.date_formats).is_none() {
            issues.error(
                IssueKind::MalformedFieldValue,
                Some(fields::DATE),
                format!("Invalid date format: {date}"),
            );
        }

        let number = result.field(fields::INVOICE_NUMBER);
        if !number.is_empty() && !normalize::is_valid_invoice_number(number) {
            issues.error(
                IssueKind::MalformedFieldValue,
                Some(fields::INVOICE_NUMBER),
                format!("Invoice number is malformed: {number}"),
            );
        }

        let supplier = result.field(fields::SUPPLIER_NAME);
        if !supplier.is_empty() && supplier.trim().chars().count() < 2 {
            issues.error(
                IssueKind::MalformedFieldValue,
                Some(fields::SUPPLIER_NAME),
                "Supplier name too short",
            );
        }

        for (i, item) in result.line_items.iter().enumerate() {
            let n = i + 1;
            if item.description.trim().is_empty() {
                issues.error(
                    IssueKind::MalformedFieldValue,
                    None,
                    format!("Line item {n} missing description"),
                );
            }
            if item.quantity == 0 {
                issues.error(
                    IssueKind::MalformedFieldValue,
                    None,
                    format!("Line item {n} quantity must be positive"),
                );
            }
            if !item.unit_price.is_finite() || item.unit_price < 0.0 {
                issues.error(
                    IssueKind::MalformedFieldValue,
                    None,
                    format!("Line item {n} price cannot be negative"),
                );
            }
        }
    }

    fn check_arithmetic(&self, result: &ExtractionResult, issues: &mut Issues) {
        let total = result.amount(fields::TOTAL_AMOUNT);
        let subtotal = result.amount(fields::SUBTOTAL);
        let vat = result.amount(fields::VAT_AMOUNT);

        if let (Some(s), Some(v), Some(t)) = (subtotal, vat, total) {
            if (s + v - t).abs() > self.settings.arithmetic_tolerance + EPSILON {
                issues.error(
                    IssueKind::ArithmeticInconsistency,
                    Some(fields::TOTAL_AMOUNT),
                    format!("Subtotal {s:.2} + VAT {v:.2} does not match total {t:.2}"),
                );
            }
        }

        if let Some(t) = total {
            if !result.line_items.is_empty() {
                let calculated: f64 = result
                    .line_items
                    .iter()
                    .map(|item| item.quantity as f64 * item.unit_price)
                    .sum();
                let tolerance = t.abs() * self.settings.line_item_tolerance;
                if (calculated - t).abs() > tolerance + EPSILON {
                    issues.error(
                        IssueKind::ArithmeticInconsistency,
                        Some(fields::TOTAL_AMOUNT),
                        format!(
                            "Total amount mismatch: calculated {calculated:.2}, declared {t:.2}"
                        ),
                    );
                }
            }
        }

        if let (Some(v), Some(t)) = (vat, total) {
            if v < 0.0 {
                issues.error(
                    IssueKind::ArithmeticInconsistency,
                    Some(fields::VAT_AMOUNT),
                    "VAT amount cannot be negative",
                );
            } else if t > 0.0 {
                let percent = v / t * 100.0;
                if percent > self.settings.vat_max_percent {
                    issues.warn(
                        IssueKind::ArithmeticInconsistency,
                        Some(fields::VAT_AMOUNT),
                        format!("VAT amount seems too high: {percent:.1}% of total"),
                    );
                }
            }
        }
    }
}

fn check_duplicates(result: &ExtractionResult, history: &[ExtractionResult], issues: &mut Issues) {
    let number = result.field(fields::INVOICE_NUMBER);
    if number.is_empty() {
        return;
    }
    let count = history
        .iter()
        .filter(|r| r.field(fields::INVOICE_NUMBER) == number)
        .count();
    if count > 1 {
        issues.error(
            IssueKind::DuplicateInvoiceNumber,
            Some(fields::INVOICE_NUMBER),
            format!("Duplicate invoice number: {number}"),
        );
    }
}

/// Stored dates are written as ISO, so it is always accepted first.
fn stored_date_formats(configured: &[DateFormat]) -> Vec<DateFormat> {
    std::iter::once(DateFormat::Iso)
        .chain(configured.iter().copied().filter(|f| *f != DateFormat::Iso))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::LineItem;

    fn validator() -> CrossFieldValidator {
        CrossFieldValidator::new(&Config::default())
    }

    fn result(values: &[(&str, &str)]) -> ExtractionResult {
        let required: Vec<String> = fields::ALL.iter().map(|f| f.to_string()).collect();
        let mut r = ExtractionResult::fallback(&required, "t".into(), "");
        r.error = None;
        for (k, v) in values {
            r.fields.insert(k.to_string(), v.to_string());
        }
        r
    }

    fn complete() -> ExtractionResult {
        result(&[
            (fields::INVOICE_NUMBER, "INV-2024-001"),
            (fields::DATE, "2024-01-15"),
            (fields::SUPPLIER_NAME, "Acme Ltd"),
            (fields::SUBTOTAL, "3700.00"),
            (fields::VAT_AMOUNT, "370.00"),
            (fields::TOTAL_AMOUNT, "4070.00"),
        ])
    }

    fn item(description: &str, quantity: u32, unit_price: f64) -> LineItem {
        LineItem {
            description: description.into(),
            quantity,
            unit_price,
            total: quantity as f64 * unit_price,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_consistent_invoice_is_valid() {
        let report = validator().validate(&complete(), None);
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_critical_vs_optional() {
        let report = validator().validate(&result(&[(fields::DATE, "2024-01-15")]), None);
        assert!(!report.is_valid);
        let missing: Vec<_> = report
            .errors
            .iter()
            .filter(|e| e.kind == IssueKind::MissingRequiredField)
            .filter_map(|e| e.field.as_deref())
            .collect();
        assert_eq!(missing, vec![fields::INVOICE_NUMBER, fields::TOTAL_AMOUNT]);
        assert_eq!(report.warnings.len(), 3);
    }

    #[test]
    fn test_arithmetic_mismatch() {
        let mut r = complete();
        r.fields.insert(fields::TOTAL_AMOUNT.into(), "4070.02".into());
        let report = validator().validate(&r, None);
        assert!(report.has_error(IssueKind::ArithmeticInconsistency));

        r.fields.insert(fields::TOTAL_AMOUNT.into(), "4070.01".into());
        let report = validator().validate(&r, None);
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn test_line_item_reconciliation() {
        let mut r = result(&[
            (fields::INVOICE_NUMBER, "INV-1"),
            (fields::TOTAL_AMOUNT, "100.00"),
        ]);
        r.line_items = vec![item("Widget A", 2, 25.0), item("Widget B", 1, 48.0)];
        // 98 vs 100 is inside 5%
        assert!(validator().validate(&r, None).is_valid);

        r.line_items.push(item("Widget C", 1, 10.0));
        let report = validator().validate(&r, None);
        assert!(report.has_error(IssueKind::ArithmeticInconsistency));
    }

    #[test]
    fn test_vat_share() {
        let r = result(&[
            (fields::INVOICE_NUMBER, "INV-1"),
            (fields::VAT_AMOUNT, "40.00"),
            (fields::TOTAL_AMOUNT, "100.00"),
        ]);
        let report = validator().validate(&r, None);
        assert!(report.is_valid);
        assert!(report.has_warning(IssueKind::ArithmeticInconsistency));

        let r = result(&[
            (fields::INVOICE_NUMBER, "INV-1"),
            (fields::VAT_AMOUNT, "-5"),
            (fields::TOTAL_AMOUNT, "100.00"),
        ]);
        let report = validator().validate(&r, None);
        assert!(report.has_error(IssueKind::ArithmeticInconsistency));
        assert!(report.has_error(IssueKind::MalformedFieldValue));
    }

    #[test]
    fn test_vat_ceiling_is_configurable() {
        let mut cfg = Config::default();
        cfg.validation.vat_max_percent = 50.0;
        let r = result(&[
            (fields::INVOICE_NUMBER, "INV-1"),
            (fields::VAT_AMOUNT, "40.00"),
            (fields::TOTAL_AMOUNT, "100.00"),
        ]);
        let report = CrossFieldValidator::new(&cfg).validate(&r, None);
        assert!(!report.has_warning(IssueKind::ArithmeticInconsistency));
    }

    #[test]
    fn test_malformed_values() {
        let mut r = complete();
        r.fields.insert(fields::DATE.into(), "someday".into());
        r.fields.insert(fields::INVOICE_NUMBER.into(), "A B".into());
        r.fields.insert(fields::SUPPLIER_NAME.into(), "X".into());
        r.fields.insert(fields::SUBTOTAL.into(), "1000000.00".into());
        r.line_items = vec![item("", 0, -1.0)];
        let report = validator().validate(&r, None);
        let malformed = report
            .errors
            .iter()
            .filter(|e| e.kind == IssueKind::MalformedFieldValue)
            .count();
        // date, invoice number, supplier, subtotal ceiling, three line item checks
        assert_eq!(malformed, 7);
    }

    #[test]
    fn test_duplicate_in_history() {
        let a = complete();
        let b = complete();
        let history = vec![a.clone(), b];
        let report = validator().validate(&a, Some(&history));
        assert!(report.has_error(IssueKind::DuplicateInvoiceNumber));
        assert!(report.errors.iter().any(|e| e.message.contains("INV-2024-001")));

        let report = validator().validate(&a, Some(&history[..1]));
        assert!(!report.has_error(IssueKind::DuplicateInvoiceNumber));
    }

    #[test]
    fn test_is_valid_tracks_errors_only() {
        let report = ValidationReport::new(
            Vec::new(),
            vec![ValidationIssue::new(IssueKind::MissingRequiredField, None, "w")],
        );
        assert!(report.is_valid);
    }

    #[test]
    fn test_iso_date_accepted_without_iso_format() {
        let cfg = Config {
            date_formats: vec![DateFormat::DayMonthYear],
            ..Config::default()
        };
        let validator = CrossFieldValidator::new(&cfg);
        let report = validator.validate(&complete(), None);
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(!report.has_error(IssueKind::MalformedFieldValue));

        let mut r = complete();
        r.fields.insert(fields::DATE.into(), "15/01/2024".into());
        assert!(validator.validate(&r, None).is_valid);
    }
}
