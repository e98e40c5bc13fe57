// src/heuristics/mod.rs

pub mod confidence;
pub mod extractor;
pub mod features;
pub mod line_items;
pub mod normalize;
pub mod patterns;

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

pub use extractor::{FieldCandidate, FieldExtractor};
pub use features::FeatureVector;
pub use line_items::parse_line_items;
pub use patterns::PatternLibrary;

/// Canonical field names.
pub mod fields {
    pub const INVOICE_NUMBER: &str = "invoice_number";
    pub const DATE: &str = "date";
    pub const SUPPLIER_NAME: &str = "supplier_name";
    pub const TOTAL_AMOUNT: &str = "total_amount";
    pub const SUBTOTAL: &str = "subtotal";
    pub const VAT_AMOUNT: &str = "vat_amount";

    pub const ALL: [&str; 6] = [
        INVOICE_NUMBER,
        DATE,
        SUPPLIER_NAME,
        TOTAL_AMOUNT,
        SUBTOTAL,
        VAT_AMOUNT,
    ];

    pub const AMOUNTS: [&str; 3] = [TOTAL_AMOUNT, SUBTOTAL, VAT_AMOUNT];
}

/// How a field's raw value is normalized and validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    InvoiceNumber,
    Date,
    Amount,
    Text,
}

impl FieldKind {
    /// Fields outside the canonical set are treated as free text.
    pub fn of(field: &str) -> Self {
        match field {
            fields::INVOICE_NUMBER => Self::InvoiceNumber,
            fields::DATE => Self::Date,
            fields::TOTAL_AMOUNT | fields::SUBTOTAL | fields::VAT_AMOUNT => Self::Amount,
            _ => Self::Text,
        }
    }
}

/// A single invoice line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub total: f64,
    /// Fixed by the row pattern that produced the item.
    pub confidence: f64,
}

/// Tag recording which path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Basic,
    Ensemble,
    Fallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Ensemble => "ensemble",
            Self::Fallback => "fallback",
        }
    }
}

/// Structured output of field extraction for one document.
///
/// `fields` and `confidence` always hold every configured required field,
/// with an empty value and zero confidence when nothing was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub fields: BTreeMap<String, String>,
    pub confidence: BTreeMap<String, f64>,
    pub line_items: Vec<LineItem>,
    pub overall_confidence: f64,
    pub method: ExtractionMethod,
    /// RFC 3339 extraction time.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    /// Fields a reviewer should look at before accepting the result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
}

impl ExtractionResult {
    /// Deterministic result returned when extraction fails internally.
    pub fn fallback(required: &[String], timestamp: String, error: impl Into<String>) -> Self {
        Self {
            fields: required.iter().map(|f| (f.clone(), String::new())).collect(),
            confidence: required.iter().map(|f| (f.clone(), 0.0)).collect(),
            line_items: Vec::new(),
            overall_confidence: 0.0,
            method: ExtractionMethod::Fallback,
            timestamp,
            model_version: None,
            review_fields: Vec::new(),
            error: Some(error.into()),
            features: None,
        }
    }

    /// Value of a field, empty when absent.
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    /// Parsed monetary value of a field, `None` when empty or unparseable.
    pub fn amount(&self, name: &str) -> Option<f64> {
        normalize::parse_amount(self.field(name))
    }

    /// How many required fields received a value.
    pub fn coverage(&self) -> (usize, usize) {
        let filled = self.fields.values().filter(|v| !v.is_empty()).count();
        (filled, self.fields.len())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
