// src/store/mod.rs

mod sqlite;

use serde::Serialize;
use sha2::{Digest, Sha256};

pub use sqlite::InvoiceStore;

use crate::error::StoreError;
use crate::heuristics::ExtractionResult;
use crate::training::ModelMetadata;
use crate::validation::ValidationReport;

/// Stable hex id derived from its parts.
pub fn generate_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// A human correction of one field of a stored extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub id: String,
    pub invoice_id: String,
    pub field_name: String,
    pub original_value: String,
    pub corrected_value: String,
    pub created_at: String,
}

/// A correction joined with the extraction it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionRecord {
    pub correction: Correction,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub invoices: usize,
    pub corrections: usize,
    pub average_confidence: f64,
    /// Seconds per document.
    pub average_processing_time: f64,
}

/// One stored extraction as written out by an export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredInvoice {
    pub id: String,
    pub filename: String,
    pub extracted_data: ExtractionResult,
    pub validation_results: Option<ValidationReport>,
    pub processing_time: Option<f64>,
    pub created_at: String,
}

/// Full dump of extractions and corrections, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreExport {
    pub invoices: Vec<StoredInvoice>,
    pub corrections: Vec<Correction>,
}

/// Durable home for extraction results.
pub trait PersistenceStore: Send + Sync {
    fn save_result(
        &self,
        id: &str,
        filename: &str,
        result: &ExtractionResult,
        report: &ValidationReport,
        processing_time: f64,
    ) -> Result<(), StoreError>;

    fn load_result(&self, id: &str) -> Result<Option<ExtractionResult>, StoreError>;

    /// Most recent first.
    fn recent_results(&self, limit: usize) -> Result<Vec<ExtractionResult>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    fn export(&self) -> Result<StoreExport, StoreError>;
}

/// Append-only log of human corrections.
pub trait CorrectionFeedbackStore: Send + Sync {
    /// Fails with `UnknownExtraction` unless `invoice_id` was saved before.
    fn save_correction(
        &self,
        invoice_id: &str,
        field_name: &str,
        original_value: &str,
        corrected_value: &str,
        created_at: &str,
    ) -> Result<Correction, StoreError>;

    /// Every correction in the order it was logged.
    fn corrections_with_context(&self) -> Result<Vec<CorrectionRecord>, StoreError>;

    fn correction_count(&self) -> Result<usize, StoreError>;
}

/// Append-only history of published models.
pub trait ModelVersionLog: Send + Sync {
    fn append_model(&self, meta: &ModelMetadata) -> Result<(), StoreError>;

    fn latest_model(&self) -> Result<Option<ModelMetadata>, StoreError>;

    /// Oldest first.
    fn model_history(&self) -> Result<Vec<ModelMetadata>, StoreError>;
}
