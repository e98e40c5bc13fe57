use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::{
    Correction, CorrectionFeedbackStore, CorrectionRecord, ModelVersionLog, PersistenceStore,
    StoreExport, StoreStats, StoredInvoice, generate_id,
};
use crate::error::StoreError;
use crate::heuristics::ExtractionResult;
use crate::training::ModelMetadata;
use crate::validation::ValidationReport;

/// SQLite-backed store for results, corrections and the model log.
pub struct InvoiceStore {
    conn: Mutex<Connection>,
}

impl InvoiceStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // One row per processed document
        conn.execute(
            "CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                extracted_data TEXT NOT NULL,
                validation_results TEXT,
                processing_time REAL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Human corrections, append-only
        conn.execute(
            "CREATE TABLE IF NOT EXISTS corrections (
                id TEXT PRIMARY KEY,
                invoice_id TEXT NOT NULL,
                field_name TEXT NOT NULL,
                original_value TEXT NOT NULL,
                corrected_value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (invoice_id) REFERENCES invoices(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS model_versions (
                version TEXT PRIMARY KEY,
                accuracy REAL NOT NULL,
                training_samples INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                path TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_invoices_created_at ON invoices(created_at)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_corrections_invoice_id ON corrections(invoice_id)",
            [],
        )?;

        info!("Database initialized successfully");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_to_model(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelMetadata> {
        Ok(ModelMetadata {
            version: row.get(0)?,
            accuracy: row.get(1)?,
            training_samples: row.get(2)?,
            created_at: row.get(3)?,
            path: row.get(4)?,
        })
    }
}

impl PersistenceStore for InvoiceStore {
    fn save_result(
        &self,
        id: &str,
        filename: &str,
        result: &ExtractionResult,
        report: &ValidationReport,
        processing_time: f64,
    ) -> Result<(), StoreError> {
        let extracted = result.to_json()?;
        let validation = serde_json::to_string(report)?;
        self.conn().execute(
            "INSERT INTO invoices
                (id, filename, extracted_data, validation_results, processing_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                extracted_data = excluded.extracted_data,
                validation_results = excluded.validation_results,
                processing_time = excluded.processing_time",
            params![
                id,
                filename,
                extracted,
                validation,
                processing_time,
                result.timestamp
            ],
        )?;
        info!(id = %id, filename = %filename, "Extraction stored");
        Ok(())
    }

    fn load_result(&self, id: &str) -> Result<Option<ExtractionResult>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT extracted_data FROM invoices WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => {
                let json: String = row.get(0)?;
                Ok(Some(ExtractionResult::from_json(&json)?))
            }
            None => Ok(None),
        }
    }

    fn recent_results(&self, limit: usize) -> Result<Vec<ExtractionResult>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT extracted_data FROM invoices
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            out.push(ExtractionResult::from_json(&json?)?);
        }
        Ok(out)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn();
        let invoices: usize =
            conn.query_row("SELECT COUNT(*) FROM invoices", [], |row| row.get(0))?;
        let corrections: usize =
            conn.query_row("SELECT COUNT(*) FROM corrections", [], |row| row.get(0))?;
        let (confidence, processing_time): (Option<f64>, Option<f64>) = conn.query_row(
            "SELECT AVG(json_extract(extracted_data, '$.overall_confidence')),
                    AVG(processing_time)
             FROM invoices",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(StoreStats {
            invoices,
            corrections,
            average_confidence: confidence.unwrap_or(0.0),
            average_processing_time: processing_time.unwrap_or(0.0),
        })
    }

    fn export(&self) -> Result<StoreExport, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, filename, extracted_data, validation_results, processing_time, created_at
             FROM invoices
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut invoices = Vec::new();
        for row in rows {
            let (id, filename, extracted, validation, processing_time, created_at) = row?;
            invoices.push(StoredInvoice {
                id,
                filename,
                extracted_data: ExtractionResult::from_json(&extracted)?,
                validation_results: validation
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?,
                processing_time,
                created_at,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, invoice_id, field_name, original_value, corrected_value, created_at
             FROM corrections
             ORDER BY rowid",
        )?;
        let corrections = stmt
            .query_map([], |row| {
                Ok(Correction {
                    id: row.get(0)?,
                    invoice_id: row.get(1)?,
                    field_name: row.get(2)?,
                    original_value: row.get(3)?,
                    corrected_value: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        info!(
            invoices = invoices.len(),
            corrections = corrections.len(),
            "Store exported"
        );
        Ok(StoreExport {
            invoices,
            corrections,
        })
    }
}

impl CorrectionFeedbackStore for InvoiceStore {
    fn save_correction(
        &self,
        invoice_id: &str,
        field_name: &str,
        original_value: &str,
        corrected_value: &str,
        created_at: &str,
    ) -> Result<Correction, StoreError> {
        let conn = self.conn();
        let known: usize = conn.query_row(
            "SELECT COUNT(*) FROM invoices WHERE id = ?1",
            params![invoice_id],
            |row| row.get(0),
        )?;
        if known == 0 {
            return Err(StoreError::UnknownExtraction(invoice_id.to_string()));
        }

        let seq: usize = conn.query_row("SELECT COUNT(*) FROM corrections", [], |row| row.get(0))?;
        let correction = Correction {
            id: generate_id(&[
                invoice_id,
                field_name,
                corrected_value,
                created_at,
                &seq.to_string(),
            ]),
            invoice_id: invoice_id.to_string(),
            field_name: field_name.to_string(),
            original_value: original_value.to_string(),
            corrected_value: corrected_value.to_string(),
            created_at: created_at.to_string(),
        };
        conn.execute(
            "INSERT INTO corrections
                (id, invoice_id, field_name, original_value, corrected_value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                correction.id,
                correction.invoice_id,
                correction.field_name,
                correction.original_value,
                correction.corrected_value,
                correction.created_at,
            ],
        )?;
        info!(invoice_id = %invoice_id, field = %field_name, "Correction stored");
        Ok(correction)
    }

    fn corrections_with_context(&self) -> Result<Vec<CorrectionRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.invoice_id, c.field_name, c.original_value, c.corrected_value,
                    c.created_at, i.filename
             FROM corrections c
             JOIN invoices i ON i.id = c.invoice_id
             ORDER BY c.rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CorrectionRecord {
                correction: Correction {
                    id: row.get(0)?,
                    invoice_id: row.get(1)?,
                    field_name: row.get(2)?,
                    original_value: row.get(3)?,
                    corrected_value: row.get(4)?,
                    created_at: row.get(5)?,
                },
                filename: row.get(6)?,
            })
        })?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(count = records.len(), "Loaded corrections");
        Ok(records)
    }

    fn correction_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM corrections", [], |row| row.get(0))?)
    }
}

impl ModelVersionLog for InvoiceStore {
    fn append_model(&self, meta: &ModelMetadata) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO model_versions (version, accuracy, training_samples, created_at, path)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                meta.version,
                meta.accuracy,
                meta.training_samples,
                meta.created_at,
                meta.path
            ],
        )?;
        info!(version = %meta.version, "Model version logged");
        Ok(())
    }

    fn latest_model(&self) -> Result<Option<ModelMetadata>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT version, accuracy, training_samples, created_at, path
             FROM model_versions
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_model(row)?)),
            None => Ok(None),
        }
    }

    fn model_history(&self) -> Result<Vec<ModelMetadata>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT version, accuracy, training_samples, created_at, path
             FROM model_versions
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([], Self::row_to_model)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
