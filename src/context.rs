// src/context.rs

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{info, info_span, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{ConfigError, ContextError, StoreError};
use crate::heuristics::{ExtractionResult, FieldExtractor, PatternLibrary};
use crate::store::{
    Correction, CorrectionFeedbackStore, ModelVersionLog, PersistenceStore, StoreStats, generate_id,
};
use crate::text_source::TextSource;
use crate::training::{
    Classifier, ModelMetadata, ModelRegistry, RetrainOutcome, RetrainingPipeline, dataset,
};
use crate::validation::{CrossFieldValidator, ValidationReport};

/// Output of processing one document.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedInvoice {
    pub id: String,
    pub result: ExtractionResult,
    pub validation: ValidationReport,
    /// Seconds.
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrectionReceipt {
    pub correction: Correction,
    /// Present when this correction triggered an automatic retrain.
    pub retrain: Option<RetrainOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingStatus {
    pub model: Option<ModelMetadata>,
    pub corrections: usize,
    pub min_training_samples: usize,
    pub stats: StoreStats,
}

impl TrainingStatus {
    pub fn ready_to_train(&self) -> bool {
        self.corrections >= self.min_training_samples
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(m) => writeln!(
                f,
                "model {} (accuracy {:.3}, {} samples, created {})",
                m.version, m.accuracy, m.training_samples, m.created_at
            )?,
            None => writeln!(f, "no model yet")?,
        }
        writeln!(
            f,
            "corrections: {} (minimum for training: {})",
            self.corrections, self.min_training_samples
        )?;
        write!(
            f,
            "invoices: {}, average confidence {:.3}, average processing time {:.3}s",
            self.stats.invoices, self.stats.average_confidence, self.stats.average_processing_time
        )
    }
}

struct LoadedModel {
    meta: ModelMetadata,
    classifier: Box<dyn Classifier>,
}

/// Owns configuration, pattern library, extractor, validator, store and
/// retraining pipeline. Passed by reference to whatever drives the engine.
pub struct AppContext<S> {
    config: Config,
    library: Arc<PatternLibrary>,
    extractor: FieldExtractor,
    validator: CrossFieldValidator,
    pipeline: RetrainingPipeline,
    store: S,
    clock: Box<dyn Clock>,
    text_source: Box<dyn TextSource>,
    model: RwLock<Option<LoadedModel>>,
}

impl<S> AppContext<S>
where
    S: PersistenceStore + CorrectionFeedbackStore + ModelVersionLog,
{
    pub fn new(
        config: Config,
        store: S,
        clock: Box<dyn Clock>,
        text_source: Box<dyn TextSource>,
    ) -> Result<Self, ContextError> {
        config.validate()?;
        let library = match &config.patterns_path {
            Some(path) => PatternLibrary::load(path)?,
            None => PatternLibrary::builtin().map_err(ConfigError::from)?,
        };
        let library = Arc::new(library);
        let registry = Arc::new(ModelRegistry::open(&config.models_dir)?);

        let ctx = Self {
            extractor: FieldExtractor::new(Arc::clone(&library), &config),
            validator: CrossFieldValidator::new(&config),
            pipeline: RetrainingPipeline::new(&config, registry),
            library,
            config,
            store,
            clock,
            text_source,
            model: RwLock::new(None),
        };
        ctx.reload_model();
        info!(
            patterns = %ctx.library.version(),
            tier = ?ctx.extractor.tier(),
            model = ?ctx.model_version(),
            "Application context ready"
        );
        Ok(ctx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn model_version(&self) -> Option<String> {
        self.read_model().as_ref().map(|m| m.meta.version.clone())
    }

    /// Read, extract, validate and store one document.
    pub fn process(&self, path: &Path) -> Result<ProcessedInvoice, StoreError> {
        let text = self.text_source.read_text(path);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.process_text(&filename, &text)
    }

    pub fn process_text(&self, filename: &str, text: &str) -> Result<ProcessedInvoice, StoreError> {
        let _span = info_span!("extract", filename = %filename).entered();
        let started = Instant::now();

        let timestamp = self.clock.now_rfc3339();
        let mut result = self.extractor.extract(text, &timestamp);
        self.annotate(&mut result);

        let mut history = self.store.recent_results(self.config.recent_history_limit)?;
        history.push(result.clone());
        let validation = self.validator.validate(&result, Some(&history));

        let id = generate_id(&[filename, &timestamp, text]);
        let processing_time = started.elapsed().as_secs_f64();
        self.store
            .save_result(&id, filename, &result, &validation, processing_time)?;

        let (filled, total) = result.coverage();
        info!(
            id = %id,
            method = result.method.as_str(),
            fields = %format!("{filled}/{total}"),
            confidence = result.overall_confidence,
            errors = validation.errors.len(),
            warnings = validation.warnings.len(),
            "Document processed"
        );
        Ok(ProcessedInvoice {
            id,
            result,
            validation,
            processing_time,
        })
    }

    /// Log a human correction against a stored extraction.
    pub fn record_correction(
        &self,
        invoice_id: &str,
        field: &str,
        corrected_value: &str,
    ) -> Result<CorrectionReceipt, StoreError> {
        let stored = self
            .store
            .load_result(invoice_id)?
            .ok_or_else(|| StoreError::UnknownExtraction(invoice_id.to_string()))?;
        let original = stored.field(field);
        let correction = self.store.save_correction(
            invoice_id,
            field,
            original,
            corrected_value,
            &self.clock.now_rfc3339(),
        )?;

        let count = self.store.correction_count()?;
        let retrain = match self.config.auto_retrain_threshold {
            Some(every) if count % every == 0 => {
                info!(corrections = count, "Correction threshold reached, retraining");
                Some(self.retrain())
            }
            _ => None,
        };
        Ok(CorrectionReceipt {
            correction,
            retrain,
        })
    }

    /// Explicit retraining request. A new model is loaded on success.
    pub fn retrain(&self) -> RetrainOutcome {
        let outcome = self.pipeline.run(&self.store, &self.store, self.clock.as_ref());
        if outcome.success {
            self.reload_model();
        }
        outcome
    }

    pub fn training_status(&self) -> Result<TrainingStatus, StoreError> {
        Ok(TrainingStatus {
            model: self.store.latest_model()?,
            corrections: self.store.correction_count()?,
            min_training_samples: self.config.min_training_samples,
            stats: self.store.stats()?,
        })
    }

    /// Tag with the loaded model and list fields a reviewer should check.
    fn annotate(&self, result: &mut ExtractionResult) {
        let threshold = self.config.confidence_threshold;
        let mut review: Vec<String> = result
            .confidence
            .iter()
            .filter(|(_, c)| **c < threshold)
            .map(|(f, _)| f.clone())
            .collect();

        if let Some(loaded) = self.read_model().as_ref() {
            result.model_version = Some(loaded.meta.version.clone());
            for (field, value) in &result.fields {
                if value.is_empty() || review.contains(field) {
                    continue;
                }
                if loaded.classifier.predict(&dataset::embed(field, value)) {
                    review.push(field.clone());
                }
            }
            review.sort();
        }
        result.review_fields = review;
    }

    fn reload_model(&self) {
        let registry = self.pipeline.registry();
        let Some(meta) = registry.latest() else {
            return;
        };
        match registry.load(&meta.version) {
            Ok(artifact) => {
                let loaded = LoadedModel {
                    meta,
                    classifier: artifact.payload.into_classifier(),
                };
                *self.model.write().unwrap_or_else(PoisonError::into_inner) = Some(loaded);
            }
            Err(e) => warn!(version = %meta.version, error = %e, "Failed to load model artifact"),
        }
    }

    fn read_model(&self) -> std::sync::RwLockReadGuard<'_, Option<LoadedModel>> {
        self.model.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::heuristics::fields;
    use crate::store::InvoiceStore;
    use crate::text_source::{NoText, PlainTextFile};
    use crate::validation::IssueKind;
    use std::io::Write;
    use time::macros::datetime;

    const SAMPLE: &str =
        "Invoice #INV-2024-001 issued today. Subtotal: $3,700 VAT (10%): $370 Total Amount: $4,070";

    fn context(dir: &tempfile::TempDir, tweak: impl FnOnce(&mut Config)) -> AppContext<InvoiceStore> {
        let mut config = Config {
            models_dir: dir.path().join("models").display().to_string(),
            ..Config::default()
        };
        tweak(&mut config);
        let text_source = Box::new(PlainTextFile::new(&config.supported_extensions));
        AppContext::new(
            config,
            InvoiceStore::open_in_memory().unwrap(),
            Box::new(FixedClock(datetime!(2024-01-15 09:30:00 UTC))),
            text_source,
        )
        .unwrap()
    }

    #[test]
    fn test_sample_has_no_arithmetic_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, |_| {});
        let out = ctx.process_text("sample.txt", SAMPLE).unwrap();
        assert_eq!(out.result.field(fields::INVOICE_NUMBER), "INV-2024-001");
        assert!(!out.validation.has_error(IssueKind::ArithmeticInconsistency));
        assert!(!out.validation.has_error(IssueKind::DuplicateInvoiceNumber));
        assert_eq!(out.result.timestamp, "2024-01-15T09:30:00Z");
        assert_eq!(ctx.store().load_result(&out.id).unwrap(), Some(out.result));
    }

    #[test]
    fn test_duplicate_across_documents() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, |_| {});
        ctx.process_text("a.txt", SAMPLE).unwrap();
        let second = ctx.process_text("b.txt", SAMPLE).unwrap();
        assert!(second.validation.has_error(IssueKind::DuplicateInvoiceNumber));
        assert!(!second.validation.is_valid);
    }

    #[test]
    fn test_review_fields_flag_low_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, |_| {});
        let out = ctx.process_text("empty.txt", "").unwrap();
        assert_eq!(out.result.review_fields.len(), out.result.fields.len());
        assert!(out.result.model_version.is_none());
    }

    #[test]
    fn test_correction_captures_original_value() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, |_| {});
        let out = ctx.process_text("a.txt", SAMPLE).unwrap();

        let receipt = ctx
            .record_correction(&out.id, fields::TOTAL_AMOUNT, "4071.00")
            .unwrap();
        assert_eq!(receipt.correction.original_value, "4070.00");
        assert_eq!(receipt.correction.corrected_value, "4071.00");
        assert!(receipt.retrain.is_none());

        let err = ctx.record_correction("missing", "date", "x").unwrap_err();
        assert!(matches!(err, StoreError::UnknownExtraction(_)));
    }

    #[test]
    fn test_auto_retrain_loads_new_model() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, |c| {
            c.auto_retrain_threshold = Some(2);
            c.min_training_samples = 2;
        });
        let out = ctx.process_text("a.txt", SAMPLE).unwrap();

        let first = ctx.record_correction(&out.id, fields::DATE, "2024-01-15").unwrap();
        assert!(first.retrain.is_none());
        let second = ctx
            .record_correction(&out.id, fields::TOTAL_AMOUNT, "4070.00")
            .unwrap();
        let outcome = second.retrain.unwrap();
        assert!(outcome.success, "{}", outcome.message);

        assert_eq!(ctx.model_version(), outcome.version);
        let next = ctx.process_text("b.txt", "Invoice #INV-9").unwrap();
        assert_eq!(next.result.model_version, outcome.version);

        let status = ctx.training_status().unwrap();
        assert_eq!(status.model.unwrap().version, outcome.version.unwrap());
        assert_eq!(status.corrections, 2);
    }

    #[test]
    fn test_explicit_retrain_below_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, |_| {});
        let outcome = ctx.retrain();
        assert!(!outcome.success);
        assert!(outcome.message.contains("Need at least 5, got 0"));
        let status = ctx.training_status().unwrap();
        assert!(status.model.is_none());
        assert!(!status.ready_to_train());
        assert!(status.to_string().starts_with("no model yet"));
    }

    #[test]
    fn test_process_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, |_| {});
        let path = dir.path().join("invoice.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{SAMPLE}").unwrap();

        let out = ctx.process(&path).unwrap();
        assert_eq!(out.result.amount(fields::TOTAL_AMOUNT), Some(4070.0));
        assert_eq!(ctx.store().stats().unwrap().invoices, 1);
    }

    #[test]
    fn test_without_text_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            models_dir: dir.path().join("models").display().to_string(),
            ..Config::default()
        };
        let ctx = AppContext::new(
            config,
            InvoiceStore::open_in_memory().unwrap(),
            Box::new(FixedClock(datetime!(2024-01-15 09:30:00 UTC))),
            Box::new(NoText),
        )
        .unwrap();
        let out = ctx.process(Path::new("whatever.txt")).unwrap();
        assert!(out.result.fields.values().all(String::is_empty));
        assert!(out.validation.has_error(IssueKind::MissingRequiredField));
    }
}
