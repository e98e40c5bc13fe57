// src/training/mod.rs

pub mod artifact;
pub mod classifier;
pub mod dataset;

use serde::Serialize;
use std::sync::{Arc, Mutex, TryLockError};
use tracing::{info, info_span, warn};

pub use artifact::{ModelArtifact, ModelMetadata, ModelRegistry};
pub use classifier::{Classifier, ModelPayload};

use crate::clock::Clock;
use crate::config::{ClassifierKind, Config};
use crate::error::RetrainError;
use crate::store::{CorrectionFeedbackStore, ModelVersionLog};

/// Caller-facing summary of a retraining request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainOutcome {
    pub success: bool,
    pub version: Option<String>,
    pub accuracy: Option<f64>,
    pub training_samples: usize,
    pub message: String,
}

impl RetrainOutcome {
    pub fn from_result(result: Result<ModelMetadata, RetrainError>) -> Self {
        match result {
            Ok(meta) => Self {
                success: true,
                message: format!(
                    "Model {} trained on {} samples, held-out accuracy {:.3}",
                    meta.version, meta.training_samples, meta.accuracy
                ),
                version: Some(meta.version),
                accuracy: Some(meta.accuracy),
                training_samples: meta.training_samples,
            },
            Err(e) => Self {
                success: false,
                version: None,
                accuracy: None,
                training_samples: match e {
                    RetrainError::InsufficientTrainingData { actual, .. } => actual,
                    _ => 0,
                },
                message: e.to_string(),
            },
        }
    }
}

/// Corrections in, versioned model artifact out. One run at a time.
#[derive(Debug)]
pub struct RetrainingPipeline {
    min_samples: usize,
    holdout_fraction: f64,
    seed: u64,
    classifier: ClassifierKind,
    registry: Arc<ModelRegistry>,
    running: Mutex<()>,
}

impl RetrainingPipeline {
    pub fn new(config: &Config, registry: Arc<ModelRegistry>) -> Self {
        Self {
            min_samples: config.min_training_samples,
            holdout_fraction: config.validation_split,
            seed: config.training_seed,
            classifier: config.classifier,
            registry,
            running: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn run(
        &self,
        corrections: &dyn CorrectionFeedbackStore,
        log: &dyn ModelVersionLog,
        clock: &dyn Clock,
    ) -> RetrainOutcome {
        let outcome = RetrainOutcome::from_result(self.retrain(corrections, log, clock));
        if outcome.success {
            info!(message = %outcome.message, "Retraining succeeded");
        } else {
            warn!(message = %outcome.message, "Retraining did not produce a model");
        }
        outcome
    }

    /// Fit a classifier on every logged correction and publish it.
    ///
    /// Nothing is written unless the run succeeds end to end.
    pub fn retrain(
        &self,
        corrections: &dyn CorrectionFeedbackStore,
        log: &dyn ModelVersionLog,
        clock: &dyn Clock,
    ) -> Result<ModelMetadata, RetrainError> {
        let _running = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(RetrainError::AlreadyRunning),
        };
        let _span = info_span!("retrain").entered();

        let records = corrections.corrections_with_context()?;
        let examples = dataset::build_examples(&records);
        if examples.len() < self.min_samples {
            return Err(RetrainError::InsufficientTrainingData {
                required: self.min_samples,
                actual: examples.len(),
            });
        }

        let total = examples.len();
        let (train, holdout) = dataset::split(examples, self.holdout_fraction, self.seed);
        let mut model = classifier::for_kind(self.classifier);
        model.fit(&train)?;
        let evaluated_on = if holdout.is_empty() { &train } else { &holdout };
        let accuracy = classifier::accuracy(model.as_ref(), evaluated_on);
        info!(
            samples = total,
            train = train.len(),
            holdout = holdout.len(),
            accuracy,
            "Classifier fitted"
        );

        let now = clock.now();
        let artifact = ModelArtifact {
            version: self.registry.next_version(now),
            accuracy,
            training_samples: total,
            created_at: clock.now_rfc3339(),
            payload: model.to_payload(),
        };
        let meta = self.registry.publish(&artifact)?;
        if let Err(e) = log.append_model(&meta) {
            warn!(
                version = %meta.version,
                error = %e,
                "Model log rejected the new version, retracting its artifact"
            );
            self.registry.retract(&meta.version);
            return Err(e.into());
        }
        Ok(meta)
    }
}
