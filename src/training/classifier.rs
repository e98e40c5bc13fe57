// src/training/classifier.rs

use linfa::Dataset;
use linfa::traits::Fit;
use linfa_logistic::LogisticRegression;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::dataset::{FEATURE_DIM, TrainingExample};
use crate::config::ClassifierKind;
use crate::error::RetrainError;

const MAX_ITERATIONS: u64 = 200;
const L2_PENALTY: f64 = 1e-3;
const CONSTANT_CLAMP: f64 = 0.01;

/// Capability interface for the model fitted during retraining.
pub trait Classifier: Send + Sync {
    fn fit(&mut self, examples: &[TrainingExample]) -> Result<(), RetrainError>;

    /// Probability that the value will need correction.
    fn predict_proba(&self, features: &[f64]) -> f64;

    fn predict(&self, features: &[f64]) -> bool {
        self.predict_proba(features) >= 0.5
    }

    fn to_payload(&self) -> ModelPayload;
}

/// Serialized classifier state stored inside an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelPayload {
    Logistic { weights: Vec<f64>, bias: f64 },
    Majority { positive_rate: f64 },
}

impl ModelPayload {
    pub fn into_classifier(self) -> Box<dyn Classifier> {
        match self {
            Self::Logistic { weights, bias } => Box::new(LogisticClassifier { weights, bias }),
            Self::Majority { positive_rate } => Box::new(MajorityClassifier { positive_rate }),
        }
    }
}

/// Fresh, unfitted classifier for the configured kind.
pub fn for_kind(kind: ClassifierKind) -> Box<dyn Classifier> {
    match kind {
        ClassifierKind::Logistic => Box::new(LogisticClassifier::new()),
        ClassifierKind::None => Box::new(MajorityClassifier::default()),
    }
}

/// Fraction of examples classified correctly; 0 for an empty set.
pub fn accuracy(classifier: &dyn Classifier, examples: &[TrainingExample]) -> f64 {
    if examples.is_empty() {
        return 0.0;
    }
    let correct = examples
        .iter()
        .filter(|e| classifier.predict(&e.features) == e.label)
        .count();
    correct as f64 / examples.len() as f64
}

/// Logistic regression fitted with `linfa-logistic`.
///
/// Only the fitted coefficients are kept, so a restored payload predicts
/// exactly like the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticClassifier {
    weights: Vec<f64>,
    bias: f64,
}

impl LogisticClassifier {
    pub fn new() -> Self {
        Self {
            weights: vec![0.0; FEATURE_DIM],
            bias: 0.0,
        }
    }

    fn logit(&self, features: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }

    /// A single-class training set cannot be fitted; predict its rate instead.
    fn constant(&mut self, dim: usize, positive_rate: f64) {
        let p = positive_rate.clamp(CONSTANT_CLAMP, 1.0 - CONSTANT_CLAMP);
        self.weights = vec![0.0; dim];
        self.bias = (p / (1.0 - p)).ln();
    }
}

impl Default for LogisticClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Classifier for LogisticClassifier {
    fn fit(&mut self, examples: &[TrainingExample]) -> Result<(), RetrainError> {
        let dim = examples
            .iter()
            .map(|e| e.features.len())
            .max()
            .unwrap_or(FEATURE_DIM);
        let positives = examples.iter().filter(|e| e.label).count();
        if examples.is_empty() {
            self.constant(dim, 0.5);
            return Ok(());
        }
        if positives == 0 || positives == examples.len() {
            self.constant(dim, positives as f64 / examples.len() as f64);
            return Ok(());
        }

        let records = Array2::from_shape_fn((examples.len(), dim), |(i, j)| {
            examples[i].features.get(j).copied().unwrap_or(0.0)
        });
        let targets = Array1::from_iter(examples.iter().map(|e| e.label));
        let dataset = Dataset::new(records, targets);

        let fitted = LogisticRegression::default()
            .alpha(L2_PENALTY)
            .max_iterations(MAX_ITERATIONS)
            .fit(&dataset)
            .map_err(|e| RetrainError::Fit(e.to_string()))?;
        self.weights = fitted.params().to_vec();
        self.bias = fitted.intercept();
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> f64 {
        sigmoid(self.logit(features))
    }

    fn to_payload(&self) -> ModelPayload {
        ModelPayload::Logistic {
            weights: self.weights.clone(),
            bias: self.bias,
        }
    }
}

/// Predicts the training set's majority label for everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MajorityClassifier {
    positive_rate: f64,
}

impl Classifier for MajorityClassifier {
    fn fit(&mut self, examples: &[TrainingExample]) -> Result<(), RetrainError> {
        let positives = examples.iter().filter(|e| e.label).count();
        self.positive_rate = if examples.is_empty() {
            0.0
        } else {
            positives as f64 / examples.len() as f64
        };
        Ok(())
    }

    fn predict_proba(&self, _features: &[f64]) -> f64 {
        self.positive_rate
    }

    fn to_payload(&self) -> ModelPayload {
        ModelPayload::Majority {
            positive_rate: self.positive_rate,
        }
    }
}
