use serde::Deserialize;
use std::{fs, path::Path};

use crate::error::ConfigError;
use crate::heuristics::fields;
use crate::heuristics::normalize::DateFormat;

/// Which scoring tier the field extractor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    /// Pattern-position confidence only.
    Basic,
    /// Pattern-position confidence averaged with keyword context confidence.
    Ensemble,
}

/// Classifier fitted by the retraining pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Logistic,
    /// Majority-class baseline, for deployments without a real model.
    None,
}

/// Immutable engine configuration. Loaded once and shared by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub required_fields: Vec<String>,
    pub confidence_threshold: f64,
    pub min_training_samples: usize,
    /// Fraction of examples held out for evaluation.
    pub validation_split: f64,
    pub training_seed: u64,
    pub extraction_tier: ExtractionTier,
    pub classifier: ClassifierKind,
    /// Retrain automatically every N corrections. `None` means explicit requests only.
    pub auto_retrain_threshold: Option<usize>,
    pub recent_history_limit: usize,
    pub validation: ValidationConfig,
    pub date_formats: Vec<DateFormat>,
    pub supported_extensions: Vec<String>,
    pub db_path: String,
    pub models_dir: String,
    pub patterns_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Largest amount accepted as plausible.
    pub amount_ceiling: f64,
    /// Allowed absolute gap in `subtotal + vat == total`.
    pub arithmetic_tolerance: f64,
    /// Relative tolerance between the line-item sum and the declared total.
    pub line_item_tolerance: f64,
    /// VAT above this share of the total (in percent) is flagged.
    pub vat_max_percent: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            amount_ceiling: 999_999.99,
            arithmetic_tolerance: 0.01,
            line_item_tolerance: 0.05,
            vat_max_percent: 30.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            required_fields: fields::ALL.iter().map(|f| f.to_string()).collect(),
            confidence_threshold: 0.7,
            min_training_samples: 5,
            validation_split: 0.2,
            training_seed: 42,
            extraction_tier: ExtractionTier::Ensemble,
            classifier: ClassifierKind::Logistic,
            auto_retrain_threshold: None,
            recent_history_limit: 100,
            validation: ValidationConfig::default(),
            date_formats: DateFormat::ALL.to_vec(),
            supported_extensions: vec!["txt".into(), "csv".into(), "text".into()],
            db_path: default_db_path(),
            models_dir: "models".to_string(),
            patterns_path: None,
        }
    }
}

fn default_db_path() -> String {
    "database/invoice_system.db".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.required_fields.is_empty() {
            return Err(invalid("required_fields", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(invalid("confidence_threshold", "must lie in [0, 1]"));
        }
        if self.min_training_samples == 0 {
            return Err(invalid("min_training_samples", "must be positive"));
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(invalid("validation_split", "must lie in (0, 1)"));
        }
        if self.date_formats.is_empty() {
            return Err(invalid("date_formats", "must not be empty"));
        }
        if self.auto_retrain_threshold == Some(0) {
            return Err(invalid("auto_retrain_threshold", "must be positive"));
        }
        let v = &self.validation;
        for (key, value) in [
            ("validation.amount_ceiling", v.amount_ceiling),
            ("validation.arithmetic_tolerance", v.arithmetic_tolerance),
            ("validation.line_item_tolerance", v.line_item_tolerance),
            ("validation.vat_max_percent", v.vat_max_percent),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, "must be a non-negative number"));
            }
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.required_fields.len(), 6);
        assert_eq!(cfg.min_training_samples, 5);
        assert_eq!(cfg.extraction_tier, ExtractionTier::Ensemble);
        assert!((cfg.validation.amount_ceiling - 999_999.99).abs() < 1e-9);
    }

    #[test]
    fn test_overrides() {
        let cfg = Config::from_toml_str(
            r#"
            extraction_tier = "basic"
            classifier = "none"
            min_training_samples = 20
            date_formats = ["iso", "month_day_year"]

            [validation]
            vat_max_percent = 25.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.extraction_tier, ExtractionTier::Basic);
        assert_eq!(cfg.classifier, ClassifierKind::None);
        assert_eq!(cfg.min_training_samples, 20);
        assert_eq!(
            cfg.date_formats,
            vec![DateFormat::Iso, DateFormat::MonthDayYear]
        );
        assert_eq!(cfg.validation.vat_max_percent, 25.0);
        // untouched keys keep their defaults
        assert_eq!(cfg.validation.line_item_tolerance, 0.05);
    }

    #[test]
    fn test_rejects_bad_split() {
        let err = Config::from_toml_str("validation_split = 1.5").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "validation_split",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_zero_training_samples() {
        let err = Config::from_toml_str("min_training_samples = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "min_training_samples",
                ..
            }
        ));
        assert!(Config::from_toml_str("min_training_samples = 1").is_ok());
    }
}
