use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use super::confidence::{self, context_confidence, pattern_confidence};
use super::normalize::{self, DateFormat};
use super::{ExtractionMethod, ExtractionResult, FieldKind, PatternLibrary, features, line_items};
use crate::config::{Config, ExtractionTier};

/// One normalized match for a field, before selection.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCandidate {
    pub field: String,
    pub value: String,
    pub rank: usize,
    pub pattern_confidence: f64,
    /// Only computed by the ensemble tier.
    pub context_confidence: Option<f64>,
}

impl FieldCandidate {
    pub fn score(&self) -> f64 {
        match self.context_confidence {
            Some(context) => (self.pattern_confidence + context) / 2.0,
            None => self.pattern_confidence,
        }
    }
}

/// Pattern-based field extractor shared by both fidelity tiers.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    library: Arc<PatternLibrary>,
    tier: ExtractionTier,
    required_fields: Vec<String>,
    date_formats: Vec<DateFormat>,
    #[cfg(test)]
    fault: Option<&'static str>,
}

impl FieldExtractor {
    pub fn new(library: Arc<PatternLibrary>, config: &Config) -> Self {
        Self {
            library,
            tier: config.extraction_tier,
            required_fields: config.required_fields.clone(),
            date_formats: config.date_formats.clone(),
            #[cfg(test)]
            fault: None,
        }
    }

    pub fn with_tier(mut self, tier: ExtractionTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn tier(&self) -> ExtractionTier {
        self.tier
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    /// Extract every required field from raw document text.
    ///
    /// Never fails: an internal fault yields the fallback result.
    pub fn extract(&self, text: &str, timestamp: &str) -> ExtractionResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run(text, timestamp))) {
            Ok(result) => result,
            Err(cause) => {
                let reason = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown fault".to_string());
                warn!(reason = %reason, "Field extraction failed, returning fallback");
                ExtractionResult::fallback(
                    &self.required_fields,
                    timestamp.to_string(),
                    format!("extraction failed: {reason}"),
                )
            }
        }
    }

    /// All surviving candidates for a field, in matcher then text order.
    pub fn candidates(&self, processed: &str, field: &str) -> Vec<FieldCandidate> {
        let kind = FieldKind::of(field);
        let keywords = self.library.keywords(field);
        let mut out = Vec::new();

        for matcher in self.library.matchers(field) {
            for caps in matcher.regex.captures_iter(processed) {
                let Some(m) = caps.get(1) else {
                    continue;
                };
                let Some(value) = normalize::normalize_value(kind, m.as_str(), &self.date_formats)
                else {
                    continue;
                };
                let context = match self.tier {
                    ExtractionTier::Basic => None,
                    ExtractionTier::Ensemble => Some(context_confidence(
                        processed,
                        m.start(),
                        m.end(),
                        keywords,
                    )),
                };
                out.push(FieldCandidate {
                    field: field.to_string(),
                    value,
                    rank: matcher.rank,
                    pattern_confidence: pattern_confidence(matcher.rank),
                    context_confidence: context,
                });
            }
        }
        out
    }

    fn run(&self, text: &str, timestamp: &str) -> ExtractionResult {
        #[cfg(test)]
        if let Some(reason) = self.fault {
            panic!("{reason}");
        }
        let processed = normalize::preprocess(text);

        let mut values = BTreeMap::new();
        let mut scores = BTreeMap::new();
        for field in &self.required_fields {
            let (value, score) = match select_best(self.candidates(&processed, field)) {
                Some(best) => {
                    let score = best.score().clamp(0.0, 1.0);
                    (best.value, score)
                }
                None => (String::new(), 0.0),
            };
            debug!(field = %field, value = %value, confidence = score, "Field selected");
            values.insert(field.clone(), value);
            scores.insert(field.clone(), score);
        }
        confidence::fill_unscored(&values, &mut scores);
        let overall = confidence::overall_confidence(&scores);

        let (method, features) = match self.tier {
            ExtractionTier::Basic => (ExtractionMethod::Basic, None),
            ExtractionTier::Ensemble => (
                ExtractionMethod::Ensemble,
                Some(features::compute(&processed, &self.library)),
            ),
        };

        ExtractionResult {
            fields: values,
            confidence: scores,
            line_items: line_items::parse_line_items(text),
            overall_confidence: overall,
            method,
            timestamp: timestamp.to_string(),
            model_version: None,
            review_fields: Vec::new(),
            error: None,
            features,
        }
    }
}

/// Highest score wins; ties keep the earliest candidate.
fn select_best(candidates: Vec<FieldCandidate>) -> Option<FieldCandidate> {
    let mut best: Option<FieldCandidate> = None;
    for candidate in candidates {
        if best.as_ref().is_none_or(|b| candidate.score() > b.score()) {
            best = Some(candidate);
        }
    }
    best
}
