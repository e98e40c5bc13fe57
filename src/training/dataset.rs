// src/training/dataset.rs

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::store::CorrectionRecord;

/// Hash buckets for the word and trigram bag.
pub const EMBEDDING_BUCKETS: usize = 256;

/// Bag buckets followed by value length, emptiness flag and field-name length.
pub const FEATURE_DIM: usize = EMBEDDING_BUCKETS + 3;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub field_name: String,
    pub original_value: String,
    pub features: Vec<f64>,
    /// `true` when the human changed the value.
    pub label: bool,
}

/// One example per correction, in log order.
pub fn build_examples(records: &[CorrectionRecord]) -> Vec<TrainingExample> {
    records
        .iter()
        .map(|r| {
            let c = &r.correction;
            TrainingExample {
                field_name: c.field_name.clone(),
                original_value: c.original_value.clone(),
                features: embed(&c.field_name, &c.original_value),
                label: c.corrected_value != c.original_value,
            }
        })
        .collect()
}

/// Feature vector for a `(field, value)` pair.
pub fn embed(field: &str, value: &str) -> Vec<f64> {
    let mut v = vec![0.0; FEATURE_DIM];
    let text = format!("{field} {value}").to_lowercase();

    for word in text.split_whitespace() {
        v[bucket(word.as_bytes())] += 1.0;
    }
    let chars: Vec<char> = text.chars().collect();
    for window in chars.windows(3) {
        let gram: String = window.iter().collect();
        v[bucket(gram.as_bytes())] += 1.0;
    }

    let norm = v[..EMBEDDING_BUCKETS].iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in &mut v[..EMBEDDING_BUCKETS] {
            *x /= norm;
        }
    }

    let value_len = value.chars().count() as f64;
    v[EMBEDDING_BUCKETS] = value_len / 50.0;
    v[EMBEDDING_BUCKETS + 1] = if value.trim().is_empty() { 1.0 } else { 0.0 };
    v[EMBEDDING_BUCKETS + 2] = field.chars().count() as f64 / 20.0;
    v
}

fn bucket(bytes: &[u8]) -> usize {
    let hash = bytes.iter().fold(FNV_OFFSET, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    });
    (hash % EMBEDDING_BUCKETS as u64) as usize
}

/// Seeded shuffle, then split off `holdout_fraction` for evaluation.
///
/// With two or more examples both sides get at least one.
pub fn split<T>(mut examples: Vec<T>, holdout_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    examples.shuffle(&mut rng);

    let total = examples.len();
    let mut holdout = ((total as f64) * holdout_fraction).round() as usize;
    if total >= 2 {
        holdout = holdout.clamp(1, total - 1);
    } else {
        holdout = 0;
    }
    let held = examples.split_off(total - holdout);

    debug!(train = examples.len(), holdout = held.len(), "Dataset split");
    (examples, held)
}
