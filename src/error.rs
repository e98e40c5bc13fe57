// src/error.rs
//
// Extraction and validation never surface these to callers; failures there
// are encoded in the returned `ExtractionResult` / `ValidationReport`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Pattern library error: {0}")]
    Patterns(#[from] PatternError),
}

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Failed to parse pattern library: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid pattern for field `{field}` (priority {priority}): {source}")]
    Regex {
        field: String,
        priority: u32,
        #[source]
        source: regex::Error,
    },

    #[error("Pattern for field `{field}` (priority {priority}) has no capture group")]
    NoCapture { field: String, priority: u32 },

    #[error("Pattern library has no matchers")]
    Empty,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown extraction id: {0}")]
    UnknownExtraction(String),
}

#[derive(Error, Debug)]
pub enum RetrainError {
    #[error("Not enough training samples. Need at least {required}, got {actual}")]
    InsufficientTrainingData { required: usize, actual: usize },

    #[error("A retraining run is already in progress")]
    AlreadyRunning,

    #[error("Failed to write model artifact {version}: {source}")]
    ArtifactWrite {
        version: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fit classifier: {0}")]
    Fit(String),

    #[error("Failed to serialize model: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Correction store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Model artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed model artifact: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown model version: {0}")]
    UnknownVersion(String),
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
