// src/training/artifact.rs

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::{info, warn};

use super::classifier::ModelPayload;
use crate::error::{ArtifactError, RetrainError};

const FILE_PREFIX: &str = "invoice_model_";

/// Length of `vYYYYMMDD_HHMMSS_mmm`.
const VERSION_BASE_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub accuracy: f64,
    pub training_samples: usize,
    pub created_at: String,
    pub payload: ModelPayload,
}

/// Everything about an artifact except its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: String,
    pub accuracy: f64,
    pub training_samples: usize,
    pub created_at: String,
    pub path: String,
}

impl ModelArtifact {
    fn metadata(&self, path: &Path) -> ModelMetadata {
        ModelMetadata {
            version: self.version.clone(),
            accuracy: self.accuracy,
            training_samples: self.training_samples,
            created_at: self.created_at.clone(),
            path: path.display().to_string(),
        }
    }
}

/// Directory of artifacts plus an in-memory index ordered by version.
///
/// Readers take the shared lock; `publish` and `retract` write.
#[derive(Debug)]
pub struct ModelRegistry {
    dir: PathBuf,
    index: RwLock<Vec<ModelMetadata>>,
}

impl ModelRegistry {
    /// Open (creating if needed) a models directory and index what is already there.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut index = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"));
            if !is_artifact {
                continue;
            }
            match read_artifact(&path) {
                Ok(artifact) => index.push(artifact.metadata(&path)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable model artifact"),
            }
        }
        index.sort_by(|a, b| version_key(&a.version).cmp(&version_key(&b.version)));

        info!(dir = %dir.display(), models = index.len(), "Model registry opened");
        Ok(Self {
            dir,
            index: RwLock::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn latest(&self) -> Option<ModelMetadata> {
        self.read_index().last().cloned()
    }

    pub fn history(&self) -> Vec<ModelMetadata> {
        self.read_index().clone()
    }

    /// Version string for an artifact created at `now`, strictly after the latest one.
    pub fn next_version(&self, now: OffsetDateTime) -> String {
        let fmt = format_description!("[year][month][day]_[hour][minute][second]_[subsecond digits:3]");
        let now = now.to_offset(UtcOffset::UTC);
        let candidate = match now.format(&fmt) {
            Ok(stamp) => format!("v{stamp}"),
            Err(_) => format!("v{}", now.unix_timestamp()),
        };

        match self.latest() {
            Some(latest) if version_key(&candidate) <= version_key(&latest.version) => {
                let (base, n) = version_key(&latest.version);
                format!("{base}_{}", n + 1)
            }
            _ => candidate,
        }
    }

    /// Write a new artifact file and append it to the index. Never overwrites.
    pub fn publish(&self, artifact: &ModelArtifact) -> Result<ModelMetadata, RetrainError> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let path = self.dir.join(format!("{FILE_PREFIX}{}.json", artifact.version));
        let bytes = serde_json::to_vec_pretty(artifact)?;

        let write_failed = |source| RetrainError::ArtifactWrite {
            version: artifact.version.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(write_failed)?;
        if let Err(e) = file.write_all(&bytes).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(write_failed(e));
        }

        let meta = artifact.metadata(&path);
        index.push(meta.clone());
        info!(version = %meta.version, path = %meta.path, "Model artifact written");
        Ok(meta)
    }

    /// Withdraw an artifact that was published but never recorded anywhere else.
    /// Returns whether `version` was indexed.
    pub fn retract(&self, version: &str) -> bool {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = index.iter().rposition(|m| m.version == version) else {
            return false;
        };
        let meta = index.remove(pos);
        if let Err(e) = fs::remove_file(&meta.path) {
            warn!(path = %meta.path, error = %e, "Retracted model artifact could not be removed");
        }
        info!(version = %meta.version, "Model artifact retracted");
        true
    }

    pub fn load(&self, version: &str) -> Result<ModelArtifact, ArtifactError> {
        let path = self
            .read_index()
            .iter()
            .find(|m| m.version == version)
            .map(|m| PathBuf::from(&m.path))
            .ok_or_else(|| ArtifactError::UnknownVersion(version.to_string()))?;
        read_artifact(&path)
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, Vec<ModelMetadata>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_artifact(path: &Path) -> Result<ModelArtifact, ArtifactError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Ordering key: timestamp base plus numeric bump suffix (0 when absent).
fn version_key(version: &str) -> (&str, u32) {
    let suffix = version
        .get(VERSION_BASE_LEN..)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|n| n.parse::<u32>().ok());
    match suffix {
        Some(n) => (&version[..VERSION_BASE_LEN], n),
        None => (version, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn artifact(version: &str) -> ModelArtifact {
        ModelArtifact {
            version: version.to_string(),
            accuracy: 0.75,
            training_samples: 8,
            created_at: "2024-01-15T09:30:00Z".into(),
            payload: ModelPayload::Majority { positive_rate: 0.25 },
        }
    }

    #[test]
    fn test_version_format_and_bump() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let now = datetime!(2024-01-15 09:30:00.123 UTC);

        let v1 = registry.next_version(now);
        assert_eq!(v1, "v20240115_093000_123");
        registry.publish(&artifact(&v1)).unwrap();

        let v2 = registry.next_version(now);
        assert_eq!(v2, "v20240115_093000_123_1");
        registry.publish(&artifact(&v2)).unwrap();

        // a clock that went backwards still yields a later version
        let v3 = registry.next_version(datetime!(2023-12-31 00:00:00 UTC));
        assert_eq!(v3, "v20240115_093000_123_2");
    }

    #[test]
    fn test_suffix_ordering_is_numeric() {
        assert!(version_key("v20240115_093000_123_10") > version_key("v20240115_093000_123_9"));
        assert!(version_key("v20240115_093000_124") > version_key("v20240115_093000_123_9"));
    }

    #[test]
    fn test_publish_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        registry.publish(&artifact("v20240115_093000_000")).unwrap();

        let mut again = artifact("v20240115_093000_000");
        again.accuracy = 0.1;
        let err = registry.publish(&again).unwrap_err();
        assert!(matches!(err, RetrainError::ArtifactWrite { .. }));

        assert_eq!(registry.history().len(), 1);
        let kept = registry.load("v20240115_093000_000").unwrap();
        assert_eq!(kept.accuracy, 0.75);
    }

    #[test]
    fn test_reopen_discovers_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = ModelRegistry::open(dir.path()).unwrap();
            registry.publish(&artifact("v20240115_093000_000")).unwrap();
            registry.publish(&artifact("v20240116_093000_000")).unwrap();
        }
        fs::write(dir.path().join("invoice_model_broken.json"), "{").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = ModelRegistry::open(dir.path()).unwrap();
        assert_eq!(registry.history().len(), 2);
        assert_eq!(registry.latest().unwrap().version, "v20240116_093000_000");
        assert_eq!(registry.load("v20240116_093000_000").unwrap(), artifact("v20240116_093000_000"));
        assert!(matches!(
            registry.load("v1"),
            Err(ArtifactError::UnknownVersion(_))
        ));
    }

    #[test]
    fn test_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path().join("nested")).unwrap();
        assert!(registry.latest().is_none());
        assert!(registry.history().is_empty());
    }

    #[test]
    fn test_retract_removes_index_entry_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let kept = registry.publish(&artifact("v20240115_093000_000")).unwrap();
        let dropped = registry.publish(&artifact("v20240116_093000_000")).unwrap();

        assert!(registry.retract(&dropped.version));
        assert!(!Path::new(&dropped.path).exists());
        assert!(Path::new(&kept.path).exists());
        assert_eq!(registry.latest().unwrap().version, kept.version);
        assert!(!registry.retract(&dropped.version));

        let reopened = ModelRegistry::open(dir.path()).unwrap();
        assert_eq!(reopened.history(), vec![kept]);
    }
}
