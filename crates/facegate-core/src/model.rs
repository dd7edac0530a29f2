//! Persisted recognition model: classifier state plus the label set it was
//! trained with.
//!
//! The label set is the only way a predicted label is turned back into an
//! identity. It is written in the same artifact as the classifier state and
//! loading refuses artifacts that lack it.

use crate::classifier::ClassifierState;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MODEL_FORMAT_VERSION: u32 = 1;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("no trained model at {0}, enroll at least one identity and train first")]
    NotTrained(PathBuf),
    #[error("model artifact has no label set")]
    MissingLabelSet,
    #[error("classifier emits {classifier} labels but the label set has {label_set} entries")]
    LabelMismatch { classifier: usize, label_set: usize },
    #[error("unsupported model format version {0}")]
    UnsupportedVersion(u32),
    #[error("malformed model artifact: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("model i/o: {0}")]
    Io(#[from] io::Error),
}

/// One label-set position: the identity a classifier label stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub identity_id: u32,
    /// Display name at training time.
    pub display_name: String,
}

/// A trained recognition model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    pub format_version: u32,
    pub trained_at: String,
    /// Classifier label `i` means `label_set[i]`.
    pub label_set: Vec<LabelEntry>,
    pub classifier: ClassifierState,
}

/// On-disk shape, lenient so that missing fields produce typed errors.
#[derive(Deserialize)]
struct StoredModel {
    format_version: u32,
    #[serde(default)]
    trained_at: String,
    #[serde(default)]
    label_set: Option<Vec<LabelEntry>>,
    classifier: ClassifierState,
}

impl Model {
    /// Assemble a model, checking that every label the classifier can emit
    /// has a label-set entry.
    pub fn new(label_set: Vec<LabelEntry>, classifier: ClassifierState) -> Result<Self, ModelError> {
        let model = Self {
            format_version: MODEL_FORMAT_VERSION,
            trained_at: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            label_set,
            classifier,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.label_set.is_empty() {
            return Err(ModelError::MissingLabelSet);
        }
        if self.classifier.label_count != self.label_set.len() {
            return Err(ModelError::LabelMismatch {
                classifier: self.classifier.label_count,
                label_set: self.label_set.len(),
            });
        }
        Ok(())
    }

    /// Map a classifier label to the identity it was trained for.
    pub fn resolve(&self, label: usize) -> Option<&LabelEntry> {
        self.label_set.get(label)
    }

    pub fn identity_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.label_set.iter().map(|e| e.identity_id)
    }

    /// Write the model to `path`, replacing any previous artifact.
    ///
    /// The document is written to a sibling temp file and renamed into place,
    /// so readers see either the old model or the new one.
    pub fn persist(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer(&mut file, self)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        tracing::info!(
            path = %path.display(),
            labels = self.label_set.len(),
            backend = %self.classifier.backend,
            "model persisted"
        );
        Ok(())
    }

    /// Load and validate a model artifact.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ModelError::NotTrained(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredModel = serde_json::from_slice(&bytes)?;
        if stored.format_version != MODEL_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion(stored.format_version));
        }

        let model = Self {
            format_version: stored.format_version,
            trained_at: stored.trained_at,
            label_set: stored.label_set.ok_or(ModelError::MissingLabelSet)?,
            classifier: stored.classifier,
        };
        model.validate()?;

        tracing::debug!(path = %path.display(), labels = model.label_set.len(), "model loaded");
        Ok(model)
    }

    /// Delete a persisted model. Returns whether an artifact was present.
    pub fn remove(path: &Path) -> Result<bool, ModelError> {
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "model invalidated");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state(label_count: usize) -> ClassifierState {
        ClassifierState {
            backend: "stub".into(),
            label_count,
            data: serde_json::json!({ "weights": [1, 2, 3] }),
        }
    }

    fn labels() -> Vec<LabelEntry> {
        vec![
            LabelEntry { identity_id: 7, display_name: "ada".into() },
            LabelEntry { identity_id: 3, display_name: "bob".into() },
        ]
    }

    #[test]
    fn test_new_rejects_label_mismatch() {
        let err = Model::new(labels(), state(3)).unwrap_err();
        assert!(matches!(err, ModelError::LabelMismatch { classifier: 3, label_set: 2 }));
    }

    #[test]
    fn test_new_rejects_empty_label_set() {
        let err = Model::new(Vec::new(), state(0)).unwrap_err();
        assert!(matches!(err, ModelError::MissingLabelSet));
    }

    #[test]
    fn test_resolve_uses_label_set_order() {
        let model = Model::new(labels(), state(2)).unwrap();
        assert_eq!(model.resolve(0).unwrap().identity_id, 7);
        assert_eq!(model.resolve(1).unwrap().display_name, "bob");
        assert!(model.resolve(2).is_none());
        assert_eq!(model.identity_ids().collect::<Vec<_>>(), vec![7, 3]);
    }

    #[test]
    fn test_persist_then_load_preserves_label_set() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let model = Model::new(labels(), state(2)).unwrap();

        model.persist(&path).unwrap();
        let loaded = Model::load(&path).unwrap();

        assert_eq!(loaded, model);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_missing_file_is_not_trained() {
        let dir = TempDir::new().unwrap();
        let err = Model::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ModelError::NotTrained(_)));
    }

    #[test]
    fn test_load_rejects_artifact_without_label_set() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let doc = serde_json::json!({
            "format_version": MODEL_FORMAT_VERSION,
            "classifier": state(2),
        });
        fs::write(&path, doc.to_string()).unwrap();

        let err = Model::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::MissingLabelSet));
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let doc = serde_json::json!({
            "format_version": 99,
            "label_set": labels(),
            "classifier": state(2),
        });
        fs::write(&path, doc.to_string()).unwrap();

        assert!(matches!(Model::load(&path), Err(ModelError::UnsupportedVersion(99))));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        Model::new(labels(), state(2)).unwrap().persist(&path).unwrap();

        assert!(Model::remove(&path).unwrap());
        assert!(!path.exists());
        assert!(!Model::remove(&path).unwrap());
    }
}
