//! Classifier capability: train on labelled face crops, predict a label.
//!
//! Labels are dense indices `0..n`. The caller owns the mapping from label
//! to identity (see [`crate::model::Model::label_set`]).

use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("no training samples")]
    NoSamples,
    #[error("sample/label count mismatch: {samples} samples, {labels} labels")]
    LengthMismatch { samples: usize, labels: usize },
    #[error("classifier state was produced by backend {found:?}, expected {expected:?}")]
    WrongBackend { expected: String, found: String },
    #[error("corrupt classifier state: {0}")]
    CorruptState(String),
    #[error("face image too small: {width}x{height}")]
    ImageTooSmall { width: u32, height: u32 },
    #[error("classifier backend failed: {0}")]
    Backend(String),
}

/// Opaque trained artifact produced by a [`Classifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierState {
    /// Backend identifier (e.g., "lbph").
    pub backend: String,
    /// Number of distinct labels the trained classifier can emit (`0..label_count`).
    pub label_count: usize,
    /// Backend-specific payload.
    pub data: serde_json::Value,
}

/// Outcome of classifying one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: usize,
    /// Lower = more confident.
    pub distance: f64,
}

/// A classifier restored from a [`ClassifierState`], ready to predict.
pub trait Predictor {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, ClassifierError>;
}

/// Capability: build a classifier from samples and restore it for prediction.
pub trait Classifier {
    /// Train on `faces[i]` labelled `labels[i]`.
    fn train(&self, faces: &[GrayImage], labels: &[usize]) -> Result<ClassifierState, ClassifierError>;

    /// Restore a predictor from a previously trained state.
    fn predictor(&self, state: &ClassifierState) -> Result<Box<dyn Predictor>, ClassifierError>;

    /// Smallest face crop (width, height) this backend can train on or
    /// classify. Smaller crops fail with [`ClassifierError::ImageTooSmall`].
    fn min_face_size(&self) -> (u32, u32) {
        (1, 1)
    }
}

/// Shared argument validation for [`Classifier::train`] implementations.
///
/// Returns the label count implied by `labels` (max label + 1).
pub fn check_training_input(faces: &[GrayImage], labels: &[usize]) -> Result<usize, ClassifierError> {
    if faces.len() != labels.len() {
        return Err(ClassifierError::LengthMismatch {
            samples: faces.len(),
            labels: labels.len(),
        });
    }
    labels
        .iter()
        .max()
        .map(|max| max + 1)
        .ok_or(ClassifierError::NoSamples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_training_input_empty() {
        assert!(matches!(check_training_input(&[], &[]), Err(ClassifierError::NoSamples)));
    }

    #[test]
    fn test_check_training_input_mismatch() {
        let faces = vec![GrayImage::new(4, 4)];
        let err = check_training_input(&faces, &[0, 1]).unwrap_err();
        assert!(matches!(err, ClassifierError::LengthMismatch { samples: 1, labels: 2 }));
    }

    #[test]
    fn test_check_training_input_label_count() {
        let faces = vec![GrayImage::new(4, 4), GrayImage::new(4, 4), GrayImage::new(4, 4)];
        assert_eq!(check_training_input(&faces, &[0, 2, 1]).unwrap(), 3);
    }
}
