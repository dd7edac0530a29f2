//! SeetaFace frontal face detector via `rustface`.
//!
//! Wraps the funnel-structured cascade behind the [`FaceDetector`] trait so
//! sessions can be driven by any detection backend.

use crate::types::BoundingBox;
use image::GrayImage;
use rustface::ImageData;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SEETA_MIN_FACE_SIZE: u32 = 40;
/// rustface panics below this window size.
const SEETA_SMALLEST_FACE_SIZE: u32 = 20;
const SEETA_SCORE_THRESHOLD: f64 = 2.0;
const SEETA_PYRAMID_SCALE_FACTOR: f32 = 0.8;
const SEETA_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download seeta_fd_frontal_v1.0.bin from the rustface repository")]
    ModelNotFound(String),
    #[error("failed to load detector model: {0}")]
    LoadFailed(String),
    #[error("detection failed: {0}")]
    DetectionFailed(String),
}

/// Capability: locate faces in a grayscale frame.
pub trait FaceDetector {
    /// Detect faces, returning bounding boxes sorted by confidence (best first).
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

impl<T: FaceDetector + ?Sized> FaceDetector for Box<T> {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        (**self).detect(frame)
    }
}

/// Cascade tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub min_face_size: u32,
    pub score_threshold: f64,
    pub pyramid_scale_factor: f32,
    pub window_step: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            min_face_size: SEETA_MIN_FACE_SIZE,
            score_threshold: SEETA_SCORE_THRESHOLD,
            pyramid_scale_factor: SEETA_PYRAMID_SCALE_FACTOR,
            window_step: SEETA_WINDOW_STEP,
        }
    }
}

/// SeetaFace-based face detector.
pub struct SeetaDetector {
    inner: Box<dyn rustface::Detector>,
    params: DetectorParams,
}

impl SeetaDetector {
    /// Load the SeetaFace cascade model from the given path.
    pub fn load(model_path: &str, params: DetectorParams) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let mut inner = rustface::create_detector(model_path)
            .map_err(|e| DetectorError::LoadFailed(format!("{model_path}: {e}")))?;

        let params = DetectorParams {
            min_face_size: params.min_face_size.max(SEETA_SMALLEST_FACE_SIZE),
            ..params
        };
        inner.set_min_face_size(params.min_face_size);
        inner.set_score_thresh(params.score_threshold);
        inner.set_pyramid_scale_factor(params.pyramid_scale_factor);
        inner.set_slide_window_step(params.window_step, params.window_step);

        tracing::info!(
            path = model_path,
            min_face_size = params.min_face_size,
            score_threshold = params.score_threshold,
            "loaded SeetaFace detector"
        );

        Ok(Self { inner, params })
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (width, height) = frame.dimensions();
        // A frame smaller than the minimum window cannot contain a face,
        // and rustface rejects degenerate images by panicking.
        if width < self.params.min_face_size || height < self.params.min_face_size {
            return Ok(Vec::new());
        }

        let mut data = ImageData::new(frame.as_raw(), width, height);
        let mut faces: Vec<BoundingBox> = self
            .inner
            .detect(&mut data)
            .into_iter()
            .map(|face| {
                let bbox = face.bbox();
                BoundingBox {
                    x: bbox.x() as f32,
                    y: bbox.y() as f32,
                    width: bbox.width() as f32,
                    height: bbox.height() as f32,
                    confidence: face.score() as f32,
                }
            })
            .collect();

        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::trace!(count = faces.len(), "faces detected");
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = DetectorParams::default();
        assert_eq!(params.min_face_size, SEETA_MIN_FACE_SIZE);
        assert!(params.min_face_size >= SEETA_SMALLEST_FACE_SIZE);
        assert!(params.pyramid_scale_factor > 0.0 && params.pyramid_scale_factor < 1.0);
    }

    #[test]
    fn test_load_missing_model() {
        let result = SeetaDetector::load("/nonexistent/seeta.bin", DetectorParams::default());
        assert!(matches!(result, Err(DetectorError::ModelNotFound(_))));
    }

    struct Fixed(Vec<BoundingBox>);

    impl FaceDetector for Fixed {
        fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_boxed_detector_delegates() {
        let mut boxed: Box<dyn FaceDetector> =
            Box::new(Fixed(vec![BoundingBox::new(1.0, 2.0, 3.0, 4.0, 0.5)]));
        let faces = boxed.detect(&GrayImage::new(8, 8)).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].x, 1.0);
    }
}
