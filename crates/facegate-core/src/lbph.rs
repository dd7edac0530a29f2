//! Local Binary Pattern Histogram (LBPH) face classifier.
//!
//! Each face crop is encoded as a grid of normalised LBP histograms.
//! Prediction returns the label of the nearest training histogram under
//! the symmetric chi-square distance.

use crate::classifier::{
    check_training_input, Classifier, ClassifierError, ClassifierState, Prediction, Predictor,
};
use image::GrayImage;
use serde::{Deserialize, Serialize};

pub const LBPH_BACKEND: &str = "lbph";

// --- Named constants ---
const LBPH_RADIUS: u32 = 1;
const LBPH_NEIGHBORS: u32 = 8;
const LBPH_GRID_X: u32 = 8;
const LBPH_GRID_Y: u32 = 8;
/// Largest supported neighbour count; histogram size is `2^neighbors`.
const LBPH_MAX_NEIGHBORS: u32 = 16;
const LBPH_EPSILON: f32 = f32::EPSILON;
/// Interpolated samples within this of the centre count as equal.
const LBPH_SAMPLE_TOLERANCE: f32 = 1e-3;

/// Encoder parameters. Stored with the trained state so prediction always
/// encodes queries exactly like the training set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: LBPH_RADIUS,
            neighbors: LBPH_NEIGHBORS,
            grid_x: LBPH_GRID_X,
            grid_y: LBPH_GRID_Y,
        }
    }
}

impl LbphParams {
    fn bins(&self) -> usize {
        1usize << self.neighbors
    }

    fn validate(&self) -> Result<(), ClassifierError> {
        if self.radius == 0
            || self.neighbors == 0
            || self.neighbors > LBPH_MAX_NEIGHBORS
            || self.grid_x == 0
            || self.grid_y == 0
        {
            return Err(ClassifierError::Backend(format!("invalid LBPH parameters: {self:?}")));
        }
        Ok(())
    }

    /// Smallest crop that yields at least one LBP pixel per grid cell.
    pub fn min_size(&self) -> (u32, u32) {
        (2 * self.radius + self.grid_x, 2 * self.radius + self.grid_y)
    }
}

/// Trained payload stored in [`ClassifierState::data`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LbphModel {
    params: LbphParams,
    histograms: Vec<Vec<f32>>,
    labels: Vec<usize>,
}

/// LBPH classifier backend.
#[derive(Debug, Clone, Default)]
pub struct LbphClassifier {
    params: LbphParams,
}

impl LbphClassifier {
    pub fn new(params: LbphParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }
}

impl Classifier for LbphClassifier {
    fn train(&self, faces: &[GrayImage], labels: &[usize]) -> Result<ClassifierState, ClassifierError> {
        self.params.validate()?;
        let label_count = check_training_input(faces, labels)?;

        let histograms = faces
            .iter()
            .map(|face| spatial_histogram(face, &self.params))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            samples = histograms.len(),
            label_count,
            params = ?self.params,
            "LBPH histograms computed"
        );

        let model = LbphModel {
            params: self.params,
            histograms,
            labels: labels.to_vec(),
        };
        let data = serde_json::to_value(&model)
            .map_err(|e| ClassifierError::Backend(format!("serialize LBPH model: {e}")))?;

        Ok(ClassifierState {
            backend: LBPH_BACKEND.to_string(),
            label_count,
            data,
        })
    }

    fn predictor(&self, state: &ClassifierState) -> Result<Box<dyn Predictor>, ClassifierError> {
        if state.backend != LBPH_BACKEND {
            return Err(ClassifierError::WrongBackend {
                expected: LBPH_BACKEND.to_string(),
                found: state.backend.clone(),
            });
        }

        let model = LbphModel::deserialize(&state.data)
            .map_err(|e| ClassifierError::CorruptState(e.to_string()))?;
        model.params.validate()?;

        if model.histograms.len() != model.labels.len() || model.histograms.is_empty() {
            return Err(ClassifierError::CorruptState(format!(
                "{} histograms for {} labels",
                model.histograms.len(),
                model.labels.len()
            )));
        }
        let expected_len = model.params.bins() * (model.params.grid_x * model.params.grid_y) as usize;
        if model.histograms.iter().any(|h| h.len() != expected_len) {
            return Err(ClassifierError::CorruptState(format!(
                "histogram length differs from expected {expected_len}"
            )));
        }

        Ok(Box::new(model))
    }

    fn min_face_size(&self) -> (u32, u32) {
        self.params.min_size()
    }
}

impl Predictor for LbphModel {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, ClassifierError> {
        let query = spatial_histogram(face, &self.params)?;

        let mut best = Prediction {
            label: 0,
            distance: f64::INFINITY,
        };
        for (hist, &label) in self.histograms.iter().zip(&self.labels) {
            let distance = chi_square(hist, &query);
            if distance < best.distance {
                best = Prediction { label, distance };
            }
        }

        Ok(best)
    }
}

/// Extended (circular) LBP with bilinear sampling.
///
/// Output is `(width - 2r) x (height - 2r)` codes, row-major.
fn elbp(face: &GrayImage, radius: u32, neighbors: u32) -> (Vec<u32>, usize, usize) {
    let (width, height) = (face.width() as usize, face.height() as usize);
    let r = radius as usize;
    let out_w = width - 2 * r;
    let out_h = height - 2 * r;
    let src = face.as_raw();
    let mut codes = vec![0u32; out_w * out_h];

    for n in 0..neighbors {
        let angle = 2.0 * std::f32::consts::PI * n as f32 / neighbors as f32;
        let x = radius as f32 * angle.cos();
        let y = -(radius as f32) * angle.sin();

        let fx = x.floor();
        let fy = y.floor();
        let cx = x.ceil();
        let cy = y.ceil();
        let tx = x - fx;
        let ty = y - fy;

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        let (fx, fy, cx, cy) = (fx as isize, fy as isize, cx as isize, cy as isize);
        let at = |row: isize, col: isize| src[row as usize * width + col as usize] as f32;

        for i in r..height - r {
            for j in r..width - r {
                let (row, col) = (i as isize, j as isize);
                let t = w1 * at(row + fy, col + fx)
                    + w2 * at(row + fy, col + cx)
                    + w3 * at(row + cy, col + fx)
                    + w4 * at(row + cy, col + cx);
                let center = at(row, col);
                if t > center || (t - center).abs() < LBPH_SAMPLE_TOLERANCE {
                    codes[(i - r) * out_w + (j - r)] |= 1 << n;
                }
            }
        }
    }

    (codes, out_w, out_h)
}

/// Concatenated per-cell LBP histograms, each normalised to sum to 1.
fn spatial_histogram(face: &GrayImage, params: &LbphParams) -> Result<Vec<f32>, ClassifierError> {
    let (min_w, min_h) = params.min_size();
    if face.width() < min_w || face.height() < min_h {
        return Err(ClassifierError::ImageTooSmall {
            width: face.width(),
            height: face.height(),
        });
    }

    let (codes, width, height) = elbp(face, params.radius, params.neighbors);
    let grid_x = params.grid_x as usize;
    let grid_y = params.grid_y as usize;
    let cell_w = width / grid_x;
    let cell_h = height / grid_y;
    let bins = params.bins();
    let cell_pixels = (cell_w * cell_h) as f32;

    let mut result = vec![0f32; grid_x * grid_y * bins];
    for gy in 0..grid_y {
        for gx in 0..grid_x {
            let offset = (gy * grid_x + gx) * bins;
            let hist = &mut result[offset..offset + bins];
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    hist[codes[y * width + x] as usize] += 1.0;
                }
            }
            for bin in hist.iter_mut() {
                *bin /= cell_pixels;
            }
        }
    }

    Ok(result)
}

/// Symmetric chi-square distance: `sum 2 (a - b)^2 / (a + b)`.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&a, &b)| {
            let sum = (a + b) as f64;
            if sum > LBPH_EPSILON as f64 {
                let diff = (a - b) as f64;
                2.0 * diff * diff / sum
            } else {
                0.0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stripes(size: u32, period: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, _| {
            if (x / period) % 2 == 0 {
                Luma([40])
            } else {
                Luma([210])
            }
        })
    }

    fn checker(size: u32, period: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if ((x / period) + (y / period)) % 2 == 0 {
                Luma([30])
            } else {
                Luma([220])
            }
        })
    }

    #[test]
    fn test_elbp_flat_image_sets_all_bits() {
        // Every neighbour equals the centre, which counts as "not darker".
        let face = GrayImage::from_pixel(5, 5, Luma([100]));
        let (codes, w, h) = elbp(&face, 1, 8);
        assert_eq!((w, h), (3, 3));
        assert!(codes.iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn test_spatial_histogram_cells_normalised() {
        let params = LbphParams::default();
        let hist = spatial_histogram(&checker(50, 3), &params).unwrap();
        assert_eq!(hist.len(), 64 * 256);
        for cell in hist.chunks(256) {
            let sum: f32 = cell.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "cell sums to {sum}");
        }
    }

    #[test]
    fn test_spatial_histogram_rejects_tiny_image() {
        let params = LbphParams::default();
        let err = spatial_histogram(&GrayImage::new(6, 6), &params).unwrap_err();
        assert!(matches!(err, ClassifierError::ImageTooSmall { width: 6, height: 6 }));
    }

    #[test]
    fn test_min_face_size_is_smallest_trainable_crop() {
        let classifier = LbphClassifier::default();
        let (w, h) = classifier.min_face_size();
        assert_eq!((w, h), (10, 10));

        assert!(classifier.train(&[GrayImage::new(w, h)], &[0]).is_ok());
        let err = classifier.train(&[GrayImage::new(w - 1, h)], &[0]).unwrap_err();
        assert!(matches!(err, ClassifierError::ImageTooSmall { .. }));
    }

    #[test]
    fn test_chi_square_identical_is_zero() {
        let a = vec![0.25, 0.25, 0.5, 0.0];
        assert_eq!(chi_square(&a, &a), 0.0);
    }

    #[test]
    fn test_chi_square_disjoint() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((chi_square(&a, &b) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_train_and_predict_nearest_label() {
        let classifier = LbphClassifier::default();
        let faces = vec![stripes(48, 4), stripes(48, 5), checker(48, 4), checker(48, 5)];
        let labels = vec![0, 0, 1, 1];

        let state = classifier.train(&faces, &labels).unwrap();
        assert_eq!(state.backend, LBPH_BACKEND);
        assert_eq!(state.label_count, 2);

        let predictor = classifier.predictor(&state).unwrap();
        let exact = predictor.predict(&checker(48, 4)).unwrap();
        assert_eq!(exact.label, 1);
        assert!(exact.distance < 1e-6);

        let near = predictor.predict(&stripes(48, 4)).unwrap();
        assert_eq!(near.label, 0);
    }

    #[test]
    fn test_train_rejects_empty() {
        let err = LbphClassifier::default().train(&[], &[]).unwrap_err();
        assert!(matches!(err, ClassifierError::NoSamples));
    }

    #[test]
    fn test_predictor_rejects_foreign_backend() {
        let state = ClassifierState {
            backend: "eigen".into(),
            label_count: 1,
            data: serde_json::Value::Null,
        };
        let err = LbphClassifier::default().predictor(&state).err().unwrap();
        assert!(matches!(err, ClassifierError::WrongBackend { .. }));
    }

    #[test]
    fn test_predictor_rejects_corrupt_payload() {
        let state = ClassifierState {
            backend: LBPH_BACKEND.into(),
            label_count: 1,
            data: serde_json::json!({ "params": "nope" }),
        };
        let err = LbphClassifier::default().predictor(&state).err().unwrap();
        assert!(matches!(err, ClassifierError::CorruptState(_)));
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let classifier = LbphClassifier::default();
        let state = classifier.train(&[checker(32, 2)], &[0]).unwrap();
        let text = serde_json::to_string(&state).unwrap();
        let restored: ClassifierState = serde_json::from_str(&text).unwrap();
        let predictor = classifier.predictor(&restored).unwrap();
        assert!(predictor.predict(&checker(32, 2)).unwrap().distance < 1e-6);
    }
}
