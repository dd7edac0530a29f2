#![allow(dead_code)]

use facegate_core::{
    classifier::check_training_input, BoundingBox, Classifier, ClassifierError, ClassifierState,
    DetectorError, FaceDetector, GrayImage, LabelEntry, Model, Prediction, Predictor,
};
use facegate_engine::Config;
use facegate_hw::{CameraError, Frame, VideoSource};
use image::Luma;
use std::path::Path;

pub const FRAME_SIZE: u32 = 64;

/// Reports the same faces on every frame.
pub struct FixedDetector {
    pub faces: Vec<BoundingBox>,
    pub calls: usize,
}

impl FixedDetector {
    pub fn one_face() -> Self {
        Self::with_faces(vec![BoundingBox::new(8.0, 8.0, 32.0, 32.0, 3.0)])
    }

    pub fn with_faces(faces: Vec<BoundingBox>) -> Self {
        Self { faces, calls: 0 }
    }
}

impl FaceDetector for FixedDetector {
    fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        self.calls += 1;
        Ok(self.faces.clone())
    }
}

/// Predicts one label at one distance for every face.
#[derive(Clone, Copy)]
pub struct FixedClassifier {
    pub label: usize,
    pub distance: f64,
}

impl FixedClassifier {
    pub fn new(label: usize, distance: f64) -> Self {
        Self { label, distance }
    }
}

impl Classifier for FixedClassifier {
    fn train(&self, faces: &[GrayImage], labels: &[usize]) -> Result<ClassifierState, ClassifierError> {
        let label_count = check_training_input(faces, labels)?;
        Ok(ClassifierState {
            backend: "fixed".into(),
            label_count,
            data: serde_json::json!({ "samples": faces.len() }),
        })
    }

    fn predictor(&self, _state: &ClassifierState) -> Result<Box<dyn Predictor>, ClassifierError> {
        Ok(Box::new(*self))
    }
}

impl Predictor for FixedClassifier {
    fn predict(&self, _face: &GrayImage) -> Result<Prediction, ClassifierError> {
        Ok(Prediction {
            label: self.label,
            distance: self.distance,
        })
    }
}

/// Yields `frames` frames of a flat gray level, then fails every read.
pub struct ScriptedSource {
    frames: usize,
    level: u8,
    sequence: u32,
}

impl ScriptedSource {
    pub fn bright(frames: usize) -> Self {
        Self {
            frames,
            level: 160,
            sequence: 0,
        }
    }

    pub fn dark(frames: usize) -> Self {
        Self {
            frames,
            level: 4,
            sequence: 0,
        }
    }
}

impl VideoSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.frames == 0 {
            return Err(CameraError::CaptureFailed("scripted source exhausted".into()));
        }
        self.frames -= 1;
        self.sequence += 1;
        let image = GrayImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Luma([self.level]));
        Ok(Frame::new(image, self.sequence))
    }
}

pub fn config(dir: &Path, sample_target: usize) -> Config {
    Config {
        data_dir: dir.to_path_buf(),
        sample_target,
        ..Config::default()
    }
}

/// Persist a model whose label `i` maps to `people[i]`.
pub fn persist_model(config: &Config, people: &[(u32, &str)]) -> Model {
    let label_set: Vec<LabelEntry> = people
        .iter()
        .map(|&(identity_id, name)| LabelEntry {
            identity_id,
            display_name: name.to_string(),
        })
        .collect();
    let state = ClassifierState {
        backend: "fixed".into(),
        label_count: label_set.len(),
        data: serde_json::Value::Null,
    };
    let model = Model::new(label_set, state).unwrap();
    model.persist(&config.model_path()).unwrap();
    model
}
