//! facegate-core — Face detection, cropping and recognition primitives.
//!
//! Detection uses the SeetaFace cascade (via `rustface`); recognition uses
//! local binary pattern histograms. Both sit behind capability traits so the
//! engine can run against any backend.

pub mod classifier;
pub mod crop;
pub mod detector;
pub mod lbph;
pub mod model;
pub mod types;

pub use classifier::{Classifier, ClassifierError, ClassifierState, Prediction, Predictor};
pub use crop::crop_face;
pub use detector::{DetectorError, DetectorParams, FaceDetector, SeetaDetector};
pub use image::GrayImage;
pub use lbph::{LbphClassifier, LbphParams};
pub use model::{LabelEntry, Model, ModelError};
pub use types::BoundingBox;
