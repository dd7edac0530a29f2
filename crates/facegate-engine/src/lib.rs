//! facegate-engine — dataset store, training, and the enrollment and
//! recognition sessions that tie detection and classification to a video
//! source.

pub mod access_log;
pub mod config;
pub mod enrollment;
pub mod recognition;
pub mod service;
pub mod session;
pub mod store;
pub mod trainer;

pub use access_log::{AccessLog, AccessLogEntry, AccessLogError};
pub use config::{Config, ConfigError};
pub use enrollment::{EnrollmentSession, EnrollmentState};
pub use recognition::{RecognitionMatch, RecognitionSession, RecognitionState};
pub use service::{EnrollmentReport, FaceGate, ManageError, RecognitionReport};
pub use session::{CancelToken, SessionBusy, SessionError, SessionKind, SessionLock, SessionTicket};
pub use store::{DatasetStore, Identity, Sample, StoreError};
pub use trainer::{ModelTrainer, TrainError};
