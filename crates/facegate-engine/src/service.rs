//! `FaceGate`: the operations a front end drives.
//!
//! Owns the dataset, access log, session lock and the detector/classifier
//! backends, and wires them into enrollment, training and recognition.

use crate::access_log::{AccessLog, AccessLogEntry, AccessLogError};
use crate::config::Config;
use crate::enrollment::{EnrollmentSession, EnrollmentState};
use crate::recognition::{RecognitionMatch, RecognitionSession, RecognitionState};
use crate::session::{CancelToken, SessionBusy, SessionError, SessionKind, SessionLock};
use crate::store::{DatasetStore, Identity, StoreError};
use crate::trainer::{ModelTrainer, TrainError};
use facegate_core::{Classifier, FaceDetector, Model, ModelError};
use facegate_hw::{CameraError, VideoSource};
use thiserror::Error;

/// Advisory lock file in the dataset root, shared by every process using it.
pub const LOCK_FILE_NAME: &str = ".facegate.lock";

/// Errors from dataset maintenance (rename, delete).
#[derive(Error, Debug)]
pub enum ManageError {
    #[error(transparent)]
    Busy(#[from] SessionBusy),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not invalidate trained model: {0}")]
    Model(#[from] ModelError),
}

/// Outcome of [`FaceGate::enroll`].
#[derive(Debug)]
pub struct EnrollmentReport {
    pub identity: Identity,
    pub state: EnrollmentState,
    /// Samples written by this session.
    pub captured: usize,
    /// Samples on disk for the identity after the session.
    pub total_samples: usize,
    /// Model retrained after a completed enrollment, if enabled.
    pub model: Option<Model>,
}

/// Outcome of [`FaceGate::recognize`].
#[derive(Debug)]
pub struct RecognitionReport {
    pub state: RecognitionState,
    pub matched: Option<RecognitionMatch>,
    pub frames: u64,
}

pub struct FaceGate<D, C> {
    config: Config,
    store: DatasetStore,
    access_log: AccessLog,
    lock: SessionLock,
    detector: D,
    classifier: C,
}

impl<D, C: Classifier> FaceGate<D, C> {
    /// Maintenance and training need no detector; pass `()` when only those
    /// are used. The session lock is backed by [`LOCK_FILE_NAME`] in the
    /// dataset root, so gates in other processes are excluded too.
    pub fn new(config: Config, detector: D, classifier: C) -> Result<Self, StoreError> {
        let store = DatasetStore::open(config.dataset_dir())?;
        let lock = SessionLock::with_lock_file(store.root().join(LOCK_FILE_NAME));
        let access_log = AccessLog::new(config.access_log_path());
        tracing::debug!(
            dataset = %store.root().display(),
            model = %config.model_path().display(),
            access_log = %access_log.path().display(),
            "facegate ready"
        );
        Ok(Self {
            config,
            store,
            access_log,
            lock,
            detector,
            classifier,
        })
    }

    /// Replace the session lock, e.g. to share one with other components in
    /// the process.
    pub fn with_lock(mut self, lock: SessionLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.access_log
    }

    pub fn lock(&self) -> &SessionLock {
        &self.lock
    }

    /// Retrain from the full dataset and replace the model artifact.
    pub fn train(&self) -> Result<Model, TrainError> {
        ModelTrainer::new(&self.store, &self.classifier)
            .train_and_persist(&self.lock, &self.config.model_path())
    }

    pub fn list_identities(&self) -> Result<Vec<(Identity, usize)>, StoreError> {
        self.store
            .list_identities()?
            .into_iter()
            .map(|identity| {
                let count = self.store.sample_count(identity.identity_id)?;
                Ok((identity, count))
            })
            .collect()
    }

    /// Rename an identity. The trained model is invalidated and must be
    /// retrained. Refused while any session is running.
    pub fn rename_identity(&self, identity_id: u32, display_name: &str) -> Result<Identity, ManageError> {
        let _ticket = self.lock.acquire(SessionKind::Maintenance)?;
        let identity = self.store.rename_identity(identity_id, display_name)?;
        Model::remove(&self.config.model_path())?;
        Ok(identity)
    }

    /// Delete an identity and its samples. The trained model is invalidated
    /// and must be retrained. Refused while any session is running.
    pub fn delete_identity(&self, identity_id: u32) -> Result<Identity, ManageError> {
        let _ticket = self.lock.acquire(SessionKind::Maintenance)?;
        let identity = self.store.delete_identity(identity_id)?;
        Model::remove(&self.config.model_path())?;
        Ok(identity)
    }

    pub fn access_entries(&self) -> Result<Vec<AccessLogEntry>, AccessLogError> {
        self.access_log.read_all()
    }
}

impl<D: FaceDetector, C: Classifier> FaceGate<D, C> {
    /// Capture `sample_target` samples for an identity, creating it if
    /// needed. An existing identity with the same name is resumed; new
    /// samples are numbered after the ones already stored. Nothing is
    /// created when the session lock is busy. Face crops smaller than the
    /// classifier accepts are not stored.
    pub fn enroll<S: VideoSource>(
        &mut self,
        identity_id: u32,
        display_name: &str,
        open: impl FnOnce() -> Result<S, CameraError>,
        cancel: &CancelToken,
    ) -> Result<EnrollmentReport, SessionError> {
        let ticket = self.lock.acquire(SessionKind::Enrollment)?;
        let identity = match self.store.create_identity(identity_id, display_name) {
            Ok(identity) => identity,
            Err(StoreError::AlreadyExists(identity)) => {
                tracing::info!(identity = %identity, "resuming enrollment of existing identity");
                identity
            }
            Err(e) => return Err(e.into()),
        };

        let (min_w, min_h) = self.classifier.min_face_size();
        let (state, captured) = {
            let mut session = EnrollmentSession::with_ticket(
                ticket,
                &self.store,
                &mut self.detector,
                identity.clone(),
                self.config.sample_target,
                cancel.clone(),
            )
            .with_min_face_size(min_w, min_h);
            session.connect(open)?;
            let state = session.run()?;
            (state, session.captured())
        };

        let model = if state == EnrollmentState::Complete && self.config.train_after_enroll {
            Some(self.train()?)
        } else {
            None
        };

        Ok(EnrollmentReport {
            total_samples: self.store.sample_count(identity.identity_id)?,
            identity,
            state,
            captured,
            model,
        })
    }

    /// Run recognition until a face is accepted, the token is cancelled or
    /// the source fails.
    pub fn recognize<S: VideoSource>(
        &mut self,
        open: impl FnOnce() -> Result<S, CameraError>,
        cancel: &CancelToken,
    ) -> Result<RecognitionReport, SessionError> {
        let model = Model::load(&self.config.model_path())?;

        let mut session = RecognitionSession::begin(
            &self.lock,
            model,
            &self.classifier,
            &mut self.detector,
            &self.access_log,
            self.config.acceptance_threshold,
            cancel.clone(),
        )?;
        session.connect(open)?;
        let state = session.run()?;

        Ok(RecognitionReport {
            state,
            matched: session.take_match(),
            frames: session.frames(),
        })
    }
}
