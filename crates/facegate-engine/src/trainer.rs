//! Build a [`Model`] from everything in the dataset.

use crate::session::{SessionBusy, SessionKind, SessionLock};
use crate::store::{DatasetStore, StoreError};
use facegate_core::{Classifier, ClassifierError, GrayImage, LabelEntry, Model, ModelError};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Busy(#[from] SessionBusy),
    #[error("dataset has no usable samples, enroll at least one identity first")]
    EmptyDataset,
    #[error("identity id {0} appears more than once in the dataset")]
    DuplicateIdentity(u32),
    #[error("training failed: {0}")]
    Backend(#[source] ClassifierError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Trains a classifier over the dataset and assembles the label set.
pub struct ModelTrainer<'a, C: ?Sized> {
    store: &'a DatasetStore,
    classifier: &'a C,
}

impl<'a, C: Classifier + ?Sized> ModelTrainer<'a, C> {
    pub fn new(store: &'a DatasetStore, classifier: &'a C) -> Self {
        Self { store, classifier }
    }

    /// Train on every readable sample.
    ///
    /// Identities are visited in ascending id order; the n-th identity that
    /// contributes samples gets label `n`, and `label_set[n]` records it.
    /// Identities without usable samples are left out. Samples smaller than
    /// the classifier's minimum face size are skipped like unreadable ones.
    pub fn train(&self) -> Result<Model, TrainError> {
        let identities = self.store.list_identities()?;
        if let Some(pair) = identities
            .windows(2)
            .find(|w| w[0].identity_id == w[1].identity_id)
        {
            return Err(TrainError::DuplicateIdentity(pair[0].identity_id));
        }

        let mut faces: Vec<GrayImage> = Vec::new();
        let mut labels: Vec<usize> = Vec::new();
        let mut label_set: Vec<LabelEntry> = Vec::new();
        let (min_w, min_h) = self.classifier.min_face_size();

        for identity in &identities {
            let label = label_set.len();
            let mut loaded = 0usize;

            for sample in self.store.list_samples(identity.identity_id)? {
                match sample.load_image() {
                    Ok(image) if image.width() < min_w || image.height() < min_h => tracing::warn!(
                        identity = %identity,
                        path = %sample.path.display(),
                        width = image.width(),
                        height = image.height(),
                        "skipping sample smaller than the classifier accepts"
                    ),
                    Ok(image) => {
                        faces.push(image);
                        labels.push(label);
                        loaded += 1;
                    }
                    Err(e) => tracing::warn!(
                        identity = %identity,
                        path = %sample.path.display(),
                        error = %e,
                        "skipping unreadable sample"
                    ),
                }
            }

            if loaded == 0 {
                tracing::info!(identity = %identity, "identity has no samples, left out of model");
                continue;
            }
            tracing::debug!(identity = %identity, label, samples = loaded, "identity labelled");
            label_set.push(LabelEntry {
                identity_id: identity.identity_id,
                display_name: identity.display_name.clone(),
            });
        }

        if faces.is_empty() {
            return Err(TrainError::EmptyDataset);
        }

        let started = std::time::Instant::now();
        let state = self
            .classifier
            .train(&faces, &labels)
            .map_err(TrainError::Backend)?;
        let model = Model::new(label_set, state)?;

        tracing::info!(
            identities = model.label_set.len(),
            samples = faces.len(),
            backend = %model.classifier.backend,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model trained"
        );
        Ok(model)
    }

    /// Hold the session lock, train, and atomically replace the artifact at
    /// `path`. A failed run leaves any previous artifact in place.
    pub fn train_and_persist(&self, lock: &SessionLock, path: &Path) -> Result<Model, TrainError> {
        let _ticket = lock.acquire(SessionKind::Training)?;
        let model = self.train()?;
        model.persist(path)?;
        Ok(model)
    }
}
