//! Recognition session: match live faces against a trained model.
//!
//! Each tick reads one frame, detects faces and classifies every crop. The
//! first face whose distance falls below the acceptance threshold is
//! resolved through the model's label set, written to the access log and
//! ends the session in `Matched`. Faces above the threshold are unknown and
//! the session keeps going until cancelled or the source fails.

use crate::access_log::{AccessLog, AccessLogEntry};
use crate::session::{CancelToken, SessionError, SessionKind, SessionLock, SessionTicket};
use facegate_core::{crop_face, Classifier, ClassifierError, FaceDetector, Model, Predictor};
use facegate_hw::{CameraError, VideoSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionState {
    Init,
    Connecting,
    Capturing,
    Matched,
    Failed,
    Cancelled,
}

impl RecognitionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Matched | Self::Failed | Self::Cancelled)
    }
}

/// An accepted face.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionMatch {
    pub identity_id: u32,
    pub display_name: String,
    pub label: usize,
    pub distance: f64,
    /// Record written to the access log.
    pub entry: AccessLogEntry,
}

pub struct RecognitionSession<'a, S, D: ?Sized> {
    ticket: SessionTicket,
    model: Model,
    predictor: Box<dyn Predictor>,
    detector: &'a mut D,
    access_log: &'a AccessLog,
    threshold: f64,
    source: Option<S>,
    state: RecognitionState,
    cancel: CancelToken,
    frames: u64,
    rejected: u64,
    matched: Option<RecognitionMatch>,
}

impl<'a, S: VideoSource, D: FaceDetector + ?Sized> RecognitionSession<'a, S, D> {
    /// Claim the session lock and restore a predictor from `model`.
    pub fn begin<C: Classifier + ?Sized>(
        lock: &SessionLock,
        model: Model,
        classifier: &C,
        detector: &'a mut D,
        access_log: &'a AccessLog,
        threshold: f64,
        cancel: CancelToken,
    ) -> Result<Self, SessionError> {
        let ticket = lock.acquire(SessionKind::Recognition)?;
        let predictor = classifier.predictor(&model.classifier)?;
        tracing::info!(
            labels = model.label_set.len(),
            threshold,
            trained_at = %model.trained_at,
            "recognition session started"
        );

        Ok(Self {
            ticket,
            model,
            predictor,
            detector,
            access_log,
            threshold,
            source: None,
            state: RecognitionState::Init,
            cancel,
            frames: 0,
            rejected: 0,
            matched: None,
        })
    }

    /// Open the video source. On failure the session ends in `Failed`.
    pub fn connect(
        &mut self,
        open: impl FnOnce() -> Result<S, CameraError>,
    ) -> Result<(), SessionError> {
        match self.state {
            RecognitionState::Init => {}
            s if s.is_terminal() => return Err(SessionError::Finished),
            _ => return Err(SessionError::AlreadyConnected),
        }

        self.state = RecognitionState::Connecting;
        match open() {
            Ok(source) => {
                self.source = Some(source);
                self.state = RecognitionState::Capturing;
                tracing::debug!("recognition source connected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "recognition source unavailable");
                self.finish(RecognitionState::Failed);
                Err(SessionError::SourceUnavailable(e))
            }
        }
    }

    /// Process one frame. Returns the state after the tick; an error means
    /// the session has moved to `Failed`.
    pub fn tick(&mut self) -> Result<RecognitionState, SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::Finished);
        }
        if self.state != RecognitionState::Capturing {
            return Err(SessionError::NotConnected);
        }

        if self.cancel.is_cancelled() {
            tracing::info!(frames = self.frames, rejected = self.rejected, "recognition cancelled");
            self.finish(RecognitionState::Cancelled);
            return Ok(self.state);
        }

        match self.process_frame() {
            Ok(Some(matched)) => {
                tracing::info!(
                    identity_id = matched.identity_id,
                    display_name = %matched.display_name,
                    distance = matched.distance,
                    frames = self.frames,
                    "face recognized"
                );
                self.matched = Some(matched);
                self.finish(RecognitionState::Matched);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(frames = self.frames, error = %e, "recognition failed");
                self.finish(RecognitionState::Failed);
                return Err(e);
            }
        }
        Ok(self.state)
    }

    /// Tick until a terminal state.
    pub fn run(&mut self) -> Result<RecognitionState, SessionError> {
        loop {
            let state = self.tick()?;
            if state.is_terminal() {
                return Ok(state);
            }
        }
    }

    pub fn state(&self) -> RecognitionState {
        self.state
    }

    pub fn matched(&self) -> Option<&RecognitionMatch> {
        self.matched.as_ref()
    }

    pub fn take_match(&mut self) -> Option<RecognitionMatch> {
        self.matched.take()
    }

    /// Frames read so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Faces classified but not accepted.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn process_frame(&mut self) -> Result<Option<RecognitionMatch>, SessionError> {
        let source = self.source.as_mut().ok_or(SessionError::NotConnected)?;
        let frame = source.read_frame().map_err(SessionError::FrameRead)?;
        self.frames += 1;

        if frame.is_dark() {
            tracing::debug!(sequence = frame.sequence, "dark frame skipped");
            return Ok(None);
        }

        let faces = self.detector.detect(&frame.image)?;
        for face in &faces {
            let Some(crop) = crop_face(&frame.image, face) else {
                continue;
            };
            let prediction = match self.predictor.predict(&crop) {
                Ok(p) => p,
                Err(ClassifierError::ImageTooSmall { width, height }) => {
                    tracing::debug!(width, height, "face too small to classify");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if prediction.distance >= self.threshold {
                self.rejected += 1;
                tracing::debug!(
                    label = prediction.label,
                    distance = prediction.distance,
                    threshold = self.threshold,
                    "unknown face"
                );
                continue;
            }

            let identity = self
                .model
                .resolve(prediction.label)
                .ok_or(SessionError::UnknownLabel(prediction.label))?;
            let entry = AccessLogEntry::now(identity.identity_id, identity.display_name.clone());
            self.access_log.append(&entry)?;

            return Ok(Some(RecognitionMatch {
                identity_id: identity.identity_id,
                display_name: identity.display_name.clone(),
                label: prediction.label,
                distance: prediction.distance,
                entry,
            }));
        }
        Ok(None)
    }

    fn finish(&mut self, state: RecognitionState) {
        self.state = state;
        self.source = None;
        self.ticket.release();
    }
}
