//! Enrollment session: capture face samples for one identity.
//!
//! ```text
//! Init ──connect──▶ Connecting ──▶ Capturing ──tick*──▶ Complete
//!                        │              │      └──────▶ Cancelled
//!                        └──────────────┴─────────────▶ Failed
//! ```
//!
//! Samples are written one at a time as they are captured, so whatever was
//! stored before a failure or cancellation stays in the dataset.

use crate::session::{CancelToken, SessionError, SessionKind, SessionLock, SessionTicket};
use crate::store::{DatasetStore, Identity, Sample};
use facegate_core::{crop_face, FaceDetector};
use facegate_hw::{CameraError, VideoSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Init,
    Connecting,
    Capturing,
    Complete,
    Failed,
    Cancelled,
}

impl EnrollmentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

pub struct EnrollmentSession<'a, S, D: ?Sized> {
    ticket: SessionTicket,
    store: &'a DatasetStore,
    detector: &'a mut D,
    identity: Identity,
    source: Option<S>,
    target: usize,
    min_face: (u32, u32),
    samples: Vec<Sample>,
    frames: u64,
    state: EnrollmentState,
    cancel: CancelToken,
}

impl<'a, S: VideoSource, D: FaceDetector + ?Sized> EnrollmentSession<'a, S, D> {
    /// Claim the session lock and prepare to capture `target` samples for
    /// `identity`, which must already exist in `store`.
    pub fn begin(
        lock: &SessionLock,
        store: &'a DatasetStore,
        detector: &'a mut D,
        identity: Identity,
        target: usize,
        cancel: CancelToken,
    ) -> Result<Self, SessionError> {
        let ticket = lock.acquire(SessionKind::Enrollment)?;
        Ok(Self::with_ticket(ticket, store, detector, identity, target, cancel))
    }

    /// Like [`Self::begin`], for a caller that already holds an
    /// enrollment ticket.
    pub fn with_ticket(
        ticket: SessionTicket,
        store: &'a DatasetStore,
        detector: &'a mut D,
        identity: Identity,
        target: usize,
        cancel: CancelToken,
    ) -> Self {
        tracing::info!(identity = %identity, target, "enrollment session started");
        Self {
            ticket,
            store,
            detector,
            identity,
            source: None,
            target,
            min_face: (1, 1),
            samples: Vec::new(),
            frames: 0,
            state: EnrollmentState::Init,
            cancel,
        }
    }

    /// Crops narrower or shorter than this are not stored.
    pub fn with_min_face_size(mut self, width: u32, height: u32) -> Self {
        self.min_face = (width, height);
        self
    }

    /// Open the video source. On failure the session ends in `Failed`.
    pub fn connect(
        &mut self,
        open: impl FnOnce() -> Result<S, CameraError>,
    ) -> Result<(), SessionError> {
        match self.state {
            EnrollmentState::Init => {}
            s if s.is_terminal() => return Err(SessionError::Finished),
            _ => return Err(SessionError::AlreadyConnected),
        }

        self.state = EnrollmentState::Connecting;
        match open() {
            Ok(source) => {
                self.source = Some(source);
                self.state = EnrollmentState::Capturing;
                tracing::debug!(identity = %self.identity, "enrollment source connected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(identity = %self.identity, error = %e, "enrollment source unavailable");
                self.finish(EnrollmentState::Failed);
                Err(SessionError::SourceUnavailable(e))
            }
        }
    }

    /// Process one frame. Returns the state after the tick; an error means
    /// the session has moved to `Failed`.
    pub fn tick(&mut self) -> Result<EnrollmentState, SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::Finished);
        }
        if self.state != EnrollmentState::Capturing {
            return Err(SessionError::NotConnected);
        }

        if self.cancel.is_cancelled() {
            tracing::info!(
                identity = %self.identity,
                captured = self.samples.len(),
                "enrollment cancelled"
            );
            self.finish(EnrollmentState::Cancelled);
            return Ok(self.state);
        }

        if let Err(e) = self.capture() {
            tracing::warn!(
                identity = %self.identity,
                captured = self.samples.len(),
                error = %e,
                "enrollment failed"
            );
            self.finish(EnrollmentState::Failed);
            return Err(e);
        }

        if self.samples.len() >= self.target {
            tracing::info!(
                identity = %self.identity,
                captured = self.samples.len(),
                frames = self.frames,
                "enrollment complete"
            );
            self.finish(EnrollmentState::Complete);
        }
        Ok(self.state)
    }

    /// Tick until a terminal state.
    pub fn run(&mut self) -> Result<EnrollmentState, SessionError> {
        loop {
            let state = self.tick()?;
            if state.is_terminal() {
                return Ok(state);
            }
        }
    }

    pub fn state(&self) -> EnrollmentState {
        self.state
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn captured(&self) -> usize {
        self.samples.len()
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    fn capture(&mut self) -> Result<(), SessionError> {
        let source = self.source.as_mut().ok_or(SessionError::NotConnected)?;
        let frame = source.read_frame().map_err(SessionError::FrameRead)?;
        self.frames += 1;

        if frame.is_dark() {
            tracing::debug!(sequence = frame.sequence, "dark frame skipped");
            return Ok(());
        }

        let faces = self.detector.detect(&frame.image)?;
        tracing::trace!(sequence = frame.sequence, faces = faces.len(), "frame processed");

        for face in &faces {
            if self.samples.len() >= self.target {
                break;
            }
            let Some(crop) = crop_face(&frame.image, face) else {
                continue;
            };
            let (min_w, min_h) = self.min_face;
            if crop.width() < min_w || crop.height() < min_h {
                tracing::debug!(
                    sequence = frame.sequence,
                    width = crop.width(),
                    height = crop.height(),
                    "face crop too small, not stored"
                );
                continue;
            }
            let sample = self.store.append_sample(&self.identity, &crop)?;
            tracing::debug!(
                identity_id = self.identity.identity_id,
                sequence_no = sample.sequence_no,
                captured = self.samples.len() + 1,
                target = self.target,
                "sample captured"
            );
            self.samples.push(sample);
        }
        Ok(())
    }

    fn finish(&mut self, state: EnrollmentState) {
        self.state = state;
        self.source = None;
        self.ticket.release();
    }
}
