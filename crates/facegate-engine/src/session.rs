//! Session lifecycle: single-session lock, tickets, cancellation, errors.
//!
//! Exactly one session (enrollment, recognition, training or a dataset
//! edit) may own the video source, the dataset and the model at a time.
//! [`SessionLock::acquire`] hands out a [`SessionTicket`]; the ticket is
//! released on the session's terminal transition or when it is dropped,
//! whichever comes first.
//!
//! A lock built with [`SessionLock::with_lock_file`] also takes an exclusive
//! advisory lock on that file, so separate processes sharing a dataset
//! exclude each other too. The holder's kind is written into the file.

use crate::access_log::AccessLogError;
use crate::store::StoreError;
use crate::trainer::TrainError;
use facegate_core::{ClassifierError, DetectorError, ModelError};
use facegate_hw::CameraError;
use fs2::FileExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// What an active session is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Enrollment,
    Recognition,
    Training,
    /// Renaming or deleting an identity.
    Maintenance,
}

impl SessionKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Enrollment => "enrollment",
            Self::Recognition => "recognition",
            Self::Training => "training",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Enrollment, Self::Recognition, Self::Training, Self::Maintenance]
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

/// The lock is held elsewhere. `active` is `None` when another process
/// holds it and its kind could not be read.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{}", busy_message(.active))]
pub struct SessionBusy {
    pub active: Option<SessionKind>,
}

fn busy_message(active: &Option<SessionKind>) -> String {
    match active {
        Some(kind) => format!("a {kind} session is already running"),
        None => "another facegate process holds the session lock".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Busy(#[from] SessionBusy),
    #[error("video source unavailable: {0}")]
    SourceUnavailable(#[source] CameraError),
    #[error("frame read failed: {0}")]
    FrameRead(#[source] CameraError),
    #[error("no trained model at {}, enroll identities and run training first", .0.display())]
    ModelNotTrained(PathBuf),
    #[error("model error: {0}")]
    Model(#[source] ModelError),
    #[error("face detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("classifier emitted label {0} which has no identity in the model")]
    UnknownLabel(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("match could not be recorded: {0}")]
    LogWrite(#[from] AccessLogError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error("session is not connected to a video source")]
    NotConnected,
    #[error("session already connected")]
    AlreadyConnected,
    #[error("session already finished")]
    Finished,
}

impl From<ModelError> for SessionError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::NotTrained(path) => Self::ModelNotTrained(path),
            other => Self::Model(other),
        }
    }
}

#[derive(Debug)]
struct ActiveSession {
    id: u64,
    kind: SessionKind,
    /// Open handle carrying the advisory lock; closing it unlocks.
    file: Option<File>,
}

/// Single-session guard. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SessionLock {
    active: Arc<Mutex<Option<ActiveSession>>>,
    next_id: Arc<AtomicU64>,
    lock_file: Option<PathBuf>,
}

impl SessionLock {
    /// A guard local to this process.
    pub fn new() -> Self {
        Self::default()
    }

    /// A guard that also excludes other processes locking `path`.
    pub fn with_lock_file(path: impl Into<PathBuf>) -> Self {
        Self {
            lock_file: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn lock_file(&self) -> Option<&Path> {
        self.lock_file.as_deref()
    }

    /// Claim the lock for a new session. Fails closed while another session
    /// holds it; requests are never queued.
    pub fn acquire(&self, kind: SessionKind) -> Result<SessionTicket, SessionBusy> {
        let mut active = self.state();
        if let Some(current) = active.as_ref() {
            tracing::warn!(requested = %kind, active = %current.kind, "session rejected: busy");
            return Err(SessionBusy {
                active: Some(current.kind),
            });
        }

        let file = match &self.lock_file {
            Some(path) => Some(claim_lock_file(path, kind)?),
            None => None,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *active = Some(ActiveSession { id, kind, file });
        tracing::debug!(id, kind = %kind, "session lock acquired");

        Ok(SessionTicket {
            lock: self.clone(),
            id,
            kind,
            released: false,
        })
    }

    /// Kind of the session currently holding the lock, if any.
    pub fn active(&self) -> Option<SessionKind> {
        self.state().as_ref().map(|a| a.kind)
    }

    fn holds(&self, id: u64) -> bool {
        self.state().as_ref().is_some_and(|a| a.id == id)
    }

    fn release(&self, id: u64) {
        let mut active = self.state();
        if active.as_ref().is_some_and(|a| a.id == id) {
            if let Some(file) = active.take().and_then(|a| a.file) {
                // Clear the holder record before the handle closes.
                if let Err(e) = file.set_len(0) {
                    tracing::debug!(error = %e, "could not clear session lock file");
                }
            }
            tracing::debug!(id, "session lock released");
        }
    }

    fn state(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        // The guarded value is a plain Option; a panic elsewhere cannot
        // leave it half-written.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Take the advisory lock on `path` and record `kind` in it. A lock held by
/// another process reports that process's kind when it can be read.
fn claim_lock_file(path: &Path, kind: SessionKind) -> Result<File, SessionBusy> {
    let opened = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path);
    let mut file = match opened {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot open session lock file");
            return Err(SessionBusy { active: None });
        }
    };

    if let Err(e) = file.try_lock_exclusive() {
        let mut holder = String::new();
        let active = file
            .read_to_string(&mut holder)
            .ok()
            .and_then(|_| holder.split_whitespace().next()?.parse().ok());
        tracing::warn!(
            path = %path.display(),
            requested = %kind,
            holder = %holder.trim(),
            error = %e,
            "session rejected: lock file held"
        );
        return Err(SessionBusy { active });
    }

    if let Err(e) = record_holder(&mut file, kind) {
        tracing::debug!(path = %path.display(), error = %e, "could not record session holder");
    }
    Ok(file)
}

fn record_holder(file: &mut File, kind: SessionKind) -> io::Result<()> {
    file.set_len(0)?;
    file.rewind()?;
    writeln!(file, "{kind} {}", std::process::id())?;
    file.flush()
}

/// Proof of holding the [`SessionLock`]. Invalid once released.
#[derive(Debug)]
pub struct SessionTicket {
    lock: SessionLock,
    id: u64,
    kind: SessionKind,
    released: bool,
}

impl SessionTicket {
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        !self.released && self.lock.holds(self.id)
    }

    /// Give the lock back. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.lock.release(self.id);
            self.released = true;
        }
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.release();
    }
}

/// Cooperative cancellation flag, checked once per session tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_busy() {
        let lock = SessionLock::new();
        let first = lock.acquire(SessionKind::Enrollment).unwrap();

        let err = lock.acquire(SessionKind::Recognition).unwrap_err();
        assert_eq!(err.active, Some(SessionKind::Enrollment));
        assert!(first.is_valid());
        assert_eq!(lock.active(), Some(SessionKind::Enrollment));
    }

    #[test]
    fn test_release_frees_lock() {
        let lock = SessionLock::new();
        let mut ticket = lock.acquire(SessionKind::Training).unwrap();
        ticket.release();
        assert!(!ticket.is_valid());
        assert_eq!(lock.active(), None);

        let next = lock.acquire(SessionKind::Recognition).unwrap();
        // Releasing the stale ticket again must not free the new holder.
        ticket.release();
        assert!(next.is_valid());
    }

    #[test]
    fn test_drop_releases() {
        let lock = SessionLock::new();
        {
            let _ticket = lock.acquire(SessionKind::Recognition).unwrap();
            assert!(lock.active().is_some());
        }
        assert!(lock.active().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let lock = SessionLock::new();
        let other = lock.clone();
        let _ticket = lock.acquire(SessionKind::Enrollment).unwrap();
        assert!(other.acquire(SessionKind::Training).is_err());
    }

    #[test]
    fn test_kind_parses_from_display() {
        for kind in [
            SessionKind::Enrollment,
            SessionKind::Recognition,
            SessionKind::Training,
            SessionKind::Maintenance,
        ] {
            assert_eq!(kind.to_string().parse::<SessionKind>(), Ok(kind));
        }
        assert!("idle".parse::<SessionKind>().is_err());
    }

    #[test]
    fn test_lock_file_excludes_separate_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".facegate.lock");
        // Two locks that share no memory, as in two processes.
        let first = SessionLock::with_lock_file(&path);
        let second = SessionLock::with_lock_file(&path);

        let mut ticket = first.acquire(SessionKind::Training).unwrap();
        let err = second.acquire(SessionKind::Recognition).unwrap_err();
        assert_eq!(err.active, Some(SessionKind::Training));
        assert_eq!(second.active(), None);

        ticket.release();
        let next = second.acquire(SessionKind::Recognition).unwrap();
        assert!(next.is_valid());
        assert!(first.acquire(SessionKind::Enrollment).is_err());
    }

    #[test]
    fn test_lock_file_released_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".facegate.lock");
        let first = SessionLock::with_lock_file(&path);
        let second = SessionLock::with_lock_file(&path);

        drop(first.acquire(SessionKind::Maintenance).unwrap());
        assert!(second.acquire(SessionKind::Enrollment).is_ok());
    }

    #[test]
    fn test_unopenable_lock_file_fails_closed() {
        let dir = tempfile::TempDir::new().unwrap();
        let lock = SessionLock::with_lock_file(dir.path().join("missing").join("x.lock"));
        let err = lock.acquire(SessionKind::Training).unwrap_err();
        assert_eq!(err.active, None);
        assert_eq!(lock.active(), None);
    }

    #[test]
    fn test_busy_message() {
        let local = SessionBusy {
            active: Some(SessionKind::Training),
        };
        assert_eq!(local.to_string(), "a training session is already running");
        let other = SessionBusy { active: None };
        assert!(other.to_string().contains("another facegate process"));
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!token.is_cancelled());
        shared.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_model_not_trained_mapping() {
        let err: SessionError = ModelError::NotTrained(PathBuf::from("/m.json")).into();
        assert!(matches!(err, SessionError::ModelNotTrained(_)));
        let err: SessionError = ModelError::MissingLabelSet.into();
        assert!(matches!(err, SessionError::Model(ModelError::MissingLabelSet)));
    }
}
