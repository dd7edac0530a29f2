//! Dataset store: one directory per identity, one numbered image per sample.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<identity_id>_<display_name>/<sequence_no>.png
//! ```
//!
//! The directory name is the only record of an identity, so `display_name`
//! may never contain the separator. Every listing is sorted explicitly;
//! nothing depends on filesystem enumeration order.

use image::{GrayImage, ImageFormat};
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Separator between `identity_id` and `display_name` in directory names.
pub const NAME_SEPARATOR: char = '_';
const SAMPLE_EXTENSION: &str = "png";
const READABLE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity {0} already exists")]
    AlreadyExists(Identity),
    #[error("identity id {identity_id} is already taken by {existing:?}")]
    IdTaken { identity_id: u32, existing: String },
    #[error("identity {0} not found")]
    NotFound(u32),
    #[error("invalid display name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("dataset i/o: {0}")]
    Io(#[from] io::Error),
    #[error("sample image {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A registered person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity {
    pub identity_id: u32,
    pub display_name: String,
}

impl Identity {
    pub fn new(identity_id: u32, display_name: impl Into<String>) -> Self {
        Self {
            identity_id,
            display_name: display_name.into(),
        }
    }

    /// Directory name for this identity.
    pub fn dir_name(&self) -> String {
        format!("{}{NAME_SEPARATOR}{}", self.identity_id, self.display_name)
    }

    /// Inverse of [`dir_name`](Self::dir_name).
    pub fn parse_dir_name(name: &str) -> Option<Self> {
        let (id, display_name) = name.split_once(NAME_SEPARATOR)?;
        if display_name.is_empty() || display_name.contains(NAME_SEPARATOR) {
            return None;
        }
        // Reject "+1", "01" and friends so the name round-trips exactly.
        let identity_id: u32 = id.parse().ok()?;
        if identity_id.to_string() != id {
            return None;
        }
        Some(Self::new(identity_id, display_name))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identity_id, self.display_name)
    }
}

/// One stored face image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub identity_id: u32,
    pub sequence_no: u64,
    pub path: PathBuf,
}

impl Sample {
    /// Decode the stored raster as grayscale.
    pub fn load_image(&self) -> Result<GrayImage, StoreError> {
        image::open(&self.path)
            .map(|img| img.to_luma8())
            .map_err(|source| StoreError::Image {
                path: self.path.clone(),
                source,
            })
    }
}

/// Filesystem-backed dataset rooted at a single directory.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    /// Open (creating if needed) the dataset rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "dataset store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that `name` can be stored and parsed back unambiguously.
    pub fn validate_display_name(name: &str) -> Result<(), StoreError> {
        let invalid = |reason| {
            Err(StoreError::InvalidName {
                name: name.to_string(),
                reason,
            })
        };

        if name.trim().is_empty() {
            return invalid("name is empty");
        }
        if name.trim() != name {
            return invalid("name has leading or trailing whitespace");
        }
        if name.contains(NAME_SEPARATOR) {
            return invalid("name contains the '_' separator");
        }
        if name.contains('/') || name.contains('\\') {
            return invalid("name contains a path separator");
        }
        if name == "." || name == ".." {
            return invalid("name is a relative path component");
        }
        if name.chars().any(char::is_control) {
            return invalid("name contains control characters");
        }
        Ok(())
    }

    /// Register a new identity.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when this exact id/name pair
    /// is already present (callers may resume enrollment into it), and with
    /// [`StoreError::IdTaken`] when the id belongs to a different name.
    pub fn create_identity(&self, identity_id: u32, display_name: &str) -> Result<Identity, StoreError> {
        Self::validate_display_name(display_name)?;

        if let Some(existing) = self.find_identity(identity_id)? {
            if existing.display_name == display_name {
                return Err(StoreError::AlreadyExists(existing));
            }
            return Err(StoreError::IdTaken {
                identity_id,
                existing: existing.display_name,
            });
        }

        let identity = Identity::new(identity_id, display_name);
        fs::create_dir(self.identity_dir(&identity))?;
        tracing::info!(identity_id, display_name, "identity created");
        Ok(identity)
    }

    /// Look up an identity by id.
    pub fn find_identity(&self, identity_id: u32) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .list_identities()?
            .into_iter()
            .find(|i| i.identity_id == identity_id))
    }

    /// All identities, sorted by `(identity_id, display_name)`.
    pub fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut identities = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(Identity::parse_dir_name) {
                Some(identity) => identities.push(identity),
                None => tracing::warn!(
                    entry = %entry.path().display(),
                    "ignoring directory that is not an identity"
                ),
            }
        }

        identities.sort_by(|a, b| {
            a.identity_id
                .cmp(&b.identity_id)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        Ok(identities)
    }

    /// Change an identity's display name, keeping its id and samples.
    pub fn rename_identity(&self, identity_id: u32, new_display_name: &str) -> Result<Identity, StoreError> {
        Self::validate_display_name(new_display_name)?;

        let current = self
            .find_identity(identity_id)?
            .ok_or(StoreError::NotFound(identity_id))?;
        if current.display_name == new_display_name {
            return Ok(current);
        }

        let renamed = Identity::new(identity_id, new_display_name);
        let target = self.identity_dir(&renamed);
        if target.exists() {
            return Err(StoreError::AlreadyExists(renamed));
        }

        fs::rename(self.identity_dir(&current), &target)?;
        tracing::info!(
            identity_id,
            from = %current.display_name,
            to = new_display_name,
            "identity renamed"
        );
        Ok(renamed)
    }

    /// Remove an identity and every sample it owns.
    pub fn delete_identity(&self, identity_id: u32) -> Result<Identity, StoreError> {
        let identity = self
            .find_identity(identity_id)?
            .ok_or(StoreError::NotFound(identity_id))?;

        fs::remove_dir_all(self.identity_dir(&identity))?;
        tracing::info!(identity_id, display_name = %identity.display_name, "identity deleted");
        Ok(identity)
    }

    /// Durably store one face image for `identity`.
    ///
    /// Sequence numbers continue from the highest one in the identity's
    /// directory, so samples from an earlier enrollment are never
    /// overwritten. The file is synced before it is renamed into place.
    pub fn append_sample(&self, identity: &Identity, image: &GrayImage) -> Result<Sample, StoreError> {
        let dir = self.identity_dir(identity);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(identity.identity_id));
        }

        let sequence_no = samples_in(&dir, identity.identity_id)?
            .last()
            .map_or(1, |s| s.sequence_no + 1);

        let path = dir.join(format!("{sequence_no}.{SAMPLE_EXTENSION}"));
        let tmp = dir.join(format!(".{sequence_no}.{SAMPLE_EXTENSION}.tmp"));
        let mut writer = BufWriter::new(File::create(&tmp)?);
        image
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(|source| StoreError::Image {
                path: tmp.clone(),
                source,
            })?;
        writer
            .into_inner()
            .map_err(io::IntoInnerError::into_error)?
            .sync_all()?;
        fs::rename(&tmp, &path)?;

        tracing::debug!(
            identity_id = identity.identity_id,
            sequence_no,
            width = image.width(),
            height = image.height(),
            "sample stored"
        );

        Ok(Sample {
            identity_id: identity.identity_id,
            sequence_no,
            path,
        })
    }

    /// Samples of one identity, ordered by `sequence_no`. Unknown ids yield
    /// an empty list.
    pub fn list_samples(&self, identity_id: u32) -> Result<Vec<Sample>, StoreError> {
        match self.find_identity(identity_id)? {
            Some(identity) => samples_in(&self.identity_dir(&identity), identity_id),
            None => Ok(Vec::new()),
        }
    }

    pub fn sample_count(&self, identity_id: u32) -> Result<usize, StoreError> {
        Ok(self.list_samples(identity_id)?.len())
    }

    fn identity_dir(&self, identity: &Identity) -> PathBuf {
        self.root.join(identity.dir_name())
    }
}

/// Numbered samples in one identity directory, one per sequence number.
///
/// Only canonical stems count (`7`, not `07` or `+7`). When several files
/// share a number (`1.jpg` next to `1.png`) the PNG wins, then the first
/// path in byte order.
fn samples_in(dir: &Path, identity_id: u32) -> Result<Vec<Sample>, StoreError> {
    let mut samples = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_readable_sample(&path) {
            continue;
        }
        let Some(sequence_no) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(parse_sequence_no)
        else {
            continue;
        };
        samples.push(Sample {
            identity_id,
            sequence_no,
            path,
        });
    }

    samples.sort_by(|a, b| {
        a.sequence_no
            .cmp(&b.sequence_no)
            .then_with(|| is_native_sample(&b.path).cmp(&is_native_sample(&a.path)))
            .then_with(|| a.path.cmp(&b.path))
    });
    samples.dedup_by(|dup, kept| {
        let same = dup.sequence_no == kept.sequence_no;
        if same {
            tracing::warn!(
                identity_id,
                sequence_no = dup.sequence_no,
                kept = %kept.path.display(),
                ignored = %dup.path.display(),
                "duplicate sample number"
            );
        }
        same
    });
    Ok(samples)
}

fn parse_sequence_no(stem: &str) -> Option<u64> {
    stem.parse::<u64>()
        .ok()
        .filter(|n| n.to_string() == stem)
}

fn is_native_sample(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(SAMPLE_EXTENSION))
}

fn is_readable_sample(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| READABLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
