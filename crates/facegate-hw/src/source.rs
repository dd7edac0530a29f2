//! Video source abstraction and descriptor parsing.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Capability: yield one grayscale frame per call.
///
/// A source is owned by exactly one session; dropping it releases the
/// underlying device.
pub trait VideoSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

impl<T: VideoSource + ?Sized> VideoSource for Box<T> {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).read_frame()
    }
}

/// Where a session should read frames from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// V4L2 device node, e.g. `/dev/video0`.
    Device(String),
    /// Directory of still images replayed in file-name order.
    ImageDir(PathBuf),
    /// Network stream URL (http, https, rtsp).
    Stream(String),
}

impl FromStr for SourceDescriptor {
    type Err = CameraError;

    /// `0` → `/dev/video0`, `/dev/...` → device, `dir:<path>` → image
    /// directory, `scheme://...` → stream, any other path → image directory.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CameraError::Unsupported("empty source descriptor".into()));
        }
        if let Ok(index) = s.parse::<u32>() {
            return Ok(Self::Device(format!("/dev/video{index}")));
        }
        if let Some(dir) = s.strip_prefix("dir:") {
            return Ok(Self::ImageDir(PathBuf::from(dir)));
        }
        if s.contains("://") {
            return Ok(Self::Stream(s.to_string()));
        }
        if s.starts_with("/dev/") {
            return Ok(Self::Device(s.to_string()));
        }
        Ok(Self::ImageDir(PathBuf::from(s)))
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(path) => write!(f, "{path}"),
            Self::ImageDir(dir) => write!(f, "dir:{}", dir.display()),
            Self::Stream(url) => write!(f, "{url}"),
        }
    }
}

/// Open the source named by `descriptor`.
pub fn open_source(
    descriptor: &SourceDescriptor,
    warmup_frames: usize,
) -> Result<Box<dyn VideoSource>, CameraError> {
    match descriptor {
        SourceDescriptor::Device(path) => {
            let mut camera = Camera::open(path)?;
            camera.warm_up(warmup_frames)?;
            Ok(Box::new(camera))
        }
        SourceDescriptor::ImageDir(dir) => Ok(Box::new(ImageSequence::open(dir)?)),
        SourceDescriptor::Stream(url) => Err(CameraError::Unsupported(format!(
            "{url}: network streams are not supported, use a local device or image directory"
        ))),
    }
}

/// Replays still images as frames. Running past the last image is a read
/// failure, like a camera that has gone away.
pub struct ImageSequence {
    frames: std::vec::IntoIter<PathBuf>,
    sequence: u32,
}

impl ImageSequence {
    /// Collect the images in `dir`, ordered by numeric file stem where the
    /// stem is a number, then by file name.
    pub fn open(dir: &Path) -> Result<Self, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::DeviceNotFound(format!("{}: {e}", dir.display())))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        paths.sort_by_key(|path| {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            (stem.parse::<u64>().ok(), path.file_name().map(|n| n.to_os_string()))
        });

        if paths.is_empty() {
            return Err(CameraError::DeviceNotFound(format!(
                "{}: no images to replay",
                dir.display()
            )));
        }

        tracing::info!(dir = %dir.display(), frames = paths.len(), "opened image sequence");
        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            frames: paths.into_iter(),
            sequence: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl VideoSource for ImageSequence {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let path = self.frames.next().ok_or(CameraError::EndOfStream)?;
        let image = image::open(&path)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?
            .to_luma8();
        self.sequence += 1;
        Ok(Frame::new(image, self.sequence))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    #[test]
    fn test_parse_device_index() {
        let desc: SourceDescriptor = "2".parse().unwrap();
        assert_eq!(desc, SourceDescriptor::Device("/dev/video2".into()));
    }

    #[test]
    fn test_parse_device_path() {
        let desc: SourceDescriptor = "/dev/video4".parse().unwrap();
        assert_eq!(desc, SourceDescriptor::Device("/dev/video4".into()));
    }

    #[test]
    fn test_parse_stream_url() {
        let desc: SourceDescriptor = "http://192.168.1.3:8080/video".parse().unwrap();
        assert_eq!(desc, SourceDescriptor::Stream("http://192.168.1.3:8080/video".into()));
    }

    #[test]
    fn test_parse_image_dir() {
        let desc: SourceDescriptor = "dir:/tmp/frames".parse().unwrap();
        assert_eq!(desc, SourceDescriptor::ImageDir("/tmp/frames".into()));
        assert_eq!(desc.to_string(), "dir:/tmp/frames");
    }

    #[test]
    fn test_parse_empty() {
        assert!("  ".parse::<SourceDescriptor>().is_err());
    }

    #[test]
    fn test_open_stream_is_unsupported() {
        let desc = SourceDescriptor::Stream("rtsp://cam/live".into());
        assert!(matches!(open_source(&desc, 0), Err(CameraError::Unsupported(_))));
    }

    #[test]
    fn test_image_sequence_replays_in_numeric_order() {
        let dir = TempDir::new().unwrap();
        for (name, level) in [("10.png", 30u8), ("2.png", 20), ("1.png", 10)] {
            GrayImage::from_pixel(4, 4, Luma([level]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut source = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(source.remaining(), 3);

        let levels: Vec<u8> = (0..3)
            .map(|_| source.read_frame().unwrap().image.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(levels, vec![10, 20, 30]);
        assert!(matches!(source.read_frame(), Err(CameraError::EndOfStream)));
    }

    #[test]
    fn test_image_sequence_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ImageSequence::open(dir.path()),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
