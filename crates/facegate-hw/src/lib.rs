//! facegate-hw — Video sources for enrollment and recognition sessions.
//!
//! Provides V4L2-based camera access and an image-sequence replay source,
//! both behind the [`VideoSource`] trait.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{open_source, ImageSequence, SourceDescriptor, VideoSource};
