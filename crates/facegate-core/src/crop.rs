//! Face region extraction from a grayscale frame.

use crate::types::BoundingBox;
use image::{imageops, GrayImage};

/// Crop the detected face region out of `frame`.
///
/// The box is clamped to the frame first. Returns `None` when the box and
/// the frame do not overlap.
pub fn crop_face(frame: &GrayImage, face: &BoundingBox) -> Option<GrayImage> {
    let (x, y, w, h) = face.clamp_to(frame.width(), frame.height())?;
    Some(imageops::crop_imm(frame, x, y, w, h).to_image())
}
