//! Frame type and pixel conversions — YUYV/Y16 to grayscale, dark detection.

use image::GrayImage;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;
const DARK_PIXEL_LEVEL: u8 = 32;

/// A captured grayscale frame.
#[derive(Clone)]
pub struct Frame {
    pub image: GrayImage,
    pub timestamp: std::time::Instant,
    /// Source-assigned sequence number (driver sequence or replay index).
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: GrayImage, sequence: u32) -> Self {
        Self {
            image,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// Build a frame from raw row-major grayscale bytes.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let actual = data.len();
        let image = GrayImage::from_raw(width, height, data).ok_or(FrameError::InvalidLength {
            expected: (width * height) as usize,
            actual,
        })?;
        Ok(Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let data = self.image.as_raw();
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }

    /// Whether the frame is too dark to be worth running detection on.
    pub fn is_dark(&self) -> bool {
        is_dark_frame(self.image.as_raw(), DARK_FRAME_THRESHOLD)
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels fall below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < DARK_PIXEL_LEVEL).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
