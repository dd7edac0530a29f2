use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score. Scale is backend-specific; higher = more face-like.
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection of this box with a `width` x `height` frame, as integer
    /// pixel bounds `(x, y, w, h)`. `None` if nothing of the box lies inside.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(width as f32);
        let y1 = (self.y + self.height).ceil().min(height as f32);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside() {
        let b = BoundingBox::new(10.0, 20.0, 30.0, 40.0, 1.0);
        assert_eq!(b.clamp_to(100, 100), Some((10, 20, 30, 40)));
    }

    #[test]
    fn test_clamp_partially_outside() {
        let b = BoundingBox::new(-5.0, 90.0, 20.0, 20.0, 1.0);
        assert_eq!(b.clamp_to(100, 100), Some((0, 90, 15, 10)));
    }

    #[test]
    fn test_clamp_fully_outside() {
        let b = BoundingBox::new(120.0, 0.0, 10.0, 10.0, 1.0);
        assert_eq!(b.clamp_to(100, 100), None);
    }

    #[test]
    fn test_area_negative_dimensions() {
        let b = BoundingBox::new(0.0, 0.0, -3.0, 4.0, 1.0);
        assert_eq!(b.area(), 0.0);
    }
}
