//! Viewport and element geometry.

use serde::{Deserialize, Serialize};

/// Viewport information for coordinate calculations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Viewport width in CSS pixels.
    pub width: u32,
    /// Viewport height in CSS pixels.
    pub height: u32,
    /// Device pixel ratio.
    #[serde(default = "default_pixel_ratio")]
    pub device_pixel_ratio: f64,
}

fn default_pixel_ratio() -> f64 {
    1.0
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_pixel_ratio: default_pixel_ratio(),
        }
    }
}

impl Viewport {
    /// The viewport as a box anchored at the origin.
    pub fn as_box(&self) -> BoundingBox {
        BoundingBox {
            x: 0.0,
            y: 0.0,
            width: f64::from(self.width),
            height: f64::from(self.height),
        }
    }

    /// Viewport area in square pixels.
    pub fn area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }

    /// Whether the viewport has a usable (non-zero) size.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Bounding box for an element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Get the center point of this bounding box.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Area of the box; degenerate boxes have zero area.
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Check if this box intersects with another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    /// The overlapping region of two boxes, if any.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        Some(BoundingBox {
            x,
            y,
            width: right - x,
            height: bottom - y,
        })
    }

    /// Area covered by the union of two boxes.
    pub fn union_area(&self, other: &BoundingBox) -> f64 {
        let overlap = self.intersection(other).map_or(0.0, |b| b.area());
        self.area() + other.area() - overlap
    }

    /// Euclidean distance between the centers of two boxes.
    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f64, y: f64, width: f64, height: f64) -> BoundingBox {
        BoundingBox { x, y, width, height }
    }

    #[test]
    fn test_center_and_area() {
        let b = bbox(10.0, 20.0, 100.0, 40.0);
        assert_eq!(b.center(), (60.0, 40.0));
        assert_eq!(b.area(), 4_000.0);
        assert_eq!(bbox(0.0, 0.0, -5.0, 10.0).area(), 0.0);
    }

    #[test]
    fn test_intersection() {
        let a = bbox(0.0, 0.0, 100.0, 100.0);
        let b = bbox(50.0, 50.0, 100.0, 100.0);
        let overlap = a.intersection(&b).unwrap();
        assert_eq!(overlap, bbox(50.0, 50.0, 50.0, 50.0));
        assert!(a.intersection(&bbox(200.0, 200.0, 10.0, 10.0)).is_none());
    }

    #[test]
    fn test_union_area_counts_overlap_once() {
        let a = bbox(0.0, 0.0, 100.0, 100.0);
        let b = bbox(50.0, 0.0, 100.0, 100.0);
        assert_eq!(a.union_area(&b), 15_000.0);
    }

    #[test]
    fn test_viewport_box() {
        let viewport = Viewport {
            width: 1920,
            height: 1080,
            device_pixel_ratio: 2.0,
        };
        assert_eq!(viewport.as_box(), bbox(0.0, 0.0, 1920.0, 1080.0));
        assert_eq!(viewport.area(), 1920.0 * 1080.0);
        assert!(!viewport.is_empty());
    }

    #[test]
    fn test_viewport_pixel_ratio_defaults() {
        let viewport: Viewport = serde_json::from_str(r#"{"width": 800, "height": 600}"#).unwrap();
        assert_eq!(viewport.device_pixel_ratio, 1.0);
    }
}
