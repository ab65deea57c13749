//! Bounding box geometry shared by the aligner and identity resolver.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Bounding box in source coordinates, stored as corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    /// Left edge x-coordinate
    pub x1: f64,
    /// Top edge y-coordinate
    pub y1: f64,
    /// Right edge x-coordinate
    pub x2: f64,
    /// Bottom edge y-coordinate
    pub y2: f64,
}

impl BoundingBox {
    /// Create a new bounding box from its corners.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Create from a `[x1, y1, x2, y2]` array.
    pub fn from_array(coords: [f64; 4]) -> Self {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }

    /// Box width.
    #[inline]
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    /// Box height.
    #[inline]
    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Center x-coordinate.
    #[inline]
    pub fn cx(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }

    /// Center y-coordinate.
    #[inline]
    pub fn cy(&self) -> f64 {
        (self.y1 + self.y2) / 2.0
    }

    /// Box area; zero for degenerate boxes.
    #[inline]
    pub fn area(&self) -> f64 {
        if self.is_degenerate() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    /// True when every coordinate is finite.
    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// True when the box has zero or negative width or height.
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    /// Compute Intersection over Union with another box.
    ///
    /// Returns 0.0 for non-finite or degenerate input.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        if !self.is_finite() || !other.is_finite() {
            return 0.0;
        }
        if self.is_degenerate() || other.is_degenerate() {
            return 0.0;
        }

        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Euclidean distance between box centers.
    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let dx = self.cx() - other.cx();
        let dy = self.cy() - other.cy();
        (dx * dx + dy * dy).sqrt()
    }

    /// Largest absolute delta across the four corner coordinates.
    pub fn max_corner_delta(&self, other: &BoundingBox) -> f64 {
        (self.x1 - other.x1)
            .abs()
            .max((self.y1 - other.y1).abs())
            .max((self.x2 - other.x2).abs())
            .max((self.y2 - other.y2).abs())
    }

    /// Two boxes are close when all four coordinate deltas are within `tolerance`.
    pub fn is_close(&self, other: &BoundingBox, tolerance: f64) -> bool {
        // NaN deltas compare false, so non-finite boxes are never close
        self.max_corner_delta(other) <= tolerance
    }
}
