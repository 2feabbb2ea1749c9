//! Rectangles and canvas sizes, plus the two ratios the validation engine
//! is built on: relative aspect difference and maximum scale factor.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Bounding box of an element or slot, in document units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Geometry {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A box anchored at the origin.
    pub fn sized(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }

    /// Reject zero, negative or non-finite dimensions.
    pub fn ensure_measurable(&self, label: &str) -> Result<(), CoreError> {
        ensure_dimensions(self.width, self.height, label)
    }
}

/// Overall document size of a source or template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
}

impl Canvas {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }

    pub fn ensure_measurable(&self, label: &str) -> Result<(), CoreError> {
        ensure_dimensions(self.width, self.height, label)
    }
}

fn ensure_dimensions(width: f64, height: f64, label: &str) -> Result<(), CoreError> {
    if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
        return Err(CoreError::DataIntegrity(format!(
            "{label} has unusable dimensions {width}x{height}"
        )));
    }
    Ok(())
}

/// Relative aspect difference `|source - target| / target`.
pub fn aspect_difference(source_aspect: f64, target_aspect: f64) -> f64 {
    (source_aspect - target_aspect).abs() / target_aspect
}

/// Largest per-axis scale needed to fit the source into the target.
pub fn max_scale(source_width: f64, source_height: f64, target_width: f64, target_height: f64) -> f64 {
    (target_width / source_width).max(target_height / source_height)
}
