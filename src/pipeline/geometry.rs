//! Page-space to content-area coordinate mapping.
//!
//! Output pages place every element absolutely inside a content box inset
//! by the page margins. [`transform`] converts a page-space bounding box
//! into that box's coordinates. The same [`PageMargins`] value must reach
//! the stylesheet and the renderer prompt, otherwise content drifts.

use crate::model::BBox;
use serde::{Deserialize, Serialize};

/// Page margins in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageMargins {
    pub top: f32,
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Default for PageMargins {
    fn default() -> Self {
        Self {
            top: 72.0,
            left: 72.0,
            right: 72.0,
            bottom: 60.0,
        }
    }
}

impl PageMargins {
    pub fn new(top: f32, left: f32, right: f32, bottom: f32) -> Self {
        Self {
            top,
            left,
            right,
            bottom,
        }
    }

    /// All four values are finite and non-negative.
    pub fn is_valid(&self) -> bool {
        [self.top, self.left, self.right, self.bottom]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Element box relative to the content area, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Map `bbox` into content-area coordinates.
///
/// No clamping: boxes that land outside the content area (negative offsets,
/// overflow past the right margin) pass through unchanged, as do zero-sized
/// boxes.
pub fn transform(bbox: BBox, margins: &PageMargins) -> ContentBox {
    ContentBox {
        left: bbox.x0 - margins.left,
        top: bbox.y0 - margins.top,
        width: bbox.x1 - bbox.x0,
        height: bbox.y1 - bbox.y0,
    }
}
