//! Geometric postprocessing operators applied to every plane of an image state

use crate::error::Result;
use crate::pixelops::{crop_subject, position_subject, scale_subject, MarginSpec};
use crate::types::Rect;
use ndarray::{Array3, ArrayView3};

/// One subject-relative transform, guided by the alpha bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostProcess {
    /// Cut the canvas down to the subject plus margins
    CropSubject(MarginSpec),
    /// Resize the subject to cover `scale` (0-1) of the canvas, centred
    ScaleSubject { scale: f64 },
    /// Move the subject within the free canvas space, `dx`/`dy` in 0-1
    PositionSubject { dx: f64, dy: f64 },
}

impl PostProcess {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CropSubject(_) => "crop_subject",
            Self::ScaleSubject { .. } => "scale_subject",
            Self::PositionSubject { .. } => "position_subject",
        }
    }

    /// Apply to a single `(h, w, c)` buffer
    pub fn apply(&self, image: ArrayView3<'_, u8>, bbox: Rect) -> Result<Array3<u8>> {
        match *self {
            Self::CropSubject(ref margins) => Ok(crop_subject(image, bbox, margins)),
            Self::ScaleSubject { scale } => scale_subject(image, bbox, scale),
            Self::PositionSubject { dx, dy } => Ok(position_subject(image, bbox, dx, dy)),
        }
    }
}

impl std::fmt::Display for PostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CropSubject(spec) => write!(f, "crop_subject(margins={:?})", spec.margins),
            Self::ScaleSubject { scale } => write!(f, "scale_subject({scale:.3})"),
            Self::PositionSubject { dx, dy } => write!(f, "position_subject({dx:.3}, {dy:.3})"),
        }
    }
}
