//! Subject-relative geometric transforms: crop, scale and position
//!
//! All three take the subject bounding box computed from the alpha mask and
//! apply the same transform to any buffer, so colour, raw and alpha planes
//! stay aligned when each is passed through with the same box.

use super::{crop_view, paste, resize};
use crate::error::Result;
use crate::types::{CropMargin, Rect};
use ndarray::{Array3, ArrayView3};

/// Largest relative margin, in percent of the subject size
pub const RELATIVE_MARGIN_LIMIT: f64 = 50.0;

/// Margin parameters for `crop_subject`, in `top, right, bottom, left` order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginSpec {
    pub margins: [f64; 4],
    pub absolutes: [bool; 4],
    /// Upper bound for absolute margins in pixels
    pub clamp: f64,
}

impl Default for MarginSpec {
    fn default() -> Self {
        Self {
            margins: [0.0; 4],
            absolutes: [true; 4],
            clamp: f64::INFINITY,
        }
    }
}

impl MarginSpec {
    #[must_use]
    pub fn from_crop_margin(margin: &CropMargin, clamp: f64) -> Self {
        let sides = margin.sides();
        Self {
            margins: sides.map(|m| m.value),
            absolutes: sides.map(|m| !m.relative),
            clamp,
        }
    }

    /// Resolve to whole pixels against a subject box, `top, right, bottom, left`
    ///
    /// Each axis rounds its padded total once and gives the far side the
    /// remainder, so odd sizes come out as `round(extent + near + far)`.
    #[must_use]
    pub fn resolve(&self, bbox: Rect) -> [u32; 4] {
        let extent = [bbox.height, bbox.width, bbox.height, bbox.width];
        let px = |i: usize| {
            let value = self.margins[i];
            let value = if value.is_finite() { value } else { 0.0 };
            if self.absolutes[i] {
                value.clamp(0.0, self.clamp.max(0.0))
            } else {
                let pct = value.clamp(0.0, RELATIVE_MARGIN_LIMIT);
                pct / 100.0 * f64::from(extent[i])
            }
        };
        // (near, far) per axis: top/bottom, then left/right
        let split = |near: usize, far: usize| {
            let extent = f64::from(extent[near]);
            let total = round_half_up(extent + px(near) + px(far));
            let near_px = round_half_up(px(near));
            let far_px = (total - extent - near_px).max(0.0);
            (near_px as u32, far_px as u32)
        };
        let (top, bottom) = split(0, 2);
        let (left, right) = split(3, 1);
        [top, right, bottom, left]
    }
}

fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Cut the subject box plus margins out of `image`
///
/// Margin area that falls outside the source frame is zero-filled, so the
/// output is always `bbox + margins` in size.
#[must_use]
pub fn crop_subject(image: ArrayView3<'_, u8>, bbox: Rect, margins: &MarginSpec) -> Array3<u8> {
    let [top, right, bottom, left] = margins.resolve(bbox);
    let out_w = (bbox.width + left + right) as usize;
    let out_h = (bbox.height + top + bottom) as usize;
    let channels = image.dim().2;

    let mut out = Array3::<u8>::zeros((out_h, out_w, channels));
    let origin_x = i64::from(bbox.x) - i64::from(left);
    let origin_y = i64::from(bbox.y) - i64::from(top);
    paste(&mut out, image, -origin_x, -origin_y);
    out
}

/// Resize the subject so its larger relative side covers `scale` of the canvas, centred
///
/// The canvas keeps its size; everything outside the subject box is cleared.
pub fn scale_subject(image: ArrayView3<'_, u8>, bbox: Rect, scale: f64) -> Result<Array3<u8>> {
    let (height, width, channels) = image.dim();
    let current = (f64::from(bbox.width) / width as f64).max(f64::from(bbox.height) / height as f64);
    let factor = scale / current;

    let new_w = ((f64::from(bbox.width) * factor).round() as u32).max(1);
    let new_h = ((f64::from(bbox.height) * factor).round() as u32).max(1);
    let subject = resize(crop_view(image, bbox), new_w, new_h)?;

    let mut out = Array3::<u8>::zeros((height, width, channels));
    let left = (width as i64 - i64::from(new_w)) / 2;
    let top = (height as i64 - i64::from(new_h)) / 2;
    paste(&mut out, subject.view(), left, top);
    Ok(out)
}

/// Move the subject box to a normalised position within the free canvas space
///
/// `dx`/`dy` of 0 place the box flush left/top, 1 flush right/bottom.
#[must_use]
pub fn position_subject(image: ArrayView3<'_, u8>, bbox: Rect, dx: f64, dy: f64) -> Array3<u8> {
    let (height, width, channels) = image.dim();
    let free_x = width as f64 - f64::from(bbox.width);
    let free_y = height as f64 - f64::from(bbox.height);
    let left = (dx.clamp(0.0, 1.0) * free_x).round() as i64;
    let top = (dy.clamp(0.0, 1.0) * free_y).round() as i64;

    let mut out = Array3::<u8>::zeros((height, width, channels));
    paste(&mut out, crop_view(image, bbox), left, top);
    out
}
