//! Pure pixel operators on `ndarray` buffers
//!
//! Every buffer is laid out as `(height, width, channels)`; single-channel
//! masks are `(height, width)`. Nothing in here knows about colorspaces,
//! metadata or requests: the image state decides which buffers to feed in.

pub mod composite;
pub mod fill;
pub mod geometry;
pub mod resize;

pub use composite::{fit_cover, underlay_background, Underlay};
pub use fill::{fill_holes, FillMode};
pub use geometry::{crop_subject, position_subject, scale_subject, MarginSpec, RELATIVE_MARGIN_LIMIT};
pub use resize::resize;

use crate::types::Rect;
use ndarray::{s, Array3, ArrayView2, ArrayView3};

/// Tight bounding box of all pixels with `alpha > 0`, `None` for an empty mask
#[must_use]
pub fn bounding_box(alpha: ArrayView2<'_, u8>) -> Option<Rect> {
    let mut min = (usize::MAX, usize::MAX);
    let mut max = (0usize, 0usize);
    let mut found = false;

    for ((y, x), &a) in alpha.indexed_iter() {
        if a > 0 {
            found = true;
            min = (min.0.min(x), min.1.min(y));
            max = (max.0.max(x), max.1.max(y));
        }
    }

    found.then(|| {
        Rect::new(
            min.0 as u32,
            min.1 as u32,
            (max.0 - min.0 + 1) as u32,
            (max.1 - min.1 + 1) as u32,
        )
    })
}

/// Copy `src` into `dst` with its top-left corner at (`left`, `top`), clipping to `dst`
///
/// Both buffers must have the same channel count.
pub fn paste(dst: &mut Array3<u8>, src: ArrayView3<'_, u8>, left: i64, top: i64) {
    let (dst_h, dst_w, _) = dst.dim();
    let (src_h, src_w, _) = src.dim();

    let x0 = left.max(0);
    let y0 = top.max(0);
    let x1 = (left + src_w as i64).min(dst_w as i64);
    let y1 = (top + src_h as i64).min(dst_h as i64);
    if x1 <= x0 || y1 <= y0 {
        return;
    }

    let (sx, sy) = ((x0 - left) as usize, (y0 - top) as usize);
    let (w, h) = ((x1 - x0) as usize, (y1 - y0) as usize);
    dst.slice_mut(s![y0 as usize..y1 as usize, x0 as usize..x1 as usize, ..])
        .assign(&src.slice(s![sy..sy + h, sx..sx + w, ..]));
}

/// Zero-pad `src` back into a `width`x`height` frame at offset (`x`, `y`)
#[must_use]
pub fn uncrop(src: ArrayView3<'_, u8>, x: u32, y: u32, width: u32, height: u32) -> Array3<u8> {
    let channels = src.dim().2;
    let mut frame = Array3::<u8>::zeros((height as usize, width as usize, channels));
    paste(&mut frame, src, i64::from(x), i64::from(y));
    frame
}

/// Sub-view of `src` covered by `rect`; the caller guarantees `rect` fits
#[must_use]
pub fn crop_view<'a>(src: ArrayView3<'a, u8>, rect: Rect) -> ArrayView3<'a, u8> {
    let (x, y) = (rect.x as usize, rect.y as usize);
    let (w, h) = (rect.width as usize, rect.height as usize);
    src.slice_move(s![y..y + h, x..x + w, ..])
}
