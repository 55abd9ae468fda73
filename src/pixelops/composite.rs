//! Background underlay compositing

use super::{crop_view, resize};
use crate::error::{BgRemovalError, Result};
use crate::types::{BackgroundColor, Rect};
use ndarray::{Array3, ArrayView3, Zip};

/// Background placed under a foreground
#[derive(Debug, Clone, Copy)]
pub enum Underlay<'a> {
    /// Flat RGBA colour
    Color(BackgroundColor),
    /// RGB or RGBA buffer with the same height and width as the foreground
    Image(ArrayView3<'a, u8>),
}

/// Composite an `(h, w, 4)` foreground over `background`, returning RGBA
///
/// Straight (non-premultiplied) alpha "over" operator.
pub fn underlay_background(fg: ArrayView3<'_, u8>, background: &Underlay<'_>) -> Result<Array3<u8>> {
    let (height, width, channels) = fg.dim();
    if channels != 4 {
        return Err(BgRemovalError::processing(format!(
            "Foreground must be RGBA, got {channels} channels"
        )));
    }

    let mut out = Array3::<u8>::zeros((height, width, 4));
    match background {
        Underlay::Color(color) => {
            Zip::from(out.rows_mut())
                .and(fg.rows())
                .for_each(|mut dst, src| {
                    let px = over([src[0], src[1], src[2], src[3]], *color);
                    for (d, v) in dst.iter_mut().zip(px) {
                        *d = v;
                    }
                });
        },
        Underlay::Image(bg) => {
            let (bg_h, bg_w, bg_c) = bg.dim();
            if bg_h != height || bg_w != width || !(bg_c == 3 || bg_c == 4) {
                return Err(BgRemovalError::processing(format!(
                    "Background {bg_w}x{bg_h}x{bg_c} does not match foreground {width}x{height}"
                )));
            }
            Zip::from(out.rows_mut())
                .and(fg.rows())
                .and(bg.rows())
                .for_each(|mut dst, src, back| {
                    let back_alpha = if bg_c == 4 { back[3] } else { 255 };
                    let px = over(
                        [src[0], src[1], src[2], src[3]],
                        [back[0], back[1], back[2], back_alpha],
                    );
                    for (d, v) in dst.iter_mut().zip(px) {
                        *d = v;
                    }
                });
        },
    }
    Ok(out)
}

fn over(fg: [u8; 4], bg: [u8; 4]) -> [u8; 4] {
    let fa = f32::from(fg[3]) / 255.0;
    let ba = f32::from(bg[3]) / 255.0;
    let out_a = fa + ba * (1.0 - fa);
    if out_a <= f32::EPSILON {
        return [fg[0], fg[1], fg[2], 0];
    }

    let blend = |f: u8, b: u8| -> u8 {
        let v = (f32::from(f) * fa + f32::from(b) * ba * (1.0 - fa)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    [
        blend(fg[0], bg[0]),
        blend(fg[1], bg[1]),
        blend(fg[2], bg[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Scale `image` to cover `width`x`height`, then centre-crop to exactly that size
pub fn fit_cover(image: ArrayView3<'_, u8>, width: u32, height: u32) -> Result<Array3<u8>> {
    let (src_h, src_w, _) = image.dim();
    if src_w == width as usize && src_h == height as usize {
        return Ok(image.to_owned());
    }
    let scale = (f64::from(width) / src_w as f64).max(f64::from(height) / src_h as f64);
    let cover_w = ((src_w as f64 * scale).ceil() as u32).max(width);
    let cover_h = ((src_h as f64 * scale).ceil() as u32).max(height);
    let covered = resize(image, cover_w, cover_h)?;

    let rect = Rect::new((cover_w - width) / 2, (cover_h - height) / 2, width, height);
    Ok(crop_view(covered.view(), rect).to_owned())
}
