//! Area-aware resampling backed by `fast_image_resize`

use crate::error::{BgRemovalError, Result};
use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use ndarray::{Array3, ArrayView3};

/// Downscale factors at or below this use a box filter to avoid ringing
pub const BOX_FILTER_MAX_SCALE: f64 = 0.5;

/// Pick the resampling filter for a given scale factor
#[must_use]
pub fn filter_for_scale(scale: f64) -> FilterType {
    if scale <= BOX_FILTER_MAX_SCALE {
        FilterType::Box
    } else {
        FilterType::CatmullRom
    }
}

fn pixel_type(channels: usize) -> Result<PixelType> {
    match channels {
        1 => Ok(PixelType::U8),
        2 => Ok(PixelType::U8x2),
        3 => Ok(PixelType::U8x3),
        4 => Ok(PixelType::U8x4),
        n => Err(BgRemovalError::processing(format!(
            "Cannot resample buffer with {n} channels"
        ))),
    }
}

/// Resample an `(h, w, c)` buffer to `width`x`height`
///
/// Channels are treated independently (no alpha premultiplication), so the
/// same call works for RGB, CMYK and single-channel masks.
pub fn resize(src: ArrayView3<'_, u8>, width: u32, height: u32) -> Result<Array3<u8>> {
    let (src_h, src_w, channels) = src.dim();
    if src_w == width as usize && src_h == height as usize {
        return Ok(src.to_owned());
    }
    if width == 0 || height == 0 || src_w == 0 || src_h == 0 {
        return Err(BgRemovalError::processing(format!(
            "Cannot resample {src_w}x{src_h} to {width}x{height}"
        )));
    }

    let pixel_type = pixel_type(channels)?;
    let scale = (f64::from(width) / src_w as f64).min(f64::from(height) / src_h as f64);
    let filter = filter_for_scale(scale);

    let buffer: Vec<u8> = src.iter().copied().collect();
    let source = Image::from_vec_u8(src_w as u32, src_h as u32, buffer, pixel_type)
        .map_err(|e| BgRemovalError::processing(format!("Invalid resample source: {e}")))?;
    let mut target = Image::new(width, height, pixel_type);

    let options = ResizeOptions::new()
        .resize_alg(ResizeAlg::Convolution(filter))
        .use_alpha(false);
    Resizer::new()
        .resize(&source, &mut target, &options)
        .map_err(|e| BgRemovalError::processing(format!("Resampling failed: {e}")))?;

    Array3::from_shape_vec((height as usize, width as usize, channels), target.into_vec())
        .map_err(|e| BgRemovalError::processing(format!("Resampled buffer has wrong shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_choice() {
        assert!(matches!(filter_for_scale(0.25), FilterType::Box));
        assert!(matches!(filter_for_scale(0.5), FilterType::Box));
        assert!(matches!(filter_for_scale(0.75), FilterType::CatmullRom));
        assert!(matches!(filter_for_scale(2.0), FilterType::CatmullRom));
    }

    #[test]
    fn test_resize_constant_plane_stays_constant() {
        let src = Array3::<u8>::from_elem((40, 60, 3), 77);
        let out = resize(src.view(), 15, 10).unwrap();
        assert_eq!(out.dim(), (10, 15, 3));
        assert!(out.iter().all(|&v| v == 77));
    }

    #[test]
    fn test_resize_identity_is_copy() {
        let src = Array3::<u8>::from_shape_fn((4, 4, 1), |(y, x, _)| (y * 4 + x) as u8);
        let out = resize(src.view(), 4, 4).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn test_resize_rejects_zero_target() {
        let src = Array3::<u8>::zeros((4, 4, 4));
        assert!(resize(src.view(), 0, 4).is_err());
    }
}
