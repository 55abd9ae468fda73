//! Container decoding into raw, RGB and alpha planes

use crate::color_profile::{cmyk_to_rgb, ProfileExtractor};
use crate::error::{BgRemovalError, Result};
use crate::pixelops::resize;
use crate::types::{ColorMode, Dpi};
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use jpeg_decoder::PixelFormat;
use ndarray::{s, Array2, Array3, Axis, Zip};
use std::io::Cursor;

/// Everything captured from one container before it becomes an image state
#[derive(Debug)]
pub(crate) struct DecodedImage {
    pub raw: Array3<u8>,
    pub rgb: Array3<u8>,
    pub alpha: Option<Array2<u8>>,
    pub mode: ColorMode,
    pub icc: Option<Vec<u8>>,
    pub dpi: Option<Dpi>,
    pub orientation: Option<u32>,
    pub pre_limit: (u32, u32),
    pub scale: f64,
}

/// Decode `bytes`, apply EXIF orientation and the megapixel budget
pub(crate) fn decode(bytes: &[u8], megapixel_limit: Option<f64>) -> Result<DecodedImage> {
    let format = image::guess_format(bytes)
        .map_err(|e| BgRemovalError::could_not_read(format!("unrecognised container: {e}")))?;

    let (raw, mode, icc) = match format {
        ImageFormat::Jpeg => decode_jpeg(bytes)?,
        _ => decode_generic(bytes)?,
    };

    let metadata = ProfileExtractor::extract(bytes);
    let raw = match metadata.orientation {
        Some(orientation) => apply_orientation(raw, orientation),
        None => raw,
    };

    let (height, width, _) = raw.dim();
    if width == 0 || height == 0 {
        return Err(BgRemovalError::could_not_read("image has no pixels"));
    }
    let pre_limit = (width as u32, height as u32);

    let (raw, scale) = match limit_scale(pre_limit, megapixel_limit) {
        Some(scale) => {
            let target_w = ((f64::from(pre_limit.0) * scale) as u32).max(1);
            let target_h = ((f64::from(pre_limit.1) * scale) as u32).max(1);
            log::debug!(
                "Downscaling {}x{} to {}x{} (scale {:.4})",
                pre_limit.0,
                pre_limit.1,
                target_w,
                target_h,
                scale
            );
            (resize(raw.view(), target_w, target_h)?, scale)
        },
        None => (raw, 1.0),
    };

    let (rgb, alpha) = split_planes(&raw, mode);

    Ok(DecodedImage {
        raw,
        rgb,
        alpha,
        mode,
        icc,
        dpi: metadata.dpi,
        orientation: metadata.orientation,
        pre_limit,
        scale,
    })
}

/// Scale factor needed to fit `megapixel_limit`, `None` when already small enough
fn limit_scale((width, height): (u32, u32), megapixel_limit: Option<f64>) -> Option<f64> {
    let limit = megapixel_limit.filter(|mp| mp.is_finite() && *mp > 0.0)? * 1_000_000.0;
    let pixels = f64::from(width) * f64::from(height);
    (pixels > limit).then(|| (limit / pixels).sqrt())
}

/// JPEG goes through `jpeg-decoder` so CMYK pixels arrive untouched
fn decode_jpeg(bytes: &[u8]) -> Result<(Array3<u8>, ColorMode, Option<Vec<u8>>)> {
    if !ends_scan(bytes) {
        return Err(BgRemovalError::could_not_read("JPEG is truncated: no end of image after the last scan"));
    }
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    let pixels = decoder
        .decode()
        .map_err(|e| BgRemovalError::could_not_read(format!("JPEG decoding failed: {e}")))?;
    let info = decoder
        .info()
        .ok_or_else(|| BgRemovalError::could_not_read("JPEG has no frame header"))?;
    let icc = decoder.icc_profile();
    let shape = |channels: usize| (usize::from(info.height), usize::from(info.width), channels);

    let (raw, mode) = match info.pixel_format {
        PixelFormat::L8 => (Array3::from_shape_vec(shape(1), pixels), ColorMode::L),
        PixelFormat::RGB24 => (Array3::from_shape_vec(shape(3), pixels), ColorMode::Rgb),
        PixelFormat::CMYK32 => (Array3::from_shape_vec(shape(4), pixels), ColorMode::Cmyk),
        _ => return decode_generic(bytes),
    };
    let raw = raw.map_err(|e| BgRemovalError::could_not_read(format!("JPEG size mismatch: {e}")))?;
    Ok((raw, mode, icc))
}

/// True when an EOI marker follows the last start-of-scan marker
///
/// Decoders may fill a scan cut short instead of failing.
/// Entropy-coded data escapes `0xFF`, so neither marker can occur inside it,
/// and an embedded thumbnail's EOI always precedes the main image's SOS.
fn ends_scan(bytes: &[u8]) -> bool {
    let last = |marker: u8| bytes.windows(2).rposition(|pair| pair == [0xFF, marker]);
    match (last(0xDA), last(0xD9)) {
        (Some(sos), Some(eoi)) => eoi > sos,
        _ => false,
    }
}

/// Everything else goes through the `image` crate
fn decode_generic(bytes: &[u8]) -> Result<(Array3<u8>, ColorMode, Option<Vec<u8>>)> {
    let unreadable = |e: image::ImageError| BgRemovalError::could_not_read(e.to_string());

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| BgRemovalError::could_not_read(e.to_string()))?;
    let mut decoder = reader.into_decoder().map_err(unreadable)?;
    let icc = decoder.icc_profile().unwrap_or_else(|e| {
        log::debug!("Ignoring unreadable ICC profile: {e}");
        None
    });
    let image = DynamicImage::from_decoder(decoder).map_err(unreadable)?;

    let color = image.color();
    let (width, height) = (image.width() as usize, image.height() as usize);
    let (mode, data) = match (color.has_color(), color.has_alpha()) {
        (false, false) => (ColorMode::L, image.into_luma8().into_raw()),
        (false, true) => (ColorMode::La, image.into_luma_alpha8().into_raw()),
        (true, false) => (ColorMode::Rgb, image.into_rgb8().into_raw()),
        (true, true) => (ColorMode::Rgba, image.into_rgba8().into_raw()),
    };

    let raw = Array3::from_shape_vec((height, width, mode.channels()), data)
        .map_err(|e| BgRemovalError::could_not_read(format!("pixel buffer mismatch: {e}")))?;
    Ok((raw, mode, icc))
}

/// Rotate/flip `(h, w, c)` pixels so that EXIF orientation 1 holds afterwards
#[must_use]
pub fn apply_orientation(pixels: Array3<u8>, orientation: u32) -> Array3<u8> {
    if !(2..=8).contains(&orientation) {
        return pixels;
    }

    let view = pixels.view();
    let transposed = pixels.view().permuted_axes([1, 0, 2]);
    let oriented = match orientation {
        2 => view.slice_move(s![.., ..;-1, ..]),
        3 => view.slice_move(s![..;-1, ..;-1, ..]),
        4 => view.slice_move(s![..;-1, .., ..]),
        5 => transposed,
        6 => transposed.slice_move(s![.., ..;-1, ..]),
        7 => transposed.slice_move(s![..;-1, ..;-1, ..]),
        _ => transposed.slice_move(s![..;-1, .., ..]),
    };
    oriented.as_standard_layout().into_owned()
}

/// Derive the working RGB plane (white matte under any alpha) and the alpha plane
pub(crate) fn split_planes(raw: &Array3<u8>, mode: ColorMode) -> (Array3<u8>, Option<Array2<u8>>) {
    let (height, width, _) = raw.dim();

    let rgb = match mode {
        ColorMode::L | ColorMode::La => {
            let gray = raw.index_axis(Axis(2), 0);
            let mut rgb = Array3::<u8>::zeros((height, width, 3));
            for c in 0..3 {
                rgb.index_axis_mut(Axis(2), c).assign(&gray);
            }
            rgb
        },
        ColorMode::Rgb | ColorMode::Rgba => raw.slice(s![.., .., ..3]).to_owned(),
        ColorMode::Cmyk => cmyk_to_rgb(raw.view()),
    };

    if !mode.has_alpha() {
        return (rgb, None);
    }

    let alpha = raw.index_axis(Axis(2), mode.channels() - 1).to_owned();
    let mut matted = rgb;
    Zip::from(matted.rows_mut())
        .and(&alpha)
        .for_each(|mut px, &a| {
            let a = u32::from(a);
            for v in px.iter_mut() {
                *v = ((u32::from(*v) * a + 255 * (255 - a) + 127) / 255) as u8;
            }
        });
    (matted, Some(alpha))
}
