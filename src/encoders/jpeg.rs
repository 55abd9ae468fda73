//! JPEG encoder for grayscale, RGB and CMYK pixels

use crate::error::{BgRemovalError, Result};
use crate::types::Dpi;
use jpeg_encoder::{ColorType, Density, Encoder};

/// Pixel layouts written by this encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegColor {
    Luma,
    Rgb,
    Cmyk,
}

impl JpegColor {
    fn color_type(self) -> ColorType {
        match self {
            Self::Luma => ColorType::Luma,
            Self::Rgb => ColorType::Rgb,
            Self::Cmyk => ColorType::Cmyk,
        }
    }
}

/// Encode interleaved 8-bit pixels as baseline JPEG
///
/// The ICC profile is written as (possibly chunked) APP2 segments and the
/// density as JFIF inch units.
pub fn encode_jpeg(
    data: &[u8],
    width: u32,
    height: u32,
    color: JpegColor,
    quality: u8,
    icc: Option<&[u8]>,
    dpi: Option<Dpi>,
) -> Result<Vec<u8>> {
    let (w, h) = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(BgRemovalError::encoding(format!(
                "JPEG cannot hold {width}x{height} pixels"
            )))
        },
    };

    let mut out = Vec::new();
    let mut encoder = Encoder::new(&mut out, quality.clamp(1, 100));
    if let Some(dpi) = dpi {
        let (x, y) = dpi.rounded();
        encoder.set_density(Density::Inch { x, y });
    }
    if let Some(icc) = icc {
        encoder
            .add_icc_profile(icc)
            .map_err(|e| BgRemovalError::encoding(format!("Failed to embed ICC profile: {e}")))?;
    }
    encoder
        .encode(data, w, h, color.color_type())
        .map_err(|e| BgRemovalError::encoding(format!("JPEG encoding failed: {e}")))?;
    Ok(out)
}
