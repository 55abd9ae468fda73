//! Container metadata: ICC profiles, pixel density and EXIF orientation
//!
//! The `image` crate hands us pixels and (for most formats) the ICC profile,
//! but not density or orientation, so those are read straight from the
//! container bytes here.

use crate::types::{ColorMode, Dpi};
use ndarray::{Array3, ArrayView3, Zip};

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
const INCH_PER_METER: f64 = 0.0254;
const CM_PER_INCH: f64 = 2.54;

/// Colorspace declared in an ICC profile header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IccColorSpace {
    Rgb,
    Gray,
    Cmyk,
    Other,
}

/// Metadata read from container bytes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerMetadata {
    /// EXIF orientation tag (1-8)
    pub orientation: Option<u32>,
    pub dpi: Option<Dpi>,
}

/// Stateless readers for container metadata
pub struct ProfileExtractor;

impl ProfileExtractor {
    /// Collect orientation and density from whichever source the container carries
    ///
    /// Density priority: JFIF / pHYs first, EXIF resolution as fallback.
    #[must_use]
    pub fn extract(bytes: &[u8]) -> ContainerMetadata {
        let (orientation, exif_dpi) = Self::exif_metadata(bytes);
        let native_dpi = if bytes.starts_with(PNG_SIGNATURE) {
            Self::png_density(bytes)
        } else if bytes.starts_with(&[0xFF, 0xD8]) {
            Self::jfif_density(bytes)
        } else {
            None
        };

        ContainerMetadata {
            orientation,
            dpi: native_dpi.or(exif_dpi),
        }
    }

    /// EXIF orientation and resolution, if the container has an EXIF block
    #[must_use]
    pub fn exif_metadata(bytes: &[u8]) -> (Option<u32>, Option<Dpi>) {
        let mut cursor = std::io::Cursor::new(bytes);
        let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) else {
            return (None, None);
        };

        let orientation = exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .filter(|v| (1..=8).contains(v));

        let unit = exif
            .get_field(exif::Tag::ResolutionUnit, exif::In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .unwrap_or(2);

        let rational = |tag: exif::Tag| -> Option<f64> {
            let field = exif.get_field(tag, exif::In::PRIMARY)?;
            if let exif::Value::Rational(ref vals) = field.value {
                vals.first()
                    .filter(|r| r.denom != 0)
                    .map(|r| f64::from(r.num) / f64::from(r.denom))
            } else {
                None
            }
        };

        let dpi = match (rational(exif::Tag::XResolution), rational(exif::Tag::YResolution)) {
            (Some(x), Some(y)) if x > 0.0 && y > 0.0 => match unit {
                2 => Some(Dpi::new(x, y)),
                3 => Some(Dpi::new(x * CM_PER_INCH, y * CM_PER_INCH)),
                _ => None,
            },
            _ => None,
        };

        (orientation, dpi)
    }

    /// Density from the JFIF APP0 segment
    #[must_use]
    pub fn jfif_density(bytes: &[u8]) -> Option<Dpi> {
        let mut pos = 2;
        while pos + 4 <= bytes.len() {
            if bytes.get(pos) != Some(&0xFF) {
                return None;
            }
            let marker = *bytes.get(pos + 1)?;
            // Entropy-coded data follows SOS, no more APP segments after it
            if marker == 0xDA {
                return None;
            }
            let length = usize::from(u16::from_be_bytes([*bytes.get(pos + 2)?, *bytes.get(pos + 3)?]));
            let segment = bytes.get(pos + 4..pos + 2 + length)?;

            if marker == 0xE0 && segment.starts_with(b"JFIF\0") && segment.len() >= 12 {
                let units = segment[7];
                let x = f64::from(u16::from_be_bytes([segment[8], segment[9]]));
                let y = f64::from(u16::from_be_bytes([segment[10], segment[11]]));
                return match units {
                    1 if x > 0.0 && y > 0.0 => Some(Dpi::new(x, y)),
                    2 if x > 0.0 && y > 0.0 => Some(Dpi::new(x * CM_PER_INCH, y * CM_PER_INCH)),
                    _ => None,
                };
            }
            pos += 2 + length;
        }
        None
    }

    /// Density from the PNG `pHYs` chunk (only the metre unit carries a physical size)
    #[must_use]
    pub fn png_density(bytes: &[u8]) -> Option<Dpi> {
        let mut pos = PNG_SIGNATURE.len();
        while pos + 8 <= bytes.len() {
            let length = u32::from_be_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?) as usize;
            let chunk_type = bytes.get(pos + 4..pos + 8)?;
            if chunk_type == b"IDAT" || chunk_type == b"IEND" {
                return None;
            }
            if chunk_type == b"pHYs" {
                let data = bytes.get(pos + 8..pos + 8 + length)?;
                let x = u32::from_be_bytes(data.get(0..4)?.try_into().ok()?);
                let y = u32::from_be_bytes(data.get(4..8)?.try_into().ok()?);
                let unit = *data.get(8)?;
                return (unit == 1 && x > 0 && y > 0).then(|| {
                    Dpi::new(
                        f64::from(x) * INCH_PER_METER,
                        f64::from(y) * INCH_PER_METER,
                    )
                });
            }
            pos += 12 + length;
        }
        None
    }

    /// Colorspace signature from an ICC header (bytes 16..20)
    #[must_use]
    pub fn icc_color_space(icc: &[u8]) -> IccColorSpace {
        match icc.get(16..20) {
            Some(b"RGB ") => IccColorSpace::Rgb,
            Some(b"GRAY") => IccColorSpace::Gray,
            Some(b"CMYK") => IccColorSpace::Cmyk,
            _ => IccColorSpace::Other,
        }
    }

    /// Whether `icc` may be embedded in an image encoded in `mode`
    #[must_use]
    pub fn icc_matches_mode(icc: &[u8], mode: ColorMode) -> bool {
        match Self::icc_color_space(icc) {
            IccColorSpace::Rgb => mode.is_rgb(),
            IccColorSpace::Gray => matches!(mode, ColorMode::L | ColorMode::La),
            IccColorSpace::Cmyk => mode == ColorMode::Cmyk,
            IccColorSpace::Other => false,
        }
    }
}

/// Naive CMYK to RGB (no colour management)
#[must_use]
pub fn cmyk_to_rgb(cmyk: ArrayView3<'_, u8>) -> Array3<u8> {
    let (h, w, _) = cmyk.dim();
    let mut rgb = Array3::<u8>::zeros((h, w, 3));
    Zip::from(rgb.rows_mut()).and(cmyk.rows()).for_each(|mut dst, src| {
        let k = 255 - u32::from(src[3]);
        for c in 0..3 {
            dst[c] = ((255 - u32::from(src[c])) * k / 255) as u8;
        }
    });
    rgb
}

/// Naive RGB to CMYK with full black extraction
#[must_use]
pub fn rgb_to_cmyk(rgb: ArrayView3<'_, u8>) -> Array3<u8> {
    let (h, w, _) = rgb.dim();
    let mut cmyk = Array3::<u8>::zeros((h, w, 4));
    Zip::from(cmyk.rows_mut()).and(rgb.rows()).for_each(|mut dst, src| {
        let max = u32::from(src[0].max(src[1]).max(src[2]));
        dst[3] = (255 - max) as u8;
        if max > 0 {
            for c in 0..3 {
                dst[c] = ((max - u32::from(src[c])) * 255 / max) as u8;
            }
        }
    });
    cmyk
}

/// ITU-R 601 luma
#[must_use]
pub fn rgb_to_luma(rgb: ArrayView3<'_, u8>) -> Array3<u8> {
    let (h, w, _) = rgb.dim();
    let mut luma = Array3::<u8>::zeros((h, w, 1));
    Zip::from(luma.rows_mut()).and(rgb.rows()).for_each(|mut dst, src| {
        let v = 299 * u32::from(src[0]) + 587 * u32::from(src[1]) + 114 * u32::from(src[2]);
        dst[0] = ((v + 500) / 1000) as u8;
    });
    luma
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icc_header(space: &[u8; 4]) -> Vec<u8> {
        let mut icc = vec![0u8; 128];
        icc[16..20].copy_from_slice(space);
        icc
    }

    #[test]
    fn test_icc_color_space_detection() {
        assert_eq!(ProfileExtractor::icc_color_space(&icc_header(b"CMYK")), IccColorSpace::Cmyk);
        assert_eq!(ProfileExtractor::icc_color_space(&icc_header(b"RGB ")), IccColorSpace::Rgb);
        assert_eq!(ProfileExtractor::icc_color_space(&[1, 2, 3]), IccColorSpace::Other);
    }

    #[test]
    fn test_icc_mode_matching() {
        let cmyk = icc_header(b"CMYK");
        assert!(ProfileExtractor::icc_matches_mode(&cmyk, ColorMode::Cmyk));
        assert!(!ProfileExtractor::icc_matches_mode(&cmyk, ColorMode::Rgb));
        let rgb = icc_header(b"RGB ");
        assert!(ProfileExtractor::icc_matches_mode(&rgb, ColorMode::Rgba));
    }

    #[test]
    fn test_jfif_density() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        jpeg.extend_from_slice(b"JFIF\0");
        jpeg.extend_from_slice(&[1, 1, 1, 0x01, 0x2C, 0x00, 0x48, 0, 0]);
        jpeg.extend_from_slice(&[0xFF, 0xDA]);
        let dpi = ProfileExtractor::jfif_density(&jpeg).unwrap();
        assert_eq!(dpi.rounded(), (300, 72));
    }

    #[test]
    fn test_garbage_has_no_metadata() {
        let meta = ProfileExtractor::extract(b"definitely not an image");
        assert_eq!(meta, ContainerMetadata::default());
    }

    #[test]
    fn test_cmyk_roundtrip_primaries() {
        let mut rgb = Array3::<u8>::zeros((1, 3, 3));
        rgb[[0, 0, 0]] = 255;
        rgb[[0, 1, 1]] = 255;
        rgb[[0, 2, 0]] = 255;
        rgb[[0, 2, 1]] = 255;
        rgb[[0, 2, 2]] = 255;
        let back = cmyk_to_rgb(rgb_to_cmyk(rgb.view()).view());
        assert_eq!(back, rgb);
    }

    #[test]
    fn test_luma_of_white_and_black() {
        let mut rgb = Array3::<u8>::zeros((1, 2, 3));
        rgb.slice_mut(ndarray::s![0, 0, ..]).fill(255);
        let luma = rgb_to_luma(rgb.view());
        assert_eq!(luma[[0, 0, 0]], 255);
        assert_eq!(luma[[0, 1, 0]], 0);
    }
}
