//! PNG encoder with ICC profile and density embedding

use crate::error::{BgRemovalError, Result};
use crate::types::Dpi;
use flate2::{write::ZlibEncoder, Compression};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use std::io::Write;

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
const ICC_PROFILE_NAME: &str = "ICC Profile";

/// Pixel layouts written by this encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngColor {
    Luma,
    Rgb,
    Rgba,
}

impl PngColor {
    fn extended(self) -> ExtendedColorType {
        match self {
            Self::Luma => ExtendedColorType::L8,
            Self::Rgb => ExtendedColorType::Rgb8,
            Self::Rgba => ExtendedColorType::Rgba8,
        }
    }
}

/// Encode interleaved 8-bit pixels as PNG with fast compression
pub fn encode_png(
    data: &[u8],
    width: u32,
    height: u32,
    color: PngColor,
    icc: Option<&[u8]>,
    dpi: Option<Dpi>,
) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    PngEncoder::new_with_quality(&mut png, CompressionType::Fast, FilterType::Adaptive)
        .write_image(data, width, height, color.extended())?;

    let mut chunks = Vec::new();
    if let Some(dpi) = dpi {
        chunks.push(create_phys_chunk(dpi)?);
    }
    if let Some(icc) = icc {
        chunks.push(create_iccp_chunk(icc, ICC_PROFILE_NAME)?);
    }
    if chunks.is_empty() {
        return Ok(png);
    }
    insert_chunks_before_idat(&png, &chunks)
}

/// Copy `png_data`, splicing `extra` chunks in front of the first `IDAT`
fn insert_chunks_before_idat(png_data: &[u8], extra: &[Vec<u8>]) -> Result<Vec<u8>> {
    if png_data.get(0..8) != Some(PNG_SIGNATURE.as_slice()) {
        return Err(BgRemovalError::encoding("Invalid PNG signature"));
    }

    let mut result = Vec::with_capacity(png_data.len() + extra.iter().map(Vec::len).sum::<usize>());
    result.extend_from_slice(PNG_SIGNATURE);
    let mut pos = PNG_SIGNATURE.len();
    let mut inserted = false;

    while pos + 8 <= png_data.len() {
        let length_bytes: [u8; 4] = png_data
            .get(pos..pos + 4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| BgRemovalError::encoding("Truncated PNG: incomplete chunk length"))?;
        let chunk_length = u32::from_be_bytes(length_bytes) as usize;
        let chunk_type = png_data
            .get(pos + 4..pos + 8)
            .ok_or_else(|| BgRemovalError::encoding("Truncated PNG: incomplete chunk type"))?;

        if chunk_type == b"IDAT" && !inserted {
            for chunk in extra {
                result.extend_from_slice(chunk);
            }
            inserted = true;
        }

        let chunk = png_data
            .get(pos..pos + 12 + chunk_length)
            .ok_or_else(|| BgRemovalError::encoding("Truncated PNG: incomplete chunk"))?;
        result.extend_from_slice(chunk);
        pos += chunk.len();

        if chunk_type == b"IEND" {
            break;
        }
    }

    if !inserted {
        return Err(BgRemovalError::encoding("Could not find IDAT chunk"));
    }
    Ok(result)
}

/// Length + type + data + CRC over type and data
fn build_chunk(chunk_type: &[u8; 4], data: &[u8]) -> Result<Vec<u8>> {
    let length: u32 = data
        .len()
        .try_into()
        .map_err(|_| BgRemovalError::encoding("PNG chunk data too large"))?;

    let mut chunk = Vec::with_capacity(data.len() + 12);
    chunk.extend_from_slice(&length.to_be_bytes());
    chunk.extend_from_slice(chunk_type);
    chunk.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    chunk.extend_from_slice(&hasher.finalize().to_be_bytes());
    Ok(chunk)
}

/// Profile name + null + compression method + zlib-compressed profile
fn create_iccp_chunk(icc_data: &[u8], profile_name: &str) -> Result<Vec<u8>> {
    if profile_name.is_empty() || profile_name.len() > 79 {
        return Err(BgRemovalError::encoding("ICC profile name must be 1-79 bytes"));
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(icc_data)
        .map_err(|e| BgRemovalError::encoding(format!("Failed to compress ICC data: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| BgRemovalError::encoding(format!("Failed to finish ICC compression: {e}")))?;

    let mut data = Vec::with_capacity(profile_name.len() + 2 + compressed.len());
    data.extend_from_slice(profile_name.as_bytes());
    data.push(0);
    data.push(0);
    data.extend_from_slice(&compressed);

    log::debug!(
        "Created iCCP chunk: original_size={}, compressed_size={}",
        icc_data.len(),
        compressed.len()
    );
    build_chunk(b"iCCP", &data)
}

/// Pixels per metre in both axes, unit byte 1 (metre)
fn create_phys_chunk(dpi: Dpi) -> Result<Vec<u8>> {
    let to_ppm = |v: f64| (v / 0.0254).round().clamp(1.0, f64::from(u32::MAX)) as u32;
    let mut data = Vec::with_capacity(9);
    data.extend_from_slice(&to_ppm(dpi.x).to_be_bytes());
    data.extend_from_slice(&to_ppm(dpi.y).to_be_bytes());
    data.push(1);
    build_chunk(b"pHYs", &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color_profile::ProfileExtractor;
    use image::codecs::png::PngDecoder;
    use image::ImageDecoder;

    #[test]
    fn test_plain_png_decodes() {
        let data = vec![128u8; 4 * 3 * 4];
        let png = encode_png(&data, 4, 3, PngColor::Rgba, None, None).unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (4, 3));
    }

    #[test]
    fn test_icc_and_density_are_embedded() {
        let icc = vec![7u8; 300];
        let data = vec![10u8; 5 * 5];
        let png = encode_png(&data, 5, 5, PngColor::Luma, Some(&icc), Some(Dpi::new(300.0, 300.0)))
            .unwrap();

        let mut decoder = PngDecoder::new(std::io::Cursor::new(&png)).unwrap();
        assert_eq!(decoder.icc_profile().unwrap(), Some(icc));

        let dpi = ProfileExtractor::png_density(&png).unwrap();
        assert_eq!(dpi.rounded(), (300, 300));
    }

    #[test]
    fn test_rejects_non_png() {
        assert!(insert_chunks_before_idat(b"GIF89a....", &[]).is_err());
    }

    #[test]
    fn test_chunk_crc_matches_reference() {
        // IEND has a fixed, well-known CRC
        let chunk = build_chunk(b"IEND", &[]).unwrap();
        assert_eq!(&chunk[8..12], &[0xAE, 0x42, 0x60, 0x82]);
    }
}
