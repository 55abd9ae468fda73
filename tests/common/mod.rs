//! Synthetic fixtures shared by the integration tests
//!
//! Every image is generated in memory so the tests need no data files.

#![allow(dead_code)]

use bgremove_worker::{
    EncodeSettings, MockExtractor, MockMode, RequestPipeline, SemitransparencyStrategy, ServerConfig,
};
use image::{codecs::jpeg::JpegEncoder, ImageFormat, Rgb, RgbImage, RgbaImage};
use std::io::Cursor;
use tempfile::TempDir;

pub const BACKGROUND: Rgb<u8> = Rgb([248, 248, 248]);
pub const SUBJECT: Rgb<u8> = Rgb([180, 30, 40]);

/// Flat background with a solid subject at `x, y, width, height`
pub fn scene(width: u32, height: u32, subject: (u32, u32, u32, u32)) -> RgbImage {
    let (sx, sy, sw, sh) = subject;
    RgbImage::from_fn(width, height, |x, y| {
        if x >= sx && x < sx + sw && y >= sy && y < sy + sh {
            SUBJECT
        } else {
            BACKGROUND
        }
    })
}

pub fn png(image: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn rgba_png(image: &RgbaImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn jpeg(image: &RgbImage) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 95).encode_image(image).unwrap();
    out
}

/// Minimal ICC profile whose header declares `color_space` (e.g. `b"CMYK"`)
pub fn icc_profile(color_space: &[u8; 4]) -> Vec<u8> {
    let mut icc = vec![0u8; 256];
    icc[0..4].copy_from_slice(&256u32.to_be_bytes());
    icc[12..16].copy_from_slice(b"prtr");
    icc[16..20].copy_from_slice(color_space);
    icc[20..24].copy_from_slice(b"Lab ");
    icc[36..40].copy_from_slice(b"acsp");
    for (i, byte) in icc.iter_mut().enumerate().skip(128) {
        *byte = (i % 251) as u8;
    }
    icc
}

/// CMYK JPEG with an embedded CMYK profile: white paper with an ink block in the middle
pub fn cmyk_jpeg(width: u16, height: u16, icc: &[u8]) -> Vec<u8> {
    let (w, h) = (usize::from(width), usize::from(height));
    let mut pixels = Vec::with_capacity(w * h * 4);
    for y in 0..h {
        for x in 0..w {
            let ink = x > w / 4 && x < w * 3 / 4 && y > h / 4 && y < h * 3 / 4;
            if ink {
                pixels.extend_from_slice(&[10, 200, 180, 20]);
            } else {
                pixels.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    }

    let mut out = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut out, 95);
    encoder.add_icc_profile(icc).unwrap();
    encoder
        .encode(&pixels, width, height, jpeg_encoder::ColorType::Cmyk)
        .unwrap();
    out
}

pub fn pipeline(extractor: MockExtractor) -> RequestPipeline {
    RequestPipeline::new(
        Box::new(extractor),
        SemitransparencyStrategy::Legacy,
        EncodeSettings::default(),
    )
}

pub fn key_pipeline() -> RequestPipeline {
    pipeline(MockExtractor::new(MockMode::BackgroundKey))
}

/// Server configuration with its own marker directory
pub fn server_config(workers: usize, max_failures: u32) -> (ServerConfig, TempDir) {
    let markers = TempDir::new().unwrap();
    let config = ServerConfig::builder()
        .workers(Some(workers))
        .max_consecutive_failures(max_failures)
        .marker_dir(markers.path().join("markers"))
        .build()
        .unwrap();
    (config, markers)
}

/// Decode a response payload as 8-bit grayscale
pub fn decode_alpha(bytes: &[u8]) -> image::GrayImage {
    image::load_from_memory(bytes).unwrap().to_luma8()
}
