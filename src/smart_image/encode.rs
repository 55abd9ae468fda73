//! Re-encoding an image state into its output containers

use super::SmartAlphaImage;
use crate::color_profile::{rgb_to_cmyk, rgb_to_luma, ProfileExtractor};
use crate::config::{EncodeFormat, EncodeSettings};
use crate::encoders::{encode_jpeg, encode_png, zip_entries, JpegColor, PngColor};
use crate::error::Result;
use crate::types::ColorMode;
use ndarray::{Array3, Axis, Zip};

impl SmartAlphaImage {
    /// Encode the current state; read-only, so it may be called repeatedly
    pub fn encode(&self, format: EncodeFormat, settings: &EncodeSettings) -> Result<Vec<u8>> {
        let _span = tracing::debug_span!("encode", %format).entered();
        match format {
            EncodeFormat::Png => self.encode_png(),
            EncodeFormat::Jpeg => self.encode_jpeg(settings),
            EncodeFormat::JpegAlpha => self.encode_alpha_jpeg(settings),
            EncodeFormat::JpegColor => self.encode_color_jpeg(settings),
            EncodeFormat::PngAlpha => self.encode_alpha_png(),
            EncodeFormat::Zip => self.zip(settings),
        }
    }

    /// `color.jpg` (original colour mode) plus `alpha.png` (grayscale), stored uncompressed
    pub fn zip(&self, settings: &EncodeSettings) -> Result<Vec<u8>> {
        let color = self.encode_jpeg(settings)?;
        let alpha = self.encode_alpha_png()?;
        zip_entries(&[("color.jpg", color.as_slice()), ("alpha.png", alpha.as_slice())])
    }

    fn encode_png(&self) -> Result<Vec<u8>> {
        let mut rgba = self.rgba()?;
        // Fully transparent colour is invisible; zeros compress better
        for mut px in rgba.rows_mut() {
            if px[3] == 0 {
                px.fill(0);
            }
        }

        let icc = self.icc_profile().filter(|_| self.mode.is_rgb());
        let data = rgba.as_standard_layout();
        encode_png(
            data.as_slice().unwrap_or_default(),
            self.width,
            self.height,
            PngColor::Rgba,
            icc,
            self.dpi,
        )
    }

    fn encode_alpha_png(&self) -> Result<Vec<u8>> {
        let alpha = self.require_alpha()?.as_standard_layout();
        encode_png(
            alpha.as_slice().unwrap_or_default(),
            self.width,
            self.height,
            PngColor::Luma,
            None,
            self.dpi,
        )
    }

    fn encode_alpha_jpeg(&self, settings: &EncodeSettings) -> Result<Vec<u8>> {
        let alpha = self.require_alpha()?.as_standard_layout();
        encode_jpeg(
            alpha.as_slice().unwrap_or_default(),
            self.width,
            self.height,
            JpegColor::Luma,
            settings.jpeg_quality,
            None,
            self.dpi,
        )
    }

    fn encode_color_jpeg(&self, settings: &EncodeSettings) -> Result<Vec<u8>> {
        let icc = self
            .icc_profile()
            .filter(|icc| ProfileExtractor::icc_matches_mode(icc, ColorMode::Rgb));
        let rgb = self.rgb.as_standard_layout();
        encode_jpeg(
            rgb.as_slice().unwrap_or_default(),
            self.width,
            self.height,
            JpegColor::Rgb,
            settings.jpeg_quality,
            icc,
            self.dpi,
        )
    }

    /// Colour JPEG converted back to the original mode
    fn encode_jpeg(&self, settings: &EncodeSettings) -> Result<Vec<u8>> {
        let (pixels, color) = match self.mode {
            ColorMode::L | ColorMode::La => (rgb_to_luma(self.rgb.view()), JpegColor::Luma),
            ColorMode::Cmyk => (self.restored_cmyk()?, JpegColor::Cmyk),
            ColorMode::Rgb | ColorMode::Rgba => (self.rgb.clone(), JpegColor::Rgb),
        };
        let icc = self
            .icc_profile()
            .filter(|icc| ProfileExtractor::icc_matches_mode(icc, self.mode));

        let data = pixels.as_standard_layout();
        encode_jpeg(
            data.as_slice().unwrap_or_default(),
            self.width,
            self.height,
            color,
            settings.jpeg_quality,
            icc,
            self.dpi,
        )
    }

    /// CMYK from the working RGB, with original CMYK put back where alpha is 0 or 255
    ///
    /// Pixels that only became opaque through a background underlay keep the
    /// converted colour. Without an ICC profile nothing is restored.
    fn restored_cmyk(&self) -> Result<Array3<u8>> {
        let mut cmyk = rgb_to_cmyk(self.rgb.view());
        if self.icc.is_none() {
            return Ok(cmyk);
        }

        let alpha = self.require_alpha()?;
        let mut restore = alpha.mapv(|a| a == 0 || a == 255);
        if let Some(mask) = &self.pre_background_mask {
            Zip::from(&mut restore).and(mask).for_each(|r, &m| *r &= m);
        }

        Zip::from(cmyk.lanes_mut(Axis(2)))
            .and(self.raw.lanes(Axis(2)))
            .and(&restore)
            .for_each(|mut dst, src, &keep| {
                if keep {
                    dst.assign(&src);
                }
            });
        Ok(cmyk)
    }
}
