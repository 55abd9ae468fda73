//! `SmartAlphaImage`: one image's state from decode to encode
//!
//! The state keeps three aligned planes:
//!
//! - `raw`: pixels in the original colour mode (L, LA, RGB, RGBA or CMYK),
//!   only touched by geometric postprocessing, used to restore CMYK colour
//! - `rgb`: the working RGB plane, matted over white where the source had alpha
//! - `alpha`: unset until decoded from the source or assigned with [`SmartAlphaImage::set`]
//!
//! Provenance (ICC profile, DPI, EXIF orientation, original mode) is captured
//! once at decode and read back by the encoders.

mod decode;
mod encode;
mod postprocess;

pub use decode::apply_orientation;
pub use postprocess::PostProcess;

use crate::error::{BgRemovalError, Result};
use crate::pixelops::{self, uncrop, FillMode, Underlay};
use crate::types::{BackgroundColor, ColorMode, Dpi, Rect};
use ndarray::{concatenate, s, Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};

/// Buffer layouts readable with [`SmartAlphaImage::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Rgb,
    Bgr,
    Bgra,
    Alpha,
}

/// Buffer layouts writable with [`SmartAlphaImage::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Colour and alpha, `(h, w, 4)` in BGRA order
    Bgra,
    /// Alpha only, `(h, w, 1)`
    Alpha,
}

/// What to composite under the foreground
#[derive(Debug, Clone, Copy)]
pub enum Background<'a> {
    Color(BackgroundColor),
    Image(&'a SmartAlphaImage),
}

/// Mutable image state carried through one request
#[derive(Debug, Clone)]
pub struct SmartAlphaImage {
    raw: Array3<u8>,
    rgb: Array3<u8>,
    alpha: Option<Array2<u8>>,

    icc: Option<Vec<u8>>,
    mode: ColorMode,
    dpi: Option<Dpi>,
    exif_orientation: Option<u32>,

    width: u32,
    height: u32,
    width_original: u32,
    height_original: u32,
    width_pre_limit: u32,
    height_pre_limit: u32,
    scale_pre_limit: f64,

    pre_background_mask: Option<Array2<bool>>,
    foreground_bbox: Option<Rect>,
}

impl SmartAlphaImage {
    /// Decode an encoded container, downscaling to at most `megapixel_limit` megapixels
    ///
    /// # Errors
    /// `CouldNotReadImage` for empty, truncated or unsupported input.
    #[tracing::instrument(level = "debug", skip(bytes), fields(len = bytes.len()))]
    pub fn decode(bytes: &[u8], megapixel_limit: Option<f64>) -> Result<Self> {
        let decoded = decode::decode(bytes, megapixel_limit)?;
        let (height, width, _) = decoded.rgb.dim();
        let (width, height) = (width as u32, height as u32);

        log::debug!(
            "Decoded {}x{} {} image (pre-limit {}x{}, icc: {}, dpi: {:?})",
            width,
            height,
            decoded.mode,
            decoded.pre_limit.0,
            decoded.pre_limit.1,
            decoded.icc.is_some(),
            decoded.dpi
        );

        Ok(Self {
            raw: decoded.raw,
            rgb: decoded.rgb,
            alpha: decoded.alpha,
            icc: decoded.icc,
            mode: decoded.mode,
            dpi: decoded.dpi,
            exif_orientation: decoded.orientation,
            width,
            height,
            width_original: width,
            height_original: height,
            width_pre_limit: decoded.pre_limit.0,
            height_pre_limit: decoded.pre_limit.1,
            scale_pre_limit: decoded.scale,
            pre_background_mask: None,
            foreground_bbox: None,
        })
    }

    /// Build a state directly from pixels in `mode`, without container metadata
    pub fn from_pixels(raw: Array3<u8>, mode: ColorMode) -> Result<Self> {
        let (height, width, channels) = raw.dim();
        if channels != mode.channels() {
            return Err(BgRemovalError::processing(format!(
                "{mode} needs {} channels, got {channels}",
                mode.channels()
            )));
        }
        if width == 0 || height == 0 {
            return Err(BgRemovalError::could_not_read("image has no pixels"));
        }

        let (rgb, alpha) = decode::split_planes(&raw, mode);
        let (width, height) = (width as u32, height as u32);
        Ok(Self {
            raw,
            rgb,
            alpha,
            icc: None,
            mode,
            dpi: None,
            exif_orientation: None,
            width,
            height,
            width_original: width,
            height_original: height,
            width_pre_limit: width,
            height_pre_limit: height,
            scale_pre_limit: 1.0,
            pre_background_mask: None,
            foreground_bbox: None,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Width after decode, before any postprocessing
    #[must_use]
    pub fn width_original(&self) -> u32 {
        self.width_original
    }

    #[must_use]
    pub fn height_original(&self) -> u32 {
        self.height_original
    }

    /// Width before the megapixel limit was applied
    #[must_use]
    pub fn width_pre_limit(&self) -> u32 {
        self.width_pre_limit
    }

    #[must_use]
    pub fn height_pre_limit(&self) -> u32 {
        self.height_pre_limit
    }

    /// Factor applied to the pre-limit size at decode (1.0 when untouched)
    #[must_use]
    pub fn scale_pre_limit(&self) -> f64 {
        self.scale_pre_limit
    }

    #[must_use]
    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    #[must_use]
    pub fn icc_profile(&self) -> Option<&[u8]> {
        self.icc.as_deref()
    }

    #[must_use]
    pub fn dpi(&self) -> Option<Dpi> {
        self.dpi
    }

    #[must_use]
    pub fn exif_orientation(&self) -> Option<u32> {
        self.exif_orientation
    }

    #[must_use]
    pub fn alpha(&self) -> Option<ArrayView2<'_, u8>> {
        self.alpha.as_ref().map(Array2::view)
    }

    #[must_use]
    pub fn rgb(&self) -> ArrayView3<'_, u8> {
        self.rgb.view()
    }

    /// Pixels in the original colour mode
    #[must_use]
    pub fn raw(&self) -> ArrayView3<'_, u8> {
        self.raw.view()
    }

    /// Pixels that were fully opaque right before the last background underlay
    #[must_use]
    pub fn pre_background_mask(&self) -> Option<ArrayView2<'_, bool>> {
        self.pre_background_mask.as_ref().map(Array2::view)
    }

    /// True iff alpha is set and some pixel is not fully opaque
    #[must_use]
    pub fn has_transparency(&self) -> bool {
        self.alpha
            .as_ref()
            .is_some_and(|alpha| alpha.iter().any(|&a| a < 255))
    }

    /// Top-left pixel is pure red (`R >= 254, G == 0, B == 0`) in the working RGB
    ///
    /// Clients plant this marker to trace individual requests through the logs.
    #[must_use]
    pub fn signal_beacon(&self) -> bool {
        self.rgb.dim().0 > 0
            && self.rgb.dim().1 > 0
            && self.rgb[[0, 0, 0]] >= 254
            && self.rgb[[0, 0, 1]] == 0
            && self.rgb[[0, 0, 2]] == 0
    }

    fn require_alpha(&self) -> Result<&Array2<u8>> {
        self.alpha.as_ref().ok_or(BgRemovalError::AlphaUnset)
    }

    /// Validate a signed crop rectangle against the current bounds
    ///
    /// # Errors
    /// `InvalidCrop` unless `x, y >= 0`, `width, height > 0` and the rectangle fits.
    pub fn check_crop(&self, x: i64, y: i64, width: i64, height: i64) -> Result<Rect> {
        let fits = x >= 0
            && y >= 0
            && width > 0
            && height > 0
            && x + width <= i64::from(self.width)
            && y + height <= i64::from(self.height);
        if !fits {
            return Err(BgRemovalError::invalid_crop(
                x,
                y,
                width,
                height,
                (self.width, self.height),
            ));
        }
        Ok(Rect::new(x as u32, y as u32, width as u32, height as u32))
    }

    fn validate_crop(&self, rect: Rect) -> Result<Rect> {
        self.check_crop(
            i64::from(rect.x),
            i64::from(rect.y),
            i64::from(rect.width),
            i64::from(rect.height),
        )
    }

    /// Working RGB plus alpha as one `(h, w, 4)` buffer
    pub fn rgba(&self) -> Result<Array3<u8>> {
        let alpha = self.require_alpha()?;
        stack_alpha(self.rgb.view(), alpha.view())
    }

    /// Copy out a buffer in `mode`, optionally restricted to `crop`
    ///
    /// # Errors
    /// - `InvalidCrop` if `crop` does not fit the current bounds
    /// - `AlphaUnset` for `Bgra`/`Alpha` before alpha exists
    pub fn get(&self, mode: ViewMode, crop: Option<Rect>) -> Result<Array3<u8>> {
        let rect = match crop {
            Some(rect) => self.validate_crop(rect)?,
            None => Rect::new(0, 0, self.width, self.height),
        };
        let ys = rect.y as usize..rect.bottom() as usize;
        let xs = rect.x as usize..rect.right() as usize;

        let out = match mode {
            ViewMode::Rgb => self.rgb.slice(s![ys, xs, ..]).to_owned(),
            ViewMode::Bgr => self
                .rgb
                .slice(s![ys, xs, ..;-1])
                .as_standard_layout()
                .into_owned(),
            ViewMode::Bgra => {
                let alpha = self.require_alpha()?;
                let bgr = self.rgb.slice(s![ys.clone(), xs.clone(), ..;-1]);
                stack_alpha(bgr, alpha.slice(s![ys, xs]))?
            },
            ViewMode::Alpha => {
                let alpha = self.require_alpha()?;
                alpha.slice(s![ys, xs]).insert_axis(Axis(2)).to_owned()
            },
        };
        Ok(out)
    }

    /// Write `buffer` back into the state
    ///
    /// With `crop`, the buffer covers that rectangle and is zero-padded back
    /// to the full frame first. With `limit_alpha`, the new alpha is clamped
    /// to never exceed the alpha already present.
    ///
    /// # Errors
    /// `InvalidCrop` for a bad rectangle, `Processing` for a shape mismatch.
    pub fn set(
        &mut self,
        buffer: ArrayView3<'_, u8>,
        mode: SetMode,
        limit_alpha: bool,
        crop: Option<Rect>,
    ) -> Result<()> {
        let channels = match mode {
            SetMode::Bgra => 4,
            SetMode::Alpha => 1,
        };
        let expected = match crop {
            Some(rect) => {
                let rect = self.validate_crop(rect)?;
                (rect.height as usize, rect.width as usize, channels)
            },
            None => (self.height as usize, self.width as usize, channels),
        };
        if buffer.dim() != expected {
            return Err(BgRemovalError::processing(format!(
                "set({mode:?}) expected buffer {expected:?}, got {:?}",
                buffer.dim()
            )));
        }

        let full = match crop {
            Some(rect) => uncrop(buffer, rect.x, rect.y, self.width, self.height),
            None => buffer.to_owned(),
        };

        let mut new_alpha = full.index_axis(Axis(2), channels - 1).to_owned();
        if limit_alpha {
            if let Some(old) = &self.alpha {
                Zip::from(&mut new_alpha).and(old).for_each(|new, &old| *new = (*new).min(old));
            }
        }

        if mode == SetMode::Bgra {
            self.rgb = full
                .slice(s![.., .., ..3;-1])
                .as_standard_layout()
                .into_owned();
        }
        self.alpha = Some(new_alpha);
        self.foreground_bbox = None;
        Ok(())
    }

    /// Fill transparent holes inside the subject
    ///
    /// The fill sees `precolorcorrected` (or the current RGB); afterwards,
    /// every pixel whose alpha the fill left alone gets its current RGB back.
    pub fn fill_holes(
        &mut self,
        fill_value: u8,
        mode: FillMode,
        average: bool,
        precolorcorrected: Option<ArrayView3<'_, u8>>,
    ) -> Result<()> {
        let alpha = self.require_alpha()?.clone();
        let source = match precolorcorrected {
            Some(view) => view.reborrow(),
            None => self.rgb.view(),
        };
        if source.dim() != self.rgb.dim() {
            return Err(BgRemovalError::processing("pre-correction RGB has a different shape"));
        }

        let mut rgba = stack_alpha(source, alpha.view())?;
        pixelops::fill_holes(&mut rgba, fill_value, mode, average);

        let filled_alpha = rgba.index_axis(Axis(2), 3).to_owned();
        let mut filled_rgb = rgba.slice(s![.., .., ..3]).to_owned();
        Zip::from(filled_rgb.rows_mut())
            .and(self.rgb.rows())
            .and(&alpha)
            .and(&filled_alpha)
            .for_each(|mut dst, current, &before, &after| {
                if before == after {
                    dst.assign(&current);
                }
            });

        self.rgb = filled_rgb;
        self.alpha = Some(filled_alpha);
        self.foreground_bbox = None;
        Ok(())
    }

    /// Tight box around `alpha > 0`, cached until the next mutation
    ///
    /// Returns `None` for a fully transparent alpha.
    pub fn foreground_bounding_box(&mut self) -> Result<Option<Rect>> {
        if self.foreground_bbox.is_none() {
            self.foreground_bbox = pixelops::bounding_box(self.require_alpha()?.view());
        }
        Ok(self.foreground_bbox)
    }

    /// Apply one geometric operator to the RGB, raw and alpha planes alike
    ///
    /// A fully transparent alpha has no subject to anchor on and is left untouched.
    pub fn postprocess(&mut self, op: &PostProcess) -> Result<()> {
        let Some(bbox) = self.foreground_bounding_box()? else {
            log::warn!("⚠️ Skipping {} on an empty alpha mask", op.name());
            return Ok(());
        };
        let _span = tracing::debug_span!("postprocess", op = op.name(), bbox = %bbox).entered();

        let alpha = self.require_alpha()?.view().insert_axis(Axis(2));
        let new_alpha = op.apply(alpha, bbox)?.index_axis_move(Axis(2), 0);
        let new_rgb = op.apply(self.rgb.view(), bbox)?;
        let new_raw = op.apply(self.raw.view(), bbox)?;
        let new_mask = match &self.pre_background_mask {
            Some(mask) => {
                let mask = mask.mapv(|m| if m { 255u8 } else { 0 }).insert_axis(Axis(2));
                let moved = op.apply(mask.view(), bbox)?.index_axis_move(Axis(2), 0);
                Some(moved.mapv(|v| v >= 128))
            },
            None => None,
        };

        let (height, width, _) = new_rgb.dim();
        log::debug!(
            "{}: {}x{} -> {}x{}",
            op,
            self.width,
            self.height,
            width,
            height
        );

        self.alpha = Some(new_alpha.as_standard_layout().into_owned());
        self.rgb = new_rgb;
        self.raw = new_raw;
        self.pre_background_mask = new_mask;
        self.width = width as u32;
        self.height = height as u32;
        self.foreground_bbox = None;
        Ok(())
    }

    /// Composite the foreground over `background`
    ///
    /// A colour with alpha 0 is a no-op. Otherwise the mask of pixels that
    /// were fully opaque beforehand is kept in `pre_background_mask`.
    pub fn underlay_background(&mut self, background: &Background<'_>) -> Result<()> {
        if let Background::Color(color) = background {
            if color[3] == 0 {
                return Ok(());
            }
        }

        let fg = self.rgba()?;
        let composited = match background {
            Background::Color(color) => pixelops::underlay_background(fg.view(), &Underlay::Color(*color))?,
            Background::Image(other) => {
                let pixels = match other.alpha {
                    Some(ref alpha) => stack_alpha(other.rgb.view(), alpha.view())?,
                    None => other.rgb.clone(),
                };
                let fitted = pixelops::fit_cover(pixels.view(), self.width, self.height)?;
                pixelops::underlay_background(fg.view(), &Underlay::Image(fitted.view()))?
            },
        };

        let opaque_before = self.require_alpha()?.mapv(|a| a == 255);
        self.rgb = composited.slice(s![.., .., ..3]).to_owned();
        self.alpha = Some(composited.index_axis(Axis(2), 3).to_owned());
        self.pre_background_mask = Some(opaque_before);
        self.foreground_bbox = None;
        Ok(())
    }
}

/// `(h, w, 3)` colour + `(h, w)` alpha into `(h, w, 4)` standard layout
fn stack_alpha<'a>(color: ArrayView3<'a, u8>, alpha: ArrayView2<'a, u8>) -> Result<Array3<u8>> {
    concatenate(Axis(2), &[color, alpha.insert_axis(Axis(2))])
        .map_err(|e| BgRemovalError::internal(format!("plane shapes diverged: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixelops::MarginSpec;

    fn gradient(width: usize, height: usize) -> SmartAlphaImage {
        let raw = Array3::from_shape_fn((height, width, 3), |(y, x, c)| (x * 10 + y * 3 + c) as u8);
        SmartAlphaImage::from_pixels(raw, ColorMode::Rgb).unwrap()
    }

    fn bgra_with_alpha(image: &SmartAlphaImage, alpha: u8) -> Array3<u8> {
        let mut buffer = Array3::<u8>::zeros((image.height() as usize, image.width() as usize, 4));
        buffer.slice_mut(s![.., .., ..3]).assign(&image.get(ViewMode::Bgr, None).unwrap());
        buffer.slice_mut(s![.., .., 3]).fill(alpha);
        buffer
    }

    #[test]
    fn test_alpha_starts_unset() {
        let image = gradient(4, 3);
        assert!(image.alpha().is_none());
        assert!(!image.has_transparency());
        assert!(matches!(image.get(ViewMode::Alpha, None), Err(BgRemovalError::AlphaUnset)));
        assert!(matches!(image.get(ViewMode::Bgra, None), Err(BgRemovalError::AlphaUnset)));
    }

    #[test]
    fn test_signal_beacon_needs_pure_red_corner() {
        let mut raw = Array3::<u8>::zeros((2, 2, 3));
        raw[[0, 0, 0]] = 254;
        let image = SmartAlphaImage::from_pixels(raw.clone(), ColorMode::Rgb).unwrap();
        assert!(image.signal_beacon());

        raw[[0, 0, 1]] = 1;
        let image = SmartAlphaImage::from_pixels(raw, ColorMode::Rgb).unwrap();
        assert!(!image.signal_beacon());

        assert!(!gradient(4, 3).signal_beacon());
    }

    #[test]
    fn test_bgr_is_reversed_rgb() {
        let image = gradient(4, 3);
        let rgb = image.get(ViewMode::Rgb, None).unwrap();
        let bgr = image.get(ViewMode::Bgr, None).unwrap();
        assert_eq!(rgb[[1, 2, 0]], bgr[[1, 2, 2]]);
        assert_eq!(rgb[[1, 2, 2]], bgr[[1, 2, 0]]);
    }

    #[test]
    fn test_invalid_crops_rejected() {
        let image = gradient(10, 8);
        for rect in [Rect::new(0, 0, 0, 5), Rect::new(5, 0, 6, 5), Rect::new(0, 4, 10, 5)] {
            assert!(matches!(
                image.get(ViewMode::Rgb, Some(rect)),
                Err(BgRemovalError::InvalidCrop { .. })
            ));
        }
        assert!(image.check_crop(-1, 0, 3, 3).is_err());
        assert!(image.get(ViewMode::Rgb, Some(Rect::new(2, 2, 8, 6))).is_ok());
    }

    #[test]
    fn test_alpha_only_shrinks() {
        let mut image = gradient(6, 6);
        let first = Array3::from_elem((6, 6, 1), 100u8);
        image.set(first.view(), SetMode::Alpha, true, None).unwrap();

        let second = Array3::from_shape_fn((6, 6, 1), |(y, _, _)| if y < 3 { 50 } else { 200 });
        image.set(second.view(), SetMode::Alpha, true, None).unwrap();
        let alpha = image.alpha().unwrap();
        assert_eq!(alpha[[0, 0]], 50);
        assert_eq!(alpha[[5, 0]], 100);

        image.set(second.view(), SetMode::Alpha, false, None).unwrap();
        assert_eq!(image.alpha().unwrap()[[5, 0]], 200);
    }

    #[test]
    fn test_crop_roundtrip_restores_region() {
        let mut image = gradient(12, 9);
        let full = bgra_with_alpha(&image, 255);
        image.set(full.view(), SetMode::Bgra, true, None).unwrap();

        let rect = Rect::new(3, 2, 5, 4);
        let before = image.get(ViewMode::Bgra, None).unwrap();
        let cropped = image.get(ViewMode::Bgra, Some(rect)).unwrap();
        image.set(cropped.view(), SetMode::Bgra, true, Some(rect)).unwrap();
        let after = image.get(ViewMode::Bgra, None).unwrap();

        assert_eq!(
            after.slice(s![2..6, 3..8, ..]),
            before.slice(s![2..6, 3..8, ..])
        );
        assert_eq!(after[[0, 0, 3]], 0);
        assert_eq!(after[[8, 11, 3]], 0);
    }

    #[test]
    fn test_set_rejects_wrong_shape() {
        let mut image = gradient(4, 4);
        let wrong = Array3::<u8>::zeros((3, 4, 1));
        assert!(image.set(wrong.view(), SetMode::Alpha, true, None).is_err());
    }

    #[test]
    fn test_bbox_cached_and_invalidated() {
        let mut image = gradient(10, 10);
        let mut alpha = Array3::<u8>::zeros((10, 10, 1));
        alpha.slice_mut(s![2..5, 3..9, ..]).fill(255);
        image.set(alpha.view(), SetMode::Alpha, false, None).unwrap();
        assert_eq!(image.foreground_bounding_box().unwrap(), Some(Rect::new(3, 2, 6, 3)));

        alpha.fill(0);
        alpha[[7, 7, 0]] = 9;
        image.set(alpha.view(), SetMode::Alpha, false, None).unwrap();
        assert_eq!(image.foreground_bounding_box().unwrap(), Some(Rect::new(7, 7, 1, 1)));
    }

    #[test]
    fn test_crop_subject_keeps_planes_aligned() {
        let mut image = gradient(20, 16);
        let mut alpha = Array3::<u8>::zeros((16, 20, 1));
        alpha.slice_mut(s![4..10, 5..15, ..]).fill(255);
        image.set(alpha.view(), SetMode::Alpha, false, None).unwrap();

        let expected = image.rgb()[[4, 5, 0]];
        image
            .postprocess(&PostProcess::CropSubject(MarginSpec::default()))
            .unwrap();

        assert_eq!((image.width(), image.height()), (10, 6));
        assert_eq!(image.raw().dim(), (6, 10, 3));
        assert_eq!(image.alpha().unwrap().dim(), (6, 10));
        assert_eq!(image.rgb()[[0, 0, 0]], expected);
        assert_eq!((image.width_original(), image.height_original()), (20, 16));
    }

    #[test]
    fn test_postprocess_needs_alpha() {
        let mut image = gradient(5, 5);
        let op = PostProcess::PositionSubject { dx: 0.0, dy: 0.0 };
        assert!(matches!(image.postprocess(&op), Err(BgRemovalError::AlphaUnset)));
    }

    #[test]
    fn test_transparent_background_is_noop() {
        let mut image = gradient(6, 4);
        let alpha = Array3::from_shape_fn((4, 6, 1), |(_, x, _)| (x * 40) as u8);
        image.set(alpha.view(), SetMode::Alpha, false, None).unwrap();
        let (rgb, alpha) = (image.rgb().to_owned(), image.alpha().unwrap().to_owned());

        image.underlay_background(&Background::Color([10, 20, 30, 0])).unwrap();
        assert_eq!(image.rgb(), rgb.view());
        assert_eq!(image.alpha().unwrap(), alpha.view());
        assert!(image.pre_background_mask().is_none());
    }

    #[test]
    fn test_opaque_background_snapshots_mask() {
        let mut image = gradient(4, 1);
        let alpha = Array3::from_shape_vec((1, 4, 1), vec![0, 128, 255, 255]).unwrap();
        image.set(alpha.view(), SetMode::Alpha, false, None).unwrap();

        image.underlay_background(&Background::Color([0, 0, 255, 255])).unwrap();
        assert!(!image.has_transparency());
        assert_eq!(image.rgb()[[0, 0, 2]], 255);
        let mask = image.pre_background_mask().unwrap();
        assert_eq!(mask.iter().copied().collect::<Vec<_>>(), vec![false, false, true, true]);
    }

    #[test]
    fn test_fill_restores_unchanged_pixels() {
        let raw = Array3::from_elem((5, 5, 3), 100u8);
        let mut image = SmartAlphaImage::from_pixels(raw, ColorMode::Rgb).unwrap();
        let mut alpha = Array3::from_elem((5, 5, 1), 255u8);
        alpha[[2, 2, 0]] = 0;
        image.set(alpha.view(), SetMode::Alpha, false, None).unwrap();

        let corrected = Array3::from_elem((5, 5, 3), 40u8);
        image
            .fill_holes(200, FillMode::Car, true, Some(corrected.view()))
            .unwrap();

        let alpha = image.alpha().unwrap();
        assert_eq!(alpha[[2, 2]], 200);
        assert_eq!(image.rgb()[[2, 2, 0]], 40);
        assert_eq!(image.rgb()[[0, 0, 0]], 100);
    }
}
