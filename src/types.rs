//! Plain value types shared by the image state, the pipeline and the wire protocol

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates (`x`, `y` is the top-left corner)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[must_use]
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge
    #[must_use]
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    #[must_use]
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Whether the rectangle is non-empty and lies fully inside a `width`x`height` frame
    #[must_use]
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Tight bounding box of the non-transparent foreground
pub type BoundingBox = Rect;

/// Colorspace of the decoded container, kept for faithful re-encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    /// 8-bit grayscale
    L,
    /// Grayscale with alpha
    La,
    Rgb,
    Rgba,
    /// Four-channel print colorspace (JPEG only)
    Cmyk,
}

impl ColorMode {
    /// Number of channels in the raw buffer for this mode
    #[must_use]
    pub fn channels(self) -> usize {
        match self {
            Self::L => 1,
            Self::La => 2,
            Self::Rgb => 3,
            Self::Rgba | Self::Cmyk => 4,
        }
    }

    #[must_use]
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::La | Self::Rgba)
    }

    /// Whether an ICC profile attached to this mode describes an RGB space
    #[must_use]
    pub fn is_rgb(self) -> bool {
        matches!(self, Self::Rgb | Self::Rgba)
    }
}

impl std::fmt::Display for ColorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::L => "L",
            Self::La => "LA",
            Self::Rgb => "RGB",
            Self::Rgba => "RGBA",
            Self::Cmyk => "CMYK",
        };
        f.write_str(name)
    }
}

/// Pixel density in dots per inch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dpi {
    pub x: f64,
    pub y: f64,
}

impl Dpi {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Density rounded for container fields that store whole numbers
    #[must_use]
    pub fn rounded(&self) -> (u16, u16) {
        let clamp = |v: f64| v.round().clamp(1.0, f64::from(u16::MAX)) as u16;
        (clamp(self.x), clamp(self.y))
    }
}

/// One side of a crop margin
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarginValue {
    /// Pixels, or percent of the subject size when `relative`
    pub value: f64,
    #[serde(default)]
    pub relative: bool,
}

impl MarginValue {
    #[must_use]
    pub fn pixels(value: f64) -> Self {
        Self {
            value,
            relative: false,
        }
    }

    #[must_use]
    pub fn percent(value: f64) -> Self {
        Self {
            value,
            relative: true,
        }
    }
}

/// Four-sided crop margin around the subject bounding box
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CropMargin {
    #[serde(default)]
    pub top: MarginValue,
    #[serde(default)]
    pub right: MarginValue,
    #[serde(default)]
    pub bottom: MarginValue,
    #[serde(default)]
    pub left: MarginValue,
}

impl CropMargin {
    /// Same margin on every side
    #[must_use]
    pub fn uniform(value: MarginValue) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }

    /// Sides in `top, right, bottom, left` order
    #[must_use]
    pub fn sides(&self) -> [MarginValue; 4] {
        [self.top, self.right, self.bottom, self.left]
    }
}

/// Subject placement in percent of the free space (0 = left/top, 100 = right/bottom)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub fn center() -> Self {
        Self { x: 50.0, y: 50.0 }
    }
}

/// Flat RGBA background fill
pub type BackgroundColor = [u8; 4];

/// Advisory output sizes derived from the pre-downscale dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedSizes {
    pub medium: (u32, u32),
    pub hd: (u32, u32),
    pub max: (u32, u32),
}

/// Target pixel counts for the medium, HD and max tiers
pub const MEDIUM_PIXELS: f64 = 1_500_000.0;
pub const HD_PIXELS: f64 = 4_000_000.0;
pub const MAX_PIXELS: f64 = 25_000_000.0;

impl DerivedSizes {
    /// Solve the isotropic scale that hits each tier's pixel count, capped at the source size
    #[must_use]
    pub fn from_pre_limit(width: u32, height: u32) -> Self {
        let tier = |target: f64| -> (u32, u32) {
            let pixels = f64::from(width) * f64::from(height);
            if pixels <= 0.0 {
                return (width, height);
            }
            let scale = (target / pixels).sqrt();
            (
                ((scale * f64::from(width)) as u32).min(width),
                ((scale * f64::from(height)) as u32).min(height),
            )
        };

        Self {
            medium: tier(MEDIUM_PIXELS),
            hd: tier(HD_PIXELS),
            max: tier(MAX_PIXELS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_bounds() {
        let r = Rect::new(10, 5, 20, 10);
        assert_eq!(r.right(), 30);
        assert_eq!(r.bottom(), 15);
        assert!(r.fits_within(30, 15));
        assert!(!r.fits_within(29, 15));
        assert!(!Rect::new(0, 0, 0, 5).fits_within(10, 10));
    }

    #[test]
    fn test_derived_sizes_capped_at_source() {
        let sizes = DerivedSizes::from_pre_limit(639, 358);
        assert_eq!(sizes.medium, (639, 358));
        assert_eq!(sizes.hd, (639, 358));
        assert_eq!(sizes.max, (639, 358));
    }

    #[test]
    fn test_derived_sizes_scale_down_large_source() {
        let sizes = DerivedSizes::from_pre_limit(4000, 3000);
        let (w, h) = sizes.medium;
        let pixels = f64::from(w) * f64::from(h);
        assert!((pixels - MEDIUM_PIXELS).abs() / MEDIUM_PIXELS < 0.01);
        // 12 MP source is below the max tier
        assert_eq!(sizes.max, (4000, 3000));
        assert!(sizes.hd.0 < 4000);
    }

    #[test]
    fn test_margin_sides_order() {
        let m = CropMargin {
            top: MarginValue::pixels(1.0),
            right: MarginValue::pixels(2.0),
            bottom: MarginValue::percent(3.0),
            left: MarginValue::pixels(4.0),
        };
        let sides = m.sides();
        assert_eq!(sides[0].value, 1.0);
        assert!(sides[2].relative);
        assert_eq!(sides[3].value, 4.0);
    }

    #[test]
    fn test_dpi_rounding() {
        assert_eq!(Dpi::new(299.6, 72.2).rounded(), (300, 72));
        assert_eq!(Dpi::new(0.0, 1e9).rounded(), (1, u16::MAX));
    }
}
