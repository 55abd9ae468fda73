//! Configuration types for the worker server and request options

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Which channels the caller wants back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channels {
    /// Foreground colour plus alpha
    #[default]
    Rgba,
    /// Only the alpha matte
    Alpha,
}

/// Output container requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedFormat {
    /// PNG when the result has transparency, JPEG otherwise
    #[default]
    Auto,
    Png,
    #[serde(alias = "jpeg")]
    Jpg,
    /// `color.jpg` + `alpha.png` bundle
    Zip,
}

/// Concrete encoding applied to an image state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeFormat {
    /// RGBA PNG, ICC only for RGB originals
    Png,
    /// Colour JPEG in the original colorspace
    Jpeg,
    /// Alpha matte as grayscale JPEG
    JpegAlpha,
    /// Working RGB plane as JPEG, alpha ignored
    JpegColor,
    /// Alpha matte as grayscale PNG
    PngAlpha,
    /// Uncompressed bundle of `color.jpg` and `alpha.png`
    Zip,
}

impl EncodeFormat {
    /// Resolve the requested container against the channels and the image content
    ///
    /// `zip` wins outright; alpha-only output is JPEG unless PNG was asked for;
    /// full output is PNG when asked for or when `auto` meets transparency.
    #[must_use]
    pub fn resolve(requested: RequestedFormat, channels: Channels, has_transparency: bool) -> Self {
        match (requested, channels) {
            (RequestedFormat::Zip, _) => Self::Zip,
            (RequestedFormat::Jpg | RequestedFormat::Auto, Channels::Alpha) => Self::JpegAlpha,
            (RequestedFormat::Png, Channels::Alpha) => Self::PngAlpha,
            (RequestedFormat::Png, Channels::Rgba) => Self::Png,
            (RequestedFormat::Auto, Channels::Rgba) if has_transparency => Self::Png,
            (RequestedFormat::Auto | RequestedFormat::Jpg, Channels::Rgba) => Self::Jpeg,
        }
    }

    /// Container name reported in responses
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Png | Self::PngAlpha => "png",
            Self::Jpeg | Self::JpegAlpha | Self::JpegColor => "jpg",
            Self::Zip => "zip",
        }
    }
}

impl std::fmt::Display for EncodeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::JpegAlpha => "jpeg_alpha",
            Self::JpegColor => "jpeg_color",
            Self::PngAlpha => "png_alpha",
            Self::Zip => "zip",
        };
        f.write_str(name)
    }
}

/// Foreground category, either forced by the caller or detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Product,
    Person,
    Animal,
    Car,
    CarPart,
    CarInterior,
    Transportation,
    Graphic,
    Other,
}

impl Category {
    pub const ALL: [Self; 9] = [
        Self::Product,
        Self::Person,
        Self::Animal,
        Self::Car,
        Self::CarPart,
        Self::CarInterior,
        Self::Transportation,
        Self::Graphic,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Person => "person",
            Self::Animal => "animal",
            Self::Car => "car",
            Self::CarPart => "car_part",
            Self::CarInterior => "car_interior",
            Self::Transportation => "transportation",
            Self::Graphic => "graphic",
            Self::Other => "other",
        }
    }

    /// Parse a wire label; `auto` and unknown labels yield `None`
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }

    /// Categories whose extraction enables colour correction
    #[must_use]
    pub fn color_correction(self) -> bool {
        matches!(self, Self::Person | Self::Animal)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How translucent regions such as car windows are refined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemitransparencyStrategy {
    /// Hole filling after extraction (semi-transparent fill for windows)
    #[default]
    Legacy,
    /// Dedicated refinement pass inside the extractor; hole filling is skipped
    Experimental,
}

/// Behaviour of the built-in deterministic extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum MockMode {
    /// Same alpha everywhere
    ConstantAlpha(u8),
    /// Alpha from colour distance to the border colour
    BackgroundKey,
}

impl Default for MockMode {
    fn default() -> Self {
        Self::ConstantAlpha(128)
    }
}

/// Which extractor implementation each worker loads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExtractorKind {
    Mock {
        #[serde(default)]
        mode: MockMode,
    },
    /// ONNX segmentation model (requires the `onnx` feature)
    Onnx { model_path: PathBuf },
}

impl Default for ExtractorKind {
    fn default() -> Self {
        Self::Mock {
            mode: MockMode::BackgroundKey,
        }
    }
}

impl std::fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mock { .. } => write!(f, "mock"),
            Self::Onnx { model_path } => write!(f, "onnx:{}", model_path.display()),
        }
    }
}

/// Encoder settings shared by every output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSettings {
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self { jpeg_quality: 90 }
    }
}

/// Default consecutive extraction failures before the process gives up
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Configuration for the worker server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Upper bound on workers; `None` uses all available cores
    pub workers: Option<usize>,

    /// Consecutive extraction failures that terminate the process
    pub max_consecutive_failures: u32,

    /// Directory for liveness markers
    pub marker_dir: PathBuf,

    /// Extractor loaded by every worker
    pub extractor: ExtractorKind,

    /// Translucency refinement strategy
    pub semitransparency: SemitransparencyStrategy,

    /// Output encoder settings
    pub encode: EncodeSettings,

    /// Address of the framed TCP broker
    pub listen: SocketAddr,

    /// Report responses as coming from the mock API
    pub mock_response: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            marker_dir: std::env::temp_dir().join("bgremove-worker"),
            extractor: ExtractorKind::default(),
            semitransparency: SemitransparencyStrategy::default(),
            encode: EncodeSettings::default(),
            listen: SocketAddr::from(([127, 0, 0, 1], 7878)),
            mock_response: false,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bgremove_worker::config::ServerConfig;
    ///
    /// let config = ServerConfig::builder()
    ///     .workers(Some(2))
    ///     .max_consecutive_failures(3)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.worker_count(), config.worker_count().min(2));
    /// ```
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Effective worker count: hardware concurrency, optionally capped, at least 1
    #[must_use]
    pub fn worker_count(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(1);
        self.workers
            .map_or(available, |cap| cap.min(available))
            .max(1)
    }

    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            BgRemovalError::invalid_config(format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `workers` of zero
    /// - `max_consecutive_failures` of zero
    /// - JPEG quality outside 1-100
    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(BgRemovalError::config_value_error(
                "worker cap",
                0,
                "1 or more",
                None,
            ));
        }

        if self.max_consecutive_failures == 0 {
            return Err(BgRemovalError::config_value_error(
                "max consecutive failures",
                0,
                "1 or more",
                Some(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            ));
        }

        if !(1..=100).contains(&self.encode.jpeg_quality) {
            return Err(BgRemovalError::config_value_error(
                "JPEG quality",
                self.encode.jpeg_quality,
                "1-100",
                Some(90),
            ));
        }

        Ok(())
    }
}

/// Builder for `ServerConfig`
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Cap the number of workers
    #[must_use]
    pub fn workers(mut self, workers: Option<usize>) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the consecutive failure threshold
    #[must_use]
    pub fn max_consecutive_failures(mut self, threshold: u32) -> Self {
        self.config.max_consecutive_failures = threshold;
        self
    }

    /// Set the marker directory
    #[must_use]
    pub fn marker_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.marker_dir = dir.into();
        self
    }

    /// Set the extractor implementation
    #[must_use]
    pub fn extractor(mut self, extractor: ExtractorKind) -> Self {
        self.config.extractor = extractor;
        self
    }

    /// Select the translucency refinement strategy
    #[must_use]
    pub fn semitransparency(mut self, strategy: SemitransparencyStrategy) -> Self {
        self.config.semitransparency = strategy;
        self
    }

    /// Set JPEG quality
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.encode.jpeg_quality = quality.min(100);
        self
    }

    /// Set the broker listen address
    #[must_use]
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.config.listen = addr;
        self
    }

    /// Answer every job with the mock extractor's constant matte
    #[must_use]
    pub fn mock_response(mut self, enabled: bool) -> Self {
        self.config.mock_response = enabled;
        if enabled {
            self.config.extractor = ExtractorKind::Mock {
                mode: MockMode::ConstantAlpha(128),
            };
        }
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
