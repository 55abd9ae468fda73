//! Request pipeline: one removal request from encoded bytes to encoded result
//!
//! [`RequestPipeline`] owns one extractor and runs every stage of a request
//! on the calling thread:
//!
//! `decode → roi → extract → fill holes → postprocess → background → encode`
//!
//! Any stage may fail; the caller turns the error into a structured
//! [`RemovalResponse`] with [`RemovalResponse::from_error`].

use crate::{
    config::{Category, Channels, EncodeFormat, EncodeSettings, RequestedFormat, SemitransparencyStrategy},
    error::{BgRemovalError, Result},
    extractor::{confidence_threshold, ExtractOptions, Extractor},
    pixelops::{FillMode, MarginSpec, RELATIVE_MARGIN_LIMIT},
    smart_image::{Background, PostProcess, SetMode, SmartAlphaImage, ViewMode},
    types::{BackgroundColor, CropMargin, DerivedSizes, Position, Rect},
};
use instant::Instant;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug_span, info};

/// Protocol version reported in every response
pub const API_VERSION: &str = "1.0";

/// Largest absolute crop margin in pixels
pub const MAX_ABSOLUTE_MARGIN: f64 = 500.0;

/// Reference side length for the minimum size check
const SIZE_REFERENCE: f64 = 224.0;
/// Smallest side, at the reference scale, that still has a usable subject
const MIN_SCALED_SIDE: f64 = 5.0;

/// Semi-transparent fill for car windows and interiors
const WINDOW_FILL: u8 = 200;

/// A background removal request as it arrives on the wire
///
/// Absent fields take their defaults, so a request carrying only `data` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalRequest {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Decode-time downscale budget
    pub megapixels: f64,
    pub channels: Channels,
    /// Forced category; `None` (wire value `auto`) asks the extractor to identify it
    #[serde(
        rename = "type",
        serialize_with = "serialize_category",
        deserialize_with = "deserialize_category"
    )]
    pub category: Option<Category>,
    pub format: RequestedFormat,
    pub bg_color: BackgroundColor,
    #[serde(with = "serde_bytes")]
    pub bg_image: Option<Vec<u8>>,
    /// Subject scale in percent of the canvas
    pub scale: Option<f64>,
    /// Subject placement in percent of the free space
    pub position: Option<Position>,
    pub crop: bool,
    pub crop_margin: CropMargin,
    /// Region of interest `[x0, y0, x1, y1]`, inclusive corners in pre-downscale coordinates
    pub roi: Option<[i64; 4]>,
    pub shadow: bool,
    pub semitransparency: bool,
}

impl Default for RemovalRequest {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            megapixels: 0.25,
            channels: Channels::Rgba,
            category: None,
            format: RequestedFormat::Auto,
            bg_color: [255, 255, 255, 0],
            bg_image: None,
            scale: None,
            position: None,
            crop: false,
            crop_margin: CropMargin::default(),
            roi: None,
            shadow: false,
            semitransparency: true,
        }
    }
}

fn serialize_category<S: Serializer>(category: &Option<Category>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(category.map_or("auto", Category::as_str))
}

fn deserialize_category<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Category>, D::Error> {
    let label = String::deserialize(deserializer)?;
    if label == "auto" {
        return Ok(None);
    }
    Category::parse(&label)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown category '{label}'")))
}

impl RemovalRequest {
    /// Request for `data` with every option at its default
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Reject out-of-range parameters before any pixel work
    ///
    /// # Errors
    /// `InvalidRequest` naming the offending parameter.
    pub fn validate(&self) -> Result<()> {
        if !self.megapixels.is_finite() || self.megapixels <= 0.0 {
            return Err(BgRemovalError::invalid_request(format!(
                "megapixels must be positive, got {}",
                self.megapixels
            )));
        }
        if let Some(scale) = self.scale {
            if !(scale > 0.0 && scale <= 100.0) {
                return Err(BgRemovalError::invalid_request(format!(
                    "scale must be within (0, 100], got {scale}"
                )));
            }
        }
        if let Some(position) = self.position {
            let in_range = |v: f64| (0.0..=100.0).contains(&v);
            if !in_range(position.x) || !in_range(position.y) {
                return Err(BgRemovalError::invalid_request(format!(
                    "position must be within [0, 100], got ({}, {})",
                    position.x, position.y
                )));
            }
        }
        for (side, margin) in ["top", "right", "bottom", "left"]
            .iter()
            .zip(self.crop_margin.sides())
        {
            let limit = if margin.relative {
                RELATIVE_MARGIN_LIMIT
            } else {
                MAX_ABSOLUTE_MARGIN
            };
            if !(0.0..=limit).contains(&margin.value) {
                return Err(BgRemovalError::invalid_request(format!(
                    "{side} crop margin must be within [0, {limit}], got {}",
                    margin.value
                )));
            }
        }
        if let Some(roi) = self.roi {
            if roi.iter().any(|&v| v < 0) {
                return Err(BgRemovalError::invalid_request(format!(
                    "roi must not have negative coordinates, got {roi:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Outcome reported in every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    #[default]
    Ok,
    Error,
    Initializing,
}

/// A removal result or a structured failure
///
/// Payload and geometry are only present when `status` is `ok`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalResponse {
    pub status: ResponseStatus,
    /// Failure code such as `unknown_foreground`; empty on success
    pub description: String,
    pub version: String,
    /// `rust`, or `mock` for model-free deployments
    pub api: String,
    #[serde(with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Resolved subject category
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub foreground_type: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width_uncropped: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height_uncropped: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width_medium: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height_medium: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width_hd: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height_hd: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxwidth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxheight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_foreground_left: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_foreground_top: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_foreground_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_foreground_height: Option<u32>,
}

impl RemovalResponse {
    fn with_status(status: ResponseStatus, api: &str) -> Self {
        Self {
            status,
            version: API_VERSION.to_string(),
            api: api.to_string(),
            ..Self::default()
        }
    }

    /// Health answer: `initializing` until the pool is ready, `ok` afterwards
    #[must_use]
    pub fn health(ready: bool, api: &str) -> Self {
        let status = if ready {
            ResponseStatus::Ok
        } else {
            ResponseStatus::Initializing
        };
        Self::with_status(status, api)
    }

    /// Structured failure carrying the wire code of `error`
    #[must_use]
    pub fn from_error(error: &BgRemovalError, api: &str) -> Self {
        Self {
            description: error.kind().description().to_string(),
            ..Self::with_status(ResponseStatus::Error, api)
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Subject box in post-decode coordinates, when one was found
    #[must_use]
    pub fn input_foreground(&self) -> Option<Rect> {
        Some(Rect::new(
            self.input_foreground_left?,
            self.input_foreground_top?,
            self.input_foreground_width?,
            self.input_foreground_height?,
        ))
    }
}

/// Per-stage wall-clock timings of one request, in seconds
#[derive(Debug, Clone, Copy, Default)]
struct StageTimings {
    decode: f64,
    extract: f64,
    postprocess: f64,
    encode: f64,
}

impl StageTimings {
    fn total(&self) -> f64 {
        self.decode + self.extract + self.postprocess + self.encode
    }
}

/// Runs requests against one exclusively owned extractor
pub struct RequestPipeline {
    extractor: Box<dyn Extractor>,
    strategy: SemitransparencyStrategy,
    encode: EncodeSettings,
    /// Whether the last `process` call got past extraction
    extracted: bool,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("extractor", &self.extractor.name())
            .field("strategy", &self.strategy)
            .field("encode", &self.encode)
            .finish()
    }
}

impl RequestPipeline {
    #[must_use]
    pub fn new(extractor: Box<dyn Extractor>, strategy: SemitransparencyStrategy, encode: EncodeSettings) -> Self {
        Self {
            extractor,
            strategy,
            encode,
            extracted: false,
        }
    }

    /// True once the current or last request got a mask out of the extractor
    ///
    /// Later stages may still fail; the worker pool resets its failure
    /// streak on this rather than on the whole request.
    #[must_use]
    pub fn extraction_succeeded(&self) -> bool {
        self.extracted
    }

    /// `mock` when running without a model, `rust` otherwise
    #[must_use]
    pub fn api(&self) -> &'static str {
        if self.extractor.name() == "mock" {
            "mock"
        } else {
            "rust"
        }
    }

    /// Run one request to completion
    ///
    /// # Errors
    /// - `InvalidRequest` for out-of-range parameters, before any decoding
    /// - `CouldNotReadImage` for undecodable `data` or `bg_image`
    /// - `UnknownForeground` when the image is too small or has no subject
    /// - `Extractor` for any other failure inside the extraction stage
    pub fn process(&mut self, request: &RemovalRequest) -> Result<RemovalResponse> {
        self.extracted = false;
        request.validate()?;
        let mut timings = StageTimings::default();

        let start = Instant::now();
        let (mut image, background) = {
            let _span = debug_span!("decode", megapixels = request.megapixels).entered();
            let image = SmartAlphaImage::decode(&request.data, Some(request.megapixels))?;
            let background = request
                .bg_image
                .as_deref()
                .map(|bytes| SmartAlphaImage::decode(bytes, Some(request.megapixels)))
                .transpose()?;
            (image, background)
        };
        timings.decode = start.elapsed().as_secs_f64();
        info!(
            "decoding ({:.2}s) | megapixels: {}, mode: {}, dpi: {:?}, icc: {}, has alpha: {}, exif: {:?}",
            timings.decode,
            request.megapixels,
            image.mode(),
            image.dpi(),
            image.icc_profile().is_some(),
            image.alpha().is_some(),
            image.exif_orientation()
        );
        if image.signal_beacon() {
            info!("📡 SIGNAL BEACON DETECTED");
        }

        let start = Instant::now();
        let roi = {
            let _span = debug_span!("roi", roi = ?request.roi).entered();
            request.roi.map(|corners| resolve_roi(&image, corners)).transpose()?
        };
        let bgr = image.get(ViewMode::Bgr, roi)?;
        let (crop_height, crop_width, _) = bgr.dim();
        check_min_size(crop_width, crop_height)?;

        let category = match request.category {
            Some(category) => category,
            None => self.extractor.identify(bgr.view()).map_err(extraction_error)?,
        };
        let options = ExtractOptions {
            confidence_threshold: confidence_threshold(crop_width as u32, crop_height as u32),
            category,
            color_correction: category.color_correction(),
            shadow: request.shadow && category == Category::Car,
            semitransparency: request.semitransparency,
            strategy: self.strategy,
        };
        let extraction = {
            let _span = debug_span!("extract", extractor = self.extractor.name(), %category).entered();
            self.extractor
                .extract(bgr.view(), &options)
                .map_err(extraction_error)?
        };
        self.extracted = true;
        timings.extract = start.elapsed().as_secs_f64();
        info!(
            "processing ({:.2}s) | {}x{} -> {}x{} (roi: {:?}), class: {}",
            timings.extract,
            image.width(),
            image.height(),
            crop_width,
            crop_height,
            roi,
            category
        );

        let start = Instant::now();
        let precolorcorrected = image.get(ViewMode::Rgb, None)?;
        image.set(extraction.bgra.view(), SetMode::Bgra, true, roi)?;
        self.fill_category_holes(&mut image, category, request.semitransparency, &precolorcorrected)?;
        let anchor = image.foreground_bounding_box()?;

        {
            let _span = debug_span!("postprocess", crop = request.crop).entered();
            for op in postprocessing(request) {
                image.postprocess(&op)?;
            }
        }

        let mut bg_color = request.bg_color;
        if request.format == RequestedFormat::Jpg {
            bg_color[3] = 255;
        }
        {
            let _span = debug_span!("background").entered();
            match &background {
                Some(bg) => image.underlay_background(&Background::Image(bg))?,
                None => image.underlay_background(&Background::Color(bg_color))?,
            }
        }
        timings.postprocess = start.elapsed().as_secs_f64();
        info!(
            "postproc ({:.2}s) | bg_color: {:?}, shadow: {}",
            timings.postprocess, bg_color, options.shadow
        );

        let start = Instant::now();
        let format = EncodeFormat::resolve(request.format, request.channels, image.has_transparency());
        let data = {
            let _span = debug_span!("encode", %format).entered();
            image.encode(format, &self.encode)?
        };
        timings.encode = start.elapsed().as_secs_f64();
        info!(
            "encoding ({:.2}s) | format: {}, overall {:.2}s",
            timings.encode,
            format,
            timings.total()
        );

        let sizes = DerivedSizes::from_pre_limit(image.width_pre_limit(), image.height_pre_limit());
        Ok(RemovalResponse {
            data: Some(data),
            format: Some(format.wire_name().to_string()),
            foreground_type: Some(category),
            width: Some(image.width()),
            height: Some(image.height()),
            width_uncropped: Some(image.width_original()),
            height_uncropped: Some(image.height_original()),
            width_medium: Some(sizes.medium.0),
            height_medium: Some(sizes.medium.1),
            width_hd: Some(sizes.hd.0),
            height_hd: Some(sizes.hd.1),
            maxwidth: Some(sizes.max.0),
            maxheight: Some(sizes.max.1),
            input_foreground_left: anchor.map(|r| r.x),
            input_foreground_top: anchor.map(|r| r.y),
            input_foreground_width: anchor.map(|r| r.width),
            input_foreground_height: anchor.map(|r| r.height),
            ..RemovalResponse::with_status(ResponseStatus::Ok, self.api())
        })
    }

    /// Window repair for vehicles; the experimental strategy handles glass in the extractor
    fn fill_category_holes(
        &self,
        image: &mut SmartAlphaImage,
        category: Category,
        semitransparency: bool,
        precolorcorrected: &ndarray::Array3<u8>,
    ) -> Result<()> {
        if self.strategy != SemitransparencyStrategy::Legacy {
            return Ok(());
        }
        match category {
            Category::Car => {
                let fill = if semitransparency { WINDOW_FILL } else { 255 };
                image.fill_holes(fill, FillMode::Car, semitransparency, Some(precolorcorrected.view()))
            },
            Category::CarInterior => {
                let fill = if semitransparency { WINDOW_FILL } else { 0 };
                image.fill_holes(fill, FillMode::All, true, Some(precolorcorrected.view()))
            },
            _ => Ok(()),
        }
    }
}

/// Geometric operators requested, in application order
fn postprocessing(request: &RemovalRequest) -> Vec<PostProcess> {
    let mut ops = Vec::new();
    if request.crop {
        ops.push(PostProcess::CropSubject(MarginSpec::from_crop_margin(
            &request.crop_margin,
            MAX_ABSOLUTE_MARGIN,
        )));
    }
    if let Some(scale) = request.scale {
        ops.push(PostProcess::ScaleSubject { scale: scale / 100.0 });
    }
    if let Some(position) = request.position {
        ops.push(PostProcess::PositionSubject {
            dx: position.x / 100.0,
            dy: position.y / 100.0,
        });
    }
    ops
}

/// Map inclusive pre-downscale corners onto the decoded image
///
/// A far corner sitting exactly on the image size is pulled back onto the
/// last pixel; anything further out is rejected.
fn resolve_roi(image: &SmartAlphaImage, corners: [i64; 4]) -> Result<Rect> {
    let [ax, ay, bx, by] = corners;
    let (width, height) = (
        i64::from(image.width_pre_limit()),
        i64::from(image.height_pre_limit()),
    );
    let last = |v: i64, size: i64| if v == size { size - 1 } else { v };
    let (x0, x1) = (ax.min(bx), last(ax.max(bx), width));
    let (y0, y1) = (ay.min(by), last(ay.max(by), height));

    let scale = image.scale_pre_limit();
    let scaled = |v: i64| (v as f64 * scale) as i64;
    let width = scaled(x1 - x0 + 1);
    let height = scaled(y1 - y0 + 1);

    image
        .check_crop(scaled(x0), scaled(y0), width, height)
        .map_err(|e| BgRemovalError::invalid_request(format!("roi {corners:?}: {e}")))
}

fn check_min_size(width: usize, height: usize) -> Result<()> {
    let scale = SIZE_REFERENCE / width.max(height) as f64;
    if scale * (height as f64) < MIN_SCALED_SIDE || scale * (width as f64) < MIN_SCALED_SIDE {
        return Err(BgRemovalError::unknown_foreground(format!(
            "image size too small: {width}x{height}"
        )));
    }
    Ok(())
}

/// Keep `UnknownForeground` as is, fold everything else into an extractor failure
fn extraction_error(error: BgRemovalError) -> BgRemovalError {
    match error {
        BgRemovalError::UnknownForeground(_) => error,
        BgRemovalError::Extractor(_) => {
            log::error!("❌ Extraction failed: {error:?}");
            error
        },
        other => {
            log::error!("❌ Extraction failed: {other:?}");
            BgRemovalError::extractor(other.to_string())
        },
    }
}
