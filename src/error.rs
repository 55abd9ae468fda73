//! Error types for background removal requests

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Everything that can go wrong while serving a removal request
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// The request payload could not be decoded as an image
    #[error("Could not read image: {0}")]
    CouldNotReadImage(String),

    /// No usable subject was found, or the image is too small to process
    #[error("Unknown foreground: {0}")]
    UnknownForeground(String),

    /// Crop, ROI, margin, scale or position parameters are out of range
    #[error("Invalid request parameter: {0}")]
    InvalidRequest(String),

    /// A crop rectangle does not lie within the current image bounds
    #[error("Invalid crop {x},{y} {width}x{height} for image {image_width}x{image_height}")]
    InvalidCrop {
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        image_width: u32,
        image_height: u32,
    },

    /// An operation needed the alpha channel before one was assigned
    #[error("Alpha channel is not set")]
    AlphaUnset,

    /// Failure reported by the extraction backend
    #[error("Extractor error: {0}")]
    Extractor(String),

    /// The worker pool is not accepting jobs
    #[error("Worker pool unhealthy: {0}")]
    Unhealthy(String),

    /// Server configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (marker files, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors surfaced by the `image` crate after decoding
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Output encoding errors
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// ZIP container errors
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Buffer shape mismatches inside pixel operations
    #[error("Processing error: {0}")]
    Processing(String),

    /// Broken internal invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Closed failure taxonomy reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Corrupt, truncated or unsupported image bytes
    CouldNotReadImage,
    /// No subject, image too small, or confidence filtering rejected the region
    UnknownForeground,
    /// Request parameters rejected before extraction
    InvalidRequest,
    /// Anything else, including worker panics
    ExtractorFailure,
    /// Pool is initializing or terminated
    Unhealthy,
}

impl FailureKind {
    /// Error code string carried in the `description` response field
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::CouldNotReadImage => "failed_to_read_image",
            Self::UnknownForeground => "unknown_foreground",
            Self::InvalidRequest => "invalid_parameters",
            Self::ExtractorFailure => "unknown_error",
            Self::Unhealthy => "unhealthy",
        }
    }

}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

impl BgRemovalError {
    /// Create a new could-not-read-image error
    pub fn could_not_read<S: Into<String>>(msg: S) -> Self {
        Self::CouldNotReadImage(msg.into())
    }

    /// Create a new unknown-foreground error
    pub fn unknown_foreground<S: Into<String>>(msg: S) -> Self {
        Self::UnknownForeground(msg.into())
    }

    /// Create a new invalid request error
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a new invalid crop error
    #[must_use]
    pub fn invalid_crop(x: i64, y: i64, width: i64, height: i64, bounds: (u32, u32)) -> Self {
        Self::InvalidCrop {
            x,
            y,
            width,
            height,
            image_width: bounds.0,
            image_height: bounds.1,
        }
    }

    /// Create a new extractor error
    pub fn extractor<S: Into<String>>(msg: S) -> Self {
        Self::Extractor(msg.into())
    }

    /// Create a new unhealthy error
    pub fn unhealthy<S: Into<String>>(msg: S) -> Self {
        Self::Unhealthy(msg.into())
    }

    /// Rejected server setting
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new encoding error
    pub fn encoding<S: Into<String>>(msg: S) -> Self {
        Self::Encoding(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Pixel operation failure
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Internal invariant violation
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Rejected setting with its valid range and an optional suggestion
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether this error counts towards the consecutive-failure breaker
    ///
    /// Only failures raised inside the extraction stage count.
    #[must_use]
    pub fn trips_breaker(&self) -> bool {
        matches!(self, Self::Extractor(_))
    }

    /// Classify this error into the caller-facing taxonomy
    ///
    /// Crop and alpha misuse share the generic bucket with extractor and I/O failures.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::CouldNotReadImage(_) => FailureKind::CouldNotReadImage,
            Self::UnknownForeground(_) => FailureKind::UnknownForeground,
            Self::InvalidRequest(_) => FailureKind::InvalidRequest,
            Self::Unhealthy(_) => FailureKind::Unhealthy,
            Self::InvalidCrop { .. }
            | Self::AlphaUnset
            | Self::Extractor(_)
            | Self::InvalidConfig(_)
            | Self::Io(_)
            | Self::Image(_)
            | Self::Encoding(_)
            | Self::Zip(_)
            | Self::Protocol(_)
            | Self::Processing(_)
            | Self::Internal(_) => FailureKind::ExtractorFailure,
        }
    }
}

impl From<rmp_serde::encode::Error> for BgRemovalError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Protocol(format!("failed to encode frame: {e}"))
    }
}

impl From<rmp_serde::decode::Error> for BgRemovalError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::Protocol(format!("failed to decode frame: {e}"))
    }
}
