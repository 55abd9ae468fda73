#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Worker
//!
//! Library and server for removing image backgrounds behind a job queue.
//!
//! The crate is built from three layers:
//!
//! - [`SmartAlphaImage`]: one decoded image plus its alpha matte, colour
//!   profile, density and original colorspace. It keeps CMYK, grayscale and
//!   palette inputs faithful through the RGB working representation and
//!   re-encodes them as PNG, JPEG or a `color.jpg` + `alpha.png` ZIP bundle.
//! - [`RequestPipeline`]: turns a [`RemovalRequest`] into a
//!   [`RemovalResponse`] by decoding, restricting to a region of interest,
//!   running the [`Extractor`], filling holes, cropping, scaling,
//!   positioning, compositing a background and encoding.
//! - [`server`]: a pool of worker threads behind a bounded queue, with a
//!   consecutive-failure circuit breaker, liveness marker files, inline
//!   health checks and a framed MessagePack transport over TCP.
//!
//! ## Quick Start
//!
//! ```rust
//! use bgremove_worker::{
//!     MockExtractor, MockMode, RemovalRequest, RequestPipeline,
//!     EncodeSettings, SemitransparencyStrategy,
//! };
//! use image::{ImageFormat, RgbImage};
//! use std::io::Cursor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut png = Cursor::new(Vec::new());
//! RgbImage::from_pixel(64, 48, image::Rgb([200, 40, 40])).write_to(&mut png, ImageFormat::Png)?;
//!
//! let extractor = MockExtractor::new(MockMode::ConstantAlpha(255));
//! let mut pipeline = RequestPipeline::new(
//!     Box::new(extractor),
//!     SemitransparencyStrategy::Legacy,
//!     EncodeSettings::default(),
//! );
//! let response = pipeline.process(&RemovalRequest::new(png.into_inner()))?;
//! assert_eq!(response.width, Some(64));
//! # Ok(())
//! # }
//! ```
//!
//! ## Running the server
//!
//! ```rust,no_run
//! use bgremove_worker::server::{shutdown_signal, Server, TcpBroker};
//! use bgremove_worker::{DefaultExtractorFactory, ServerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::builder().max_consecutive_failures(5).build()?;
//! let factory = Arc::new(DefaultExtractorFactory::new(config.extractor.clone()));
//! let server = Server::start(&config, factory)?;
//! let broker = TcpBroker::bind(config.listen, server.pool().subscribe(), server.pool().api()).await?;
//! let reason = server.serve(broker, shutdown_signal()).await?;
//! std::process::exit(reason.exit_code());
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): the `bgremove-server` binary and subscriber setup
//! - `webp-support` (default): WebP input
//! - `onnx`: ONNX Runtime extractor
//! - `tracing-json`, `tracing-files`: extra log formats and destinations

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod color_profile;
pub mod config;
pub mod encoders;
pub mod error;
pub mod extractor;
pub mod pixelops;
pub mod processor;
pub mod server;
pub mod smart_image;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

pub use backends::{DefaultExtractorFactory, MockExtractor};
#[cfg(feature = "onnx")]
pub use backends::OnnxExtractor;
pub use config::{
    Category, Channels, EncodeFormat, EncodeSettings, ExtractorKind, MockMode, RequestedFormat,
    SemitransparencyStrategy, ServerConfig, ServerConfigBuilder,
};
pub use error::{BgRemovalError, FailureKind, Result};
pub use extractor::{ExtractOptions, Extraction, Extractor, ExtractorFactory};
pub use processor::{RemovalRequest, RemovalResponse, RequestPipeline, ResponseStatus};
pub use smart_image::{Background, PostProcess, SetMode, SmartAlphaImage, ViewMode};
pub use types::{BoundingBox, ColorMode, CropMargin, DerivedSizes, Dpi, MarginValue, Position, Rect};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat, TracingGuard, TracingOutput};

/// Process one request with a throwaway pipeline
///
/// Convenient for one-off jobs and tests; long-running callers should keep
/// a [`RequestPipeline`] (or a [`server::WorkerPool`]) so the extractor is
/// loaded once.
pub fn remove_background(extractor: Box<dyn Extractor>, request: &RemovalRequest) -> Result<RemovalResponse> {
    RequestPipeline::new(extractor, SemitransparencyStrategy::default(), EncodeSettings::default())
        .process(request)
}

/// Process one request read from an async stream
///
/// The stream holds only the image bytes; every other option comes from
/// `template`.
pub async fn remove_background_from_reader<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    extractor: Box<dyn Extractor>,
    template: RemovalRequest,
) -> Result<RemovalResponse> {
    let mut data = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut data).await?;
    let request = RemovalRequest { data, ..template };
    tokio::task::spawn_blocking(move || remove_background(extractor, &request))
        .await
        .map_err(|e| BgRemovalError::internal(format!("removal task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::from_pixel(40, 30, image::Rgb([10, 120, 200]))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_reader_api() {
        let response = remove_background_from_reader(
            Cursor::new(png_bytes()),
            Box::new(MockExtractor::new(MockMode::ConstantAlpha(255))),
            RemovalRequest::default(),
        )
        .await
        .unwrap();
        assert!(response.is_ok());
        assert_eq!(response.width, Some(40));
        assert_eq!(response.height, Some(30));
    }

    #[test]
    fn test_undecodable_input() {
        let err = remove_background(
            Box::new(MockExtractor::default()),
            &RemovalRequest::new(vec![1, 2, 3]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), FailureKind::CouldNotReadImage);
    }
}
