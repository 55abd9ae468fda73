//! Output encoders with metadata embedding
//!
//! - PNG through the `image` crate, with `iCCP` and `pHYs` chunks spliced in
//!   before the first `IDAT`
//! - JPEG through `jpeg-encoder`, which handles grayscale, RGB and CMYK input
//!   and writes JFIF density and ICC APP2 segments itself
//! - Uncompressed ZIP bundles for the colour/alpha pair

pub mod bundle;
pub mod jpeg;
pub mod png;

pub use bundle::zip_entries;
pub use jpeg::{encode_jpeg, JpegColor};
pub use png::{encode_png, PngColor};
