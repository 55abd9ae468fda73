//! ONNX Runtime extractor for single-output segmentation models
//!
//! The model takes a `1x3xSxS` normalised RGB tensor and returns a `1x1xSxS`
//! matte in `[0, 1]`. The matte is thresholded into a trimap, filtered for
//! confidence, and resized back to the input size.

use crate::error::{BgRemovalError, Result};
use crate::extractor::{
    compose_alpha, filter_trimap, ExtractOptions, Extraction, Extractor, TRIMAP_BACKGROUND,
    TRIMAP_FOREGROUND, TRIMAP_UNKNOWN,
};
use crate::pixelops::resize;
use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::{Path, PathBuf};

/// Square model input size
const INPUT_SIZE: u32 = 1024;
const NORMALIZATION_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const NORMALIZATION_STD: [f32; 3] = [1.0, 1.0, 1.0];

/// Matte values at or below this are background in the trimap
const TRIMAP_LOW: f32 = 0.05;
/// Matte values at or above this are foreground in the trimap
const TRIMAP_HIGH: f32 = 0.95;

fn ort_error<E: std::fmt::Display>(what: &'static str) -> impl Fn(E) -> BgRemovalError {
    move |e| BgRemovalError::extractor(format!("{what}: {e}"))
}

/// ONNX Runtime session owned by one worker
#[derive(Debug)]
pub struct OnnxExtractor {
    session: Session,
    model_path: PathBuf,
}

impl OnnxExtractor {
    /// Load `model_path`, preferring CUDA, then `CoreML`, then CPU
    pub fn load(model_path: &Path) -> Result<Self> {
        let load_start = instant::Instant::now();
        let mut builder = Session::builder()
            .map_err(ort_error("Failed to create session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error("Failed to set optimization level"))?;

        let mut providers = Vec::new();
        let cuda = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&cuda).unwrap_or(false) {
            log::info!("🚀 CUDA execution provider is available and will be used");
            providers.push(cuda.build());
        }
        let coreml = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&coreml).unwrap_or(false) {
            log::info!("🍎 CoreML execution provider is available and will be used");
            providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
        }
        if providers.is_empty() {
            log::warn!("⚠️ No hardware acceleration available, falling back to CPU");
        } else {
            builder = builder
                .with_execution_providers(providers)
                .map_err(ort_error("Failed to set execution providers"))?;
        }

        // Several workers share the machine; one intra-op thread each
        let session = builder
            .with_intra_threads(1)
            .map_err(ort_error("Failed to set intra threads"))?
            .commit_from_file(model_path)
            .map_err(ort_error("Failed to load model"))?;

        log::info!(
            "📊 Model {} loaded in {:.0}ms",
            model_path.display(),
            load_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Self {
            session,
            model_path: model_path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Resize to the square model input and normalise to NCHW
    fn preprocess(bgr: ArrayView3<'_, u8>) -> Result<Array4<f32>> {
        let rgb = bgr.slice(s![.., .., ..;-1]);
        let resized = resize(rgb, INPUT_SIZE, INPUT_SIZE)?;
        let size = INPUT_SIZE as usize;
        Ok(Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            let value = f32::from(resized[[y, x, c]]) / 255.0;
            (value - NORMALIZATION_MEAN[c]) / NORMALIZATION_STD[c]
        }))
    }

    fn infer(&mut self, input: Array4<f32>) -> Result<Array2<f32>> {
        let inference_start = instant::Instant::now();
        let input_value = Value::from_array(input)
            .map_err(|e| BgRemovalError::extractor(format!("Failed to convert input tensor: {e}")))?;
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::extractor(format!("ONNX inference failed: {e}")))?;

        let first = outputs
            .keys()
            .next()
            .ok_or_else(|| BgRemovalError::extractor("No output tensors found"))?;
        let tensor = outputs
            .get(first)
            .ok_or_else(|| BgRemovalError::extractor("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| BgRemovalError::extractor(format!("Failed to extract output tensor: {e}")))?;

        let shape = tensor.shape().to_vec();
        let &[_, _, height, width] = shape.as_slice() else {
            return Err(BgRemovalError::extractor(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };
        let matte = tensor
            .view()
            .into_shape_with_order((height, width))
            .map_err(|e| BgRemovalError::extractor(format!("Unexpected output layout: {e}")))?
            .to_owned();

        log::debug!(
            "⚡ Inference: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(matte)
    }
}

impl Extractor for OnnxExtractor {
    fn name(&self) -> &str {
        "onnx"
    }

    fn extract(&mut self, bgr: ArrayView3<'_, u8>, options: &ExtractOptions) -> Result<Extraction> {
        let (height, width, _) = bgr.dim();
        let input = Self::preprocess(bgr)?;
        let matte = self.infer(input)?;

        let matte_u8 = matte
            .mapv(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .insert_axis(Axis(2));
        let matte = resize(matte_u8.view(), width as u32, height as u32)?.index_axis_move(Axis(2), 0);

        let mut trimap = matte.mapv(|m| {
            let v = f32::from(m) / 255.0;
            if v >= TRIMAP_HIGH {
                TRIMAP_FOREGROUND
            } else if v <= TRIMAP_LOW {
                TRIMAP_BACKGROUND
            } else {
                TRIMAP_UNKNOWN
            }
        });
        filter_trimap(&mut trimap, options.confidence_threshold)?;
        let alpha = compose_alpha(trimap.view(), matte.view());

        let mut bgra = Array3::<u8>::zeros((height, width, 4));
        bgra.slice_mut(s![.., .., ..3]).assign(&bgr);
        bgra.slice_mut(s![.., .., 3]).assign(&alpha);

        Ok(Extraction {
            bgra,
            trimap: Some(trimap),
        })
    }
}
