//! Extractor implementations
//!
//! - Mock extractor (deterministic, no model; tests and `MOCK_RESPONSE`)
//! - ONNX Runtime extractor (feature `onnx`)

pub mod mock;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use self::mock::MockExtractor;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxExtractor;

use crate::config::ExtractorKind;
use crate::error::Result;
use crate::extractor::{Extractor, ExtractorFactory};

/// Factory that builds the extractor named by the server configuration
#[derive(Debug, Clone)]
pub struct DefaultExtractorFactory {
    kind: ExtractorKind,
}

impl DefaultExtractorFactory {
    #[must_use]
    pub fn new(kind: ExtractorKind) -> Self {
        Self { kind }
    }
}

impl ExtractorFactory for DefaultExtractorFactory {
    fn create_extractor(&self, worker: usize) -> Result<Box<dyn Extractor>> {
        log::debug!("Creating {} extractor for worker {worker}", self.kind);
        match &self.kind {
            ExtractorKind::Mock { mode } => Ok(Box::new(MockExtractor::new(*mode))),
            #[cfg(feature = "onnx")]
            ExtractorKind::Onnx { model_path } => Ok(Box::new(OnnxExtractor::load(model_path)?)),
            #[cfg(not(feature = "onnx"))]
            ExtractorKind::Onnx { model_path } => Err(crate::error::BgRemovalError::invalid_config(
                format!(
                    "ONNX model {} requested but the onnx feature is disabled",
                    model_path.display()
                ),
            )),
        }
    }
}

/// Every worker gets a clone sharing the call history and failure budget
impl ExtractorFactory for MockExtractor {
    fn create_extractor(&self, _worker: usize) -> Result<Box<dyn Extractor>> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockMode;

    #[test]
    fn test_default_factory_builds_mock() {
        let factory = DefaultExtractorFactory::new(ExtractorKind::Mock {
            mode: MockMode::ConstantAlpha(128),
        });
        let extractor = factory.create_extractor(0).unwrap();
        assert_eq!(extractor.name(), "mock");
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_without_feature_is_config_error() {
        let factory = DefaultExtractorFactory::new(ExtractorKind::Onnx {
            model_path: "model.onnx".into(),
        });
        assert!(factory.create_extractor(0).is_err());
    }

    #[test]
    fn test_mock_clones_share_history() {
        let mock = MockExtractor::default();
        let mut worker = mock.create_extractor(3).unwrap();
        worker.identify(ndarray::Array3::zeros((2, 2, 3)).view()).unwrap();
        assert_eq!(mock.call_history().len(), 1);
    }
}
