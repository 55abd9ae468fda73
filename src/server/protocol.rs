//! Wire frames: MessagePack maps inside length-delimited frames
//!
//! Every request frame carries a caller-chosen `correlation_id` that is
//! echoed in the matching response frame. Responses on one connection may
//! arrive in any order.

use crate::error::{BgRemovalError, Result};
use crate::processor::{RemovalRequest, RemovalResponse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::bytes::Bytes;
use tokio_util::codec::LengthDelimitedCodec;

/// Largest accepted frame
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// What a request frame asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Answered inline with `initializing` or `ok`
    Health,
    #[default]
    Removebg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub correlation_id: String,
    #[serde(default)]
    pub command: Command,
    /// Absent for health checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RemovalRequest>,
}

impl RequestFrame {
    /// Health check with a fresh correlation id
    #[must_use]
    pub fn health() -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            command: Command::Health,
            request: None,
        }
    }

    /// Removal request with a fresh correlation id
    #[must_use]
    pub fn removebg(request: RemovalRequest) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            command: Command::Removebg,
            request: Some(request),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub correlation_id: String,
    pub response: RemovalResponse,
}

/// Length-delimited codec sized for image payloads
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Serialize `value` as a MessagePack map
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Pull the correlation id out of a frame that failed to decode fully
///
/// Lets the server answer malformed requests on the right channel.
#[must_use]
pub fn salvage_correlation_id(bytes: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct Envelope {
        correlation_id: String,
    }
    rmp_serde::from_slice::<Envelope>(bytes)
        .ok()
        .map(|envelope| envelope.correlation_id)
}

impl RequestFrame {
    /// The removal request, or `InvalidRequest` for a `removebg` frame without one
    pub fn into_request(self) -> Result<(String, RemovalRequest)> {
        match self.request {
            Some(request) => Ok((self.correlation_id, request)),
            None => Err(BgRemovalError::invalid_request(format!(
                "frame {} has no request payload",
                self.correlation_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Category, Channels};

    #[test]
    fn test_request_frame_roundtrip() {
        let request = RemovalRequest {
            channels: Channels::Alpha,
            category: Some(Category::Car),
            roi: Some([1, 2, 3, 4]),
            ..RemovalRequest::new(vec![0xff, 0xd8, 0xff])
        };
        let frame = RequestFrame::removebg(request);
        let bytes = encode_frame(&frame).unwrap();
        let decoded: RequestFrame = decode_frame(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_sparse_request_takes_defaults() {
        #[derive(Serialize)]
        struct Sparse {
            correlation_id: &'static str,
            request: SparseRequest,
        }
        #[derive(Serialize)]
        struct SparseRequest {
            #[serde(with = "serde_bytes")]
            data: Vec<u8>,
            megapixels: u32,
        }

        let bytes = rmp_serde::to_vec_named(&Sparse {
            correlation_id: "c-1",
            request: SparseRequest {
                data: vec![1, 2],
                megapixels: 1,
            },
        })
        .unwrap();
        let frame: RequestFrame = decode_frame(&bytes).unwrap();
        assert_eq!(frame.command, Command::Removebg);
        let (id, request) = frame.into_request().unwrap();
        assert_eq!(id, "c-1");
        assert!((request.megapixels - 1.0).abs() < f64::EPSILON);
        assert!(request.semitransparency);
        assert_eq!(request.bg_color, [255, 255, 255, 0]);
    }

    #[test]
    fn test_health_frame_has_no_request() {
        let frame = RequestFrame::health();
        assert!(frame.clone().into_request().is_err());
        let decoded: RequestFrame = decode_frame(&encode_frame(&frame).unwrap()).unwrap();
        assert_eq!(decoded.command, Command::Health);
    }

    #[test]
    fn test_salvage_correlation_id() {
        #[derive(Serialize)]
        struct Broken {
            correlation_id: &'static str,
            command: &'static str,
        }
        let bytes = rmp_serde::to_vec_named(&Broken {
            correlation_id: "c-9",
            command: "explode",
        })
        .unwrap();
        assert!(decode_frame::<RequestFrame>(&bytes).is_err());
        assert_eq!(salvage_correlation_id(&bytes).as_deref(), Some("c-9"));
        assert_eq!(salvage_correlation_id(&[0xc1]), None);
    }
}
