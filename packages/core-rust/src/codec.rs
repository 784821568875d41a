//! Frame codecs.
//!
//! Both ends of a broker exchange must agree on the codec. `MsgPackCodec`
//! (named `MsgPack` maps via `rmp_serde::to_vec_named()`) is the default;
//! `JsonCodec` exists for debugging with broker management tools that display
//! message bodies.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::messages::{ReplyFrame, RequestFrame, RequestHeader};

/// Errors raised while encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {codec} frame: {message}")]
    Encode { codec: &'static str, message: String },
    #[error("failed to decode {codec} frame: {message}")]
    Decode { codec: &'static str, message: String },
}

/// Serialization strategy for RPC frames.
///
/// Implementations only provide the generic value encoding; the frame-level
/// helpers are derived from it.
pub trait Codec: Send + Sync + 'static {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Encodes any serializable value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decodes a value from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the bytes do not match `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// Encodes a request frame.
    ///
    /// # Errors
    ///
    /// See [`Codec::encode`].
    fn encode_request(&self, frame: &RequestFrame) -> Result<Vec<u8>, CodecError> {
        self.encode(frame)
    }

    /// Decodes a request frame.
    ///
    /// # Errors
    ///
    /// See [`Codec::decode`].
    fn decode_request(&self, bytes: &[u8]) -> Result<RequestFrame, CodecError> {
        self.decode(bytes)
    }

    /// Decodes only the header of a request frame.
    ///
    /// # Errors
    ///
    /// See [`Codec::decode`].
    fn decode_request_header(&self, bytes: &[u8]) -> Result<RequestHeader, CodecError> {
        self.decode(bytes)
    }

    /// Encodes a reply frame.
    ///
    /// # Errors
    ///
    /// See [`Codec::encode`].
    fn encode_reply(&self, frame: &ReplyFrame) -> Result<Vec<u8>, CodecError> {
        self.encode(frame)
    }

    /// Decodes a reply frame.
    ///
    /// # Errors
    ///
    /// See [`Codec::decode`].
    fn decode_reply(&self, bytes: &[u8]) -> Result<ReplyFrame, CodecError> {
        self.decode(bytes)
    }
}

/// Named `MsgPack` encoding (struct fields as map keys).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

/// UTF-8 JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}
