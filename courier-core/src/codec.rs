//! Pluggable serialization for envelopes crossing a transport.
//!
//! Routers treat serialization as a black box: a [`MessageCodec`] turns an
//! [`Envelope`](crate::Envelope) into bytes and back, and nothing else in the
//! transport path looks inside the payload. [`JsonCodec`] is the default.
//!
//! # Example
//!
//! ```rust
//! use courier_core::{JsonCodec, MessageCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Ping {
//!     seq: u32,
//! }
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&Ping { seq: 1 }).unwrap();
//! assert_eq!(&bytes, br#"{"seq":1}"#);
//!
//! let decoded: Ping = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, Ping { seq: 1 });
//! ```

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec operations.
#[derive(Debug)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a value.
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(e) => write!(f, "encode error: {}", e),
            CodecError::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Encode(e) => Some(e.as_ref()),
            CodecError::Decode(e) => Some(e.as_ref()),
        }
    }
}

/// Serialization format used by transports.
///
/// Codecs are cloned into every link and reader task, so they must be cheap
/// to clone and shareable across worker threads.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// Human-readable on the wire, which makes pipe traffic easy to inspect.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{Content, Endpoint, Envelope, Payload};

    #[test]
    fn test_envelope_survives_json_codec() {
        let codec = JsonCodec;
        let sender = Endpoint::new("shell", "1");
        let recipient = Endpoint::new("shell", "root");
        let payload = Payload::new("Ping", &7u32).expect("payload");
        let request = Envelope::request(payload, sender, recipient, Duration::from_millis(250));

        let bytes = codec.encode(&request).expect("encode");
        let decoded: Envelope = codec.decode(&bytes).expect("decode");

        assert_eq!(decoded.id(), request.id());
        assert_eq!(decoded.reply_to(), None);
        assert_eq!(decoded.timeout(), Duration::from_millis(250));
        match decoded.content() {
            Content::Message(p) => assert_eq!(p.decode::<u32>().expect("decode body"), 7),
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_json_codec_decode_error() {
        let codec = JsonCodec;
        let result: Result<Envelope, _> = codec.decode(b"not json");
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_codec_error_display() {
        let codec = JsonCodec;
        let err = codec.decode::<u32>(b"{").expect_err("truncated input");
        assert!(err.to_string().starts_with("decode error:"));
    }
}
