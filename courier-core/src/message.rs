//! Application messages and their serialized payload form.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::CodecError;

/// An application message that can be dispatched through the broker.
///
/// The type key identifies the message's runtime type on both sides of a
/// transport; handlers are resolved by it. It defaults to the unqualified
/// Rust type name.
///
/// ```
/// use courier_core::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping(u32);
///
/// impl Message for Ping {
///     type Reply = u32;
/// }
///
/// assert_eq!(Ping::type_key(), "Ping");
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Reply produced by the handler. Use `()` for messages without content.
    type Reply: Serialize + DeserializeOwned + Send + 'static;

    /// Key used to resolve a handler for this message type.
    fn type_key() -> String {
        type_key::<Self>()
    }
}

/// Unqualified type name used as the default message key.
///
/// `my_crate::messages::Ping` → `"Ping"`. Generic arguments are kept.
pub fn type_key<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let prefix_len = base.rfind("::").map_or(0, |idx| idx + 2);
    full[prefix_len..].to_string()
}

/// A serialized application message tagged with its type key.
///
/// Transports carry payloads opaquely; only the processor and the typed
/// broker API decode them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    type_key: String,
    bytes: Vec<u8>,
}

impl Payload {
    /// Serialize `value` under the given type key.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the value cannot be serialized.
    pub fn new<T: Serialize + ?Sized>(
        type_key: impl Into<String>,
        value: &T,
    ) -> Result<Self, CodecError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))?;
        Ok(Self {
            type_key: type_key.into(),
            bytes,
        })
    }

    /// Serialize a [`Message`] under its own type key.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the message cannot be serialized.
    pub fn from_message<M: Message>(message: &M) -> Result<Self, CodecError> {
        Self::new(M::type_key(), message)
    }

    /// Wrap already-serialized bytes.
    pub fn from_raw(type_key: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            type_key: type_key.into(),
            bytes,
        }
    }

    /// The type key this payload was tagged with.
    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    /// Serialized body.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode the body.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_slice(&self.bytes).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod nested {
        pub struct Wrapper<T>(pub T);
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Greet {
        name: String,
    }

    impl Message for Greet {
        type Reply = String;
    }

    #[test]
    fn test_type_key_strips_module_path() {
        assert_eq!(type_key::<Greet>(), "Greet");
        assert_eq!(type_key::<u32>(), "u32");
        assert_eq!(
            type_key::<nested::Wrapper<u8>>(),
            "Wrapper<u8>",
            "generic arguments are kept"
        );
    }

    #[test]
    fn test_payload_from_message() {
        let payload = Payload::from_message(&Greet {
            name: "ada".to_string(),
        })
        .expect("encode");

        assert_eq!(payload.type_key(), "Greet");
        assert_eq!(payload.bytes(), br#"{"name":"ada"}"#);

        let decoded: Greet = payload.decode().expect("decode");
        assert_eq!(decoded.name, "ada");
    }

    #[test]
    fn test_payload_decode_mismatch() {
        let payload = Payload::from_raw("Greet", b"42".to_vec());
        assert!(matches!(payload.decode::<Greet>(), Err(CodecError::Decode(_))));
    }
}
