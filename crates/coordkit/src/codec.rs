//! Payload codecs for queue entries.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use snafu::Snafu;

/// Errors from encoding or decoding a payload.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// JSON serialization/deserialization error.
    #[snafu(display("json codec error: {source}"))]
    Json {
        /// The underlying error.
        source: serde_json::Error,
    },

    /// The stored payload was empty.
    #[snafu(display("empty payload"))]
    EmptyPayload,

    /// Codec-specific failure.
    #[snafu(display("codec error: {message}"))]
    Other {
        /// Description of what went wrong.
        message: String,
    },
}

/// Converts values to and from node payload bytes.
pub trait Codec<T>: Send + Sync {
    /// Encode a value.
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode a payload.
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// serde_json codec, the default for queues.
///
/// Empty payloads are rejected: `Option<T>` round-trips `None` as JSON `null`.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    /// Create a JSON codec.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).context(JsonSnafu)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        if bytes.is_empty() {
            return EmptyPayloadSnafu.fail();
        }
        serde_json::from_slice(bytes).context(JsonSnafu)
    }
}

/// Raw bytes, stored unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}
