//! Payload (de)serialization collaborator.
//!
//! Payloads are arbitrary structured values (mappings, sequences, strings, numbers,
//! booleans and null). The peer layer never inspects them, it only hands them to a
//! [PayloadCodec] on the way out and on the way in.

/// Structured payload exchanged between peers.
pub type Payload = serde_json::Value;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Converts payloads to and from the bytes carried by a datagram.
pub trait PayloadCodec: Send + Sync {
    fn serialize(&self, value: &Payload) -> Result<Vec<u8>, CodecError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Payload, CodecError>;
}

/// Default codec, encoding payloads as compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn serialize(&self, value: &Payload) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|err| CodecError::Serialize(err.into()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Payload, CodecError> {
        serde_json::from_slice(bytes).map_err(|err| CodecError::Deserialize(err.into()))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("Failed to serialize payload.")]
    Serialize(#[source] BoxError),

    #[error("Failed to deserialize payload.")]
    Deserialize(#[source] BoxError),
}
