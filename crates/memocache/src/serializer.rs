use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CacheError, CacheResult};

/// Marker prefixed to every stored envelope.
///
/// Blobs without it (written by another system, or by an incompatible future
/// envelope version) fail decoding loudly instead of deserializing garbage.
const ENVELOPE_PREFIX: &str = "mc1:";

/// A codec that turns values into storable string envelopes and back.
///
/// The cache only depends on round-trip fidelity: `deserialize(serialize(x))`
/// must be structurally equal to `x`, including values like absent optional
/// fields and timestamps. The wire format is otherwise an implementation
/// detail of the codec.
pub trait Serializer: Send + Sync + 'static {
    fn serialize<T: Serialize>(&self, value: &T) -> CacheResult<String>;

    fn deserialize<T: DeserializeOwned>(&self, envelope: &str) -> CacheResult<T>;
}

/// The default envelope codec: a versioned prefix around a JSON body.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl Serializer for EnvelopeCodec {
    fn serialize<T: Serialize>(&self, value: &T) -> CacheResult<String> {
        let body = serde_json::to_string(value)?;
        Ok(format!("{ENVELOPE_PREFIX}{body}"))
    }

    fn deserialize<T: DeserializeOwned>(&self, envelope: &str) -> CacheResult<T> {
        let body = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| CacheError::Malformed("missing envelope prefix".into()))?;
        Ok(serde_json::from_str(body)?)
    }
}
