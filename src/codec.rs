//! Pluggable serialization of [`StateChange`] records.
//!
//! The log frames and checksums records itself; a codec only turns one
//! envelope into bytes and back.

use crate::op::StateChange;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

pub trait Codec {
    fn encode(&self, change: &StateChange) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<StateChange, CodecError>;
}

/// Structural JSON, one object per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, change: &StateChange) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(change)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<StateChange, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary envelope.
///
/// bincode is not self-describing, so each parameter is stored as its own
/// JSON fragment inside the bincode frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[derive(Serialize, Deserialize)]
struct BinaryEnvelope {
    key: String,
    params: Vec<Vec<u8>>,
}

impl Codec for BincodeCodec {
    fn encode(&self, change: &StateChange) -> Result<Vec<u8>, CodecError> {
        let params = change
            .params
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()?;
        let envelope = BinaryEnvelope {
            key: change.key.clone(),
            params,
        };
        Ok(bincode::serialize(&envelope)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<StateChange, CodecError> {
        let envelope: BinaryEnvelope = bincode::deserialize(bytes)?;
        let params = envelope
            .params
            .iter()
            .map(|p| serde_json::from_slice::<Value>(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StateChange::new(envelope.key, params))
    }
}

pub type EncodeFn = fn(&StateChange) -> Result<Vec<u8>, CodecError>;
pub type DecodeFn = fn(&[u8]) -> Result<StateChange, CodecError>;

/// A codec assembled from a free marshal/unmarshal function pair.
#[derive(Clone, Copy)]
pub struct FnCodec {
    encode: EncodeFn,
    decode: DecodeFn,
}

impl FnCodec {
    pub fn new(encode: EncodeFn, decode: DecodeFn) -> Self {
        FnCodec { encode, decode }
    }
}

impl Codec for FnCodec {
    fn encode(&self, change: &StateChange) -> Result<Vec<u8>, CodecError> {
        (self.encode)(change)
    }

    fn decode(&self, bytes: &[u8]) -> Result<StateChange, CodecError> {
        (self.decode)(bytes)
    }
}

impl std::fmt::Debug for FnCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCodec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::params;
    use serde_json::json;

    fn sample() -> StateChange {
        StateChange::new(
            "put",
            vec![json!("user:1"), json!({"name": "alice", "tags": [1, 2]}), json!(null)],
        )
    }

    #[test]
    fn test_json_codec_is_plain_json() {
        let bytes = JsonCodec.encode(&StateChange::new("append", vec![json!(7)])).unwrap();
        assert_eq!(bytes, br#"{"key":"append","params":[7]}"#);
    }

    #[test]
    fn test_bincode_codec_preserves_structure() {
        let decoded = BincodeCodec.decode(&BincodeCodec.encode(&sample()).unwrap()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        assert!(JsonCodec.decode(b"{\"key\":").is_err());
        assert!(JsonCodec.decode(b"[1,2,3]").is_err());
    }

    // Mimics a codec whose only numeric type is a double.
    fn lossy_encode(change: &StateChange) -> Result<Vec<u8>, CodecError> {
        let params = change
            .params
            .iter()
            .map(|p| match p.as_f64() {
                Some(f) if p.is_number() => json!(f),
                _ => p.clone(),
            })
            .collect();
        JsonCodec.encode(&StateChange::new(change.key.clone(), params))
    }

    fn json_decode(bytes: &[u8]) -> Result<StateChange, CodecError> {
        JsonCodec.decode(bytes)
    }

    #[test]
    fn test_fn_codec_integer_comes_back_as_float() {
        let codec = FnCodec::new(lossy_encode, json_decode);
        let bytes = codec.encode(&crate::state_change!("append", 7)).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert!(decoded.params[0].is_f64());
        assert_eq!(params::as_i64(&decoded, 0).unwrap(), 7);
    }
}
