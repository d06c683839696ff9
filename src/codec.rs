//! The pluggable encode/decode contract used on the wire between supervisor and worker.
//!
//! The core only depends on `encode`/`decode` succeeding or failing; it never inspects the wire
//! bytes itself. [`JsonCodec`] is the default, matching every other IPC/record boundary in this
//! codebase's ecosystem (`tsc_results.rs`, `cache.rs`) that reaches for `serde_json`.

use crate::error::CodecError;
use serde_json::Value;

/// Encodes and decodes task arguments and results for transport across the worker boundary.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Default codec: plain `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::new("encode", e))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::new("decode", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_values() {
        let codec = JsonCodec;
        let value = json!({"a": 1, "b": [1, 2, 3]});
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn decode_reports_malformed_bytes_as_codec_error() {
        let codec = JsonCodec;
        let err = codec.decode(b"not json").unwrap_err();
        assert_eq!(err.kind, "decode");
    }
}
