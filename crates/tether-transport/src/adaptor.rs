//! Protocol adaptor capability
//!
//! Each transport family supplies a [`TransportAdaptor`] that converts between
//! its wire payloads and the domain request/reply types. The adaptor is
//! injected into a [`Session`](crate::Session) when the device registers.

use serde::{Deserialize, Serialize};
use tether_core::TetherError;

/// Device-originated RPC request after decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Method the device invoked
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Result produced by the processing pipeline for a device request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    /// Reply body delivered to the device
    pub payload: serde_json::Value,
}

impl RpcReply {
    /// Wrap a JSON payload
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload }
    }
}

/// Adaptor failure converting to or from wire bytes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Reply could not be encoded for the device
    #[error("encode failed: {0}")]
    Encode(String),

    /// Device payload could not be decoded
    #[error("decode failed: {0}")]
    Decode(String),
}

impl From<CodecError> for TetherError {
    fn from(err: CodecError) -> Self {
        TetherError::codec(err.to_string())
    }
}

/// Wire-format capability for one transport family
pub trait TransportAdaptor: Send + Sync {
    /// Short adaptor name for logs
    fn name(&self) -> &str;

    /// Encode a pipeline result into the device's wire format
    fn encode_reply(&self, reply: &RpcReply) -> Result<Vec<u8>, CodecError>;

    /// Decode a device payload into a request
    fn decode_request(&self, payload: &[u8]) -> Result<RpcRequest, CodecError>;
}

/// JSON adaptor used by transports carrying `application/json` payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAdaptor;

impl TransportAdaptor for JsonAdaptor {
    fn name(&self) -> &str {
        "json"
    }

    fn encode_reply(&self, reply: &RpcReply) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(&reply.payload).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_request(&self, payload: &[u8]) -> Result<RpcRequest, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_adaptor_encodes_payload_only() {
        let bytes = JsonAdaptor
            .encode_reply(&RpcReply::new(json!({"value": 23})))
            .unwrap();
        assert_eq!(bytes, br#"{"value":23}"#.to_vec());
    }

    #[test]
    fn json_adaptor_decodes_method_and_params() {
        let request = JsonAdaptor
            .decode_request(br#"{"method":"getTime","params":{"tz":"UTC"}}"#)
            .unwrap();
        assert_eq!(request.method, "getTime");
        assert_eq!(request.params, json!({"tz": "UTC"}));
    }

    #[test]
    fn json_adaptor_defaults_missing_params() {
        let request = JsonAdaptor.decode_request(br#"{"method":"ping"}"#).unwrap();
        assert_eq!(request.params, serde_json::Value::Null);
    }

    #[test]
    fn json_adaptor_reports_decode_errors() {
        let err = JsonAdaptor.decode_request(b"\x01\x02").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
