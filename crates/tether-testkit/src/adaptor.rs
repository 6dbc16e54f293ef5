//! Adaptor doubles

use tether_transport::{CodecError, JsonAdaptor, RpcReply, RpcRequest, TransportAdaptor};

/// Adaptor that decodes JSON but refuses to encode any reply
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingEncodeAdaptor;

impl TransportAdaptor for FailingEncodeAdaptor {
    fn name(&self) -> &str {
        "failing-encode"
    }

    fn encode_reply(&self, _reply: &RpcReply) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Encode("payload not representable".to_string()))
    }

    fn decode_request(&self, payload: &[u8]) -> Result<RpcRequest, CodecError> {
        JsonAdaptor.decode_request(payload)
    }
}
