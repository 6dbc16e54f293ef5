//! Transport exchange handles and response codes
//!
//! An [`ExchangeHandle`] is the live transport object for one open device
//! request. Both answering methods take `self: Box<Self>`, so a handle can be
//! answered at most once by construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use tether_core::TetherError;
use tokio::sync::oneshot;

/// Response codes understood by constrained transports (CoAP class.detail)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    /// 2.05 Content
    Content,
    /// 4.00 Bad Request
    BadRequest,
    /// 4.01 Unauthorized
    Unauthorized,
    /// 4.04 Not Found
    NotFound,
    /// 5.00 Internal Server Error
    InternalServerError,
    /// 5.03 Service Unavailable
    ServiceUnavailable,
    /// 5.04 Gateway Timeout
    GatewayTimeout,
}

impl ResponseCode {
    /// Numeric `class * 32 + detail` encoding used on the CoAP wire
    pub fn value(&self) -> u8 {
        let (class, detail) = self.class_detail();
        (class << 5) | detail
    }

    /// Class and detail digits
    pub fn class_detail(&self) -> (u8, u8) {
        match self {
            Self::Content => (2, 5),
            Self::BadRequest => (4, 0),
            Self::Unauthorized => (4, 1),
            Self::NotFound => (4, 4),
            Self::InternalServerError => (5, 0),
            Self::ServiceUnavailable => (5, 3),
            Self::GatewayTimeout => (5, 4),
        }
    }

    /// True for 2.xx codes
    pub fn is_success(&self) -> bool {
        self.class_detail().0 == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (class, detail) = self.class_detail();
        write!(f, "{class}.{detail:02}")
    }
}

/// Failure reported by the processing pipeline instead of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The request was malformed for the target
    BadRequest,
    /// The device is not allowed to invoke the method
    Unauthorized,
    /// No handler for the requested method
    NotFound,
    /// The pipeline failed while processing
    Internal,
    /// The pipeline is overloaded or shutting down
    Unavailable,
    /// The pipeline gave up waiting on a downstream party
    Timeout,
}

impl ErrorKind {
    /// Response code sent to the device for this failure
    pub fn response_code(&self) -> ResponseCode {
        match self {
            Self::BadRequest => ResponseCode::BadRequest,
            Self::Unauthorized => ResponseCode::Unauthorized,
            Self::NotFound => ResponseCode::NotFound,
            Self::Internal => ResponseCode::InternalServerError,
            Self::Unavailable => ResponseCode::ServiceUnavailable,
            Self::Timeout => ResponseCode::GatewayTimeout,
        }
    }
}

/// Open transport exchange awaiting exactly one answer
pub trait ExchangeHandle: Send {
    /// Answer with an encoded payload
    fn respond(self: Box<Self>, payload: Vec<u8>) -> Result<(), TetherError>;

    /// Answer with a bare response code
    fn respond_with_code(self: Box<Self>, code: ResponseCode) -> Result<(), TetherError>;
}

/// What a transport front-end receives when an exchange is answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeReply {
    /// Encoded payload
    Payload(Vec<u8>),
    /// Bare response code
    Code(ResponseCode),
}

struct OneshotExchange {
    tx: oneshot::Sender<ExchangeReply>,
}

impl ExchangeHandle for OneshotExchange {
    fn respond(self: Box<Self>, payload: Vec<u8>) -> Result<(), TetherError> {
        self.tx
            .send(ExchangeReply::Payload(payload))
            .map_err(|_| TetherError::transport("exchange receiver dropped"))
    }

    fn respond_with_code(self: Box<Self>, code: ResponseCode) -> Result<(), TetherError> {
        self.tx
            .send(ExchangeReply::Code(code))
            .map_err(|_| TetherError::transport("exchange receiver dropped"))
    }
}

/// Exchange handle backed by a oneshot channel.
///
/// Async transport front-ends keep the receiver next to the socket and write
/// whatever arrives back to the device.
pub fn oneshot_exchange() -> (Box<dyn ExchangeHandle>, oneshot::Receiver<ExchangeReply>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(OneshotExchange { tx }), rx)
}
