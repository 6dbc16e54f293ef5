//! # Tether Transport - Sessions and Exchange Correlation
//!
//! Bridges a device's synchronous request/response exchange to a result that
//! arrives later from an independent processing pipeline:
//! - [`ClientSessionRegistry`]: one [`Session`] per endpoint identity
//! - [`PendingExchangeCorrelator`]: holds open exchanges until a result, an
//!   error or the deadline finalizes them, exactly once
//! - [`TransportAdaptor`] / [`ExchangeHandle`]: capabilities supplied by the
//!   concrete transport (CoAP, LwM2M, ...); this crate never looks at wire
//!   formats itself
//!
//! ## Design Principles
//!
//! - **Single-fire completion**: whoever removes an entry from the pending map
//!   owns its exchange handle; the handle is consumed when answered
//! - **Per-key concurrency**: sharded maps, no global lock
//! - **Active sweeping**: orphaned exchanges are expired by deadline, never
//!   left for the transport to time out on its own

pub mod adaptor;
pub mod correlator;
pub mod exchange;
pub mod session;
pub mod telemetry;

pub use adaptor::{CodecError, JsonAdaptor, RpcReply, RpcRequest, TransportAdaptor};
pub use correlator::{
    AnomalySnapshot, CorrelationError, Delivery, ExchangeOutcome, MissReason, PendingExchange,
    PendingExchangeCorrelator, MIN_EXCHANGE_TIMEOUT,
};
pub use exchange::{oneshot_exchange, ErrorKind, ExchangeHandle, ExchangeReply, ResponseCode};
pub use session::{ClientSessionRegistry, Session};
pub use telemetry::{TransportTelemetry, TRANSPORT_TELEMETRY};
