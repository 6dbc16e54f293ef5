//! Agent errors

use tether_core::{EndpointId, TetherError};
use tether_ledger::LedgerError;
use tether_transport::{CodecError, CorrelationError};

/// Why a device request was not admitted
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The endpoint has no registered session
    #[error("no session for endpoint {endpoint}")]
    UnknownSession {
        /// Endpoint the request came from
        endpoint: EndpointId,
    },

    /// The payload could not be decoded
    #[error(transparent)]
    Decode(#[from] CodecError),

    /// The correlation key is already outstanding
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// The ledger refused the call
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The processing pipeline is no longer accepting requests
    #[error("processing pipeline is closed")]
    PipelineClosed,
}

impl From<AgentError> for TetherError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Decode(err) => err.into(),
            AgentError::Correlation(err) => err.into(),
            AgentError::Ledger(err) => err.into(),
            other => TetherError::transport(other.to_string()),
        }
    }
}
