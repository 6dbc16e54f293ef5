//! Ledger errors
//!
//! Validation and transition errors are surfaced to the caller as rejected
//! operations; nothing here is retried automatically.

use tether_core::{RpcId, TetherError};

use crate::model::RpcStatus;

/// Ledger operation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The submitted call or query is malformed
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested status is not reachable from the current one
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Call identity
        id: RpcId,
        /// Current status
        from: RpcStatus,
        /// Requested status
        to: RpcStatus,
    },

    /// No row with this identity (never inserted, or already expired)
    #[error("rpc call {0} not found")]
    NotFound(RpcId),

    /// The backing store failed
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<LedgerError> for TetherError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(message) => TetherError::invalid(message),
            LedgerError::NotFound(id) => TetherError::not_found(format!("rpc call {id}")),
            other => TetherError::ledger(other.to_string()),
        }
    }
}
