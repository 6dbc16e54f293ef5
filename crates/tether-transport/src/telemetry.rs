//! Transport telemetry and observability
//!
//! Structured logging of session and exchange lifecycle events. Counting is
//! done by the components themselves; this module only shapes the log events
//! so every path reports the same fields.

use tether_core::{CorrelationKey, EndpointId, TetherError};
use tracing::{debug, info, warn};

use crate::exchange::ResponseCode;

/// Centralized transport telemetry - uses tracing for all logging.
pub struct TransportTelemetry;

impl TransportTelemetry {
    /// Log a session registration or re-registration
    pub fn log_session_put(&self, endpoint: &EndpointId, replaced: bool) {
        info!(
            operation = "session_put",
            endpoint = %endpoint,
            replaced = replaced,
            "Session registered"
        );
    }

    /// Log a session removal
    pub fn log_session_removed(&self, endpoint: &EndpointId, reason: &'static str) {
        info!(
            operation = "session_remove",
            endpoint = %endpoint,
            reason = reason,
            "Session removed"
        );
    }

    /// Log a newly registered pending exchange
    pub fn log_exchange_registered(&self, key: &CorrelationKey, deadline_ms: u64) {
        debug!(
            operation = "exchange_register",
            key = %key,
            deadline_ms = deadline_ms,
            "Pending exchange registered"
        );
    }

    /// Log a registration refused because the key is outstanding
    pub fn log_duplicate_registration(&self, key: &CorrelationKey) {
        warn!(
            operation = "exchange_register",
            status = "duplicate",
            key = %key,
            "Correlation key already outstanding"
        );
    }

    /// Log a finalized exchange
    pub fn log_exchange_finalized(
        &self,
        key: &CorrelationKey,
        outcome: &str,
        code: Option<ResponseCode>,
    ) {
        debug!(
            operation = "exchange_finalize",
            key = %key,
            outcome = outcome,
            code = ?code,
            "Pending exchange finalized"
        );
    }

    /// Log a result that matched no outstanding exchange
    pub fn log_delivery_miss(&self, key: &CorrelationKey, reason: &str) {
        warn!(
            operation = "exchange_deliver",
            status = "miss",
            key = %key,
            reason = reason,
            "Result for unknown or finalized exchange"
        );
    }

    /// Log a reply that could not be encoded and was downgraded to an error code
    pub fn log_encode_fallback(&self, key: &CorrelationKey, adaptor: &str, error: &str) {
        warn!(
            operation = "exchange_deliver",
            status = "encode_failed",
            key = %key,
            adaptor = adaptor,
            error_message = error,
            "Failed to encode reply, answering with server error"
        );
    }

    /// Log a result for an endpoint whose session is gone
    pub fn log_session_lost(&self, key: &CorrelationKey) {
        warn!(
            operation = "exchange_deliver",
            status = "session_lost",
            key = %key,
            "Session no longer registered, answering with server error"
        );
    }

    /// Log an exchange the transport refused to answer
    pub fn log_respond_failure(&self, key: &CorrelationKey, error: &TetherError) {
        warn!(
            operation = "exchange_respond",
            status = "failure",
            key = %key,
            error_message = %error,
            "Transport failed to answer exchange"
        );
    }

    /// Log an expiration sweep that finalized at least one exchange
    pub fn log_sweep(&self, expired: usize, outstanding: usize, tombstones: usize) {
        if expired > 0 {
            info!(
                operation = "exchange_sweep",
                expired = expired,
                outstanding = outstanding,
                tombstones = tombstones,
                "Expired pending exchanges"
            );
        }
    }
}

/// Global transport telemetry instance
pub static TRANSPORT_TELEMETRY: TransportTelemetry = TransportTelemetry;
