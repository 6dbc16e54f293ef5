//! Pending exchange correlation
//!
//! A device request that needs an answer from the processing pipeline is
//! registered here under its [`CorrelationKey`]. The transport exchange stays
//! open until exactly one of three things happens:
//!
//! 1. [`complete`](PendingExchangeCorrelator::complete): the result is encoded
//!    with the session's adaptor and sent back,
//! 2. [`fail`](PendingExchangeCorrelator::fail): an error code is sent back,
//! 3. [`expire`](PendingExchangeCorrelator::expire): the deadline passed and
//!    a timeout code is sent back.
//!
//! Finalization starts with removing the entry from the pending map. The map
//! removal is atomic per key, so whichever path removes the entry owns the
//! exchange handle and every other path finds nothing. Finalized keys are kept
//! as tombstones for a retention window so a second delivery is reported as a
//! duplicate rather than as an unknown key.
//!
//! Misses and codec failures never propagate as panics or hard failures to
//! the delivering thread: the exchange is answered with an error code and the
//! caller gets a [`CorrelationError`] to log and count.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    Clock, CorrelationKey, CorrelatorConfig, MessagesStats, StatCounters, TetherError, Timestamp,
};

use crate::adaptor::RpcReply;
use crate::exchange::{ErrorKind, ExchangeHandle, ResponseCode};
use crate::session::ClientSessionRegistry;
use crate::telemetry::TRANSPORT_TELEMETRY;

/// Shortest exchange lifetime; timestamps have millisecond resolution
pub const MIN_EXCHANGE_TIMEOUT: Duration = Duration::from_millis(1);

/// How a pending exchange was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeOutcome {
    /// Answered from a pipeline result
    CompletedWithResult,
    /// Answered with an error code reported by the pipeline
    CompletedWithError,
    /// Answered with a timeout code after the deadline passed
    Expired,
}

impl ExchangeOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::CompletedWithResult => "completed_with_result",
            Self::CompletedWithError => "completed_with_error",
            Self::Expired => "expired",
        }
    }
}

/// Why a delivery found no pending exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// The key was never registered, or its tombstone aged out
    Unknown,
    /// The key was finalized recently; this is a duplicate delivery
    AlreadyFinalized(ExchangeOutcome),
    /// The deadline passed before the result arrived; the exchange was
    /// answered with a timeout code on this call
    Expired,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::AlreadyFinalized(outcome) => write!(f, "already {}", outcome.as_str()),
            Self::Expired => f.write_str("expired"),
        }
    }
}

/// Correlation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// A request reused a key that is still outstanding
    #[error("correlation key {key} is already outstanding")]
    DuplicateCorrelation {
        /// Offending key
        key: CorrelationKey,
    },

    /// A result arrived for an unknown, finalized or expired exchange
    #[error("no pending exchange for {key} ({reason})")]
    UnknownOrExpiredCorrelation {
        /// Key carried by the result
        key: CorrelationKey,
        /// Why the lookup missed
        reason: MissReason,
    },
}

impl From<CorrelationError> for TetherError {
    fn from(err: CorrelationError) -> Self {
        TetherError::correlation(err.to_string())
    }
}

/// How a delivered result was answered on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The encoded result was sent
    Replied,
    /// The adaptor failed to encode; a server error code was sent instead
    EncodeFallback,
    /// The endpoint's session was gone; a server error code was sent instead
    SessionLost,
    /// The pipeline reported an error; this code was sent
    ErrorCode(ResponseCode),
}

/// Snapshot of a registered exchange (the live handle stays inside the correlator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExchange {
    /// Correlation key
    pub key: CorrelationKey,
    /// Registration time
    pub created_at: Timestamp,
    /// Time after which the exchange is answered with a timeout code
    pub deadline: Timestamp,
}

impl PendingExchange {
    /// True when `now` is past the deadline
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.deadline
    }
}

struct PendingEntry {
    info: PendingExchange,
    exchange: Mutex<Box<dyn ExchangeHandle>>,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    outcome: ExchangeOutcome,
    at: Timestamp,
}

/// Counters for deliveries that did not go the normal way
#[derive(Debug, Default)]
struct AnomalyCounters {
    duplicate_registrations: AtomicU64,
    duplicate_deliveries: AtomicU64,
    unknown_deliveries: AtomicU64,
    late_deliveries: AtomicU64,
    encode_fallbacks: AtomicU64,
    sessions_lost: AtomicU64,
    respond_failures: AtomicU64,
}

/// Point-in-time anomaly counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalySnapshot {
    /// Registrations refused because the key was outstanding
    pub duplicate_registrations: u64,
    /// Results for keys finalized within the retention window
    pub duplicate_deliveries: u64,
    /// Results for keys never seen (or aged out)
    pub unknown_deliveries: u64,
    /// Results that arrived after the deadline
    pub late_deliveries: u64,
    /// Replies downgraded to an error code by an encode failure
    pub encode_fallbacks: u64,
    /// Replies downgraded to an error code because the session was gone
    pub sessions_lost: u64,
    /// Exchanges the transport failed to answer
    pub respond_failures: u64,
}

/// Tracks outstanding device exchanges and finalizes each exactly once
pub struct PendingExchangeCorrelator {
    sessions: Arc<ClientSessionRegistry>,
    clock: Arc<dyn Clock>,
    pending: DashMap<CorrelationKey, PendingEntry>,
    finalized: DashMap<CorrelationKey, Tombstone>,
    default_timeout: Duration,
    retention: Duration,
    stats: Arc<StatCounters>,
    anomalies: AnomalyCounters,
}

impl PendingExchangeCorrelator {
    /// Create a correlator reading sessions from `sessions`
    pub fn new(
        sessions: Arc<ClientSessionRegistry>,
        clock: Arc<dyn Clock>,
        config: &CorrelatorConfig,
    ) -> Self {
        Self {
            sessions,
            clock,
            pending: DashMap::new(),
            finalized: DashMap::new(),
            default_timeout: config.default_timeout(),
            retention: config.finalized_retention(),
            stats: Arc::new(StatCounters::new("correlator")),
            anomalies: AnomalyCounters::default(),
        }
    }

    /// Count into shared counters instead of private ones
    pub fn with_stats(mut self, stats: Arc<StatCounters>) -> Self {
        self.stats = stats;
        self
    }

    /// Counters for registrations (total), replies (successful) and
    /// error/timeout answers (failed)
    pub fn stats(&self) -> &Arc<StatCounters> {
        &self.stats
    }

    /// Deadline `timeout` from now, or the configured default.
    ///
    /// Never earlier than [`MIN_EXCHANGE_TIMEOUT`] from now.
    pub fn deadline_after(&self, timeout: Option<Duration>) -> Timestamp {
        let timeout = timeout
            .unwrap_or(self.default_timeout)
            .max(MIN_EXCHANGE_TIMEOUT);
        self.clock.now().saturating_add(timeout)
    }

    /// Register an open exchange under `key`
    pub fn register(
        &self,
        key: CorrelationKey,
        exchange: Box<dyn ExchangeHandle>,
        deadline: Timestamp,
    ) -> Result<PendingExchange, CorrelationError> {
        let info = PendingExchange {
            key: key.clone(),
            created_at: self.clock.now(),
            deadline,
        };

        let refused = match self.pending.entry(key) {
            Entry::Occupied(occupied) => Some((occupied.key().clone(), exchange)),
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    info: info.clone(),
                    exchange: Mutex::new(exchange),
                });
                None
            }
        };

        if let Some((key, exchange)) = refused {
            self.anomalies
                .duplicate_registrations
                .fetch_add(1, Ordering::Relaxed);
            TRANSPORT_TELEMETRY.log_duplicate_registration(&key);
            // The outstanding exchange keeps its slot; the newcomer is refused.
            self.answer_with_code(&key, exchange, ResponseCode::BadRequest);
            return Err(CorrelationError::DuplicateCorrelation { key });
        }

        // A reused key starts a fresh lifecycle.
        self.finalized.remove(&info.key);
        self.stats.increment_total();
        TRANSPORT_TELEMETRY.log_exchange_registered(&info.key, deadline.as_millis());
        Ok(info)
    }

    /// Deliver a pipeline result to the exchange registered under `key`
    pub fn complete(
        &self,
        key: &CorrelationKey,
        reply: &RpcReply,
    ) -> Result<Delivery, CorrelationError> {
        let entry = self.take_live(key, ExchangeOutcome::CompletedWithResult)?;

        let exchange = entry.exchange.into_inner();
        let Some(session) = self.sessions.get(key.endpoint()) else {
            self.anomalies.sessions_lost.fetch_add(1, Ordering::Relaxed);
            TRANSPORT_TELEMETRY.log_session_lost(key);
            self.answer_with_code(key, exchange, ResponseCode::InternalServerError);
            self.stats.increment_failed();
            return Ok(Delivery::SessionLost);
        };

        match session.adaptor().encode_reply(reply) {
            Ok(bytes) => {
                if let Err(err) = exchange.respond(bytes) {
                    self.respond_failed(key, &err);
                }
                self.stats.increment_successful();
                TRANSPORT_TELEMETRY.log_exchange_finalized(
                    key,
                    ExchangeOutcome::CompletedWithResult.as_str(),
                    Some(ResponseCode::Content),
                );
                Ok(Delivery::Replied)
            }
            Err(err) => {
                self.anomalies.encode_fallbacks.fetch_add(1, Ordering::Relaxed);
                TRANSPORT_TELEMETRY.log_encode_fallback(
                    key,
                    session.adaptor().name(),
                    &err.to_string(),
                );
                self.answer_with_code(key, exchange, ResponseCode::InternalServerError);
                self.stats.increment_failed();
                Ok(Delivery::EncodeFallback)
            }
        }
    }

    /// Deliver a pipeline failure to the exchange registered under `key`
    pub fn fail(
        &self,
        key: &CorrelationKey,
        kind: ErrorKind,
    ) -> Result<Delivery, CorrelationError> {
        let entry = self.take_live(key, ExchangeOutcome::CompletedWithError)?;

        let code = kind.response_code();
        self.answer_with_code(key, entry.exchange.into_inner(), code);
        self.stats.increment_failed();
        TRANSPORT_TELEMETRY.log_exchange_finalized(
            key,
            ExchangeOutcome::CompletedWithError.as_str(),
            Some(code),
        );
        Ok(Delivery::ErrorCode(code))
    }

    /// Answer every exchange past its deadline with a timeout code
    pub fn expire(&self, now: Timestamp) -> usize {
        self.expire_keys(now).len()
    }

    /// Like [`expire`](Self::expire), returning the expired keys
    pub fn expire_keys(&self, now: Timestamp) -> Vec<CorrelationKey> {
        // Collect first; removing while iterating a shard would deadlock.
        let due: Vec<CorrelationKey> = self
            .pending
            .iter()
            .filter(|entry| entry.value().info.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for key in due {
            // Re-check under the shard lock: the key may have been completed
            // or re-registered with a later deadline since the scan.
            let removed = self.pending.remove_if(&key, |key, entry| {
                let due = entry.info.is_expired(now);
                if due {
                    self.bury(key, ExchangeOutcome::Expired, now);
                }
                due
            });
            if let Some((key, entry)) = removed {
                self.finish_expired(&key, entry);
                expired.push(key);
            }
        }

        let retention = self.retention;
        self.finalized
            .retain(|_, tombstone| now.duration_since(tombstone.at) <= retention);

        TRANSPORT_TELEMETRY.log_sweep(expired.len(), self.pending.len(), self.finalized.len());
        expired
    }

    /// Snapshot of the exchange registered under `key`
    pub fn get(&self, key: &CorrelationKey) -> Option<PendingExchange> {
        self.pending.get(key).map(|entry| entry.value().info.clone())
    }

    /// Number of outstanding exchanges
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Anomaly counts since creation
    pub fn anomalies(&self) -> AnomalySnapshot {
        let a = &self.anomalies;
        AnomalySnapshot {
            duplicate_registrations: a.duplicate_registrations.load(Ordering::Relaxed),
            duplicate_deliveries: a.duplicate_deliveries.load(Ordering::Relaxed),
            unknown_deliveries: a.unknown_deliveries.load(Ordering::Relaxed),
            late_deliveries: a.late_deliveries.load(Ordering::Relaxed),
            encode_fallbacks: a.encode_fallbacks.load(Ordering::Relaxed),
            sessions_lost: a.sessions_lost.load(Ordering::Relaxed),
            respond_failures: a.respond_failures.load(Ordering::Relaxed),
        }
    }

    /// Remove the live entry for `key`, or classify the miss.
    ///
    /// The tombstone is written before the shard lock is released, so a
    /// racing delivery for the same key always finds one of the two. An
    /// entry found past its deadline is expired here instead of waiting for
    /// the next sweep.
    fn take_live(
        &self,
        key: &CorrelationKey,
        outcome: ExchangeOutcome,
    ) -> Result<PendingEntry, CorrelationError> {
        let now = self.clock.now();
        let removed = self.pending.remove_if(key, |key, entry| {
            let outcome = if entry.info.is_expired(now) {
                ExchangeOutcome::Expired
            } else {
                outcome
            };
            self.bury(key, outcome, now);
            true
        });
        let Some((key, entry)) = removed else {
            return Err(self.miss(key));
        };

        if entry.info.is_expired(now) {
            self.finish_expired(&key, entry);
            self.anomalies.late_deliveries.fetch_add(1, Ordering::Relaxed);
            TRANSPORT_TELEMETRY.log_delivery_miss(&key, "expired");
            return Err(CorrelationError::UnknownOrExpiredCorrelation {
                key,
                reason: MissReason::Expired,
            });
        }
        Ok(entry)
    }

    fn miss(&self, key: &CorrelationKey) -> CorrelationError {
        let reason = match self.finalized.get(key) {
            Some(tombstone) => {
                self.anomalies
                    .duplicate_deliveries
                    .fetch_add(1, Ordering::Relaxed);
                MissReason::AlreadyFinalized(tombstone.outcome)
            }
            None => {
                self.anomalies
                    .unknown_deliveries
                    .fetch_add(1, Ordering::Relaxed);
                MissReason::Unknown
            }
        };
        TRANSPORT_TELEMETRY.log_delivery_miss(key, &reason.to_string());
        CorrelationError::UnknownOrExpiredCorrelation {
            key: key.clone(),
            reason,
        }
    }

    fn finish_expired(&self, key: &CorrelationKey, entry: PendingEntry) {
        self.answer_with_code(key, entry.exchange.into_inner(), ResponseCode::GatewayTimeout);
        self.stats.increment_failed();
        TRANSPORT_TELEMETRY.log_exchange_finalized(
            key,
            ExchangeOutcome::Expired.as_str(),
            Some(ResponseCode::GatewayTimeout),
        );
    }

    /// Record a finalized key; called with the key's pending shard held
    fn bury(&self, key: &CorrelationKey, outcome: ExchangeOutcome, at: Timestamp) {
        self.finalized
            .insert(key.clone(), Tombstone { outcome, at });
    }

    fn answer_with_code(
        &self,
        key: &CorrelationKey,
        exchange: Box<dyn ExchangeHandle>,
        code: ResponseCode,
    ) {
        if let Err(err) = exchange.respond_with_code(code) {
            self.respond_failed(key, &err);
        }
    }

    fn respond_failed(&self, key: &CorrelationKey, err: &TetherError) {
        self.anomalies
            .respond_failures
            .fetch_add(1, Ordering::Relaxed);
        TRANSPORT_TELEMETRY.log_respond_failure(key, err);
    }
}

impl fmt::Debug for PendingExchangeCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExchangeCorrelator")
            .field("outstanding", &self.pending.len())
            .field("tombstones", &self.finalized.len())
            .field("default_timeout", &self.default_timeout)
            .field("retention", &self.retention)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::JsonAdaptor;
    use crate::exchange::{oneshot_exchange, ExchangeReply};
    use crate::session::Session;
    use serde_json::json;
    use tether_core::ManualClock;

    fn setup() -> (Arc<ManualClock>, PendingExchangeCorrelator) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
        let sessions = Arc::new(ClientSessionRegistry::new());
        sessions.put(Session::new("dev-1", Arc::new(JsonAdaptor), clock.now()));
        let correlator =
            PendingExchangeCorrelator::new(sessions, clock.clone(), &CorrelatorConfig::default());
        (clock, correlator)
    }

    #[test]
    fn complete_answers_with_encoded_reply() {
        let (_clock, correlator) = setup();
        let key = CorrelationKey::new("dev-1", 1);
        let (handle, mut rx) = oneshot_exchange();
        correlator
            .register(key.clone(), handle, Timestamp::from_millis(5_000))
            .unwrap();

        let delivery = correlator
            .complete(&key, &RpcReply::new(json!({"ok": true})))
            .unwrap();

        assert_eq!(delivery, Delivery::Replied);
        assert_eq!(
            rx.try_recv().unwrap(),
            ExchangeReply::Payload(br#"{"ok":true}"#.to_vec())
        );
        assert_eq!(correlator.outstanding(), 0);
        assert_eq!(correlator.stats().successful(), 1);
    }

    #[test]
    fn register_rejects_outstanding_key() {
        let (_clock, correlator) = setup();
        let key = CorrelationKey::new("dev-1", 7);
        let (first, mut rx1) = oneshot_exchange();
        let (second, mut rx2) = oneshot_exchange();

        correlator
            .register(key.clone(), first, Timestamp::from_millis(5_000))
            .unwrap();
        let err = correlator
            .register(key.clone(), second, Timestamp::from_millis(5_000))
            .unwrap_err();

        assert_eq!(err, CorrelationError::DuplicateCorrelation { key: key.clone() });
        assert_eq!(correlator.anomalies().duplicate_registrations, 1);
        // The newcomer is refused; the original stays pending.
        assert_eq!(rx2.try_recv().unwrap(), ExchangeReply::Code(ResponseCode::BadRequest));
        assert!(rx1.try_recv().is_err());
        assert!(correlator.get(&key).is_some());
    }

    #[test]
    fn second_delivery_is_reported_as_duplicate() {
        let (_clock, correlator) = setup();
        let key = CorrelationKey::new("dev-1", 2);
        let (handle, _rx) = oneshot_exchange();
        correlator
            .register(key.clone(), handle, Timestamp::from_millis(5_000))
            .unwrap();

        correlator.fail(&key, ErrorKind::NotFound).unwrap();
        let err = correlator
            .complete(&key, &RpcReply::new(json!(1)))
            .unwrap_err();

        assert_eq!(
            err,
            CorrelationError::UnknownOrExpiredCorrelation {
                key,
                reason: MissReason::AlreadyFinalized(ExchangeOutcome::CompletedWithError),
            }
        );
        assert_eq!(correlator.anomalies().duplicate_deliveries, 1);
    }

    #[test]
    fn late_delivery_expires_on_access() {
        let (clock, correlator) = setup();
        let key = CorrelationKey::new("dev-1", 3);
        let (handle, mut rx) = oneshot_exchange();
        correlator
            .register(key.clone(), handle, Timestamp::from_millis(2_000))
            .unwrap();

        clock.set(Timestamp::from_millis(2_001));
        let err = correlator
            .complete(&key, &RpcReply::new(json!(1)))
            .unwrap_err();

        assert!(matches!(
            err,
            CorrelationError::UnknownOrExpiredCorrelation {
                reason: MissReason::Expired,
                ..
            }
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            ExchangeReply::Code(ResponseCode::GatewayTimeout)
        );
        assert_eq!(correlator.expire(Timestamp::from_millis(9_000)), 0);
    }

    #[test]
    fn tombstones_age_out_after_retention() {
        let (clock, correlator) = setup();
        let key = CorrelationKey::new("dev-1", 4);
        let (handle, _rx) = oneshot_exchange();
        correlator
            .register(key.clone(), handle, Timestamp::from_millis(5_000))
            .unwrap();
        correlator.fail(&key, ErrorKind::Internal).unwrap();

        let later = Timestamp::from_millis(1_000 + 60_001);
        clock.set(later);
        correlator.expire(later);

        let err = correlator.fail(&key, ErrorKind::Internal).unwrap_err();
        assert!(matches!(
            err,
            CorrelationError::UnknownOrExpiredCorrelation {
                reason: MissReason::Unknown,
                ..
            }
        ));
    }

    #[test]
    fn deadline_after_uses_configured_default() {
        let (_clock, correlator) = setup();
        assert_eq!(
            correlator.deadline_after(None),
            Timestamp::from_millis(11_000)
        );
        assert_eq!(
            correlator.deadline_after(Some(Duration::from_millis(250))),
            Timestamp::from_millis(1_250)
        );
        assert_eq!(
            correlator.deadline_after(Some(Duration::ZERO)),
            Timestamp::from_millis(1_001)
        );
    }
}
