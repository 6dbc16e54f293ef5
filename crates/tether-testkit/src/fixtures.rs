//! Correlator fixture
//!
//! Wires a [`PendingExchangeCorrelator`] to a session registry and a
//! [`ManualClock`] so tests control time explicitly.

use std::sync::Arc;
use std::time::Duration;
use tether_core::{Clock, CorrelationKey, CorrelatorConfig, ManualClock, Timestamp};
use tether_transport::{
    ClientSessionRegistry, JsonAdaptor, PendingExchangeCorrelator, Session, TransportAdaptor,
};

/// Default start time of fixture clocks, in milliseconds
pub const FIXTURE_START_MS: u64 = 1_000;

/// Manual clock starting at [`FIXTURE_START_MS`]
pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Timestamp::from_millis(FIXTURE_START_MS)))
}

/// Correlator, session registry and clock sharing one timeline
#[derive(Debug, Clone)]
pub struct CorrelatorFixture {
    /// Manually advanced clock
    pub clock: Arc<ManualClock>,
    /// Sessions the correlator encodes through
    pub sessions: Arc<ClientSessionRegistry>,
    /// Correlator under test
    pub correlator: Arc<PendingExchangeCorrelator>,
}

impl CorrelatorFixture {
    /// Fixture with default correlator configuration
    pub fn new() -> Self {
        Self::with_config(&CorrelatorConfig::default())
    }

    /// Fixture with explicit correlator configuration
    pub fn with_config(config: &CorrelatorConfig) -> Self {
        let clock = test_clock();
        let sessions = Arc::new(ClientSessionRegistry::new());
        let correlator = Arc::new(PendingExchangeCorrelator::new(
            sessions.clone(),
            clock.clone(),
            config,
        ));
        Self {
            clock,
            sessions,
            correlator,
        }
    }

    /// Register a JSON session for `endpoint`
    pub fn connect(&self, endpoint: &str) -> Session {
        self.connect_with(endpoint, Arc::new(JsonAdaptor))
    }

    /// Register a session for `endpoint` using `adaptor`
    pub fn connect_with(&self, endpoint: &str, adaptor: Arc<dyn TransportAdaptor>) -> Session {
        let session = Session::new(endpoint, adaptor, self.clock.now());
        self.sessions.put(session.clone());
        session
    }

    /// Current fixture time
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Deadline `offset` after the current fixture time
    pub fn deadline_in(&self, offset: Duration) -> Timestamp {
        self.clock.now().saturating_add(offset)
    }

    /// Move the fixture clock forward
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

impl Default for CorrelatorFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Correlation key for `endpoint` and message id `seq`
pub fn key(endpoint: &str, seq: u32) -> CorrelationKey {
    CorrelationKey::new(endpoint, seq)
}
