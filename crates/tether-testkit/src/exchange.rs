//! Recording exchange handles
//!
//! A [`RecordingExchange`] stores every answer it receives in a shared
//! [`ExchangeProbe`], so tests can assert that an exchange was answered
//! exactly once and with what.

use parking_lot::Mutex;
use std::sync::Arc;
use tether_core::TetherError;
use tether_transport::{ExchangeHandle, ExchangeReply, ResponseCode};

/// Shared view of the answers given to one or more recording exchanges
#[derive(Debug, Clone, Default)]
pub struct ExchangeProbe {
    replies: Arc<Mutex<Vec<ExchangeReply>>>,
}

impl ExchangeProbe {
    /// Every answer recorded so far, in order
    pub fn replies(&self) -> Vec<ExchangeReply> {
        self.replies.lock().clone()
    }

    /// Number of answers recorded
    pub fn count(&self) -> usize {
        self.replies.lock().len()
    }

    /// The only answer recorded; panics unless exactly one was given
    pub fn single(&self) -> ExchangeReply {
        let replies = self.replies.lock();
        assert_eq!(
            replies.len(),
            1,
            "expected exactly one answer, got {replies:?}"
        );
        replies[0].clone()
    }

    /// Decoded JSON of the only answer; panics if it is not a payload
    pub fn single_json(&self) -> serde_json::Value {
        match self.single() {
            ExchangeReply::Payload(bytes) => serde_json::from_slice(&bytes).unwrap(),
            other => panic!("expected a payload answer, got {other:?}"),
        }
    }

    fn record(&self, reply: ExchangeReply) {
        self.replies.lock().push(reply);
    }
}

/// Exchange handle that records its answer into an [`ExchangeProbe`]
#[derive(Debug)]
pub struct RecordingExchange {
    probe: ExchangeProbe,
    fail_with: Option<String>,
}

impl RecordingExchange {
    /// Handle recording into `probe`
    pub fn new(probe: ExchangeProbe) -> Self {
        Self {
            probe,
            fail_with: None,
        }
    }

    /// Handle that records the attempt, then reports a transport failure
    pub fn failing(probe: ExchangeProbe, message: impl Into<String>) -> Self {
        Self {
            probe,
            fail_with: Some(message.into()),
        }
    }

    fn finish(self, reply: ExchangeReply) -> Result<(), TetherError> {
        self.probe.record(reply);
        match self.fail_with {
            Some(message) => Err(TetherError::transport(message)),
            None => Ok(()),
        }
    }
}

impl ExchangeHandle for RecordingExchange {
    fn respond(self: Box<Self>, payload: Vec<u8>) -> Result<(), TetherError> {
        self.finish(ExchangeReply::Payload(payload))
    }

    fn respond_with_code(self: Box<Self>, code: ResponseCode) -> Result<(), TetherError> {
        self.finish(ExchangeReply::Code(code))
    }
}

/// Fresh recording exchange and the probe observing it
pub fn recording_exchange() -> (Box<dyn ExchangeHandle>, ExchangeProbe) {
    let probe = ExchangeProbe::default();
    (Box::new(RecordingExchange::new(probe.clone())), probe)
}
