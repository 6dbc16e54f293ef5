//! Pipeline result delivery

use std::sync::Arc;
use tether_core::{CorrelationKey, MessagesStats, StatCounters};
use tether_ledger::{RpcCallLedger, RpcStatus};
use tether_transport::{
    CorrelationError, Delivery, ErrorKind, MissReason, PendingExchangeCorrelator, ResponseCode,
    RpcReply,
};
use tokio::sync::mpsc;

use crate::links::CallLinks;
use crate::service::DeviceRpcService;

/// Result or failure produced by the processing pipeline for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEvent {
    /// Key of the originating request
    pub key: CorrelationKey,
    /// Reply, or the error kind to answer with
    pub outcome: Result<RpcReply, ErrorKind>,
}

impl ResultEvent {
    /// Successful result
    pub fn reply(key: CorrelationKey, payload: serde_json::Value) -> Self {
        Self {
            key,
            outcome: Ok(RpcReply::new(payload)),
        }
    }

    /// Pipeline failure
    pub fn error(key: CorrelationKey, kind: ErrorKind) -> Self {
        Self {
            key,
            outcome: Err(kind),
        }
    }
}

/// Delivers pipeline results to pending exchanges and settles ledger rows.
///
/// Counts every event in `total`, deliveries in `successful` and misses
/// (duplicate, unknown or late results) in `failed`.
pub struct ResultDispatcher {
    correlator: Arc<PendingExchangeCorrelator>,
    ledger: Arc<dyn RpcCallLedger>,
    links: Arc<CallLinks>,
    stats: Arc<StatCounters>,
}

impl ResultDispatcher {
    /// Dispatcher sharing the service's correlator, ledger and links
    pub fn new(service: &DeviceRpcService, stats: Arc<StatCounters>) -> Self {
        Self {
            correlator: service.correlator().clone(),
            ledger: service.ledger().clone(),
            links: service.links().clone(),
            stats,
        }
    }

    /// Counters for dispatched events
    pub fn stats(&self) -> &Arc<StatCounters> {
        &self.stats
    }

    /// Deliver one event
    pub async fn dispatch(&self, event: ResultEvent) -> Result<Delivery, CorrelationError> {
        self.stats.increment_total();
        let ResultEvent { key, outcome } = event;
        let result = match &outcome {
            Ok(reply) => self.correlator.complete(&key, reply),
            Err(kind) => self.correlator.fail(&key, *kind),
        };

        match &result {
            Ok(delivery) => {
                self.stats.increment_successful();
                let (status, response) = match (delivery, outcome) {
                    (Delivery::Replied, Ok(reply)) => (RpcStatus::Successful, Some(reply.payload)),
                    (Delivery::ErrorCode(ResponseCode::GatewayTimeout), _) => {
                        (RpcStatus::Timeout, None)
                    }
                    _ => (RpcStatus::Failed, None),
                };
                self.settle(&key, status, response).await;
            }
            Err(err) => {
                self.stats.increment_failed();
                if let CorrelationError::UnknownOrExpiredCorrelation {
                    reason: MissReason::Expired,
                    ..
                } = err
                {
                    self.settle(&key, RpcStatus::Timeout, None).await;
                }
                tracing::info!(
                    operation = "dispatch_result",
                    key = %key,
                    error = %err,
                    "result dropped"
                );
            }
        }
        result
    }

    /// Deliver events until the pipeline closes its sender
    pub async fn run(self: Arc<Self>, mut results: mpsc::Receiver<ResultEvent>) {
        while let Some(event) = results.recv().await {
            let _ = self.dispatch(event).await;
        }
        tracing::info!(operation = "dispatch_result", "result channel closed");
    }

    async fn settle(
        &self,
        key: &CorrelationKey,
        status: RpcStatus,
        response: Option<serde_json::Value>,
    ) {
        let Some(id) = self.links.take(key) else {
            return;
        };
        if let Err(err) = self.ledger.update_status(id, status, response).await {
            tracing::warn!(
                operation = "ledger_update_status",
                rpc_id = %id,
                status = %status,
                error = %err,
                "ledger status update failed"
            );
        }
    }
}

impl std::fmt::Debug for ResultDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDispatcher")
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
