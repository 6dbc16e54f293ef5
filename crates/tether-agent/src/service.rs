//! Device request admission
//!
//! [`DeviceRpcService`] is the entry point a transport front-end calls when
//! a device sends an RPC request. Admission order:
//!
//! 1. touch the endpoint's session (unknown endpoints are refused)
//! 2. decode the payload with the session's adaptor
//! 3. register the open exchange with the correlator
//! 4. record the call in the ledger and link it to the correlation key
//! 5. mark the call `SENT` and forward it to the processing pipeline
//!
//! Every failure after step 3 finalizes the exchange through the correlator
//! so the device always receives exactly one answer.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Clock, CorrelationKey, DeviceId, EndpointId, RpcId, TenantId, Timestamp};
use tether_ledger::{LedgerError, NewRpcCall, RpcCallLedger, RpcStatus};
use tether_transport::{
    ClientSessionRegistry, ErrorKind, ExchangeHandle, PendingExchangeCorrelator, ResponseCode,
    RpcRequest, Session, TransportAdaptor,
};
use tokio::sync::mpsc;

use crate::errors::AgentError;
use crate::links::CallLinks;

/// Tenant and device a connected endpoint acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Device identity
    pub device_id: DeviceId,
}

/// Admitted request handed to the processing pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedRequest {
    /// Key the pipeline must echo back with its result
    pub key: CorrelationKey,
    /// Ledger row for this call
    pub rpc_id: RpcId,
    /// Device binding of the caller
    pub binding: DeviceBinding,
    /// Decoded request
    pub request: RpcRequest,
}

/// Admits device requests and forwards them to the processing pipeline
pub struct DeviceRpcService {
    sessions: Arc<ClientSessionRegistry>,
    correlator: Arc<PendingExchangeCorrelator>,
    ledger: Arc<dyn RpcCallLedger>,
    links: Arc<CallLinks>,
    clock: Arc<dyn Clock>,
    bindings: DashMap<EndpointId, DeviceBinding>,
    pipeline: mpsc::Sender<ForwardedRequest>,
}

impl DeviceRpcService {
    /// Create a service forwarding admitted requests into `pipeline`
    pub fn new(
        sessions: Arc<ClientSessionRegistry>,
        correlator: Arc<PendingExchangeCorrelator>,
        ledger: Arc<dyn RpcCallLedger>,
        clock: Arc<dyn Clock>,
        pipeline: mpsc::Sender<ForwardedRequest>,
    ) -> Self {
        Self {
            sessions,
            correlator,
            ledger,
            links: Arc::new(CallLinks::new()),
            clock,
            bindings: DashMap::new(),
            pipeline,
        }
    }

    /// Session registry
    pub fn sessions(&self) -> &Arc<ClientSessionRegistry> {
        &self.sessions
    }

    /// Exchange correlator
    pub fn correlator(&self) -> &Arc<PendingExchangeCorrelator> {
        &self.correlator
    }

    /// Call ledger
    pub fn ledger(&self) -> &Arc<dyn RpcCallLedger> {
        &self.ledger
    }

    /// Key → ledger row links for outstanding exchanges
    pub fn links(&self) -> &Arc<CallLinks> {
        &self.links
    }

    /// Register (or replace) the session of a connecting device
    pub fn register_device(
        &self,
        endpoint: impl Into<EndpointId>,
        binding: DeviceBinding,
        adaptor: Arc<dyn TransportAdaptor>,
    ) -> Option<Session> {
        let endpoint = endpoint.into();
        self.bindings.insert(endpoint.clone(), binding);
        self.sessions
            .put(Session::new(endpoint, adaptor, self.clock.now()))
    }

    /// Drop the session of a disconnecting device
    pub fn deregister_device(&self, endpoint: &EndpointId) -> bool {
        self.bindings.remove(endpoint);
        self.sessions.remove(endpoint).is_some()
    }

    /// Binding of a registered endpoint
    pub fn binding(&self, endpoint: &EndpointId) -> Option<DeviceBinding> {
        self.bindings.get(endpoint).map(|entry| *entry.value())
    }

    /// Evict sessions idle for longer than `max_idle`, with their bindings
    pub fn evict_idle(&self, now: Timestamp, max_idle: Duration) -> Vec<EndpointId> {
        let evicted = self.sessions.evict_idle(now, max_idle);
        for endpoint in &evicted {
            self.bindings.remove(endpoint);
        }
        evicted
    }

    /// Admit one device request.
    ///
    /// `timeout` overrides the configured exchange timeout. On success the
    /// exchange stays open until the pipeline answers or the deadline passes.
    pub async fn handle_request(
        &self,
        key: CorrelationKey,
        payload: &[u8],
        exchange: Box<dyn ExchangeHandle>,
        timeout: Option<Duration>,
    ) -> Result<RpcId, AgentError> {
        let now = self.clock.now();
        let endpoint = key.endpoint().clone();
        let admitted = if self.sessions.touch(&endpoint, now) {
            self.sessions.get(&endpoint).zip(self.binding(&endpoint))
        } else {
            None
        };
        let Some((session, binding)) = admitted else {
            reject(&key, exchange, ResponseCode::Unauthorized);
            return Err(AgentError::UnknownSession { endpoint });
        };

        let request = match session.adaptor().decode_request(payload) {
            Ok(request) => request,
            Err(err) => {
                reject(&key, exchange, ResponseCode::BadRequest);
                return Err(err.into());
            }
        };

        let deadline = self.correlator.deadline_after(timeout);
        self.correlator.register(key.clone(), exchange, deadline)?;

        let call = NewRpcCall::new(
            binding.tenant_id,
            binding.device_id,
            deadline,
            serde_json::json!({"method": request.method, "params": request.params}),
        )
        .with_created_time(now);
        let row = match self.ledger.insert(call).await {
            Ok(row) => row,
            Err(err) => {
                let kind = match err {
                    LedgerError::Validation(_) => ErrorKind::BadRequest,
                    _ => ErrorKind::Internal,
                };
                let _ = self.correlator.fail(&key, kind);
                return Err(err.into());
            }
        };
        self.links.insert(key.clone(), row.id);

        // A sweep may have finalized the exchange before the link existed.
        if self.correlator.get(&key).is_none() {
            if let Some(id) = self.links.take(&key) {
                self.mark(id, RpcStatus::Timeout).await;
            }
            return Ok(row.id);
        }

        self.mark(row.id, RpcStatus::Sent).await;
        let forwarded = ForwardedRequest {
            key: key.clone(),
            rpc_id: row.id,
            binding,
            request,
        };
        if self.pipeline.send(forwarded).await.is_err() {
            if let Some(id) = self.links.take(&key) {
                self.mark(id, RpcStatus::Failed).await;
            }
            let _ = self.correlator.fail(&key, ErrorKind::Unavailable);
            return Err(AgentError::PipelineClosed);
        }

        tracing::debug!(
            operation = "admit_request",
            key = %key,
            rpc_id = %row.id,
            method = %row.request["method"],
            deadline_ms = deadline.as_millis(),
            "device request forwarded"
        );
        Ok(row.id)
    }

    async fn mark(&self, id: RpcId, status: RpcStatus) {
        if let Err(err) = self.ledger.update_status(id, status, None).await {
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

fn reject(key: &CorrelationKey, exchange: Box<dyn ExchangeHandle>, code: ResponseCode) {
    if let Err(err) = exchange.respond_with_code(code) {
        tracing::warn!(
            operation = "reject_request",
            key = %key,
            code = %code,
            error = %err,
            "failed to answer rejected request"
        );
    }
}

impl std::fmt::Debug for DeviceRpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRpcService")
            .field("sessions", &self.sessions.len())
            .field("outstanding", &self.correlator.outstanding())
            .field("links", &self.links.len())
            .finish()
    }
}
