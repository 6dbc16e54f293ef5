//! Periodic cleanup: overdue exchanges, idle sessions, aged ledger rows

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Clock, EndpointId, TetherConfig};
use tether_ledger::{LedgerError, RpcStatus};

use crate::service::DeviceRpcService;

/// What one full sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Exchanges answered with a timeout code
    pub expired_exchanges: usize,
    /// Sessions evicted for inactivity
    pub evicted_sessions: Vec<EndpointId>,
    /// Ledger rows deleted by age
    pub deleted_calls: usize,
}

/// Runs the agent's cleanup passes
pub struct Sweeper {
    service: Arc<DeviceRpcService>,
    clock: Arc<dyn Clock>,
    idle_timeout: Option<Duration>,
    ledger_ttl: Option<Duration>,
}

impl Sweeper {
    /// Sweeper for `service` using the session and ledger settings of `config`
    pub fn new(
        service: Arc<DeviceRpcService>,
        clock: Arc<dyn Clock>,
        config: &TetherConfig,
    ) -> Self {
        Self {
            service,
            clock,
            idle_timeout: config.sessions.idle_timeout(),
            ledger_ttl: config.ledger.ttl(),
        }
    }

    /// Answer overdue exchanges and mark their calls `TIMEOUT`
    pub async fn sweep_exchanges(&self) -> usize {
        let expired = self.service.correlator().expire_keys(self.clock.now());
        for key in &expired {
            let Some(id) = self.service.links().take(key) else {
                continue;
            };
            if let Err(err) = self
                .service
                .ledger()
                .update_status(id, RpcStatus::Timeout, None)
                .await
            {
                tracing::warn!(
                    operation = "sweep_exchanges",
                    key = %key,
                    rpc_id = %id,
                    error = %err,
                    "failed to record timeout"
                );
            }
        }
        expired.len()
    }

    /// Evict idle sessions; a no-op when idle eviction is disabled
    pub fn evict_idle_sessions(&self) -> Vec<EndpointId> {
        let Some(max_idle) = self.idle_timeout else {
            return Vec::new();
        };
        let evicted = self.service.evict_idle(self.clock.now(), max_idle);
        for endpoint in &evicted {
            tracing::info!(
                operation = "evict_idle_sessions",
                endpoint = %endpoint,
                "session evicted"
            );
        }
        evicted
    }

    /// Delete ledger rows older than the configured TTL across every tenant
    pub async fn cleanup_ledger(&self) -> Result<usize, LedgerError> {
        let Some(ttl) = self.ledger_ttl else {
            return Ok(0);
        };
        let cutoff = self.clock.now().saturating_sub(ttl);
        let ledger = self.service.ledger();
        let mut deleted = 0;
        for tenant_id in ledger.tenants().await? {
            let removed = ledger.expire_older_than(tenant_id, cutoff).await?;
            if removed > 0 {
                tracing::info!(
                    operation = "cleanup_ledger",
                    tenant_id = %tenant_id,
                    removed,
                    "expired rpc calls"
                );
            }
            deleted += removed;
        }
        Ok(deleted)
    }

    /// Run every pass once
    pub async fn run_once(&self) -> Result<SweepReport, LedgerError> {
        Ok(SweepReport {
            expired_exchanges: self.sweep_exchanges().await,
            evicted_sessions: self.evict_idle_sessions(),
            deleted_calls: self.cleanup_ledger().await?,
        })
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("idle_timeout", &self.idle_timeout)
            .field("ledger_ttl", &self.ledger_ttl)
            .finish()
    }
}
