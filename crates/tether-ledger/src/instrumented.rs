//! Ledger decorator feeding message counters

use async_trait::async_trait;
use std::sync::Arc;
use tether_core::{DeviceId, MessagesStats, RpcId, StatCounters, TenantId, Timestamp};

use crate::error::LedgerError;
use crate::model::{NewRpcCall, RpcCall, RpcStatus};
use crate::page::{PageData, PageLink};
use crate::store::RpcCallLedger;

/// Wraps a ledger and counts admitted, successful and failed calls.
///
/// Only operations that succeed are counted. `TIMEOUT` and `EXPIRED` count
/// as failures.
#[derive(Debug)]
pub struct InstrumentedLedger<L> {
    inner: L,
    stats: Arc<StatCounters>,
}

impl<L: RpcCallLedger> InstrumentedLedger<L> {
    /// Decorate `inner`, reporting into `stats`
    pub fn new(inner: L, stats: Arc<StatCounters>) -> Self {
        Self { inner, stats }
    }

    /// Counters this ledger reports into
    pub fn stats(&self) -> &Arc<StatCounters> {
        &self.stats
    }

    /// Wrapped ledger
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L: RpcCallLedger> RpcCallLedger for InstrumentedLedger<L> {
    async fn insert(&self, call: NewRpcCall) -> Result<RpcCall, LedgerError> {
        let row = self.inner.insert(call).await?;
        self.stats.increment_total();
        Ok(row)
    }

    async fn find_by_id(&self, id: RpcId) -> Result<Option<RpcCall>, LedgerError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_device(
        &self,
        tenant_id: TenantId,
        device_id: DeviceId,
        status: Option<RpcStatus>,
        page: &PageLink,
    ) -> Result<PageData<RpcCall>, LedgerError> {
        self.inner
            .find_by_device(tenant_id, device_id, status, page)
            .await
    }

    async fn find_by_tenant(
        &self,
        tenant_id: TenantId,
        page: &PageLink,
    ) -> Result<PageData<RpcCall>, LedgerError> {
        self.inner.find_by_tenant(tenant_id, page).await
    }

    async fn update_status(
        &self,
        id: RpcId,
        status: RpcStatus,
        response: Option<serde_json::Value>,
    ) -> Result<RpcCall, LedgerError> {
        let row = self.inner.update_status(id, status, response).await?;
        match status {
            RpcStatus::Successful => self.stats.increment_successful(),
            RpcStatus::Failed | RpcStatus::Timeout | RpcStatus::Expired => {
                self.stats.increment_failed()
            }
            RpcStatus::Queued | RpcStatus::Sent | RpcStatus::Delivered => {}
        }
        Ok(row)
    }

    async fn expire_older_than(
        &self,
        tenant_id: TenantId,
        cutoff: Timestamp,
    ) -> Result<usize, LedgerError> {
        self.inner.expire_older_than(tenant_id, cutoff).await
    }

    async fn tenants(&self) -> Result<Vec<TenantId>, LedgerError> {
        self.inner.tenants().await
    }
}
