//! Storage contract for RPC call records

use async_trait::async_trait;
use tether_core::{DeviceId, RpcId, TenantId, Timestamp};

use crate::error::LedgerError;
use crate::model::{NewRpcCall, RpcCall, RpcStatus};
use crate::page::{PageData, PageLink};

/// Storage interface for RPC call rows.
///
/// Each operation is atomic with respect to the others: a bulk expiration
/// never observes a half-applied status update and vice versa.
#[async_trait]
pub trait RpcCallLedger: Send + Sync {
    /// Validate and persist a new call in `QUEUED` status.
    async fn insert(&self, call: NewRpcCall) -> Result<RpcCall, LedgerError>;

    /// Load one call.
    async fn find_by_id(&self, id: RpcId) -> Result<Option<RpcCall>, LedgerError>;

    /// Calls for one device, optionally restricted to a status.
    async fn find_by_device(
        &self,
        tenant_id: TenantId,
        device_id: DeviceId,
        status: Option<RpcStatus>,
        page: &PageLink,
    ) -> Result<PageData<RpcCall>, LedgerError>;

    /// Calls across every device of a tenant.
    async fn find_by_tenant(
        &self,
        tenant_id: TenantId,
        page: &PageLink,
    ) -> Result<PageData<RpcCall>, LedgerError>;

    /// Move a call forward along the status graph, optionally recording the
    /// device answer.
    async fn update_status(
        &self,
        id: RpcId,
        status: RpcStatus,
        response: Option<serde_json::Value>,
    ) -> Result<RpcCall, LedgerError>;

    /// Delete every call of `tenant_id` created strictly before `cutoff`,
    /// whatever its status. Returns the number of rows removed.
    async fn expire_older_than(
        &self,
        tenant_id: TenantId,
        cutoff: Timestamp,
    ) -> Result<usize, LedgerError>;

    /// Tenants that currently own at least one row.
    async fn tenants(&self) -> Result<Vec<TenantId>, LedgerError>;
}
