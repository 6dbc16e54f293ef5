//! In-memory ledger backend
//!
//! All rows live behind one lock, which gives every operation the isolation
//! a transactional store would.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tether_core::{Clock, DeviceId, LedgerConfig, RpcId, TenantId, Timestamp};

use crate::error::LedgerError;
use crate::model::{NewRpcCall, RpcCall, RpcStatus};
use crate::page::{PageData, PageLink};
use crate::store::RpcCallLedger;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<RpcId, RpcCall>,
    by_tenant: BTreeMap<TenantId, BTreeSet<RpcId>>,
}

impl Tables {
    fn tenant_rows(&self, tenant_id: &TenantId) -> impl Iterator<Item = &RpcCall> {
        self.by_tenant
            .get(tenant_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
    }
}

/// Ledger held entirely in process memory
pub struct MemoryRpcCallLedger {
    clock: Arc<dyn Clock>,
    max_page_size: usize,
    tables: RwLock<Tables>,
}

impl MemoryRpcCallLedger {
    /// Create an empty ledger stamping rows with `clock`
    pub fn new(clock: Arc<dyn Clock>, config: &LedgerConfig) -> Self {
        Self {
            clock,
            max_page_size: config.max_page_size,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        self.tables.read().rows.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn page(&self, mut calls: Vec<RpcCall>, link: &PageLink) -> PageData<RpcCall> {
        link.sort_order.sort(&mut calls);
        PageData::from_ordered(calls, link)
    }
}

fn validate_new(call: NewRpcCall, now: Timestamp) -> Result<RpcCall, LedgerError> {
    let tenant_id = call
        .tenant_id
        .ok_or_else(|| LedgerError::validation("tenant id is required"))?;
    let device_id = call
        .device_id
        .ok_or_else(|| LedgerError::validation("device id is required"))?;
    let expiration_time = call
        .expiration_time
        .ok_or_else(|| LedgerError::validation("expiration time is required"))?;
    let created_time = call.created_time.unwrap_or(now);
    if expiration_time <= created_time {
        return Err(LedgerError::validation(format!(
            "expiration time {expiration_time} is not after creation time {created_time}"
        )));
    }
    Ok(RpcCall {
        id: call.id.unwrap_or_default(),
        tenant_id,
        device_id,
        status: RpcStatus::Queued,
        created_time,
        expiration_time,
        request: call.request,
        response: None,
    })
}

#[async_trait]
impl RpcCallLedger for MemoryRpcCallLedger {
    async fn insert(&self, call: NewRpcCall) -> Result<RpcCall, LedgerError> {
        let row = validate_new(call, self.clock.now())?;
        let mut tables = self.tables.write();
        if tables.rows.contains_key(&row.id) {
            return Err(LedgerError::validation(format!(
                "rpc call {} already exists",
                row.id
            )));
        }
        tables
            .by_tenant
            .entry(row.tenant_id)
            .or_default()
            .insert(row.id);
        tables.rows.insert(row.id, row.clone());
        tracing::debug!(
            operation = "ledger_insert",
            rpc_id = %row.id,
            tenant_id = %row.tenant_id,
            device_id = %row.device_id,
            "rpc call queued"
        );
        Ok(row)
    }

    async fn find_by_id(&self, id: RpcId) -> Result<Option<RpcCall>, LedgerError> {
        Ok(self.tables.read().rows.get(&id).cloned())
    }

    async fn find_by_device(
        &self,
        tenant_id: TenantId,
        device_id: DeviceId,
        status: Option<RpcStatus>,
        page: &PageLink,
    ) -> Result<PageData<RpcCall>, LedgerError> {
        page.validate(self.max_page_size)?;
        let matching: Vec<RpcCall> = self
            .tables
            .read()
            .tenant_rows(&tenant_id)
            .filter(|row| row.device_id == device_id)
            .filter(|row| status.map_or(true, |s| row.status == s))
            .cloned()
            .collect();
        Ok(self.page(matching, page))
    }

    async fn find_by_tenant(
        &self,
        tenant_id: TenantId,
        page: &PageLink,
    ) -> Result<PageData<RpcCall>, LedgerError> {
        page.validate(self.max_page_size)?;
        let matching: Vec<RpcCall> = self
            .tables
            .read()
            .tenant_rows(&tenant_id)
            .cloned()
            .collect();
        Ok(self.page(matching, page))
    }

    async fn update_status(
        &self,
        id: RpcId,
        status: RpcStatus,
        response: Option<serde_json::Value>,
    ) -> Result<RpcCall, LedgerError> {
        let mut tables = self.tables.write();
        let row = tables.rows.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        if !row.status.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition {
                id,
                from: row.status,
                to: status,
            });
        }
        let previous = row.status;
        row.status = status;
        if response.is_some() {
            row.response = response;
        }
        tracing::debug!(
            operation = "ledger_update_status",
            rpc_id = %id,
            from = %previous,
            to = %status,
            "rpc call status updated"
        );
        Ok(row.clone())
    }

    async fn expire_older_than(
        &self,
        tenant_id: TenantId,
        cutoff: Timestamp,
    ) -> Result<usize, LedgerError> {
        let mut tables = self.tables.write();
        let Some(ids) = tables.by_tenant.remove(&tenant_id) else {
            return Ok(0);
        };
        let (expired, kept): (Vec<RpcId>, Vec<RpcId>) = ids.into_iter().partition(|id| {
            tables
                .rows
                .get(id)
                .map_or(true, |row| row.created_time < cutoff)
        });
        for id in &expired {
            tables.rows.remove(id);
        }
        if !kept.is_empty() {
            tables
                .by_tenant
                .insert(tenant_id, kept.into_iter().collect());
        }
        tracing::debug!(
            operation = "ledger_expire",
            tenant_id = %tenant_id,
            cutoff_ms = cutoff.as_millis(),
            removed = expired.len(),
            "expired rpc calls"
        );
        Ok(expired.len())
    }

    async fn tenants(&self) -> Result<Vec<TenantId>, LedgerError> {
        Ok(self.tables.read().by_tenant.keys().copied().collect())
    }
}

impl std::fmt::Debug for MemoryRpcCallLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRpcCallLedger")
            .field("rows", &self.len())
            .field("max_page_size", &self.max_page_size)
            .finish()
    }
}
