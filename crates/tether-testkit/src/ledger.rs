//! Ledger helpers

use std::sync::Arc;
use std::time::Duration;
use tether_core::{Clock, DeviceId, LedgerConfig, TenantId};
use tether_ledger::{MemoryRpcCallLedger, NewRpcCall};

/// Empty in-memory ledger on `clock` with default limits
pub fn memory_ledger(clock: Arc<dyn Clock>) -> MemoryRpcCallLedger {
    MemoryRpcCallLedger::new(clock, &LedgerConfig::default())
}

/// Call for `device` expiring `ttl` after the current time of `clock`
pub fn rpc_call(
    tenant_id: TenantId,
    device_id: DeviceId,
    clock: &dyn Clock,
    ttl: Duration,
) -> NewRpcCall {
    NewRpcCall::new(
        tenant_id,
        device_id,
        clock.now().saturating_add(ttl),
        serde_json::json!({"method": "getTelemetry", "params": {}}),
    )
}
