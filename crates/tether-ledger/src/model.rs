//! RPC call rows and the status graph

use serde::{Deserialize, Serialize};
use std::fmt;
use tether_core::{DeviceId, RpcId, TenantId, Timestamp};

/// Lifecycle status of an RPC call.
///
/// Forward path: `QUEUED → SENT → DELIVERED → SUCCESSFUL | FAILED`. Any
/// non-terminal status may also move to `TIMEOUT` or `EXPIRED`. Terminal
/// statuses never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcStatus {
    /// Admitted, not yet handed to the transport
    Queued,
    /// Handed to the transport
    Sent,
    /// Device acknowledged receipt
    Delivered,
    /// Device answered successfully
    Successful,
    /// No device answer before the call deadline
    Timeout,
    /// Device or pipeline reported a failure
    Failed,
    /// Call expired before it could be sent
    Expired,
}

impl RpcStatus {
    /// Every status, in declaration order
    pub const ALL: [RpcStatus; 7] = [
        RpcStatus::Queued,
        RpcStatus::Sent,
        RpcStatus::Delivered,
        RpcStatus::Successful,
        RpcStatus::Timeout,
        RpcStatus::Failed,
        RpcStatus::Expired,
    ];

    /// True once the status can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Successful | Self::Timeout | Self::Failed | Self::Expired
        )
    }

    /// True when `next` is reachable from `self` along the status graph
    pub fn can_transition_to(&self, next: RpcStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Queued => false,
            Self::Sent => *self == Self::Queued,
            Self::Delivered => matches!(self, Self::Queued | Self::Sent),
            Self::Successful | Self::Failed | Self::Timeout | Self::Expired => true,
        }
    }

    /// Wire name, e.g. `QUEUED`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Successful => "SUCCESSFUL",
            Self::Timeout => "TIMEOUT",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted RPC call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    /// Call identity
    pub id: RpcId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Target device
    pub device_id: DeviceId,
    /// Current status
    pub status: RpcStatus,
    /// Admission time
    pub created_time: Timestamp,
    /// Time after which the call is no longer worth sending
    pub expiration_time: Timestamp,
    /// Request body
    pub request: serde_json::Value,
    /// Device answer, once resolved
    pub response: Option<serde_json::Value>,
}

/// Call submitted for admission.
///
/// Fields arrive from API deserialization and may be missing; the ledger
/// validates them on insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRpcCall {
    /// Preassigned identity; generated when absent
    #[serde(default)]
    pub id: Option<RpcId>,
    /// Owning tenant (required)
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    /// Target device (required)
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    /// Expiration time (required)
    #[serde(default)]
    pub expiration_time: Option<Timestamp>,
    /// Creation time; the ledger's clock when absent
    #[serde(default)]
    pub created_time: Option<Timestamp>,
    /// Request body
    #[serde(default)]
    pub request: serde_json::Value,
}

impl NewRpcCall {
    /// Call with every required field present
    pub fn new(
        tenant_id: TenantId,
        device_id: DeviceId,
        expiration_time: Timestamp,
        request: serde_json::Value,
    ) -> Self {
        Self {
            id: None,
            tenant_id: Some(tenant_id),
            device_id: Some(device_id),
            expiration_time: Some(expiration_time),
            created_time: None,
            request,
        }
    }

    /// Use a preassigned identity
    pub fn with_id(mut self, id: RpcId) -> Self {
        self.id = Some(id);
        self
    }

    /// Stamp the call with the time the request was admitted
    pub fn with_created_time(mut self, created_time: Timestamp) -> Self {
        self.created_time = Some(created_time);
        self
    }
}
