//! Identifier types
//!
//! Endpoint identities are the strings devices register under (LwM2M endpoint
//! names, CoAP client names). Tenant, device and call identifiers are UUIDs
//! owned by the platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::TetherError;

/// Unique string identifying a device's transport registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create an endpoint identity
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the endpoint name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EndpointId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Token linking a device request to its eventual asynchronous result.
///
/// Derived from the session's endpoint and the request sequence number the
/// device put on the wire. Rendered as `endpoint#seq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationKey {
    endpoint: EndpointId,
    seq: u32,
}

impl CorrelationKey {
    /// Separator between endpoint and sequence in the textual form
    pub const SEPARATOR: char = '#';

    /// Build a key from endpoint and request sequence
    pub fn new(endpoint: impl Into<EndpointId>, seq: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            seq,
        }
    }

    /// Endpoint of the session the request arrived on
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// Request sequence number
    pub fn seq(&self) -> u32 {
        self.seq
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.endpoint, Self::SEPARATOR, self.seq)
    }
}

impl FromStr for CorrelationKey {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Endpoint names may themselves contain '#', the sequence never does.
        let (endpoint, seq) = s
            .rsplit_once(Self::SEPARATOR)
            .ok_or_else(|| TetherError::invalid(format!("correlation key without sequence: {s}")))?;
        if endpoint.is_empty() {
            return Err(TetherError::invalid(format!(
                "correlation key without endpoint: {s}"
            )));
        }
        let seq = seq
            .parse::<u32>()
            .map_err(|e| TetherError::invalid(format!("bad correlation sequence in {s}: {e}")))?;
        Ok(Self::new(endpoint, seq))
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Inner UUID
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Tenant owning devices and their RPC ledger rows
    TenantId
);
uuid_id!(
    /// Platform-level device identity (not the transport endpoint)
    DeviceId
);
uuid_id!(
    /// Identity of one persisted RPC call
    RpcId
);
