//! # Tether Core - Foundation Types
//!
//! Shared vocabulary for the Tether device RPC session layer:
//! - **Identifiers**: endpoint identities, correlation keys, tenant/device/call ids
//! - **Time**: millisecond timestamps and the [`Clock`] capability
//! - **Errors**: the unified [`TetherError`]
//! - **Configuration**: [`TetherConfig`] loaded from TOML and `TETHER_*` env vars
//! - **Stats**: per-consumer message counters with atomic reset
//!
//! Every other crate in the workspace depends on this one and nothing here
//! depends on a transport, a ledger backend or a runtime.

pub mod config;
pub mod errors;
pub mod identifiers;
pub mod stats;
pub mod time;

pub use config::{CorrelatorConfig, LedgerConfig, SessionConfig, StatsConfig, TetherConfig};
pub use errors::{Result, TetherError};
pub use identifiers::{CorrelationKey, DeviceId, EndpointId, RpcId, TenantId};
pub use stats::{MessagesStats, StatCounters, StatsRegistry, StatsSnapshot};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
