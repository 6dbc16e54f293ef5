//! # Tether Ledger - RPC Call Records
//!
//! Durable accounting of RPC calls directed at devices:
//! - [`RpcCall`] rows with a monotonic [`RpcStatus`] graph
//! - [`RpcCallLedger`]: the storage contract (insert, paginated queries,
//!   status updates, tenant-scoped bulk expiration)
//! - [`MemoryRpcCallLedger`]: transactional in-memory backend
//! - [`InstrumentedLedger`]: decorator feeding a message counter
//!
//! Status-driven timeout (a call that never got a device answer) and ledger
//! expiration (storage reclamation regardless of outcome) are separate:
//! the first is a status transition, the second deletes rows.

pub mod error;
pub mod instrumented;
pub mod memory;
pub mod model;
pub mod page;
pub mod store;

pub use error::LedgerError;
pub use instrumented::InstrumentedLedger;
pub use memory::MemoryRpcCallLedger;
pub use model::{NewRpcCall, RpcCall, RpcStatus};
pub use page::{PageData, PageLink, SortDirection, SortOrder, SortProperty};
pub use store::RpcCallLedger;
