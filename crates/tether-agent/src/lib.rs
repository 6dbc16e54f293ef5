//! # Tether Agent - Device RPC Runtime
//!
//! Wires the session registry, the exchange correlator and the call ledger
//! into a running service:
//! - [`DeviceRpcService`] admits device requests and forwards them to the
//!   processing pipeline
//! - [`ResultDispatcher`] delivers pipeline results back to open exchanges
//! - [`Sweeper`] expires overdue exchanges, evicts idle sessions and ages out
//!   ledger rows
//! - [`StatsReporter`] logs and resets message counters
//! - [`TaskRegistry`] owns the background tasks
//!
//! [`TetherAgent`] assembles all of the above from a [`TetherConfig`](tether_core::TetherConfig).

pub mod dispatcher;
pub mod errors;
pub mod links;
pub mod reporter;
pub mod runtime;
pub mod service;
pub mod sweeper;
pub mod task_registry;

pub use dispatcher::{ResultDispatcher, ResultEvent};
pub use errors::AgentError;
pub use links::CallLinks;
pub use reporter::StatsReporter;
pub use runtime::{run_echo_pipeline, PipelineEnds, TetherAgent, PIPELINE_CAPACITY};
pub use service::{DeviceBinding, DeviceRpcService, ForwardedRequest};
pub use sweeper::{SweepReport, Sweeper};
pub use task_registry::TaskRegistry;
