//! Tether Testing Infrastructure
//!
//! Shared fixtures for integration tests across the workspace: recording
//! exchange handles, adaptors that fail on purpose, a correlator wired to a
//! manual clock and ledger call builders.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tether-testkit = { path = "../tether-testkit" }
//! ```
//!
//! ```rust,no_run
//! use tether_testkit::*;
//!
//! let fixture = CorrelatorFixture::new();
//! fixture.connect("dev-1");
//! let (exchange, probe) = recording_exchange();
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod adaptor;
pub mod exchange;
pub mod fixtures;
pub mod ledger;

pub use adaptor::*;
pub use exchange::*;
pub use fixtures::*;
pub use ledger::*;
