//! Regression tournaments between engine builds, decided by an SPRT.
//!
//! The crate separates pure logic from effects:
//!
//! - **[`core`]**: deterministic bookkeeping (match configuration, the
//!   sequential test, Elo arithmetic, the tournament aggregate). No I/O.
//! - **[`io`]**: the version archive, identity queries, descriptor
//!   resolution, the arbiter adapter, and run artifacts.
//!
//! [`orchestrator`] ties an arbiter session to the tournament aggregate;
//! [`cli`] implements the `harness` subcommands on top of it.

pub mod cli;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
