//! Deterministic, pure logic shared by the harness.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod elo;
pub mod match_config;
pub mod sprt;
pub mod time_control;
pub mod tournament;
pub mod types;
