//! I/O helpers: archive, engine processes, arbiter, and run artifacts.

pub mod arbiter;
pub mod archive;
pub mod config;
pub mod identity;
pub mod process;
pub mod report_store;
pub mod resolver;
pub mod run_dir;
