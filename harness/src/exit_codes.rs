//! Stable exit codes for harness CLI commands.

/// Run reached a terminal SPRT decision or exhausted its game budget.
pub const OK: i32 = 0;
/// Fatal run-time failure (build, identity query, participant, arbiter).
pub const FAILED: i32 = 1;
/// Configuration-time failure; no game was scheduled.
pub const INVALID: i32 = 2;
/// The arbiter ended the match on its own before a decision or exhaustion.
pub const INCONCLUSIVE: i32 = 3;
