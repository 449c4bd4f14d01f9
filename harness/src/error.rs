//! Failure taxonomy for tournament runs.
//!
//! Plumbing errors travel as `anyhow::Error` with context. The variants here
//! are the failures that carry meaning for the operator; the CLI finds them in
//! the error chain to pick an exit code.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::ParticipantFailure;
use crate::exit_codes;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The build collaborator failed or produced no binary.
    #[error("build failed: {0}")]
    Build(String),

    /// A binary did not answer the identity query with a single line in time.
    #[error("identity query failed for {}: {reason}", .binary.display())]
    IdentityQuery { binary: PathBuf, reason: String },

    /// An engine path does not exist or is not executable.
    #[error("missing engine binary {}: {reason}", .path.display())]
    MissingBinary { path: PathBuf, reason: String },

    /// Every violated match constraint, not just the first.
    #[error("invalid match configuration:\n- {}", .violations.join("\n- "))]
    InvalidConfiguration { violations: Vec<String> },

    /// A participant crashed or timed out and recovery is disabled.
    #[error("participant failure in game {index}: {failure}")]
    ParticipantFailure {
        index: u32,
        failure: ParticipantFailure,
    },

    /// The arbiter misbehaved; partial results cannot be trusted.
    #[error("arbiter protocol error: {0}")]
    ArbiterProtocol(String),
}

impl HarnessError {
    /// Configuration-time failures never start a run.
    pub fn is_configuration_time(&self) -> bool {
        matches!(
            self,
            HarnessError::MissingBinary { .. } | HarnessError::InvalidConfiguration { .. }
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_configuration_time() {
            exit_codes::INVALID
        } else {
            exit_codes::FAILED
        }
    }
}

/// Find the first `HarnessError` anywhere in an error chain.
pub fn find_harness_error(err: &anyhow::Error) -> Option<&HarnessError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<HarnessError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn invalid_configuration_lists_every_violation() {
        let err = HarnessError::InvalidConfiguration {
            violations: vec!["concurrency must be >= 1".to_string(), "games must be > 0".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("concurrency must be >= 1"));
        assert!(message.contains("games must be > 0"));
        assert_eq!(err.exit_code(), exit_codes::INVALID);
    }

    #[test]
    fn finds_typed_error_through_context() {
        let result: anyhow::Result<()> =
            Err(HarnessError::ArbiterProtocol("garbled line".to_string()))
                .context("drive arbiter");
        let err = result.unwrap_err();
        let found = find_harness_error(&err).expect("typed error in chain");
        assert!(matches!(found, HarnessError::ArbiterProtocol(_)));
        assert_eq!(found.exit_code(), exit_codes::FAILED);
    }
}
