//! Identity query against an engine binary (`<binary> version`).

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::error::HarnessError;
use crate::io::process::{Bounds, run_bounded};

/// Identity lines are short; anything longer is not an identity answer.
const IDENTITY_OUTPUT_LIMIT: usize = 4096;

/// Run `<binary> <arg>` and return its single-line identity.
///
/// The child is always reaped before returning, including on timeout.
#[instrument(skip_all, fields(binary = %binary.display(), arg = %arg))]
pub fn query_identity(binary: &Path, arg: &str, timeout: Duration) -> Result<String> {
    let fail = |reason: String| HarnessError::IdentityQuery {
        binary: binary.to_path_buf(),
        reason,
    };

    let mut cmd = Command::new(binary);
    cmd.arg(arg);
    let bounds = Bounds {
        timeout,
        output_limit: IDENTITY_OUTPUT_LIMIT,
    };
    let output = run_bounded("identity query", cmd, bounds).map_err(|err| fail(format!("{err:#}")))?;

    if output.timed_out {
        return Err(fail(format!("no answer within {timeout:?}")).into());
    }
    if !output.status.success() {
        return Err(fail(format!(
            "exited with status {:?}: {}",
            output.status.code(),
            output.stderr_tail(3)
        ))
        .into());
    }
    if output.stdout_truncated > 0 {
        return Err(fail("output exceeds identity length limit".to_string()).into());
    }

    let label = parse_identity(&String::from_utf8_lossy(&output.stdout)).map_err(fail)?;
    debug!(%label, "identity answered");
    Ok(label)
}

/// Extract the identity from stdout: exactly one non-empty line.
pub fn parse_identity(stdout: &str) -> Result<String, String> {
    let mut lines = stdout.lines().map(str::trim).filter(|line| !line.is_empty());
    let Some(first) = lines.next() else {
        return Err("empty identity output".to_string());
    };
    if lines.next().is_some() {
        return Err("identity output spans multiple lines".to_string());
    }
    Ok(first.to_string())
}
