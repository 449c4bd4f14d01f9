//! Helpers for running short-lived child processes with timeouts and bounded output.
//!
//! Used for the build collaborator and identity queries. The long-running
//! arbiter is supervised separately in [`crate::io::arbiter`].

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Last `lines` lines of stderr, for error messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        tail_lines(&String::from_utf8_lossy(&self.stderr), lines)
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }
}

/// Last `lines` non-empty lines of `text`, joined with newlines.
pub fn tail_lines(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}

/// How long pipe readers may lag behind a killed child before being abandoned.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Limits for one short-lived child process.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_limit: usize,
}

/// Run `cmd` to completion under `bounds`, with stdin closed.
///
/// Both pipes are drained on their own threads while the child runs, so a
/// chatty child cannot block on a full pipe. A child that outlives the
/// timeout is killed together with everything it spawned and reported with
/// `timed_out = true`. `label` names the child in logs and error context.
#[instrument(skip(cmd, bounds), fields(timeout_secs = bounds.timeout.as_secs()))]
pub fn run_bounded(label: &str, mut cmd: Command, bounds: Bounds) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    own_process_group(&mut cmd);

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(%program, "spawning {label}");
    let mut child = cmd.spawn().map_err(|err| {
        error!(%err, %program, "failed to spawn {label}");
        anyhow!("spawn {label} `{program}`: {err}")
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("{label} stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("{label} stderr was not piped"))?;
    let limit = bounds.output_limit;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    let (status, timed_out) = match child
        .wait_timeout(bounds.timeout)
        .with_context(|| format!("wait for {label}"))?
    {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = bounds.timeout.as_secs_f64(), "{label} timed out, killing");
            kill_tree(&mut child, label)?;
            let status = child.wait().with_context(|| format!("reap {label}"))?;
            (status, true)
        }
    };

    // A killed child's descendants may still hold the pipes open.
    let deadline = timed_out.then(|| Instant::now() + KILL_GRACE);
    let (stdout, stdout_truncated) =
        join_output_until(stdout_handle, deadline, label).context("join stdout")?;
    let (stderr, stderr_truncated) =
        join_output_until(stderr_handle, deadline, label).context("join stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "{label} output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "{label} finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill `child` and, on unix, the process group it leads.
fn kill_tree(child: &mut Child, label: &str) -> Result<()> {
    #[cfg(unix)]
    {
        // A negative pid addresses the whole group.
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-s", "KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => warn!(?status, "group kill failed, killing {label} alone"),
            Err(err) => warn!(%err, "group kill unavailable, killing {label} alone"),
        }
    }
    child.kill().with_context(|| format!("kill {label}"))
}

/// Join a reader thread, giving up at `deadline` with nothing captured.
fn join_output_until(
    handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>,
    deadline: Option<Instant>,
    label: &str,
) -> Result<(Vec<u8>, usize)> {
    if let Some(deadline) = deadline {
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("{label} output still open after kill, abandoning reader");
                return Ok((Vec::new(), 0));
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
    join_output(handle)
}

pub(crate) fn join_output(
    handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>,
) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

pub(crate) fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
