//! Arbiter abstraction and the cutechess-cli adapter.
//!
//! The [`Arbiter`] trait decouples orchestration from the external process
//! that actually plays games. A session yields parsed [`ArbiterEvent`]s one at
//! a time; tests drive the orchestrator with scripted sessions instead of a
//! real arbiter.

use std::fs::File;
use std::io::{BufRead, BufReader, LineWriter, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::LazyLock;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument, trace, warn};

use crate::core::match_config::MatchConfig;
use crate::core::types::{
    Decision, EngineDescriptor, FailureKind, GameOutcome, GameReport, GameResult,
    ParticipantFailure,
};
use crate::error::HarnessError;
use crate::io::process::{join_output, read_stream_limited, tail_lines};

/// Keep this much arbiter stderr for error messages.
const STDERR_LIMIT: usize = 64 * 1024;

/// Everything the arbiter needs to run one match.
#[derive(Debug, Clone)]
pub struct ArbiterRequest {
    pub control: EngineDescriptor,
    pub candidate: EngineDescriptor,
    pub config: MatchConfig,
    /// Raw arbiter stdout is copied here line by line.
    pub log_path: PathBuf,
}

/// PGN-style result token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultToken {
    WhiteWins,
    BlackWins,
    Draw,
    /// `*`: the game has no result.
    Unfinished,
}

impl ResultToken {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "1-0" => Some(ResultToken::WhiteWins),
            "0-1" => Some(ResultToken::BlackWins),
            "1/2-1/2" => Some(ResultToken::Draw),
            "*" => Some(ResultToken::Unfinished),
            _ => None,
        }
    }
}

/// A `Finished game` report before it is attributed to control/candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedGame {
    pub index: u32,
    pub white: String,
    pub black: String,
    pub token: ResultToken,
    pub comment: String,
}

impl FinishedGame {
    /// Attribute the game to the pair and tag it completed or failed.
    ///
    /// A game is only `Completed` when it has a result and the comment names
    /// no crash, stall or time forfeit.
    pub fn into_outcome(self, control: &str, candidate: &str) -> Result<GameOutcome, HarnessError> {
        let pair_matches = (self.white == control && self.black == candidate)
            || (self.white == candidate && self.black == control);
        if !pair_matches {
            return Err(HarnessError::ArbiterProtocol(format!(
                "game {} played by unknown engines {} vs {}",
                self.index, self.white, self.black
            )));
        }

        let failure = classify_failure(&self.comment, &self.white, &self.black).or_else(|| {
            (self.token == ResultToken::Unfinished).then(|| ParticipantFailure {
                kind: FailureKind::Unfinished,
                engine: blamed_engine(&self.comment, &self.white, &self.black),
                detail: unfinished_detail(&self.comment),
            })
        });

        let report = match failure {
            Some(failure) => GameReport::Failed { failure },
            None => {
                let candidate_is_white = self.white == candidate;
                let result = match (self.token, candidate_is_white) {
                    (ResultToken::Draw, _) => GameResult::Draw,
                    (ResultToken::WhiteWins, true) | (ResultToken::BlackWins, false) => {
                        GameResult::WinB
                    }
                    (ResultToken::WhiteWins, false) | (ResultToken::BlackWins, true) => {
                        GameResult::WinA
                    }
                    (ResultToken::Unfinished, _) => {
                        return Err(HarnessError::ArbiterProtocol(format!(
                            "game {} unfinished without failure",
                            self.index
                        )));
                    }
                };
                GameReport::Completed { result }
            }
        };

        Ok(GameOutcome {
            index: self.index,
            white: self.white,
            black: self.black,
            report,
            comment: self.comment,
        })
    }
}

/// Parsed arbiter output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterEvent {
    Started {
        index: u32,
        white: String,
        black: String,
    },
    Finished(FinishedGame),
    /// Running score line, informational.
    Score(String),
    /// The arbiter's own SPRT line. `accepted` is set once its test has
    /// concluded, after which the arbiter closes the match by itself.
    Sprt {
        line: String,
        accepted: Option<Decision>,
    },
    MatchFinished,
}

/// Result of waiting for the next event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPoll {
    Event(ArbiterEvent),
    /// Nothing arrived within the wait.
    Idle,
    /// The arbiter closed its output.
    Closed,
}

/// How the arbiter process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterExit {
    pub success: bool,
    pub code: Option<i32>,
    /// Set when the session was terminated by the harness.
    pub terminated: bool,
    pub stderr_tail: String,
}

/// Abstraction over arbiter backends.
pub trait Arbiter {
    type Session: ArbiterSession;

    /// Launch a match. Configuration errors must surface here, before any game.
    fn start(&self, request: &ArbiterRequest) -> Result<Self::Session>;
}

/// A running match.
pub trait ArbiterSession {
    /// Wait up to `timeout` for the next event.
    fn next_event(&mut self, timeout: Duration) -> Result<SessionPoll>;

    /// Stop the match. Idempotent.
    fn terminate(&mut self) -> Result<()>;

    /// Reap the arbiter and report how it ended.
    fn wait(&mut self) -> Result<ArbiterExit>;
}

/// Parse one arbiter stdout line.
///
/// `Ok(None)` for lines that carry nothing the harness needs (rating blocks,
/// warnings). Lines that announce a game but do not match the expected shape
/// are errors.
pub fn parse_line(line: &str) -> Result<Option<ArbiterEvent>, String> {
    static STARTED_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^Started game (\d+) of (\d+) \((.+) vs (.+)\)$").unwrap()
    });
    static FINISHED_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^Finished game (\d+) \((.+) vs (.+)\): (\S+) \{(.*)\}$").unwrap()
    });

    let line = line.trim_end();
    if line.starts_with("Started game") {
        let caps = STARTED_RE
            .captures(line)
            .ok_or_else(|| format!("malformed start line: {line}"))?;
        return Ok(Some(ArbiterEvent::Started {
            index: parse_index(&caps[1], line)?,
            white: caps[3].to_string(),
            black: caps[4].to_string(),
        }));
    }
    if line.starts_with("Finished game") {
        let caps = FINISHED_RE
            .captures(line)
            .ok_or_else(|| format!("malformed finish line: {line}"))?;
        let token = ResultToken::parse(&caps[4])
            .ok_or_else(|| format!("unknown result {} in: {line}", &caps[4]))?;
        return Ok(Some(ArbiterEvent::Finished(FinishedGame {
            index: parse_index(&caps[1], line)?,
            white: caps[2].to_string(),
            black: caps[3].to_string(),
            token,
            comment: caps[5].to_string(),
        })));
    }
    if line == "Finished match" {
        return Ok(Some(ArbiterEvent::MatchFinished));
    }
    if line.starts_with("Score of ") {
        return Ok(Some(ArbiterEvent::Score(line.to_string())));
    }
    if line.starts_with("SPRT:") {
        return Ok(Some(ArbiterEvent::Sprt {
            line: line.to_string(),
            accepted: sprt_verdict(line),
        }));
    }
    Ok(None)
}

/// `SPRT: llr 2.95 (100.3%), lbound -2.94, ubound 2.94 - H1 was accepted`
fn sprt_verdict(line: &str) -> Option<Decision> {
    if line.ends_with("H1 was accepted") {
        Some(Decision::AcceptH1)
    } else if line.ends_with("H0 was accepted") {
        Some(Decision::AcceptH0)
    } else {
        None
    }
}

fn parse_index(text: &str, line: &str) -> Result<u32, String> {
    text.parse()
        .map_err(|_| format!("game number out of range in: {line}"))
}

fn classify_failure(comment: &str, white: &str, black: &str) -> Option<ParticipantFailure> {
    let lower = comment.to_ascii_lowercase();
    let kind = if lower.contains("disconnects") || lower.contains("crash") {
        FailureKind::Crash
    } else if lower.contains("stalls") {
        FailureKind::Stall
    } else if lower.contains("loses on time") || lower.contains("time forfeit") {
        FailureKind::Timeout
    } else {
        return None;
    };
    Some(ParticipantFailure {
        kind,
        engine: blamed_engine(comment, white, black),
        detail: comment.to_string(),
    })
}

fn blamed_engine(comment: &str, white: &str, black: &str) -> Option<String> {
    if comment.starts_with("White") {
        Some(white.to_string())
    } else if comment.starts_with("Black") {
        Some(black.to_string())
    } else {
        None
    }
}

fn unfinished_detail(comment: &str) -> String {
    if comment.trim().is_empty() {
        "game ended without a result".to_string()
    } else {
        comment.to_string()
    }
}

/// cutechess-cli compatible arbiter.
#[derive(Debug, Clone)]
pub struct CutechessArbiter {
    pub program: String,
    /// Appended verbatim after the generated arguments.
    pub extra_args: Vec<String>,
    pub timemargin_ms: Option<u64>,
}

impl CutechessArbiter {
    /// Command-line arguments for `request`.
    pub fn build_args(&self, request: &ArbiterRequest) -> Vec<String> {
        let config = &request.config;
        let mut args = Vec::new();
        for engine in [&request.control, &request.candidate] {
            args.push("-engine".to_string());
            args.push(format!("name={}", engine.name));
            args.push(format!("proto={}", engine.protocol.tag()));
            args.push(format!("cmd={}", engine.command.display()));
            for arg in &engine.args {
                args.push(format!("arg={arg}"));
            }
        }

        args.push("-each".to_string());
        args.push(format!("tc={}", config.time_control()));
        if let Some(margin) = self.timemargin_ms {
            args.push(format!("timemargin={margin}"));
        }

        args.push("-concurrency".to_string());
        args.push(config.concurrency().to_string());
        args.push("-games".to_string());
        args.push(config.games().to_string());
        if config.repeat() {
            args.push("-repeat".to_string());
        }
        args.push("-ratinginterval".to_string());
        args.push(config.rating_interval().to_string());
        if config.recover() {
            args.push("-recover".to_string());
        }
        args.push("-pgnout".to_string());
        args.push(config.pgn_path().display().to_string());

        let sprt = config.sprt();
        args.push("-sprt".to_string());
        args.push(format!("elo0={}", sprt.elo0));
        args.push(format!("elo1={}", sprt.elo1));
        args.push(format!("alpha={}", sprt.alpha));
        args.push(format!("beta={}", sprt.beta));

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl Arbiter for CutechessArbiter {
    type Session = CutechessSession;

    #[instrument(skip_all, fields(program = %self.program))]
    fn start(&self, request: &ArbiterRequest) -> Result<CutechessSession> {
        let args = self.build_args(request);
        info!(
            control = %request.control.name,
            candidate = %request.candidate.name,
            games = request.config.games(),
            "starting arbiter"
        );
        debug!(args = ?args, "arbiter arguments");

        let log = File::create(&request.log_path)
            .with_context(|| format!("create arbiter log {}", request.log_path.display()))?;
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn arbiter {}", self.program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("arbiter stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("arbiter stderr was not piped"))?;

        let (tx, rx) = mpsc::channel();
        let reader = thread::spawn(move || -> Result<()> {
            let mut log = LineWriter::new(log);
            for line in BufReader::new(stdout).lines() {
                let line = line.context("read arbiter stdout")?;
                writeln!(log, "{line}").context("write arbiter log")?;
                match parse_line(&line) {
                    Ok(None) => trace!(%line, "arbiter output"),
                    Ok(Some(event)) => {
                        if tx.send(Ok(event)).is_err() {
                            break;
                        }
                    }
                    Err(message) => {
                        let _ = tx.send(Err(message));
                        break;
                    }
                }
            }
            Ok(())
        });
        let stderr_reader = thread::spawn(move || read_stream_limited(stderr, STDERR_LIMIT));

        Ok(CutechessSession {
            child,
            events: rx,
            reader: Some(reader),
            stderr_reader: Some(stderr_reader),
            terminated: false,
        })
    }
}

pub struct CutechessSession {
    child: Child,
    events: Receiver<Result<ArbiterEvent, String>>,
    reader: Option<JoinHandle<Result<()>>>,
    stderr_reader: Option<JoinHandle<Result<(Vec<u8>, usize)>>>,
    terminated: bool,
}

impl ArbiterSession for CutechessSession {
    fn next_event(&mut self, timeout: Duration) -> Result<SessionPoll> {
        match self.events.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(SessionPoll::Event(event)),
            Ok(Err(message)) => Err(HarnessError::ArbiterProtocol(message).into()),
            Err(RecvTimeoutError::Timeout) => Ok(SessionPoll::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(SessionPoll::Closed),
        }
    }

    fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        if self.child.try_wait().context("poll arbiter")?.is_some() {
            return Ok(());
        }
        info!("terminating arbiter");
        self.child.kill().context("kill arbiter")
    }

    fn wait(&mut self) -> Result<ArbiterExit> {
        let status = self.child.wait().context("wait for arbiter")?;
        if let Some(reader) = self.reader.take() {
            match reader.join() {
                Ok(result) => result?,
                Err(_) => return Err(anyhow!("arbiter reader thread panicked")),
            }
        }
        let stderr = match self.stderr_reader.take() {
            Some(handle) => join_output(handle).context("join arbiter stderr")?.0,
            None => Vec::new(),
        };
        let exit = ArbiterExit {
            success: status.success(),
            code: status.code(),
            terminated: self.terminated,
            stderr_tail: tail_lines(&String::from_utf8_lossy(&stderr), 10),
        };
        debug!(code = ?exit.code, terminated = exit.terminated, "arbiter exited");
        Ok(exit)
    }
}

impl Drop for CutechessSession {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!("arbiter still running on drop, killing");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
