//! Test-only helpers: scripted arbiters, fake engine binaries, outcome streams.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::core::match_config::{MatchConfig, MatchConfigInput};
use crate::core::tournament::TournamentReport;
use crate::core::types::{EngineDescriptor, GameResult, Protocol, Role};
use crate::io::arbiter::{
    Arbiter, ArbiterEvent, ArbiterExit, ArbiterRequest, ArbiterSession, FinishedGame,
    ResultToken, SessionPoll,
};
use crate::io::config::HarnessConfig;
use crate::orchestrator::{Progress, RunOptions, run_tournament};

/// Engine names used by scripted runs.
pub const CONTROL: &str = "old";
pub const CANDIDATE: &str = "new";

/// One step of a scripted arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Event(ArbiterEvent),
    /// Stay silent for this long.
    Pause(Duration),
}

/// Arbiter that replays a fixed script instead of spawning a process.
///
/// Terminating the session drops every remaining step, the way killing a
/// real arbiter would.
#[derive(Debug, Clone)]
pub struct ScriptedArbiter {
    steps: Vec<Step>,
    exit_code: i32,
    start_error: Option<String>,
}

impl ScriptedArbiter {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            exit_code: 0,
            start_error: None,
        }
    }

    /// Exit status reported when the script runs out.
    pub fn exiting_with(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Make `start` fail, as if the arbiter could not be spawned.
    pub fn failing_to_start(mut self, message: &str) -> Self {
        self.start_error = Some(message.to_string());
        self
    }
}

impl Arbiter for ScriptedArbiter {
    type Session = ScriptedSession;

    fn start(&self, request: &ArbiterRequest) -> Result<ScriptedSession> {
        if let Some(message) = &self.start_error {
            return Err(anyhow::anyhow!("{message}"));
        }
        fs::write(&request.log_path, "")
            .with_context(|| format!("create {}", request.log_path.display()))?;
        Ok(ScriptedSession {
            steps: self.steps.iter().cloned().collect(),
            exit_code: self.exit_code,
            terminated: false,
            delivered: 0,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedSession {
    steps: VecDeque<Step>,
    exit_code: i32,
    terminated: bool,
    delivered: usize,
}

impl ScriptedSession {
    /// Events handed out so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

impl ArbiterSession for ScriptedSession {
    fn next_event(&mut self, timeout: Duration) -> Result<SessionPoll> {
        match self.steps.pop_front() {
            None => Ok(SessionPoll::Closed),
            Some(Step::Event(event)) => {
                self.delivered += 1;
                Ok(SessionPoll::Event(event))
            }
            Some(Step::Pause(left)) => {
                let slept = left.min(timeout);
                thread::sleep(slept);
                if left > slept {
                    self.steps.push_front(Step::Pause(left - slept));
                }
                Ok(SessionPoll::Idle)
            }
        }
    }

    fn terminate(&mut self) -> Result<()> {
        self.terminated = true;
        self.steps.clear();
        Ok(())
    }

    fn wait(&mut self) -> Result<ArbiterExit> {
        let code = if self.terminated { 143 } else { self.exit_code };
        Ok(ArbiterExit {
            success: code == 0,
            code: Some(code),
            terminated: self.terminated,
            stderr_tail: String::new(),
        })
    }
}

pub fn started(index: u32, white: &str, black: &str) -> Step {
    Step::Event(ArbiterEvent::Started {
        index,
        white: white.to_string(),
        black: black.to_string(),
    })
}

pub fn finished(index: u32, white: &str, black: &str, token: ResultToken, comment: &str) -> Step {
    Step::Event(ArbiterEvent::Finished(FinishedGame {
        index,
        white: white.to_string(),
        black: black.to_string(),
        token,
        comment: comment.to_string(),
    }))
}

/// Colors for game `index`: odd games give control white, even games swap.
pub fn colors<'a>(index: u32, control: &'a str, candidate: &'a str) -> (&'a str, &'a str) {
    if index % 2 == 1 {
        (control, candidate)
    } else {
        (candidate, control)
    }
}

/// `Finished` step for a completed game with `result` between the pair.
pub fn finished_with(index: u32, control: &str, candidate: &str, result: GameResult) -> Step {
    let (white, black) = colors(index, control, candidate);
    let candidate_is_white = white == candidate;
    let (token, comment) = match (result, candidate_is_white) {
        (GameResult::Draw, _) => (ResultToken::Draw, "Draw by adjudication"),
        (GameResult::WinB, true) | (GameResult::WinA, false) => (ResultToken::WhiteWins, "White mates"),
        (GameResult::WinB, false) | (GameResult::WinA, true) => (ResultToken::BlackWins, "Black mates"),
    };
    finished(index, white, black, token, comment)
}

/// `Started` + `Finished` steps for one sequential game.
pub fn game(index: u32, control: &str, candidate: &str, result: GameResult) -> Vec<Step> {
    let (white, black) = colors(index, control, candidate);
    vec![
        started(index, white, black),
        finished_with(index, control, candidate, result),
    ]
}

/// Steps for playing `results` one game at a time, indices from 1.
pub fn sequential_games(control: &str, candidate: &str, results: &[GameResult]) -> Vec<Step> {
    results
        .iter()
        .zip(1u32..)
        .flat_map(|(result, index)| game(index, control, candidate, *result))
        .collect()
}

/// Deterministic cycle with the given counts, spread as evenly as possible.
///
/// `interleave(55, 10, 35)` is a 100-game cycle with a 55% candidate win
/// rate, 10% draws and 35% losses, never clumping one kind of result.
pub fn interleave(wins: u32, draws: u32, losses: u32) -> Vec<GameResult> {
    let total = wins + draws + losses;
    let targets = [
        (GameResult::WinB, wins),
        (GameResult::Draw, draws),
        (GameResult::WinA, losses),
    ];
    let mut emitted = [0u32; 3];
    let mut cycle = Vec::with_capacity(total as usize);
    for position in 1..=total {
        // Pick the kind furthest behind its share of the first `position` games.
        let mut best = 0;
        let mut best_deficit = f64::NEG_INFINITY;
        for (slot, (_, count)) in targets.iter().enumerate() {
            if emitted[slot] >= *count {
                continue;
            }
            let share = f64::from(*count) * f64::from(position) / f64::from(total);
            let deficit = share - f64::from(emitted[slot]);
            if deficit > best_deficit {
                best = slot;
                best_deficit = deficit;
            }
        }
        emitted[best] += 1;
        cycle.push(targets[best].0);
    }
    cycle
}

/// First `len` results of `cycle` repeated.
pub fn repeat_cycle(cycle: &[GameResult], len: usize) -> Vec<GameResult> {
    cycle.iter().copied().cycle().take(len).collect()
}

pub fn descriptor(name: &str, role: Role) -> EngineDescriptor {
    EngineDescriptor {
        name: name.to_string(),
        command: PathBuf::from(format!("/opt/engines/{name}")),
        protocol: Protocol::Uci,
        args: vec!["uci".to_string()],
        role,
    }
}

/// Default match parameters writing into `dir`.
pub fn match_input(dir: &Path) -> MatchConfigInput {
    HarnessConfig::default().match_input(dir)
}

/// Play a scripted run between [`CONTROL`] and [`CANDIDATE`] in `dir`,
/// returning the report and every progress snapshot.
pub fn run_scripted(
    arbiter: &ScriptedArbiter,
    config: &MatchConfig,
    dir: &Path,
) -> (Result<TournamentReport>, Vec<Progress>) {
    let control = descriptor(CONTROL, Role::Control);
    let candidate = descriptor(CANDIDATE, Role::Candidate);
    let mut options = RunOptions::new("scripted", dir.join("arbiter.log"));
    options.poll_interval = Duration::from_millis(20);
    let mut progress = Vec::new();
    let result = run_tournament(arbiter, &control, &candidate, config, &options, |p| {
        progress.push(*p);
    });
    (result, progress)
}

/// Write an executable shell script. A `#!/bin/sh` line is added when missing.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let contents = if body.starts_with("#!") {
        body.to_string()
    } else {
        format!("#!/bin/sh\n{body}")
    };
    fs::write(&path, contents).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

/// Two fake engine binaries in a scratch directory.
#[cfg(unix)]
pub struct EngineFixture {
    pub dir: tempfile::TempDir,
    pub control: PathBuf,
    pub candidate: PathBuf,
}

#[cfg(unix)]
impl EngineFixture {
    pub fn new(control_label: &str, candidate_label: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let control = write_script(dir.path(), "control-engine", &engine_script(control_label));
        let candidate =
            write_script(dir.path(), "candidate-engine", &engine_script(candidate_label));
        Self {
            dir,
            control,
            candidate,
        }
    }
}

/// Script for a fake engine that answers the identity query with `label`
/// and speaks just enough UCI to be started and stopped.
pub fn engine_script(label: &str) -> String {
    format!(
        r#"#!/bin/sh
case "$1" in
  version)
    echo '{label}'
    ;;
  uci)
    while read -r line; do
      case "$line" in
        uci) echo 'id name {label}'; echo 'uciok' ;;
        isready) echo 'readyok' ;;
        quit) exit 0 ;;
      esac
    done
    ;;
  *)
    echo "unknown command: $1" >&2
    exit 2
    ;;
esac
"#
    )
}

/// Script for a fake cutechess-cli that plays `games` games sequentially,
/// reporting every result with the given PGN token for the second engine
/// as black (`0-1` means the second engine always wins).
pub fn arbiter_script(games: u32, token: &str) -> String {
    format!(
        r#"#!/bin/sh
first=""
second=""
for arg in "$@"; do
  case "$arg" in
    name=*)
      if [ -z "$first" ]; then first="${{arg#name=}}"; else second="${{arg#name=}}"; fi
      ;;
  esac
done
i=1
while [ "$i" -le {games} ]; do
  echo "Started game $i of {games} ($first vs $second)"
  echo "Finished game $i ($first vs $second): {token} {{Black mates}}"
  i=$((i + 1))
done
echo "Finished match"
"#
    )
}
