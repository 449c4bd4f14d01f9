//! Shared deterministic types for tournament bookkeeping.
//!
//! Side A is always the control engine and side B the candidate, regardless of
//! which color either played in a given game.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which side of the regression pair an engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Control,
    Candidate,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Control => "control",
            Role::Candidate => "candidate",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-control protocol spoken by a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Uci,
}

impl Protocol {
    /// Tag understood by the arbiter's `proto=` option.
    pub fn tag(self) -> &'static str {
        match self {
            Protocol::Uci => "uci",
        }
    }
}

/// Arbiter-ready description of one participant process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDescriptor {
    /// Unique within a match.
    pub name: String,
    pub command: PathBuf,
    pub protocol: Protocol,
    /// Invocation arguments, in order.
    pub args: Vec<String>,
    pub role: Role,
}

/// Result of a completed game from the pair's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    /// Control won.
    WinA,
    /// Candidate won.
    WinB,
    Draw,
}

impl GameResult {
    /// Score credited to the candidate (draws count as half a point).
    pub fn candidate_score(self) -> f64 {
        match self {
            GameResult::WinA => 0.0,
            GameResult::WinB => 1.0,
            GameResult::Draw => 0.5,
        }
    }
}

/// How a participant failed to finish a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The process exited or its pipe closed mid-game.
    Crash,
    /// The process stopped answering on its control channel.
    Stall,
    /// The game ran past its clock or the harness wall-clock ceiling.
    Timeout,
    /// The arbiter reported the game as unfinished without a cause.
    Unfinished,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Crash => "crash",
            FailureKind::Stall => "stall",
            FailureKind::Timeout => "timeout",
            FailureKind::Unfinished => "unfinished",
        };
        f.write_str(label)
    }
}

/// Failure annotation attached to a game that produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantFailure {
    pub kind: FailureKind,
    /// Engine held responsible, when the arbiter names one.
    pub engine: Option<String>,
    pub detail: String,
}

impl fmt::Display for ParticipantFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.engine {
            Some(engine) => write!(f, "{} ({}): {}", self.kind, engine, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// Per-game supervision result. Only `Completed` games reach the statistic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GameReport {
    Completed { result: GameResult },
    Failed { failure: ParticipantFailure },
}

/// One finished (or abandoned) game, immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    /// Arbiter game number, 1-based and unique within a run.
    pub index: u32,
    pub white: String,
    pub black: String,
    pub report: GameReport,
    /// Arbiter's termination comment, e.g. `White mates`.
    pub comment: String,
}

impl GameOutcome {
    pub fn result(&self) -> Option<GameResult> {
        match &self.report {
            GameReport::Completed { result } => Some(*result),
            GameReport::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ParticipantFailure> {
        match &self.report {
            GameReport::Completed { .. } => None,
            GameReport::Failed { failure } => Some(failure),
        }
    }
}

/// State of the sequential test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pending,
    /// Candidate is not significantly stronger.
    AcceptH0,
    /// Candidate is significantly stronger.
    AcceptH1,
}

impl Decision {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Decision::Pending)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Decision::Pending => "pending",
            Decision::AcceptH0 => "accept-H0",
            Decision::AcceptH1 => "accept-H1",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_report_serializes_with_status_tag() {
        let outcome = GameOutcome {
            index: 3,
            white: "a".to_string(),
            black: "b".to_string(),
            report: GameReport::Failed {
                failure: ParticipantFailure {
                    kind: FailureKind::Crash,
                    engine: Some("b".to_string()),
                    detail: "Black disconnects".to_string(),
                },
            },
            comment: "Black disconnects".to_string(),
        };
        let json = serde_json::to_value(&outcome).expect("json");
        assert_eq!(json["report"]["status"], "failed");
        assert_eq!(json["report"]["failure"]["kind"], "crash");
        assert_eq!(outcome.result(), None);
        assert!(outcome.failure().is_some());
    }

    #[test]
    fn draws_score_half_a_point() {
        assert_eq!(GameResult::Draw.candidate_score(), 0.5);
        assert_eq!(GameResult::WinB.candidate_score(), 1.0);
        assert_eq!(GameResult::WinA.candidate_score(), 0.0);
    }
}
