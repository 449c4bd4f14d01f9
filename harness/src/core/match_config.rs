//! Validated, immutable match configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::sprt::SprtBounds;
use crate::core::time_control::TimeControl;
use crate::error::HarnessError;

/// Raw, unvalidated tournament parameters as gathered from file and flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfigInput {
    pub time_control: String,
    pub concurrency: u32,
    pub games: u32,
    pub repeat: bool,
    pub rating_interval: u32,
    pub recover: bool,
    pub game_timeout_secs: u64,
    pub report_path: PathBuf,
    pub pgn_path: PathBuf,
    pub sprt: SprtBounds,
}

/// Tournament parameters, fixed for the lifetime of one run.
///
/// Only obtainable through [`MatchConfig::build`], so every instance has
/// passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    time_control: TimeControl,
    concurrency: u32,
    games: u32,
    repeat: bool,
    rating_interval: u32,
    recover: bool,
    game_timeout: Duration,
    report_path: PathBuf,
    pgn_path: PathBuf,
    sprt: SprtBounds,
}

impl MatchConfig {
    /// Validate every constraint and assemble the configuration.
    ///
    /// All violations are reported together.
    pub fn build(input: MatchConfigInput) -> Result<Self, HarnessError> {
        let mut violations = Vec::new();

        let time_control = match input.time_control.parse::<TimeControl>() {
            Ok(tc) => Some(tc),
            Err(err) => {
                violations.push(err);
                None
            }
        };
        if input.concurrency < 1 {
            violations.push("concurrency must be >= 1".to_string());
        }
        if input.games == 0 {
            violations.push("games must be > 0".to_string());
        }
        if input.repeat && input.games % 2 != 0 {
            violations.push(format!(
                "games ({}) must be even when repeat is enabled",
                input.games
            ));
        }
        if input.rating_interval < 1 {
            violations.push("rating_interval must be >= 1".to_string());
        }
        if input.game_timeout_secs == 0 {
            violations.push("game_timeout_secs must be > 0".to_string());
        }
        if is_blank(&input.report_path) {
            violations.push("report path must not be empty".to_string());
        }
        if is_blank(&input.pgn_path) {
            violations.push("pgn path must not be empty".to_string());
        }
        if !is_blank(&input.report_path) && input.report_path == input.pgn_path {
            violations.push("report path and pgn path must differ".to_string());
        }
        violations.extend(input.sprt.violations());

        match time_control {
            Some(time_control) if violations.is_empty() => Ok(Self {
                time_control,
                concurrency: input.concurrency,
                games: input.games,
                repeat: input.repeat,
                rating_interval: input.rating_interval,
                recover: input.recover,
                game_timeout: Duration::from_secs(input.game_timeout_secs),
                report_path: input.report_path,
                pgn_path: input.pgn_path,
                sprt: input.sprt,
            }),
            _ => Err(HarnessError::InvalidConfiguration { violations }),
        }
    }

    pub fn time_control(&self) -> TimeControl {
        self.time_control
    }

    pub fn concurrency(&self) -> u32 {
        self.concurrency
    }

    pub fn games(&self) -> u32 {
        self.games
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn rating_interval(&self) -> u32 {
        self.rating_interval
    }

    pub fn recover(&self) -> bool {
        self.recover
    }

    /// Wall-clock ceiling for a single game, enforced by the orchestrator.
    pub fn game_timeout(&self) -> Duration {
        self.game_timeout
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn pgn_path(&self) -> &Path {
        &self.pgn_path
    }

    pub fn sprt(&self) -> SprtBounds {
        self.sprt
    }
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().is_empty()
}
