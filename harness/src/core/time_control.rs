//! Time control in the arbiter's `[moves/]seconds[+increment]` notation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Clock settings applied to both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeControl {
    /// No clock.
    Infinite,
    Clock {
        /// Moves per period; `None` means the whole game.
        moves: Option<u32>,
        base: Duration,
        increment: Duration,
    },
}

impl TimeControl {
    /// Longest a single game can plausibly run on the clock, if bounded.
    ///
    /// Only meaningful for sudden-death controls; repeating periods have no
    /// bound without knowing the game length.
    pub fn nominal_game_length(&self, expected_moves: u32) -> Option<Duration> {
        match self {
            TimeControl::Infinite => None,
            TimeControl::Clock {
                moves: Some(_), ..
            } => None,
            TimeControl::Clock {
                moves: None,
                base,
                increment,
            } => Some((*base + *increment * expected_moves) * 2),
        }
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeControl::Infinite => f.write_str("inf"),
            TimeControl::Clock {
                moves,
                base,
                increment,
            } => {
                if let Some(moves) = moves {
                    write!(f, "{moves}/")?;
                }
                write!(f, "{}", format_secs(*base))?;
                if !increment.is_zero() {
                    write!(f, "+{}", format_secs(*increment))?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for TimeControl {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim();
        if text.eq_ignore_ascii_case("inf") {
            return Ok(TimeControl::Infinite);
        }
        if text.is_empty() {
            return Err("time control is empty".to_string());
        }

        let (moves, rest) = match text.split_once('/') {
            Some((moves, rest)) => {
                let moves: u32 = moves
                    .parse()
                    .map_err(|_| format!("time control '{raw}': invalid move count '{moves}'"))?;
                if moves == 0 {
                    return Err(format!("time control '{raw}': move count must be > 0"));
                }
                (Some(moves), rest)
            }
            None => (None, text),
        };

        let (base, increment) = match rest.split_once('+') {
            Some((base, inc)) => (parse_secs(raw, base)?, parse_secs(raw, inc)?),
            None => (parse_secs(raw, rest)?, Duration::ZERO),
        };
        if base.is_zero() {
            return Err(format!("time control '{raw}': base time must be > 0"));
        }

        Ok(TimeControl::Clock {
            moves,
            base,
            increment,
        })
    }
}

fn parse_secs(raw: &str, part: &str) -> Result<Duration, String> {
    let secs: f64 = part
        .parse()
        .map_err(|_| format!("time control '{raw}': invalid seconds '{part}'"))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("time control '{raw}': seconds out of range '{part}'"))
}

fn format_secs(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}", millis / 1000)
    } else {
        let text = format!("{:.3}", duration.as_secs_f64());
        text.trim_end_matches('0').to_string()
    }
}
