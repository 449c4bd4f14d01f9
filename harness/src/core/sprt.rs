//! Sequential probability ratio test over a stream of game results.
//!
//! Model: logistic Elo, draws scored as half a win plus half a loss. Under a
//! hypothesis `elo`, the candidate's per-game score expectation is
//! `p = 1 / (1 + 10^(-elo/400))`, and a game scored `s` contributes
//!
//! ```text
//! s * ln(p1 / p0) + (1 - s) * ln((1 - p1) / (1 - p0))
//! ```
//!
//! to the log-likelihood ratio of H1 (`elo1`) against H0 (`elo0`). Each
//! contribution depends only on the game's own result, so the running sum is
//! independent of the order concurrent games are folded in.
//!
//! The test is evaluated after every game. How often progress is surfaced is
//! a separate concern handled by [`ProgressCadence`].

use serde::{Deserialize, Serialize};

use crate::core::elo::expected_score;
use crate::core::types::{Decision, GameResult};

/// Hypothesis and error-rate bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SprtBounds {
    /// Null hypothesis: candidate is no better than this.
    pub elo0: f64,
    /// Alternative: candidate is at least this much better.
    pub elo1: f64,
    /// False accept-H1 rate.
    pub alpha: f64,
    /// False accept-H0 rate.
    pub beta: f64,
}

impl Default for SprtBounds {
    fn default() -> Self {
        Self {
            elo0: 0.0,
            elo1: 10.0,
            alpha: 0.05,
            beta: 0.05,
        }
    }
}

impl SprtBounds {
    /// Accept H0 at or below this log-likelihood ratio.
    pub fn lower(&self) -> f64 {
        (self.beta / (1.0 - self.alpha)).ln()
    }

    /// Accept H1 at or above this log-likelihood ratio.
    pub fn upper(&self) -> f64 {
        ((1.0 - self.beta) / self.alpha).ln()
    }

    /// Constraint violations, empty when the bounds are usable.
    pub fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.elo0.is_finite() || !self.elo1.is_finite() {
            errors.push("sprt elo0 and elo1 must be finite".to_string());
        } else if self.elo0 >= self.elo1 {
            errors.push(format!(
                "sprt elo0 ({}) must be < elo1 ({})",
                self.elo0, self.elo1
            ));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            errors.push(format!("sprt alpha ({}) must be in (0, 1)", self.alpha));
        }
        if !(self.beta > 0.0 && self.beta < 1.0) {
            errors.push(format!("sprt beta ({}) must be in (0, 1)", self.beta));
        }
        errors
    }
}

/// Running statistic, persisted with the report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SprtState {
    /// Cumulative log-likelihood ratio.
    pub llr: f64,
    /// Completed games folded into the test.
    pub games: u32,
    pub decision: Decision,
}

/// Single-writer SPRT accumulator.
#[derive(Debug, Clone)]
pub struct Sprt {
    bounds: SprtBounds,
    win: f64,
    loss: f64,
    draw: f64,
    state: SprtState,
}

impl Sprt {
    /// Create a pending test. `bounds` must already be validated.
    pub fn new(bounds: SprtBounds) -> Self {
        let p0 = expected_score(bounds.elo0);
        let p1 = expected_score(bounds.elo1);
        let win = (p1 / p0).ln();
        let loss = ((1.0 - p1) / (1.0 - p0)).ln();
        Self {
            bounds,
            win,
            loss,
            draw: 0.5 * (win + loss),
            state: SprtState {
                llr: 0.0,
                games: 0,
                decision: Decision::Pending,
            },
        }
    }

    pub fn bounds(&self) -> &SprtBounds {
        &self.bounds
    }

    pub fn state(&self) -> SprtState {
        self.state
    }

    pub fn decision(&self) -> Decision {
        self.state.decision
    }

    /// Log-likelihood contribution of one game.
    pub fn contribution(&self, result: GameResult) -> f64 {
        match result {
            GameResult::WinB => self.win,
            GameResult::WinA => self.loss,
            GameResult::Draw => self.draw,
        }
    }

    /// Fold one completed game into the test and return the decision.
    ///
    /// The game counter always advances. Once terminal, the ratio and the
    /// decision stay frozen.
    pub fn update(&mut self, result: GameResult) -> Decision {
        self.state.games += 1;
        if self.state.decision.is_terminal() {
            return self.state.decision;
        }

        self.state.llr += self.contribution(result);
        if self.state.llr >= self.bounds.upper() {
            self.state.decision = Decision::AcceptH1;
        } else if self.state.llr <= self.bounds.lower() {
            self.state.decision = Decision::AcceptH0;
        }
        self.state.decision
    }
}

/// Decides when progress is surfaced to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressCadence {
    interval: u32,
}

impl ProgressCadence {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
        }
    }

    /// True when `recorded` games have been recorded and a report is due.
    pub fn is_due(&self, recorded: u32) -> bool {
        recorded > 0 && recorded % self.interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> SprtBounds {
        SprtBounds::default()
    }

    #[test]
    fn thresholds_follow_error_rates() {
        let b = bounds();
        assert!((b.upper() - 19.0_f64.ln()).abs() < 1e-12);
        assert!((b.lower() + 19.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn contributions_have_expected_signs() {
        let sprt = Sprt::new(bounds());
        assert!(sprt.contribution(GameResult::WinB) > 0.0);
        assert!(sprt.contribution(GameResult::WinA) < 0.0);
        // Half-point draws lean slightly toward H0 when elo0 = 0.
        assert!(sprt.contribution(GameResult::Draw) < 0.0);
        assert!(sprt.contribution(GameResult::Draw).abs() < 1e-3);
    }

    #[test]
    fn wins_reach_accept_h1() {
        let mut sprt = Sprt::new(bounds());
        let mut decision = Decision::Pending;
        while decision == Decision::Pending {
            decision = sprt.update(GameResult::WinB);
        }
        assert_eq!(decision, Decision::AcceptH1);
        assert!(sprt.state().llr >= bounds().upper());
        // ln(19) / ln(p1 / 0.5) is a little over 103 straight wins.
        assert_eq!(sprt.state().games, 104);
    }

    #[test]
    fn losses_reach_accept_h0() {
        let mut sprt = Sprt::new(bounds());
        let mut decision = Decision::Pending;
        while decision == Decision::Pending {
            decision = sprt.update(GameResult::WinA);
        }
        assert_eq!(decision, Decision::AcceptH0);
        assert!(sprt.state().llr <= bounds().lower());
    }

    #[test]
    fn terminal_decision_is_frozen() {
        let mut sprt = Sprt::new(bounds());
        while !sprt.decision().is_terminal() {
            sprt.update(GameResult::WinB);
        }
        let frozen = sprt.state();
        for _ in 0..500 {
            assert_eq!(sprt.update(GameResult::WinA), Decision::AcceptH1);
        }
        assert_eq!(sprt.state().llr, frozen.llr);
        assert_eq!(sprt.state().games, frozen.games + 500);
    }

    #[test]
    fn order_of_results_does_not_change_ratio() {
        let results = [
            GameResult::WinB,
            GameResult::Draw,
            GameResult::WinA,
            GameResult::WinB,
            GameResult::Draw,
        ];
        let mut forward = Sprt::new(bounds());
        let mut backward = Sprt::new(bounds());
        for result in results {
            forward.update(result);
        }
        for result in results.iter().rev() {
            backward.update(*result);
        }
        assert!((forward.state().llr - backward.state().llr).abs() < 1e-12);
    }

    #[test]
    fn rejects_degenerate_bounds() {
        let equal = SprtBounds {
            elo1: 0.0,
            ..bounds()
        };
        assert_eq!(equal.violations().len(), 1);

        let rates = SprtBounds {
            alpha: 0.0,
            beta: 1.0,
            ..bounds()
        };
        let errors = rates.violations();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("alpha"));
        assert!(errors[1].contains("beta"));
    }

    #[test]
    fn cadence_only_fires_on_interval() {
        let cadence = ProgressCadence::new(10);
        assert!(!cadence.is_due(0));
        assert!(!cadence.is_due(9));
        assert!(cadence.is_due(10));
        assert!(cadence.is_due(20));
        assert!(ProgressCadence::new(0).is_due(1));
    }
}
