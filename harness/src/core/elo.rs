//! Elo arithmetic used for progress and summary reporting.
//!
//! These numbers are informational. Accept/reject decisions come only from
//! [`crate::core::sprt`].

use serde::{Deserialize, Serialize};

use crate::core::types::GameResult;

/// z-score for a two-sided 95% interval.
const Z_95: f64 = 1.959_964;

/// Expected score for a player `elo_diff` points above the opponent.
pub fn expected_score(elo_diff: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-elo_diff / 400.0))
}

/// Inverse of [`expected_score`]. Infinite at scores of exactly 0 or 1.
pub fn score_to_elo(score: f64) -> f64 {
    -400.0 * (1.0 / score - 1.0).log10()
}

/// Win/loss/draw counts from the candidate's perspective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

impl Tally {
    pub fn add(&mut self, result: GameResult) {
        match result {
            GameResult::WinB => self.wins += 1,
            GameResult::WinA => self.losses += 1,
            GameResult::Draw => self.draws += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.wins + self.losses + self.draws
    }

    /// Candidate score fraction (1 per win, 0.5 per draw); 0.5 with no games.
    pub fn score(&self) -> f64 {
        let total = f64::from(self.total());
        if total == 0.0 {
            return 0.5;
        }
        (f64::from(self.wins) + 0.5 * f64::from(self.draws)) / total
    }
}

/// Candidate Elo difference with a 95% error margin and likelihood of superiority.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EloEstimate {
    pub elo: f64,
    pub margin: f64,
    pub los: f64,
}

/// Estimate the Elo difference implied by `tally`.
///
/// Returns `None` before the first game and while one side has scored every
/// point, where the difference is unbounded.
pub fn estimate(tally: &Tally) -> Option<EloEstimate> {
    let n = f64::from(tally.total());
    if n == 0.0 {
        return None;
    }
    let score = tally.score();
    if score <= 0.0 || score >= 1.0 {
        return None;
    }

    let wins = f64::from(tally.wins);
    let losses = f64::from(tally.losses);
    let draws = f64::from(tally.draws);
    let variance = (wins * (1.0 - score).powi(2)
        + draws * (0.5 - score).powi(2)
        + losses * score.powi(2))
        / n;
    let std_error = (variance / n).sqrt();

    let low = (score - Z_95 * std_error).clamp(0.001, 0.999);
    let high = (score + Z_95 * std_error).clamp(0.001, 0.999);

    Some(EloEstimate {
        elo: score_to_elo(score),
        margin: (score_to_elo(high) - score_to_elo(low)) / 2.0,
        los: likelihood_of_superiority(tally),
    })
}

/// Probability that the candidate is genuinely stronger, from decisive games only.
pub fn likelihood_of_superiority(tally: &Tally) -> f64 {
    let decisive = f64::from(tally.wins + tally.losses);
    if decisive == 0.0 {
        return 0.5;
    }
    let diff = f64::from(tally.wins) - f64::from(tally.losses);
    0.5 * (1.0 + erf(diff / (2.0 * decisive).sqrt()))
}

/// Abramowitz & Stegun 7.1.26; absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_expect_half() {
        assert!((expected_score(0.0) - 0.5).abs() < 1e-12);
        assert!((score_to_elo(expected_score(35.0)) - 35.0).abs() < 1e-9);
    }

    #[test]
    fn even_tally_estimates_zero_elo() {
        let tally = Tally {
            wins: 40,
            losses: 40,
            draws: 20,
        };
        let est = estimate(&tally).expect("estimate");
        assert!(est.elo.abs() < 1e-9);
        assert!(est.margin > 0.0);
        assert!((est.los - 0.5).abs() < 1e-9);
    }

    #[test]
    fn winning_tally_is_positive_with_high_los() {
        let tally = Tally {
            wins: 60,
            losses: 30,
            draws: 10,
        };
        let est = estimate(&tally).expect("estimate");
        assert!(est.elo > 0.0);
        assert!(est.los > 0.99);
    }

    #[test]
    fn unbounded_scores_have_no_estimate() {
        assert!(estimate(&Tally::default()).is_none());
        let sweep = Tally {
            wins: 5,
            losses: 0,
            draws: 0,
        };
        assert!(estimate(&sweep).is_none());
    }

    #[test]
    fn erf_matches_reference_points() {
        assert!(erf(0.0).abs() < 1e-7);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_79).abs() < 1e-6);
    }
}
