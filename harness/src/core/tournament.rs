//! Owned aggregate for one tournament run: ordered outcomes plus the SPRT.
//!
//! Every outcome passes through [`Tournament::record`], which is the single
//! place the statistic is mutated.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::elo::{EloEstimate, Tally, estimate};
use crate::core::sprt::{Sprt, SprtBounds, SprtState};
use crate::core::types::{Decision, EngineDescriptor, GameOutcome, GameReport};
use crate::error::HarnessError;

/// Summary counts for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Completed games from the candidate's perspective.
    pub tally: Tally,
    /// Games excluded from the statistic because a participant failed.
    pub failures: u32,
    pub elo: Option<EloEstimate>,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEnd {
    /// The SPRT reached a terminal decision.
    Decided { decision: Decision },
    /// Every configured game was played without a decision.
    Exhausted,
    /// The arbiter's own SPRT concluded and closed the match before this
    /// run's statistic did.
    ArbiterDecided { decision: Decision },
    /// The arbiter closed the match cleanly before any of the above.
    ArbiterFinished,
    /// A fatal error ended the run.
    Aborted { reason: String },
}

/// Effect of recording one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Completed game folded into the SPRT.
    Folded {
        decision: Decision,
        /// True only for the game that made the decision terminal.
        decided_now: bool,
    },
    /// Failed game kept in the report but excluded from the SPRT.
    Excluded,
}

/// Finalized record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentReport {
    pub run_id: String,
    pub control: EngineDescriptor,
    pub candidate: EngineDescriptor,
    pub bounds: SprtBounds,
    /// In the order they were recorded.
    pub outcomes: Vec<GameOutcome>,
    pub sprt: SprtState,
    pub summary: Summary,
    pub end: RunEnd,
}

#[derive(Debug, Clone)]
pub struct Tournament {
    budget: u32,
    outcomes: Vec<GameOutcome>,
    indices: BTreeSet<u32>,
    sprt: Sprt,
    tally: Tally,
    failures: u32,
}

impl Tournament {
    pub fn new(budget: u32, bounds: SprtBounds) -> Self {
        Self {
            budget,
            outcomes: Vec::new(),
            indices: BTreeSet::new(),
            sprt: Sprt::new(bounds),
            tally: Tally::default(),
            failures: 0,
        }
    }

    /// Record one outcome, folding completed games into the SPRT.
    ///
    /// Rejects indices outside `1..=budget`, repeated indices, and anything
    /// past the budget; those mean the arbiter cannot be trusted.
    pub fn record(&mut self, outcome: GameOutcome) -> Result<Recorded, HarnessError> {
        if outcome.index == 0 || outcome.index > self.budget {
            return Err(HarnessError::ArbiterProtocol(format!(
                "game index {} outside 1..={}",
                outcome.index, self.budget
            )));
        }
        if self.is_exhausted() {
            return Err(HarnessError::ArbiterProtocol(format!(
                "game {} reported after all {} games were recorded",
                outcome.index, self.budget
            )));
        }
        if !self.indices.insert(outcome.index) {
            return Err(HarnessError::ArbiterProtocol(format!(
                "game {} reported twice",
                outcome.index
            )));
        }

        let recorded = match &outcome.report {
            GameReport::Completed { result } => {
                let before = self.sprt.decision();
                self.tally.add(*result);
                let decision = self.sprt.update(*result);
                Recorded::Folded {
                    decision,
                    decided_now: !before.is_terminal() && decision.is_terminal(),
                }
            }
            GameReport::Failed { .. } => {
                self.failures += 1;
                Recorded::Excluded
            }
        };
        self.outcomes.push(outcome);
        Ok(recorded)
    }

    pub fn outcomes(&self) -> &[GameOutcome] {
        &self.outcomes
    }

    /// Games recorded so far, failures included.
    pub fn recorded(&self) -> u32 {
        self.outcomes.len() as u32
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn is_exhausted(&self) -> bool {
        self.recorded() >= self.budget
    }

    pub fn contains(&self, index: u32) -> bool {
        self.indices.contains(&index)
    }

    pub fn sprt_state(&self) -> SprtState {
        self.sprt.state()
    }

    pub fn decision(&self) -> Decision {
        self.sprt.decision()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            tally: self.tally,
            failures: self.failures,
            elo: estimate(&self.tally),
        }
    }

    /// Close the aggregate into a report.
    pub fn finish(
        self,
        run_id: &str,
        control: &EngineDescriptor,
        candidate: &EngineDescriptor,
        end: RunEnd,
    ) -> TournamentReport {
        let summary = self.summary();
        TournamentReport {
            run_id: run_id.to_string(),
            control: control.clone(),
            candidate: candidate.clone(),
            bounds: *self.sprt.bounds(),
            sprt: self.sprt.state(),
            outcomes: self.outcomes,
            summary,
            end,
        }
    }
}
