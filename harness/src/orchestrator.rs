//! Drives one tournament: arbiter events in, recorded outcomes and a verdict out.
//!
//! Events are consumed one at a time on the calling thread, which makes this
//! the single writer of the tournament aggregate and the report file. The
//! arbiter runs the games concurrently; arrival order is whatever it reports.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::match_config::MatchConfig;
use crate::core::sprt::{ProgressCadence, SprtBounds, SprtState};
use crate::core::tournament::{Recorded, RunEnd, Summary, Tournament, TournamentReport};
use crate::core::types::{
    Decision, EngineDescriptor, FailureKind, GameOutcome, GameReport, ParticipantFailure,
};
use crate::error::HarnessError;
use crate::io::arbiter::{Arbiter, ArbiterEvent, ArbiterRequest, ArbiterSession, SessionPoll};
use crate::io::report_store::{FinalRecord, ReportRecord, ReportWriter, RunHeader};

/// Per-run settings that are not part of the match configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: String,
    /// Where the arbiter's raw output is kept.
    pub arbiter_log_path: PathBuf,
    /// Upper bound on how long to block waiting for an event.
    pub poll_interval: Duration,
}

impl RunOptions {
    pub fn new(run_id: impl Into<String>, arbiter_log_path: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            arbiter_log_path: arbiter_log_path.into(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Games recorded so far, failures included.
    pub recorded: u32,
    pub budget: u32,
    pub bounds: SprtBounds,
    pub sprt: SprtState,
    pub summary: Summary,
}

#[derive(Debug, Clone)]
struct InFlight {
    started: Instant,
    white: String,
    black: String,
}

/// Run a tournament between `control` and `candidate` to completion.
///
/// Returns the finalized report when the run ends by decision, exhaustion,
/// or the arbiter closing the match. Fatal errors still finalize the report
/// file (marked aborted) before being returned.
#[instrument(skip_all, fields(run_id = %options.run_id, control = %control.name, candidate = %candidate.name))]
pub fn run_tournament<A: Arbiter, F: FnMut(&Progress)>(
    arbiter: &A,
    control: &EngineDescriptor,
    candidate: &EngineDescriptor,
    config: &MatchConfig,
    options: &RunOptions,
    on_progress: F,
) -> Result<TournamentReport> {
    let mut writer = ReportWriter::create(config.report_path())?;
    writer.append(&ReportRecord::Header(RunHeader {
        run_id: options.run_id.clone(),
        started_at: Utc::now(),
        control: control.clone(),
        candidate: candidate.clone(),
        time_control: config.time_control().to_string(),
        games: config.games(),
        bounds: config.sprt(),
    }))?;
    let tournament = Tournament::new(config.games(), config.sprt());

    let request = ArbiterRequest {
        control: control.clone(),
        candidate: candidate.clone(),
        config: config.clone(),
        log_path: options.arbiter_log_path.clone(),
    };
    let session = match arbiter.start(&request) {
        Ok(session) => session,
        Err(err) => {
            let end = RunEnd::Aborted {
                reason: format!("{err:#}"),
            };
            finalize(&mut writer, tournament, options, control, candidate, end)?;
            return Err(err);
        }
    };

    let mut supervisor = Supervisor {
        session,
        tournament,
        writer,
        config,
        control,
        candidate,
        poll_interval: options.poll_interval,
        cadence: ProgressCadence::new(config.rating_interval()),
        on_progress,
        in_flight: BTreeMap::new(),
        timed_out: BTreeSet::new(),
        stopping: false,
        arbiter_verdict: None,
    };

    match supervisor.drive() {
        Ok(end) => {
            let Supervisor {
                tournament,
                mut writer,
                ..
            } = supervisor;
            let report = finalize(&mut writer, tournament, options, control, candidate, end)?;
            info!(end = ?report.end, games = report.outcomes.len(), "tournament finished");
            Ok(report)
        }
        Err(err) => {
            supervisor.shut_down();
            let Supervisor {
                tournament,
                mut writer,
                ..
            } = supervisor;
            let end = RunEnd::Aborted {
                reason: format!("{err:#}"),
            };
            if let Err(finalize_err) =
                finalize(&mut writer, tournament, options, control, candidate, end)
            {
                warn!(err = %format!("{finalize_err:#}"), "failed to finalize aborted report");
            }
            Err(err)
        }
    }
}

fn finalize(
    writer: &mut ReportWriter,
    tournament: Tournament,
    options: &RunOptions,
    control: &EngineDescriptor,
    candidate: &EngineDescriptor,
    end: RunEnd,
) -> Result<TournamentReport> {
    let report = tournament.finish(&options.run_id, control, candidate, end);
    writer.append(&ReportRecord::Summary(FinalRecord {
        finished_at: Utc::now(),
        sprt: report.sprt,
        summary: report.summary,
        end: report.end.clone(),
    }))?;
    Ok(report)
}

struct Supervisor<'a, S, F> {
    session: S,
    tournament: Tournament,
    writer: ReportWriter,
    config: &'a MatchConfig,
    control: &'a EngineDescriptor,
    candidate: &'a EngineDescriptor,
    poll_interval: Duration,
    cadence: ProgressCadence,
    on_progress: F,
    /// Games started and not yet recorded, by index.
    in_flight: BTreeMap<u32, InFlight>,
    /// Games recorded as timeouts whose late results must be discarded.
    timed_out: BTreeSet<u32>,
    /// Set once the run has what it needs; only in-flight games are awaited.
    stopping: bool,
    /// Conclusion of the arbiter's own SPRT, if it reported one.
    arbiter_verdict: Option<Decision>,
}

impl<S: ArbiterSession, F: FnMut(&Progress)> Supervisor<'_, S, F> {
    fn drive(&mut self) -> Result<RunEnd> {
        loop {
            if self.stopping && self.in_flight.is_empty() {
                debug!("in-flight games drained, stopping arbiter");
                self.session.terminate()?;
                break;
            }

            match self.session.next_event(self.next_wait())? {
                SessionPoll::Event(event) => self.handle(event)?,
                SessionPoll::Idle => {}
                SessionPoll::Closed => break,
            }
            self.expire_overdue()?;
        }

        let exit = self.session.wait()?;
        if !exit.success && !exit.terminated {
            return Err(HarnessError::ArbiterProtocol(format!(
                "arbiter exited with status {:?}: {}",
                exit.code, exit.stderr_tail
            ))
            .into());
        }
        if !self.in_flight.is_empty() {
            warn!(
                unfinished = self.in_flight.len(),
                "arbiter closed with games still in flight"
            );
        }

        let decision = self.tournament.decision();
        Ok(if decision.is_terminal() {
            RunEnd::Decided { decision }
        } else if self.tournament.is_exhausted() {
            RunEnd::Exhausted
        } else if let Some(decision) = self.arbiter_verdict {
            RunEnd::ArbiterDecided { decision }
        } else {
            RunEnd::ArbiterFinished
        })
    }

    fn handle(&mut self, event: ArbiterEvent) -> Result<()> {
        match event {
            ArbiterEvent::Started {
                index,
                white,
                black,
            } => {
                if index == 0 || index > self.tournament.budget() {
                    return Err(HarnessError::ArbiterProtocol(format!(
                        "game {index} started outside 1..={}",
                        self.tournament.budget()
                    ))
                    .into());
                }
                if self.tournament.contains(index)
                    || self.timed_out.contains(&index)
                    || self.in_flight.contains_key(&index)
                {
                    return Err(HarnessError::ArbiterProtocol(format!(
                        "game {index} started twice"
                    ))
                    .into());
                }
                if self.stopping {
                    debug!(index, "game started after stop request, not waiting for it");
                    return Ok(());
                }
                debug!(index, %white, %black, "game started");
                self.in_flight.insert(
                    index,
                    InFlight {
                        started: Instant::now(),
                        white,
                        black,
                    },
                );
            }
            ArbiterEvent::Finished(game) => {
                if self.timed_out.remove(&game.index) {
                    warn!(
                        index = game.index,
                        "discarding result of game already recorded as timed out"
                    );
                    return Ok(());
                }
                let tracked = self.in_flight.remove(&game.index).is_some();
                if self.stopping && !tracked {
                    debug!(index = game.index, "ignoring game outside the drain set");
                    return Ok(());
                }
                let outcome = game.into_outcome(&self.control.name, &self.candidate.name)?;
                self.record(outcome)?;
            }
            ArbiterEvent::Score(line) => debug!(%line, "arbiter score"),
            ArbiterEvent::Sprt { line, accepted } => {
                debug!(%line, "arbiter sprt");
                if let Some(decision) = accepted {
                    info!(
                        %decision,
                        llr = self.tournament.sprt_state().llr,
                        "arbiter's sprt concluded first"
                    );
                    self.arbiter_verdict = Some(decision);
                }
            }
            ArbiterEvent::MatchFinished => debug!("arbiter reports match finished"),
        }
        Ok(())
    }

    /// Record one outcome: report file first, then policy.
    fn record(&mut self, outcome: GameOutcome) -> Result<()> {
        let index = outcome.index;
        let failure = outcome.failure().cloned();
        let recorded = self.tournament.record(outcome.clone())?;
        self.writer.append(&ReportRecord::Game(outcome))?;
        let mut just_decided = false;

        match recorded {
            Recorded::Excluded => {
                if let Some(failure) = failure {
                    if !self.config.recover() {
                        return Err(HarnessError::ParticipantFailure { index, failure }.into());
                    }
                    warn!(index, failure = %failure, "participant failure, game excluded");
                }
            }
            Recorded::Folded {
                decision,
                decided_now,
            } => {
                debug!(index, llr = self.tournament.sprt_state().llr, "game recorded");
                if decided_now {
                    info!(index, %decision, "sprt decision reached");
                }
                just_decided = decided_now;
            }
        }

        // One progress report per game, even when the decision lands on the interval.
        if just_decided || self.cadence.is_due(self.tournament.recorded()) {
            self.report_progress();
        }
        if !self.stopping
            && (self.tournament.decision().is_terminal() || self.tournament.is_exhausted())
        {
            info!(
                in_flight = self.in_flight.len(),
                "requesting stop, draining in-flight games"
            );
            self.stopping = true;
        }
        Ok(())
    }

    /// Record games that outlived the wall-clock ceiling as timeouts.
    fn expire_overdue(&mut self) -> Result<()> {
        let ceiling = self.config.game_timeout();
        let overdue: Vec<u32> = self
            .in_flight
            .iter()
            .filter(|(_, game)| game.started.elapsed() >= ceiling)
            .map(|(index, _)| *index)
            .collect();
        for index in overdue {
            let Some(game) = self.in_flight.remove(&index) else {
                continue;
            };
            warn!(index, ceiling_secs = ceiling.as_secs(), "game exceeded wall-clock ceiling");
            self.timed_out.insert(index);
            self.record(GameOutcome {
                index,
                white: game.white,
                black: game.black,
                report: GameReport::Failed {
                    failure: ParticipantFailure {
                        kind: FailureKind::Timeout,
                        engine: None,
                        detail: format!("no result within {}s", ceiling.as_secs()),
                    },
                },
                comment: String::new(),
            })?;
        }
        Ok(())
    }

    /// Wait no longer than the poll interval or the next ceiling deadline.
    fn next_wait(&self) -> Duration {
        let ceiling = self.config.game_timeout();
        self.in_flight
            .values()
            .map(|game| ceiling.saturating_sub(game.started.elapsed()))
            .min()
            .map_or(self.poll_interval, |left| left.min(self.poll_interval))
            .max(Duration::from_millis(1))
    }

    fn report_progress(&mut self) {
        let progress = Progress {
            recorded: self.tournament.recorded(),
            budget: self.tournament.budget(),
            bounds: self.config.sprt(),
            sprt: self.tournament.sprt_state(),
            summary: self.tournament.summary(),
        };
        (self.on_progress)(&progress);
    }

    /// Best-effort teardown after a fatal error.
    fn shut_down(&mut self) {
        if let Err(err) = self.session.terminate() {
            warn!(err = %format!("{err:#}"), "failed to terminate arbiter");
        }
        if let Err(err) = self.session.wait() {
            warn!(err = %format!("{err:#}"), "failed to reap arbiter");
        }
    }
}
