use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use harness::core::tournament::RunEnd;
use harness::core::types::Decision;
use harness::io::report_store::{LoadedReport, load_report};
use harness::io::run_dir::RunPaths;

/// How a stored run ended, as far as its report tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AcceptH1,
    AcceptH0,
    Exhausted,
    ArbiterFinished,
    Aborted,
    /// The harness stopped before writing a summary.
    Unfinalized,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::AcceptH1 => "accept-H1",
            Verdict::AcceptH0 => "accept-H0",
            Verdict::Exhausted => "exhausted",
            Verdict::ArbiterFinished => "arbiter-finished",
            Verdict::Aborted => "aborted",
            Verdict::Unfinalized => "unfinalized",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub control: String,
    pub candidate: String,
    /// Games recorded, failures included.
    pub games: u32,
    pub budget: u32,
    pub failures: u32,
    pub llr: f64,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub candidate: String,
    pub runs: usize,
    pub h1: usize,
    pub h0: usize,
    /// Exhausted, cut short by the arbiter, or never finalized.
    pub unresolved: usize,
    pub aborted: usize,
    pub games: u32,
    pub failures: u32,
    /// Control of the most recent H1 run, if any.
    pub last_beaten: Option<String>,
}

pub fn load_run_dirs(results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in
        fs::read_dir(results_dir).with_context(|| format!("read {}", results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Read every run under `results_dir`, oldest first.
///
/// Directories without a readable report are skipped and reported as
/// warnings.
pub fn collect_runs(results_dir: &Path) -> Result<(Vec<RunRecord>, Vec<String>)> {
    let mut runs = Vec::new();
    let mut warnings = Vec::new();
    for dir in load_run_dirs(results_dir)? {
        let paths = RunPaths::at(&dir);
        let loaded = match load_report(&paths.report_path) {
            Ok(loaded) => loaded,
            Err(err) => {
                warnings.push(format!("skip {}: {err:#}", dir.display()));
                continue;
            }
        };
        match record_for(&dir, &loaded) {
            Ok(record) => runs.push(record),
            Err(err) => warnings.push(format!("skip {}: {err:#}", dir.display())),
        }
    }
    runs.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.run_id.cmp(&b.run_id))
    });
    debug!(runs = runs.len(), skipped = warnings.len(), "runs collected");
    Ok((runs, warnings))
}

fn record_for(dir: &Path, loaded: &LoadedReport) -> Result<RunRecord> {
    let header = &loaded.header;
    let (llr, failures, verdict) = match &loaded.summary {
        Some(summary) => {
            let verdict = match &summary.end {
                RunEnd::Decided { decision } | RunEnd::ArbiterDecided { decision } => {
                    match decision {
                        Decision::AcceptH1 => Verdict::AcceptH1,
                        Decision::AcceptH0 => Verdict::AcceptH0,
                        Decision::Pending => Verdict::Exhausted,
                    }
                }
                RunEnd::Exhausted => Verdict::Exhausted,
                RunEnd::ArbiterFinished => Verdict::ArbiterFinished,
                RunEnd::Aborted { .. } => Verdict::Aborted,
            };
            (summary.sprt.llr, summary.summary.failures, verdict)
        }
        None => {
            let tournament = loaded.replay().context("replay unfinalized report")?;
            (
                tournament.sprt_state().llr,
                tournament.summary().failures,
                Verdict::Unfinalized,
            )
        }
    };
    Ok(RunRecord {
        run_id: header.run_id.clone(),
        dir: dir.to_path_buf(),
        started_at: header.started_at,
        control: header.control.name.clone(),
        candidate: header.candidate.name.clone(),
        games: loaded.games.len() as u32,
        budget: header.games,
        failures,
        llr,
        verdict,
    })
}

/// Per-candidate totals, optionally for a single candidate.
pub fn summarize(runs: &[RunRecord], candidate: Option<&str>) -> Vec<CandidateSummary> {
    let mut by_candidate: BTreeMap<&str, CandidateSummary> = BTreeMap::new();
    for run in runs {
        if candidate.is_some_and(|name| name != run.candidate) {
            continue;
        }
        let entry = by_candidate
            .entry(run.candidate.as_str())
            .or_insert_with(|| CandidateSummary {
                candidate: run.candidate.clone(),
                ..CandidateSummary::default()
            });
        entry.runs += 1;
        entry.games += run.games;
        entry.failures += run.failures;
        match run.verdict {
            Verdict::AcceptH1 => {
                entry.h1 += 1;
                entry.last_beaten = Some(run.control.clone());
            }
            Verdict::AcceptH0 => entry.h0 += 1,
            Verdict::Aborted => entry.aborted += 1,
            Verdict::Exhausted | Verdict::ArbiterFinished | Verdict::Unfinalized => {
                entry.unresolved += 1;
            }
        }
    }
    by_candidate.into_values().collect()
}
