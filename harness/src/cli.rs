//! `harness` subcommand implementations.
//!
//! Product output goes to stdout as `key: field=value` lines; diagnostics go
//! through `tracing` on stderr.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::core::match_config::MatchConfig;
use crate::core::sprt::SprtBounds;
use crate::core::tournament::{RunEnd, Summary, TournamentReport};
use crate::core::types::{Decision, Role};
use crate::exit_codes;
use crate::io::arbiter::{Arbiter, CutechessArbiter};
use crate::io::archive::{Version, VersionArchive};
use crate::io::config::{HarnessConfig, write_config};
use crate::io::report_store::load_report;
use crate::io::resolver::{parse_source, resolve, resolve_pair};
use crate::io::run_dir::{RunPaths, generate_run_id};
use crate::orchestrator::{Progress, RunOptions, run_tournament};

/// Moves per side assumed when checking the game ceiling against the clock.
const EXPECTED_MOVES: u32 = 100;

/// Write a default configuration file.
pub fn init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &HarnessConfig::default())?;
    println!("init: wrote {}", config_path.display());
    Ok(())
}

/// Build the engine and archive it.
pub fn build(cfg: &HarnessConfig) -> Result<Version> {
    let archive = VersionArchive::new(&cfg.archive.dir);
    let version = archive.build(&cfg.build, &cfg.engine)?;
    println!(
        "build: label={} binary={} sha256={}",
        version.label,
        version.binary.display(),
        version.sha256
    );
    Ok(version)
}

/// List archived versions, optionally re-checking their digests.
pub fn versions(cfg: &HarnessConfig, verify: bool) -> Result<()> {
    let archive = VersionArchive::new(&cfg.archive.dir);
    let versions = archive.list()?;
    if versions.is_empty() {
        println!("versions: none in {}", archive.root().display());
        return Ok(());
    }
    let mut tampered = 0;
    for version in &versions {
        let status = if !verify {
            ""
        } else if let Err(err) = archive.verify(version) {
            warn!(label = %version.label, err = %format!("{err:#}"), "verification failed");
            tampered += 1;
            " MODIFIED"
        } else {
            " ok"
        };
        println!(
            "{} {} {}{}",
            version.label,
            version.created_at.format("%Y-%m-%d %H:%M:%S"),
            &version.sha256[..12.min(version.sha256.len())],
            status
        );
    }
    if tampered > 0 {
        bail!("{tampered} archived version(s) failed verification");
    }
    Ok(())
}

/// Print the descriptor an engine source resolves to.
pub fn resolve_source(cfg: &HarnessConfig, source: &str, role: Role) -> Result<()> {
    let archive = VersionArchive::new(&cfg.archive.dir);
    let source = parse_source(source, &archive)?;
    let descriptor = resolve(&source, role, &cfg.engine)?;
    let json = serde_json::to_string_pretty(&descriptor).context("serialize descriptor")?;
    println!("{json}");
    Ok(())
}

/// Finished run, for exit-code selection and printing.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub paths: RunPaths,
    pub report: TournamentReport,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        exit_code_for(&self.report.end)
    }
}

/// Exit code for a run that ended without a fatal error.
pub fn exit_code_for(end: &RunEnd) -> i32 {
    match end {
        RunEnd::Decided { .. } | RunEnd::ArbiterDecided { .. } | RunEnd::Exhausted => {
            exit_codes::OK
        }
        RunEnd::ArbiterFinished => exit_codes::INCONCLUSIVE,
        RunEnd::Aborted { .. } => exit_codes::FAILED,
    }
}

/// Run a tournament through cutechess-cli.
pub fn run(cfg: &HarnessConfig, control: &str, candidate: &str) -> Result<RunSummary> {
    let arbiter = CutechessArbiter {
        program: cfg.arbiter.command.clone(),
        extra_args: cfg.arbiter.extra_args.clone(),
        timemargin_ms: cfg.arbiter.timemargin_ms,
    };
    run_with(cfg, control, candidate, &arbiter)
}

/// Run a tournament through any arbiter.
///
/// Everything that can be rejected up front (match parameters, engine
/// binaries) is checked before the run directory is created, so a
/// configuration error leaves nothing behind and schedules no game.
pub fn run_with<A: Arbiter>(
    cfg: &HarnessConfig,
    control: &str,
    candidate: &str,
    arbiter: &A,
) -> Result<RunSummary> {
    let run_id = generate_run_id();
    let paths = RunPaths::new(&cfg.results.dir, &run_id);
    let config = MatchConfig::build(cfg.match_input(&paths.dir))?;
    warn_if_ceiling_below_clock(&config);

    let archive = VersionArchive::new(&cfg.archive.dir);
    let control_source = parse_source(control, &archive)?;
    let candidate_source = parse_source(candidate, &archive)?;
    let (control, candidate) = resolve_pair(&control_source, &candidate_source, &cfg.engine)?;
    info!(control = %control.name, candidate = %candidate.name, "engines resolved");

    paths.create()?;
    write_config(&paths.config_path, cfg).context("snapshot configuration")?;
    println!(
        "run: run_id={} control={} candidate={} games={} tc={} dir={}",
        run_id,
        control.name,
        candidate.name,
        config.games(),
        config.time_control(),
        paths.dir.display()
    );

    let options = RunOptions::new(&run_id, &paths.arbiter_log_path);
    let report = run_tournament(arbiter, &control, &candidate, &config, &options, |progress| {
        print_progress(progress);
    })?;

    print_verdict(&report);
    println!("result: report={}", paths.report_path.display());
    Ok(RunSummary { paths, report })
}

/// Print a stored run report.
pub fn report(run_dir: &Path) -> Result<()> {
    let paths = RunPaths::at(run_dir);
    let loaded = load_report(&paths.report_path)?;
    let header = &loaded.header;
    println!(
        "report: run_id={} control={} candidate={} tc={} games={}",
        header.run_id, header.control.name, header.candidate.name, header.time_control, header.games
    );

    match &loaded.summary {
        Some(summary) => {
            println!("report: end={}", describe_end(&summary.end));
            print_standing(
                &header.bounds,
                loaded.games.len() as u32,
                header.games,
                summary.sprt.llr,
                summary.sprt.decision,
                &summary.summary,
            );
        }
        None => {
            debug!(games = loaded.games.len(), "report has no summary, replaying games");
            let tournament = loaded.replay()?;
            println!("report: end=unfinalized (harness stopped before writing a summary)");
            let state = tournament.sprt_state();
            print_standing(
                &header.bounds,
                tournament.recorded(),
                tournament.budget(),
                state.llr,
                state.decision,
                &tournament.summary(),
            );
        }
    }

    for game in &loaded.games {
        if let Some(failure) = game.failure() {
            println!("report: failure game={} {}", game.index, failure);
        }
    }
    Ok(())
}

fn warn_if_ceiling_below_clock(config: &MatchConfig) {
    if let Some(nominal) = config.time_control().nominal_game_length(EXPECTED_MOVES) {
        if nominal > config.game_timeout() {
            warn!(
                nominal_secs = nominal.as_secs(),
                ceiling_secs = config.game_timeout().as_secs(),
                "game ceiling is shorter than a {EXPECTED_MOVES}-move game on the clock"
            );
        }
    }
}

fn print_progress(progress: &Progress) {
    print_standing(
        &progress.bounds,
        progress.recorded,
        progress.budget,
        progress.sprt.llr,
        progress.sprt.decision,
        &progress.summary,
    );
}

fn print_standing(
    bounds: &SprtBounds,
    recorded: u32,
    budget: u32,
    llr: f64,
    decision: Decision,
    summary: &Summary,
) {
    let tally = &summary.tally;
    let elo = match &summary.elo {
        Some(estimate) => format!(
            "elo={:+.1} +/-{:.1} los={:.1}%",
            estimate.elo,
            estimate.margin,
            estimate.los * 100.0
        ),
        None => "elo=n/a".to_string(),
    };
    println!(
        "progress: games={}/{} W-L-D={}-{}-{} failures={} llr={:.3} [{:.3}, {:.3}] {} decision={}",
        recorded,
        budget,
        tally.wins,
        tally.losses,
        tally.draws,
        summary.failures,
        llr,
        bounds.lower(),
        bounds.upper(),
        elo,
        decision
    );
}

fn print_verdict(report: &TournamentReport) {
    println!(
        "result: run_id={} end={} decision={} llr={:.3} sprt_games={} recorded={}",
        report.run_id,
        describe_end(&report.end),
        report.sprt.decision,
        report.sprt.llr,
        report.sprt.games,
        report.outcomes.len()
    );
}

fn describe_end(end: &RunEnd) -> String {
    match end {
        RunEnd::Decided { decision } => format!("decided({decision})"),
        RunEnd::Exhausted => "exhausted".to_string(),
        RunEnd::ArbiterDecided { decision } => format!("arbiter-decided({decision})"),
        RunEnd::ArbiterFinished => "arbiter-finished".to_string(),
        RunEnd::Aborted { reason } => format!("aborted({reason})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_follows_run_end() {
        assert_eq!(
            exit_code_for(&RunEnd::Decided {
                decision: Decision::AcceptH0
            }),
            exit_codes::OK
        );
        assert_eq!(exit_code_for(&RunEnd::Exhausted), exit_codes::OK);
        assert_eq!(exit_code_for(&RunEnd::ArbiterFinished), exit_codes::INCONCLUSIVE);
        let arbiter_decided = RunEnd::ArbiterDecided {
            decision: Decision::AcceptH0,
        };
        assert_eq!(exit_code_for(&arbiter_decided), exit_codes::OK);
        assert_eq!(describe_end(&arbiter_decided), "arbiter-decided(accept-H0)");
        assert_eq!(describe_end(&RunEnd::Exhausted), "exhausted");
        assert_eq!(
            describe_end(&RunEnd::Decided {
                decision: Decision::AcceptH1
            }),
            "decided(accept-H1)"
        );
    }

    #[test]
    fn init_refuses_to_clobber() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("harness.toml");
        init(&path, false).expect("init");
        assert!(init(&path, false).is_err());
        init(&path, true).expect("force");
    }
}
