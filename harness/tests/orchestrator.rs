//! Orchestrator behavior against scripted arbiters: failure policy,
//! out-of-order completion, cooperative stop, the wall-clock ceiling, and
//! arbiter misbehavior.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use harness::core::match_config::{MatchConfig, MatchConfigInput};
use harness::core::sprt::{Sprt, SprtBounds};
use harness::core::tournament::RunEnd;
use harness::core::types::{Decision, FailureKind, GameResult};
use harness::error::{HarnessError, find_harness_error};
use harness::cli::exit_code_for;
use harness::exit_codes;
use harness::io::arbiter::{ArbiterEvent, ResultToken};
use harness::io::report_store::load_report;
use harness::test_support::{
    CANDIDATE, CONTROL, ScriptedArbiter, Step, colors, finished, finished_with, game,
    match_input, run_scripted, sequential_games, started,
};

fn config(dir: &Path, games: u32, edit: impl FnOnce(&mut MatchConfigInput)) -> MatchConfig {
    let mut input = match_input(dir);
    input.games = games;
    edit(&mut input);
    MatchConfig::build(input).expect("config")
}

/// Steps for `games` games run `slots` at a time; `pick` chooses which
/// in-flight game finishes next.
fn pooled_games(
    games: u32,
    slots: usize,
    result: impl Fn(u32) -> GameResult,
    mut pick: impl FnMut(usize) -> usize,
) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut in_flight: VecDeque<u32> = VecDeque::new();
    let mut next = 1;
    while next <= games || !in_flight.is_empty() {
        while in_flight.len() < slots && next <= games {
            let (white, black) = colors(next, CONTROL, CANDIDATE);
            steps.push(started(next, white, black));
            in_flight.push_back(next);
            next += 1;
        }
        let slot = pick(in_flight.len());
        let Some(index) = in_flight.remove(slot) else {
            break;
        };
        steps.push(finished_with(index, CONTROL, CANDIDATE, result(index)));
    }
    steps
}

fn alternating(index: u32) -> GameResult {
    if index % 2 == 1 {
        GameResult::WinB
    } else {
        GameResult::WinA
    }
}

#[test]
fn participant_failure_is_recorded_but_not_counted() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 4, |_| {});
    let mut steps = game(1, CONTROL, CANDIDATE, GameResult::WinB);
    let (white, black) = colors(2, CONTROL, CANDIDATE);
    steps.push(started(2, white, black));
    steps.push(finished(2, white, black, ResultToken::BlackWins, "White disconnects"));
    steps.extend(game(3, CONTROL, CANDIDATE, GameResult::Draw));
    steps.extend(game(4, CONTROL, CANDIDATE, GameResult::WinA));
    let arbiter = ScriptedArbiter::new(steps);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let report = report.expect("run");

    assert_eq!(report.end, RunEnd::Exhausted);
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.summary.failures, 1);
    assert_eq!(report.summary.tally.total(), 3);

    let completed = report.outcomes.iter().filter(|g| g.result().is_some()).count();
    assert_eq!(report.sprt.games as usize, completed);

    let mut expected = Sprt::new(SprtBounds::default());
    for result in [GameResult::WinB, GameResult::Draw, GameResult::WinA] {
        expected.update(result);
    }
    assert!((report.sprt.llr - expected.state().llr).abs() < 1e-12);

    let failure = report.outcomes[1].failure().expect("failure");
    assert_eq!(failure.kind, FailureKind::Crash);
    assert_eq!(failure.engine.as_deref(), Some(CANDIDATE));
}

#[test]
fn failure_without_recovery_aborts_and_finalizes_the_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 10, |input| input.recover = false);
    let mut steps = game(1, CONTROL, CANDIDATE, GameResult::WinB);
    let (white, black) = colors(2, CONTROL, CANDIDATE);
    steps.push(started(2, white, black));
    steps.push(finished(2, white, black, ResultToken::Unfinished, "Black stalls"));
    steps.extend(game(3, CONTROL, CANDIDATE, GameResult::WinB));
    let arbiter = ScriptedArbiter::new(steps);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let err = report.expect_err("run should abort");
    match find_harness_error(&err) {
        Some(HarnessError::ParticipantFailure { index, failure }) => {
            assert_eq!(*index, 2);
            assert_eq!(failure.kind, FailureKind::Stall);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let loaded = load_report(config.report_path()).expect("load");
    assert_eq!(loaded.games.len(), 2);
    let summary = loaded.summary.expect("summary written");
    assert!(matches!(summary.end, RunEnd::Aborted { .. }));
}

#[test]
fn concurrent_games_are_recorded_in_completion_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 100, |input| input.concurrency = 16);
    let mut rng = StdRng::seed_from_u64(7);
    let steps = pooled_games(100, 16, alternating, |len| rng.gen_range(0..len));
    let arbiter = ScriptedArbiter::new(steps);

    let (report, progress) = run_scripted(&arbiter, &config, temp.path());
    let report = report.expect("run");

    assert_eq!(report.end, RunEnd::Exhausted);
    let indices: Vec<u32> = report.outcomes.iter().map(|g| g.index).collect();
    let unique: BTreeSet<u32> = indices.iter().copied().collect();
    assert_eq!(unique.len(), 100);
    assert_eq!(unique.first(), Some(&1));
    assert_eq!(unique.last(), Some(&100));
    let mut sorted = indices.clone();
    sorted.sort_unstable();
    assert_ne!(indices, sorted);

    assert_eq!(report.summary.tally.wins, 50);
    assert_eq!(report.summary.tally.losses, 50);
    assert_eq!(progress.len(), 10);

    let loaded = load_report(config.report_path()).expect("load");
    let stored: Vec<u32> = loaded.games.iter().map(|g| g.index).collect();
    assert_eq!(stored, indices);
}

#[test]
fn decision_drains_in_flight_games_and_ignores_later_ones() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 1000, |input| input.concurrency = 4);
    let steps = pooled_games(1000, 4, |_| GameResult::WinB, |_| 0);
    let arbiter = ScriptedArbiter::new(steps);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let report = report.expect("run");

    assert_eq!(
        report.end,
        RunEnd::Decided {
            decision: Decision::AcceptH1
        }
    );
    // Decided on game 104 with 105..=107 still running.
    let indices: Vec<u32> = report.outcomes.iter().map(|g| g.index).collect();
    assert_eq!(indices, (1..=107).collect::<Vec<_>>());
    assert_eq!(report.sprt.games, 107);

    let mut frozen = Sprt::new(SprtBounds::default());
    for _ in 0..104 {
        frozen.update(GameResult::WinB);
    }
    assert!((report.sprt.llr - frozen.state().llr).abs() < 1e-12);
}

#[test]
fn game_past_the_ceiling_is_a_timeout_and_late_result_is_dropped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 2, |input| input.game_timeout_secs = 1);
    let (white, black) = colors(1, CONTROL, CANDIDATE);
    let mut steps = vec![
        started(1, white, black),
        Step::Pause(Duration::from_millis(1500)),
        finished_with(1, CONTROL, CANDIDATE, GameResult::WinB),
    ];
    steps.extend(game(2, CONTROL, CANDIDATE, GameResult::Draw));
    let arbiter = ScriptedArbiter::new(steps);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let report = report.expect("run");

    assert_eq!(report.end, RunEnd::Exhausted);
    assert_eq!(report.outcomes.len(), 2);
    let failure = report.outcomes[0].failure().expect("timeout");
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(report.outcomes[1].result(), Some(GameResult::Draw));
    assert_eq!(report.sprt.games, 1);
}

#[test]
fn arbiter_closing_early_is_inconclusive() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 10, |_| {});
    let arbiter = ScriptedArbiter::new(game(1, CONTROL, CANDIDATE, GameResult::WinB));

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let report = report.expect("run");
    assert_eq!(report.end, RunEnd::ArbiterFinished);
    assert_eq!(report.outcomes.len(), 1);
}

#[test]
fn arbiter_sprt_concluding_first_is_a_decided_end() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 1000, |_| {});
    let mut steps = sequential_games(CONTROL, CANDIDATE, &[GameResult::WinB; 20]);
    steps.push(Step::Event(ArbiterEvent::Sprt {
        line: "SPRT: llr 2.97 (100.9%), lbound -2.94, ubound 2.94 - H1 was accepted".to_string(),
        accepted: Some(Decision::AcceptH1),
    }));
    steps.push(Step::Event(ArbiterEvent::MatchFinished));
    let arbiter = ScriptedArbiter::new(steps);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let report = report.expect("run");

    assert_eq!(report.sprt.decision, Decision::Pending);
    assert_eq!(
        report.end,
        RunEnd::ArbiterDecided {
            decision: Decision::AcceptH1
        }
    );
    assert_eq!(exit_code_for(&report.end), exit_codes::OK);
    let loaded = load_report(config.report_path()).expect("load");
    assert_eq!(loaded.summary.map(|s| s.end), Some(report.end));
}

#[test]
fn running_arbiter_sprt_line_does_not_decide() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 10, |_| {});
    let mut steps = game(1, CONTROL, CANDIDATE, GameResult::WinB);
    steps.push(Step::Event(ArbiterEvent::Sprt {
        line: "SPRT: llr 0.05 (1.7%), lbound -2.94, ubound 2.94".to_string(),
        accepted: None,
    }));
    let arbiter = ScriptedArbiter::new(steps);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    assert_eq!(report.expect("run").end, RunEnd::ArbiterFinished);
}

#[test]
fn decision_on_a_report_boundary_reports_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    // All wins decide on game 104, a multiple of the interval.
    let config = config(temp.path(), 200, |input| input.rating_interval = 8);
    let arbiter = ScriptedArbiter::new(sequential_games(
        CONTROL,
        CANDIDATE,
        &[GameResult::WinB; 200],
    ));

    let (report, progress) = run_scripted(&arbiter, &config, temp.path());
    assert_eq!(report.expect("run").outcomes.len(), 104);

    let recorded: Vec<u32> = progress.iter().map(|p| p.recorded).collect();
    assert_eq!(recorded, (1..=13).map(|n| n * 8).collect::<Vec<_>>());
    assert_eq!(
        progress.last().map(|p| p.sprt.decision),
        Some(Decision::AcceptH1)
    );
}

#[test]
fn arbiter_failure_exit_is_a_protocol_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 10, |_| {});
    let arbiter =
        ScriptedArbiter::new(game(1, CONTROL, CANDIDATE, GameResult::WinB)).exiting_with(1);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let err = report.expect_err("run should fail");
    assert!(matches!(
        find_harness_error(&err),
        Some(HarnessError::ArbiterProtocol(_))
    ));
    let loaded = load_report(config.report_path()).expect("load");
    assert!(matches!(
        loaded.summary.map(|s| s.end),
        Some(RunEnd::Aborted { .. })
    ));
}

#[test]
fn duplicate_result_is_a_protocol_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 10, |_| {});
    let mut steps = game(1, CONTROL, CANDIDATE, GameResult::WinB);
    steps.push(finished_with(1, CONTROL, CANDIDATE, GameResult::WinA));
    let arbiter = ScriptedArbiter::new(steps);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let err = report.expect_err("run should fail");
    assert!(matches!(
        find_harness_error(&err),
        Some(HarnessError::ArbiterProtocol(_))
    ));
}

#[test]
fn game_outside_the_budget_is_a_protocol_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 2, |_| {});
    let arbiter = ScriptedArbiter::new(vec![started(3, CONTROL, CANDIDATE)]);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let err = report.expect_err("run should fail");
    assert!(format!("{err:#}").contains("outside 1..=2"));
}

#[test]
fn unknown_engine_is_a_protocol_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 2, |_| {});
    let arbiter = ScriptedArbiter::new(vec![
        started(1, CONTROL, "stranger"),
        finished(1, CONTROL, "stranger", ResultToken::Draw, "Draw by repetition"),
    ]);

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    let err = report.expect_err("run should fail");
    assert!(format!("{err:#}").contains("stranger"));
}

#[test]
fn arbiter_that_cannot_start_leaves_an_aborted_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), 2, |_| {});
    let arbiter =
        ScriptedArbiter::new(Vec::new()).failing_to_start("spawn cutechess-cli: not found");

    let (report, _) = run_scripted(&arbiter, &config, temp.path());
    assert!(report.is_err());
    let loaded = load_report(config.report_path()).expect("load");
    assert!(loaded.games.is_empty());
    assert!(matches!(
        loaded.summary.map(|s| s.end),
        Some(RunEnd::Aborted { .. })
    ));
}
