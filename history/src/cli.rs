//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};

use crate::report::{collect_runs, summarize};

/// One line per stored run, oldest first.
pub fn list_runs(results_dir: &Path) -> Result<()> {
    let (runs, warnings) = collect_runs(results_dir)?;
    if runs.is_empty() {
        println!("list: no runs in {}", results_dir.display());
    }
    for run in &runs {
        println!(
            "{} {} vs {} verdict={} games={}/{} failures={} llr={:.3}",
            run.run_id,
            run.candidate,
            run.control,
            run.verdict.as_str(),
            run.games,
            run.budget,
            run.failures,
            run.llr
        );
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Verdict totals per candidate.
pub fn summary(results_dir: &Path, candidate: Option<&str>, json: bool) -> Result<()> {
    let (runs, warnings) = collect_runs(results_dir)?;
    let summaries = summarize(&runs, candidate);
    if json {
        let payload = serde_json::to_string_pretty(&summaries).context("serialize summary")?;
        println!("{payload}");
    } else {
        if summaries.is_empty() {
            println!("summary: no matching runs");
        }
        for entry in &summaries {
            println!(
                "summary: candidate={} runs={} h1={} h0={} unresolved={} aborted={} games={} failures={}",
                entry.candidate,
                entry.runs,
                entry.h1,
                entry.h0,
                entry.unresolved,
                entry.aborted,
                entry.games,
                entry.failures
            );
            if let Some(control) = &entry.last_beaten {
                println!("summary: candidate={} last_beaten={}", entry.candidate, control);
            }
        }
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}
