//! Append-only tournament report (`report.jsonl`).
//!
//! One header line, one line per recorded game in recording order, and a
//! final summary line when the run ends. Each line is flushed as it is
//! written, so a harness crash loses at most the game being recorded.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::sprt::{SprtBounds, SprtState};
use crate::core::tournament::{RunEnd, Summary, Tournament};
use crate::core::types::{EngineDescriptor, GameOutcome};
use crate::error::HarnessError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHeader {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub control: EngineDescriptor,
    pub candidate: EngineDescriptor,
    pub time_control: String,
    pub games: u32,
    pub bounds: SprtBounds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub finished_at: DateTime<Utc>,
    pub sprt: SprtState,
    pub summary: Summary,
    pub end: RunEnd,
}

/// One line of the report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportRecord {
    Header(RunHeader),
    Game(GameOutcome),
    Summary(FinalRecord),
}

pub struct ReportWriter {
    path: PathBuf,
    file: File,
}

impl ReportWriter {
    /// Create a new report file. An existing file is never reused.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create report dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .with_context(|| format!("create report {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to disk.
    pub fn append(&mut self, record: &ReportRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("serialize report record")?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .with_context(|| format!("append to {}", self.path.display()))?;
        self.file
            .flush()
            .with_context(|| format!("flush {}", self.path.display()))
    }
}

/// Report contents read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedReport {
    pub header: RunHeader,
    pub games: Vec<GameOutcome>,
    /// Missing when the harness died before finalizing.
    pub summary: Option<FinalRecord>,
}

impl LoadedReport {
    /// Rebuild the aggregate from the recorded games.
    ///
    /// Gives the statistic of a run that never wrote its summary.
    pub fn replay(&self) -> Result<Tournament, HarnessError> {
        let mut tournament = Tournament::new(self.header.games, self.header.bounds);
        for game in &self.games {
            tournament.record(game.clone())?;
        }
        Ok(tournament)
    }
}

/// Load a report file.
///
/// A torn final line (a crash mid-write) is dropped with a warning; any
/// other unreadable line is an error.
pub fn load_report(path: &Path) -> Result<LoadedReport> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    let lines: Vec<(usize, &str)> = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    let mut header = None;
    let mut games = Vec::new();
    let mut summary = None;
    for (pos, (number, line)) in lines.iter().enumerate() {
        let record: ReportRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(err) if pos + 1 == lines.len() && !contents.ends_with('\n') => {
                warn!(path = %path.display(), line = number + 1, err = %err, "dropping torn last line");
                break;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("parse {} line {}", path.display(), number + 1)
                });
            }
        };
        match record {
            ReportRecord::Header(h) => {
                if header.is_some() {
                    bail!("{} has more than one header", path.display());
                }
                header = Some(h);
            }
            ReportRecord::Game(game) => games.push(game),
            ReportRecord::Summary(s) => summary = Some(s),
        }
    }

    let header = header.ok_or_else(|| anyhow!("{} has no header", path.display()))?;
    debug!(run_id = %header.run_id, games = games.len(), finalized = summary.is_some(), "report loaded");
    Ok(LoadedReport {
        header,
        games,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::elo::Tally;
    use crate::core::types::{Decision, GameReport, GameResult, Protocol, Role};

    fn descriptor(name: &str, role: Role) -> EngineDescriptor {
        EngineDescriptor {
            name: name.to_string(),
            command: PathBuf::from("/bin/true"),
            protocol: Protocol::Uci,
            args: vec!["uci".to_string()],
            role,
        }
    }

    fn header() -> RunHeader {
        RunHeader {
            run_id: "run-1".to_string(),
            started_at: Utc::now(),
            control: descriptor("old", Role::Control),
            candidate: descriptor("new", Role::Candidate),
            time_control: "10+0.1".to_string(),
            games: 10,
            bounds: SprtBounds::default(),
        }
    }

    fn game(index: u32, result: GameResult) -> GameOutcome {
        GameOutcome {
            index,
            white: "old".to_string(),
            black: "new".to_string(),
            report: GameReport::Completed { result },
            comment: "Black mates".to_string(),
        }
    }

    #[test]
    fn writes_lines_in_order_and_loads_them_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("report.jsonl");
        let mut writer = ReportWriter::create(&path).expect("create");
        writer
            .append(&ReportRecord::Header(header()))
            .expect("header");
        writer
            .append(&ReportRecord::Game(game(2, GameResult::WinB)))
            .expect("game");
        writer
            .append(&ReportRecord::Game(game(1, GameResult::Draw)))
            .expect("game");
        let final_record = FinalRecord {
            finished_at: Utc::now(),
            sprt: SprtState {
                llr: 0.03,
                games: 2,
                decision: Decision::Pending,
            },
            summary: Summary {
                tally: Tally {
                    wins: 1,
                    losses: 0,
                    draws: 1,
                },
                failures: 0,
                elo: None,
            },
            end: RunEnd::Exhausted,
        };
        writer
            .append(&ReportRecord::Summary(final_record.clone()))
            .expect("summary");

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().count(), 4);
        assert!(contents.lines().next().expect("line").contains("\"type\":\"header\""));

        let loaded = load_report(&path).expect("load");
        let indices: Vec<u32> = loaded.games.iter().map(|g| g.index).collect();
        assert_eq!(indices, vec![2, 1]);
        assert_eq!(loaded.summary, Some(final_record));
    }

    #[test]
    fn refuses_to_reuse_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("report.jsonl");
        fs::write(&path, "").expect("write");
        assert!(ReportWriter::create(&path).is_err());
    }

    /// A crash mid-write leaves a partial last line; everything before it survives.
    #[test]
    fn torn_last_line_is_dropped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("report.jsonl");
        let mut writer = ReportWriter::create(&path).expect("create");
        writer
            .append(&ReportRecord::Header(header()))
            .expect("header");
        writer
            .append(&ReportRecord::Game(game(1, GameResult::WinB)))
            .expect("game");
        drop(writer);
        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        file.write_all(b"{\"type\":\"game\",\"ind").expect("write");

        let loaded = load_report(&path).expect("load");
        assert_eq!(loaded.games.len(), 1);
        assert!(loaded.summary.is_none());

        let replayed = loaded.replay().expect("replay");
        assert_eq!(replayed.sprt_state().games, 1);
    }

    #[test]
    fn corrupt_middle_line_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("report.jsonl");
        let header_line =
            serde_json::to_string(&ReportRecord::Header(header())).expect("json");
        fs::write(&path, format!("{header_line}\nnot json\n{header_line}\n")).expect("write");
        assert!(load_report(&path).is_err());
    }
}
