//! Harness configuration stored in `harness.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::match_config::MatchConfigInput;
use crate::core::sprt::SprtBounds;

pub const DEFAULT_CONFIG_FILE: &str = "harness.toml";

/// Harness configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults that
/// build the engine with cargo and run it through cutechess-cli.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    pub archive: ArchiveConfig,
    pub build: BuildConfig,
    pub engine: EngineConfig,
    pub arbiter: ArbiterConfig,
    #[serde(rename = "match")]
    pub tournament: TournamentConfig,
    pub sprt: SprtBounds,
    pub results: ResultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory holding one subdirectory per archived version label.
    pub dir: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("versions"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build command, e.g. `["cargo", "build", "--release"]`.
    pub command: Vec<String>,
    /// Directory the build runs in.
    pub workdir: PathBuf,
    /// Binary produced by the build, relative to `workdir`.
    pub binary: PathBuf,
    pub timeout_secs: u64,
    /// Truncate captured build output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "cargo".to_string(),
                "build".to_string(),
                "--release".to_string(),
            ],
            workdir: PathBuf::from("."),
            binary: PathBuf::from("target/release/weechess"),
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

/// Fixed invocation conventions shared by every engine binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Argument that makes a binary print its identity line.
    pub identity_arg: String,
    /// Argument that starts a control-protocol session.
    pub protocol_arg: String,
    pub identity_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identity_arg: "version".to_string(),
            protocol_arg: "uci".to_string(),
            identity_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Arbiter executable.
    pub command: String,
    /// Extra arguments appended verbatim (openings, adjudication, ...).
    pub extra_args: Vec<String>,
    /// Per-move clock tolerance in milliseconds passed as `timemargin`.
    pub timemargin_ms: Option<u64>,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            command: "cutechess-cli".to_string(),
            extra_args: Vec::new(),
            timemargin_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TournamentConfig {
    pub time_control: String,
    pub concurrency: u32,
    pub games: u32,
    /// Play each opening twice with colors swapped.
    pub repeat: bool,
    /// Surface progress every N recorded games.
    pub rating_interval: u32,
    /// Exclude crashed/timed-out games and continue instead of aborting.
    pub recover: bool,
    /// Wall-clock ceiling for one game.
    pub game_timeout_secs: u64,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            time_control: "10+0.1".to_string(),
            concurrency: 1,
            games: 1000,
            repeat: true,
            rating_interval: 10,
            recover: true,
            game_timeout_secs: 10 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResultsConfig {
    /// Directory holding one subdirectory per tournament run.
    pub dir: PathBuf,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            archive: ArchiveConfig::default(),
            build: BuildConfig::default(),
            engine: EngineConfig::default(),
            arbiter: ArbiterConfig::default(),
            tournament: TournamentConfig::default(),
            sprt: SprtBounds::default(),
            results: ResultsConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Check the settings that are not part of a match configuration.
    ///
    /// Match parameters are validated by [`crate::core::match_config::MatchConfig::build`],
    /// which reports every violation at once.
    pub fn validate(&self) -> Result<()> {
        if self.build.command.is_empty() || self.build.command[0].trim().is_empty() {
            return Err(anyhow!("build.command must be a non-empty array"));
        }
        if self.build.timeout_secs == 0 {
            return Err(anyhow!("build.timeout_secs must be > 0"));
        }
        if self.build.output_limit_bytes == 0 {
            return Err(anyhow!("build.output_limit_bytes must be > 0"));
        }
        if self.engine.identity_arg.trim().is_empty() {
            return Err(anyhow!("engine.identity_arg must not be empty"));
        }
        if self.engine.identity_timeout_secs == 0 {
            return Err(anyhow!("engine.identity_timeout_secs must be > 0"));
        }
        if self.arbiter.command.trim().is_empty() {
            return Err(anyhow!("arbiter.command must not be empty"));
        }
        Ok(())
    }

    /// Raw match parameters for a run writing into `run_dir`.
    pub fn match_input(&self, run_dir: &Path) -> MatchConfigInput {
        MatchConfigInput {
            time_control: self.tournament.time_control.clone(),
            concurrency: self.tournament.concurrency,
            games: self.tournament.games,
            repeat: self.tournament.repeat,
            rating_interval: self.tournament.rating_interval,
            recover: self.tournament.recover,
            game_timeout_secs: self.tournament.game_timeout_secs,
            report_path: run_dir.join("report.jsonl"),
            pgn_path: run_dir.join("games.pgn"),
            sprt: self.sprt,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HarnessConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
