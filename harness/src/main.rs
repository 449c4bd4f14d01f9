use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use harness::cli;
use harness::core::types::Role;
use harness::error::find_harness_error;
use harness::exit_codes;
use harness::io::config::{DEFAULT_CONFIG_FILE, HarnessConfig, load_config};

#[derive(Parser, Debug)]
#[command(
    name = "harness",
    version,
    about = "SPRT regression tournaments between archived engine builds"
)]
struct Cli {
    /// Path to the harness configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Build the engine and archive the binary under its identity label.
    Build,
    /// List archived versions.
    Versions {
        /// Re-hash every archived binary.
        #[arg(long)]
        verify: bool,
    },
    /// Show how a version label or binary path resolves.
    Resolve {
        source: String,
        /// Resolve in the control role instead of the candidate role.
        #[arg(long)]
        control: bool,
    },
    /// Run a tournament between a control and a candidate.
    Run(RunArgs),
    /// Print the report of a finished or interrupted run.
    Report { run_dir: PathBuf },
}

/// Per-run overrides of the `[match]` and `[sprt]` sections.
#[derive(Args, Debug)]
struct RunArgs {
    /// Baseline engine: archived version label or binary path.
    control: String,
    /// Engine under test: archived version label or binary path.
    candidate: String,
    #[arg(long)]
    games: Option<u32>,
    #[arg(long)]
    concurrency: Option<u32>,
    /// Time control, e.g. `10+0.1` or `40/60`.
    #[arg(long)]
    tc: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    elo0: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    elo1: Option<f64>,
    #[arg(long)]
    alpha: Option<f64>,
    #[arg(long)]
    beta: Option<f64>,
    #[arg(long)]
    rating_interval: Option<u32>,
    /// Wall-clock ceiling per game, in seconds.
    #[arg(long)]
    game_timeout: Option<u64>,
    /// Treat any participant failure as fatal.
    #[arg(long)]
    no_recover: bool,
    /// Do not replay each opening with colors swapped.
    #[arg(long)]
    no_repeat: bool,
}

impl RunArgs {
    fn apply(&self, cfg: &mut HarnessConfig) {
        let tournament = &mut cfg.tournament;
        if let Some(games) = self.games {
            tournament.games = games;
        }
        if let Some(concurrency) = self.concurrency {
            tournament.concurrency = concurrency;
        }
        if let Some(tc) = &self.tc {
            tournament.time_control = tc.clone();
        }
        if let Some(interval) = self.rating_interval {
            tournament.rating_interval = interval;
        }
        if let Some(secs) = self.game_timeout {
            tournament.game_timeout_secs = secs;
        }
        if self.no_recover {
            tournament.recover = false;
        }
        if self.no_repeat {
            tournament.repeat = false;
        }
        let sprt = &mut cfg.sprt;
        if let Some(elo0) = self.elo0 {
            sprt.elo0 = elo0;
        }
        if let Some(elo1) = self.elo1 {
            sprt.elo1 = elo1;
        }
        if let Some(alpha) = self.alpha {
            sprt.alpha = alpha;
        }
        if let Some(beta) = self.beta {
            sprt.beta = beta;
        }
    }
}

fn main() {
    harness::logging::init();
    let cli = Cli::parse();
    let code = match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            find_harness_error(&err).map_or(exit_codes::FAILED, |e| e.exit_code())
        }
    };
    std::process::exit(code);
}

fn execute(cli: Cli) -> Result<i32> {
    if let Command::Init { force } = cli.command {
        cli::init(&cli.config, force)?;
        return Ok(exit_codes::OK);
    }

    let cfg = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err:#}");
            return Ok(exit_codes::INVALID);
        }
    };
    match cli.command {
        Command::Init { .. } => Ok(exit_codes::OK),
        Command::Build => cli::build(&cfg).map(|_| exit_codes::OK),
        Command::Versions { verify } => cli::versions(&cfg, verify).map(|()| exit_codes::OK),
        Command::Resolve { source, control } => {
            let role = if control { Role::Control } else { Role::Candidate };
            cli::resolve_source(&cfg, &source, role).map(|()| exit_codes::OK)
        }
        Command::Run(args) => run(cfg, &args),
        Command::Report { run_dir } => report(&run_dir),
    }
}

fn run(mut cfg: HarnessConfig, args: &RunArgs) -> Result<i32> {
    args.apply(&mut cfg);
    let summary = cli::run(&cfg, &args.control, &args.candidate)?;
    Ok(summary.exit_code())
}

fn report(run_dir: &Path) -> Result<i32> {
    cli::report(run_dir)?;
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_overrides_replace_config_values() {
        let cli = Cli::try_parse_from([
            "harness",
            "run",
            "old",
            "./target/release/engine",
            "--games",
            "200",
            "--elo0",
            "-2",
            "--elo1",
            "3",
            "--no-recover",
        ])
        .expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let mut cfg = HarnessConfig::default();
        args.apply(&mut cfg);
        assert_eq!(cfg.tournament.games, 200);
        assert_eq!(cfg.sprt.elo0, -2.0);
        assert_eq!(cfg.sprt.elo1, 3.0);
        assert!(!cfg.tournament.recover);
        assert!(cfg.tournament.repeat);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["harness", "versions", "--config", "other.toml", "--verify"])
            .expect("parse");
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(cli.command, Command::Versions { verify: true }));
    }

    #[test]
    fn run_requires_both_engines() {
        assert!(Cli::try_parse_from(["harness", "run", "old"]).is_err());
    }
}
