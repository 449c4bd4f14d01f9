mod cli;
mod report;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use harness::io::config::{DEFAULT_CONFIG_FILE, load_config};

#[derive(Parser)]
#[command(name = "history", version, about = "Verdicts of past harness runs")]
struct Cli {
    /// Harness configuration naming the results directory.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Read runs from this directory instead of the configured one.
    #[arg(long, global = true)]
    results: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    List,
    Summary {
        #[arg(long)]
        candidate: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    harness::logging::init();
    let cli = Cli::parse();
    let results_dir = match cli.results {
        Some(dir) => dir,
        None => load_config(&cli.config)?.results.dir,
    };
    match cli.command {
        Command::List => cli::list_runs(&results_dir),
        Command::Summary { candidate, json } => {
            cli::summary(&results_dir, candidate.as_deref(), json)
        }
    }
}
