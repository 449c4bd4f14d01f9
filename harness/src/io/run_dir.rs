//! Layout of a run directory under `<results>/<run_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    /// Snapshot of the effective configuration.
    pub config_path: PathBuf,
    pub pgn_path: PathBuf,
    pub report_path: PathBuf,
    /// Raw arbiter stdout, teed line by line.
    pub arbiter_log_path: PathBuf,
}

impl RunPaths {
    pub fn new(results_dir: &Path, run_id: &str) -> Self {
        let dir = results_dir.join(run_id);
        Self::at(&dir)
    }

    /// Paths inside an existing run directory.
    pub fn at(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            config_path: dir.join("config.toml"),
            pgn_path: dir.join("games.pgn"),
            report_path: dir.join("report.jsonl"),
            arbiter_log_path: dir.join("arbiter.log"),
        }
    }

    /// Create the run directory. Fails if it already exists.
    pub fn create(&self) -> Result<()> {
        if let Some(parent) = self.dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create results dir {}", parent.display()))?;
        }
        fs::create_dir(&self.dir)
            .with_context(|| format!("create run dir {}", self.dir.display()))
    }
}

/// `YYYYmmdd_HHMMSS_xxxxxx`, sortable by start time.
pub fn generate_run_id() -> String {
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), short_id())
}

/// Six lowercase alphanumerics.
pub fn short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_paths_are_stable() {
        let paths = RunPaths::new(Path::new("results"), "20260101_000000_abcdef");
        assert!(paths.dir.ends_with("results/20260101_000000_abcdef"));
        assert!(paths.config_path.ends_with("config.toml"));
        assert!(paths.pgn_path.ends_with("games.pgn"));
        assert!(paths.report_path.ends_with("report.jsonl"));
        assert!(paths.arbiter_log_path.ends_with("arbiter.log"));
    }

    #[test]
    fn run_id_has_timestamp_and_suffix() {
        let id = generate_run_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 6);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn create_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        paths.create().expect("create");
        assert!(paths.create().is_err());
    }
}
