//! Append-only archive of engine builds keyed by self-reported identity.
//!
//! Layout: `<archive>/<label>/<binary>` plus `<archive>/<label>/version.json`.
//! A label directory only becomes visible through a rename of a fully
//! written temporary sibling, and an existing label is never overwritten.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::error::HarnessError;
use crate::io::config::{BuildConfig, EngineConfig};
use crate::io::identity::query_identity;
use crate::io::process::{Bounds, run_bounded};
use crate::io::run_dir::short_id;

const VERSION_FILE: &str = "version.json";
const TEMP_PREFIX: &str = ".tmp-";

/// An archived engine build. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Identity label reported by the binary itself.
    pub label: String,
    /// Path of the stored binary inside the archive.
    pub binary: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the stored binary.
    pub sha256: String,
}

/// On-disk form of [`Version`]; the binary is stored relative to its label dir.
#[derive(Debug, Serialize, Deserialize)]
struct VersionRecord {
    label: String,
    binary: String,
    created_at: DateTime<Utc>,
    sha256: String,
}

#[derive(Debug, Clone)]
pub struct VersionArchive {
    root: PathBuf,
}

impl VersionArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the current source, ask the result who it is, and archive it.
    #[instrument(skip_all, fields(workdir = %build.workdir.display()))]
    pub fn build(&self, build: &BuildConfig, engine: &EngineConfig) -> Result<Version> {
        let binary = run_build(build)?;
        let label = query_identity(
            &binary,
            &engine.identity_arg,
            Duration::from_secs(engine.identity_timeout_secs),
        )?;
        info!(%label, binary = %binary.display(), "build identified");
        self.store(&binary, &label)
    }

    /// Store `binary` under `label`. First writer wins.
    ///
    /// When `label` is already archived the existing version is returned and
    /// the stored binary is left untouched.
    #[instrument(skip_all, fields(label = %label))]
    pub fn store(&self, binary: &Path, label: &str) -> Result<Version> {
        validate_label(label).map_err(|reason| HarnessError::IdentityQuery {
            binary: binary.to_path_buf(),
            reason,
        })?;
        if let Some(existing) = self.get(label)? {
            info!(label, "version already archived, keeping first build");
            return Ok(existing);
        }

        fs::create_dir_all(&self.root)
            .with_context(|| format!("create archive dir {}", self.root.display()))?;
        let file_name = binary
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("engine")
            .to_string();

        let staging = self
            .root
            .join(format!("{TEMP_PREFIX}{label}-{}", short_id()));
        fs::create_dir(&staging)
            .with_context(|| format!("create staging dir {}", staging.display()))?;
        let staged = stage_version(&staging, binary, label, &file_name);
        if let Err(err) = staged {
            remove_staging(&staging);
            return Err(err);
        }

        let target = self.root.join(label);
        if let Err(err) = fs::rename(&staging, &target) {
            remove_staging(&staging);
            // A concurrent writer may have won the race.
            if let Some(existing) = self.get(label)? {
                info!(label, "version archived concurrently, keeping first build");
                return Ok(existing);
            }
            return Err(err).with_context(|| format!("publish {}", target.display()));
        }

        let version = self
            .get(label)?
            .ok_or_else(|| anyhow!("archived version {label} vanished"))?;
        info!(label, sha256 = %version.sha256, "version archived");
        Ok(version)
    }

    /// Look up an archived version by label.
    pub fn get(&self, label: &str) -> Result<Option<Version>> {
        if validate_label(label).is_err() {
            return Ok(None);
        }
        let dir = self.root.join(label);
        let record_path = dir.join(VERSION_FILE);
        if !record_path.exists() {
            return Ok(None);
        }
        load_version(&dir).map(Some)
    }

    /// All archived versions, oldest first.
    pub fn list(&self) -> Result<Vec<Version>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in
            fs::read_dir(&self.root).with_context(|| format!("read {}", self.root.display()))?
        {
            let entry = entry.context("read archive entry")?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TEMP_PREFIX) || !entry.path().join(VERSION_FILE).exists() {
                continue;
            }
            match load_version(&entry.path()) {
                Ok(version) => versions.push(version),
                Err(err) => warn!(entry = %name, err = %format!("{err:#}"), "skipping unreadable version"),
            }
        }
        versions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(versions)
    }

    /// Recompute the stored binary's digest and compare it with the record.
    pub fn verify(&self, version: &Version) -> Result<()> {
        let actual = file_sha256(&version.binary)?;
        if actual != version.sha256 {
            return Err(anyhow!(
                "archived binary for {} was modified: expected sha256 {}, found {}",
                version.label,
                version.sha256,
                actual
            ));
        }
        debug!(label = %version.label, "archived binary verified");
        Ok(())
    }
}

/// Labels name a single directory inside the archive.
pub fn validate_label(label: &str) -> Result<(), String> {
    if label.trim().is_empty() {
        return Err("identity label is empty".to_string());
    }
    if label != label.trim() {
        return Err(format!("identity label {label:?} has surrounding whitespace"));
    }
    if label.starts_with('.') {
        return Err(format!("identity label {label:?} must not start with '.'"));
    }
    if label.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(format!(
            "identity label {label:?} contains path separators or control characters"
        ));
    }
    Ok(())
}

fn run_build(build: &BuildConfig) -> Result<PathBuf> {
    let (program, args) = build
        .command
        .split_first()
        .ok_or_else(|| HarnessError::Build("empty build command".to_string()))?;
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(&build.workdir);

    info!(command = %build.command.join(" "), "building engine");
    let bounds = Bounds {
        timeout: Duration::from_secs(build.timeout_secs),
        output_limit: build.output_limit_bytes,
    };
    let output = run_bounded("build", cmd, bounds).map_err(|err| HarnessError::Build(format!("{err:#}")))?;

    if output.timed_out {
        return Err(HarnessError::Build(format!(
            "timed out after {}s",
            build.timeout_secs
        ))
        .into());
    }
    if !output.status.success() {
        return Err(HarnessError::Build(format!(
            "exited with status {:?}\n{}{}",
            output.status.code(),
            output.stderr_tail(20),
            output.stderr_truncated_notice("build")
        ))
        .into());
    }

    let binary = build.workdir.join(&build.binary);
    if !binary.is_file() {
        return Err(HarnessError::Build(format!(
            "build produced no binary at {}",
            binary.display()
        ))
        .into());
    }
    Ok(binary)
}

fn stage_version(staging: &Path, binary: &Path, label: &str, file_name: &str) -> Result<()> {
    let stored = staging.join(file_name);
    fs::copy(binary, &stored)
        .with_context(|| format!("copy {} into archive", binary.display()))?;
    let record = VersionRecord {
        label: label.to_string(),
        binary: file_name.to_string(),
        created_at: Utc::now(),
        sha256: file_sha256(&stored)?,
    };
    let mut buf = serde_json::to_string_pretty(&record).context("serialize version")?;
    buf.push('\n');
    let record_path = staging.join(VERSION_FILE);
    fs::write(&record_path, buf).with_context(|| format!("write {}", record_path.display()))?;
    Ok(())
}

fn remove_staging(staging: &Path) {
    if let Err(err) = fs::remove_dir_all(staging) {
        warn!(dir = %staging.display(), err = %err, "failed to remove staging dir");
    }
}

fn load_version(dir: &Path) -> Result<Version> {
    let record_path = dir.join(VERSION_FILE);
    let contents = fs::read_to_string(&record_path)
        .with_context(|| format!("read {}", record_path.display()))?;
    let record: VersionRecord = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", record_path.display()))?;
    Ok(Version {
        binary: dir.join(&record.binary),
        label: record.label,
        created_at: record.created_at,
        sha256: record.sha256,
    })
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}
