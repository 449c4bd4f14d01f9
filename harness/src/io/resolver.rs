//! Turns archived versions or ad-hoc paths into arbiter-ready descriptors.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::{EngineDescriptor, Protocol, Role};
use crate::error::HarnessError;
use crate::io::archive::{Version, VersionArchive};
use crate::io::config::EngineConfig;
use crate::io::identity::query_identity;

/// Where an engine binary comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSource {
    /// Archived build; its stored label is its name.
    Version(Version),
    /// Any binary on disk; named by asking it.
    Path(PathBuf),
}

impl EngineSource {
    pub fn binary(&self) -> &Path {
        match self {
            EngineSource::Version(version) => &version.binary,
            EngineSource::Path(path) => path,
        }
    }
}

/// Interpret a CLI argument: an archived label wins over a path of the same name.
pub fn parse_source(arg: &str, archive: &VersionArchive) -> Result<EngineSource> {
    match archive.get(arg)? {
        Some(version) => Ok(EngineSource::Version(version)),
        None => Ok(EngineSource::Path(PathBuf::from(arg))),
    }
}

/// Build the descriptor for one participant.
#[instrument(skip_all, fields(role = %role))]
pub fn resolve(
    source: &EngineSource,
    role: Role,
    engine: &EngineConfig,
) -> Result<EngineDescriptor> {
    let binary = source.binary();
    check_executable(binary)?;
    let command = fs::canonicalize(binary)
        .with_context(|| format!("canonicalize {}", binary.display()))?;

    let name = match source {
        EngineSource::Version(version) => version.label.clone(),
        EngineSource::Path(_) => query_identity(
            &command,
            &engine.identity_arg,
            Duration::from_secs(engine.identity_timeout_secs),
        )?,
    };
    debug!(%name, command = %command.display(), "engine resolved");

    Ok(EngineDescriptor {
        name,
        command,
        protocol: Protocol::Uci,
        args: vec![engine.protocol_arg.clone()],
        role,
    })
}

/// Resolve both participants, keeping their names distinct.
///
/// Pitting a build against itself is legal (a sanity run); the names then
/// get their role appended.
pub fn resolve_pair(
    control: &EngineSource,
    candidate: &EngineSource,
    engine: &EngineConfig,
) -> Result<(EngineDescriptor, EngineDescriptor)> {
    let mut control = resolve(control, Role::Control, engine)?;
    let mut candidate = resolve(candidate, Role::Candidate, engine)?;
    if control.name == candidate.name {
        control.name = format!("{}-{}", control.name, Role::Control);
        candidate.name = format!("{}-{}", candidate.name, Role::Candidate);
    }
    Ok((control, candidate))
}

fn check_executable(path: &Path) -> Result<(), HarnessError> {
    let missing = |reason: &str| HarnessError::MissingBinary {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let metadata = fs::metadata(path).map_err(|_| missing("does not exist"))?;
    if !metadata.is_file() {
        return Err(missing("not a regular file"));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(missing("not executable"));
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{engine_script, write_script};

    #[test]
    fn path_source_is_named_by_identity() {
        let temp = tempfile::tempdir().expect("tempdir");
        let binary = write_script(temp.path(), "engine", &engine_script("weechess.004-fern"));
        let descriptor = resolve(
            &EngineSource::Path(binary),
            Role::Candidate,
            &EngineConfig::default(),
        )
        .expect("resolve");
        assert_eq!(descriptor.name, "weechess.004-fern");
        assert_eq!(descriptor.args, vec!["uci".to_string()]);
        assert_eq!(descriptor.role, Role::Candidate);
        assert!(descriptor.command.is_absolute());
    }

    #[test]
    fn missing_and_non_executable_paths_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve(
            &EngineSource::Path(temp.path().join("nope")),
            Role::Control,
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            crate::error::find_harness_error(&err),
            Some(HarnessError::MissingBinary { .. })
        ));

        let plain = temp.path().join("plain");
        fs::write(&plain, "not a program").expect("write");
        let err = resolve(
            &EngineSource::Path(plain),
            Role::Control,
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("not executable"));
    }

    #[test]
    fn archived_version_uses_stored_label() {
        let temp = tempfile::tempdir().expect("tempdir");
        let binary = write_script(temp.path(), "engine", &engine_script("weechess.001-ash"));
        let archive = VersionArchive::new(temp.path().join("versions"));
        archive.store(&binary, "weechess.001-ash").expect("store");

        let source = parse_source("weechess.001-ash", &archive).expect("parse");
        assert!(matches!(source, EngineSource::Version(_)));
        let descriptor =
            resolve(&source, Role::Control, &EngineConfig::default()).expect("resolve");
        assert_eq!(descriptor.name, "weechess.001-ash");
    }

    #[test]
    fn self_play_names_stay_unique() {
        let temp = tempfile::tempdir().expect("tempdir");
        let binary = write_script(temp.path(), "engine", &engine_script("weechess.005-oak"));
        let source = EngineSource::Path(binary);
        let (control, candidate) =
            resolve_pair(&source, &source, &EngineConfig::default()).expect("pair");
        assert_eq!(control.name, "weechess.005-oak-control");
        assert_eq!(candidate.name, "weechess.005-oak-candidate");
    }
}
