//! Directory-level merge: pairs archives across two directories and
//! drives the per-file merge for each pair.
//!
//! # Invariants
//! - Identifiers are unique within each directory.
//! - With `require_last_build`, the identifier sets of the two
//!   directories must be equal (a one-to-one mapping, both directions).
//! - One wall-clock snapshot covers the whole run, so every archive's
//!   time decisions agree.
//!
//! # Design Notes
//! - Pairs are processed sequentially; each archive's mutation finishes
//!   before the next begins.
//! - Per-artifact log lines carry the identifier via a span rather than a
//!   hand-built prefix.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info_span, warn};

use crate::artifact::{is_artifact_filename, Identifier};
use crate::config::MergeConfig;
use crate::errors::MergeError;
use crate::merge::{merge_file_at, now_millis, MergeOutcome};

/// Summary of a directory merge run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectoryOutcome {
    /// Archive pairs merged.
    pub merged: usize,
    /// Build archives with no last-build partner (only reachable when
    /// `require_last_build` is false).
    pub skipped: usize,
    /// Timestamps rewritten across all merged archives.
    pub patched: usize,
}

/// Pairs the eligible archives of `last_build_dir` and `build_dir` by
/// artifact identifier and merges timestamps into each build archive.
///
/// `last_build_dir` may be `None` or nonexistent only when
/// `config.require_last_build` is false; `build_dir` must exist.
pub fn merge_directory(
    config: &MergeConfig,
    last_build_dir: Option<&Path>,
    build_dir: &Path,
) -> Result<DirectoryOutcome, MergeError> {
    merge_directory_at(config, now_millis(), last_build_dir, build_dir)
}

/// `merge_directory` with an injected wall-clock snapshot.
pub fn merge_directory_at(
    config: &MergeConfig,
    current_time_ms: i64,
    last_build_dir: Option<&Path>,
    build_dir: &Path,
) -> Result<DirectoryOutcome, MergeError> {
    let last_artifacts = find_artifacts(
        "lastBuildDirectory",
        last_build_dir,
        config.require_last_build,
    )?;
    let build_artifacts = find_artifacts("buildDirectory", Some(build_dir), true)?;

    if config.require_last_build {
        enforce_one_to_one(&last_artifacts, &build_artifacts)?;
    }

    let mut outcome = DirectoryOutcome::default();
    for (identifier, build_artifact) in &build_artifacts {
        let span = info_span!("artifact", identifier = %identifier);
        let _guard = span.enter();
        debug!("build artifact: {}", build_artifact.display());
        match last_artifacts.get(identifier) {
            Some(last_artifact) => {
                debug!("last-build artifact: {}", last_artifact.display());
                let MergeOutcome { patched, .. } =
                    merge_file_at(config, current_time_ms, last_artifact, build_artifact)?;
                outcome.merged += 1;
                outcome.patched += patched;
            }
            None => {
                debug_assert!(
                    !config.require_last_build,
                    "one-to-one mapping already enforced"
                );
                warn!(
                    "not found in last-build directory{}",
                    match last_build_dir {
                        Some(dir) => format!(": {}", dir.display()),
                        None => String::new(),
                    }
                );
                outcome.skipped += 1;
            }
        }
    }
    Ok(outcome)
}

/// Enumerates a directory's eligible archives keyed by identifier.
fn find_artifacts(
    param: &'static str,
    directory: Option<&Path>,
    required: bool,
) -> Result<BTreeMap<Identifier, PathBuf>, MergeError> {
    let mut artifacts = BTreeMap::new();
    let Some(directory) = directory else {
        if required {
            return Err(MergeError::MissingDirectory { param });
        }
        return Ok(artifacts);
    };

    if !directory.exists() {
        if required {
            return Err(MergeError::NotADirectory {
                param,
                path: directory.to_path_buf(),
            });
        }
        return Ok(artifacts);
    }
    if !directory.is_dir() {
        return Err(MergeError::NotADirectory {
            param,
            path: directory.to_path_buf(),
        });
    }

    for dir_entry in fs::read_dir(directory).map_err(|e| MergeError::io(directory, e))? {
        let dir_entry = dir_entry.map_err(|e| MergeError::io(directory, e))?;
        let file_name = dir_entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!("skipping non-UTF-8 filename in {}", directory.display());
            continue;
        };
        if !is_artifact_filename(name) {
            continue;
        }
        let identifier = Identifier::parse(name)?;
        let path = dir_entry.path();
        if let Some(existing) = artifacts.insert(identifier.clone(), path) {
            return Err(MergeError::DuplicateIdentifier {
                directory: directory.to_path_buf(),
                identifier: identifier.to_string(),
                existing: existing
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                duplicate: name.to_string(),
            });
        }
    }
    Ok(artifacts)
}

/// Requires the identifier sets to be equal, reporting every identifier
/// missing in either direction.
fn enforce_one_to_one(
    last_artifacts: &BTreeMap<Identifier, PathBuf>,
    build_artifacts: &BTreeMap<Identifier, PathBuf>,
) -> Result<(), MergeError> {
    let missing_in_last_build: Vec<String> = build_artifacts
        .keys()
        .filter(|id| !last_artifacts.contains_key(id))
        .map(|id| id.to_string())
        .collect();
    let missing_in_build: Vec<String> = last_artifacts
        .keys()
        .filter(|id| !build_artifacts.contains_key(id))
        .map(|id| id.to_string())
        .collect();
    if missing_in_last_build.is_empty() && missing_in_build.is_empty() {
        Ok(())
    } else {
        Err(MergeError::NotOneToOne {
            missing_in_last_build,
            missing_in_build,
        })
    }
}
