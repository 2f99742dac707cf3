//! Per-archive timestamp merge driver.
//!
//! # Algorithm
//! Two passes over the build archive:
//! 1. Reproducibility: every entry must sit at the declared output
//!    timestamp (verified when `build_reproducible`, patched there
//!    otherwise). Extended-timestamp extra fields are refused in either
//!    mode.
//! 2. Merge: each build entry is compared against its last-build
//!    namesake; unchanged entries take the last-build timestamp, changed
//!    entries keep the newer of build time and current time. Time changes
//!    become paired 4-byte patches (local header + central header),
//!    applied once at the end.
//!
//! # Invariants
//! - Patches are discovered and applied in physical entry order.
//! - The archive is opened read-write at most once per pass and only when
//!   patches exist; every read handle is released before that happens.
//! - All comparisons of instants happen at the DOS 2-second quantum. Two
//!   instants in the same quantum pack identically and are treated as
//!   already correct, producing no patch.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::compare::entry_updated;
use crate::config::MergeConfig;
use crate::dostime::{round_down_to_dos_quantum, DosTimeCodec};
use crate::errors::MergeError;
use crate::zip::{
    index_central_directory, CentralDirectoryIndex, Patch, PatchSet, ZipArchive, ZipEntry,
    CENTRAL_HEADER_TIME_OFFSET, EXTENDED_TIMESTAMP_ID, LOCAL_HEADER_TIME_OFFSET,
};

/// Summary of a single archive merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Entries enumerated in the build archive.
    pub entries: usize,
    /// Entries moved onto the output timestamp by the reproducibility
    /// pass (always zero when `build_reproducible`).
    pub normalized: usize,
    /// Entries whose timestamps were rewritten during the merge pass.
    pub patched: usize,
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Merges per-entry timestamps from `last_build` into `build`, patching
/// `build` in place. See the module docs for the two-pass algorithm.
pub fn merge_file(
    config: &MergeConfig,
    last_build: &Path,
    build: &Path,
) -> Result<MergeOutcome, MergeError> {
    merge_file_at(config, now_millis(), last_build, build)
}

/// `merge_file` with an injected wall-clock snapshot. The directory
/// merger shares one snapshot across all archives of a run so that every
/// time decision is consistent.
pub fn merge_file_at(
    config: &MergeConfig,
    current_time_ms: i64,
    last_build: &Path,
    build: &Path,
) -> Result<MergeOutcome, MergeError> {
    info!(
        "merging timestamps from {} into {}",
        last_build.display(),
        build.display()
    );
    let codec = DosTimeCodec::new(config.time_zone);
    let output_millis = config.output_timestamp.timestamp_millis();
    // Fail early if the output timestamp has no DOS representation.
    codec.pack(output_millis)?;
    let output_rounded = round_down_to_dos_quantum(output_millis);
    let now_rounded = round_down_to_dos_quantum(current_time_ms);

    let (entry_count, normalized) =
        ensure_reproducible(config, &codec, output_millis, output_rounded, build)?;

    let patches = collect_merge_patches(&codec, now_rounded, last_build, build)?;
    let patched = patches.len() / 2;
    if !patches.is_empty() {
        log_patch_count(build, patched, entry_count);
        patches.apply(build)?;
    }
    Ok(MergeOutcome {
        entries: entry_count,
        normalized,
        patched,
    })
}

/// Pass A: verify or establish the reproducible timestamp, and refuse
/// extended-timestamp extra fields. Returns the entry count and the
/// number of entries patched onto the output timestamp.
fn ensure_reproducible(
    config: &MergeConfig,
    codec: &DosTimeCodec,
    output_millis: i64,
    output_rounded: i64,
    build: &Path,
) -> Result<(usize, usize), MergeError> {
    if config.build_reproducible {
        debug!("validate reproducible: {}", build.display());
    } else {
        debug!("patch non-reproducible: {}", build.display());
    }

    let archive = ZipArchive::open(build)?;
    let entry_count = archive.entries().len();
    // The patch pass needs central-header positions; build the index
    // before accumulating patches.
    let central_index = if config.build_reproducible {
        None
    } else {
        Some(index_central_directory(build)?)
    };

    let mut patches = PatchSet::new();
    for entry in archive.entries() {
        let time = entry_time(codec, build, entry)?;
        if time != output_rounded {
            if config.build_reproducible {
                return Err(MergeError::NotReproducible {
                    archive: build.to_path_buf(),
                    entry: entry.name().to_string(),
                    expected_millis: output_rounded,
                    actual_millis: time,
                });
            }
            let index = central_index.as_ref().expect("index built in patch mode");
            push_time_patches(&mut patches, codec, index, build, entry, time, output_millis)?;
        }
        for field in entry.extra_fields() {
            if field.header_id == EXTENDED_TIMESTAMP_ID {
                return Err(MergeError::ExtendedTimestampUnsupported {
                    archive: build.to_path_buf(),
                    entry: entry.name().to_string(),
                });
            }
        }
    }

    // Release the read handle before the file is reopened read-write.
    drop(archive);
    let normalized = patches.len() / 2;
    if !patches.is_empty() {
        log_patch_count(build, normalized, entry_count);
        patches.apply(build)?;
    }
    Ok((entry_count, normalized))
}

/// Pass B: walk build entries in physical order and accumulate the
/// timestamp patches the merge decision calls for.
fn collect_merge_patches(
    codec: &DosTimeCodec,
    now_rounded: i64,
    last_build: &Path,
    build: &Path,
) -> Result<PatchSet, MergeError> {
    debug!("reading build archive: {}", build.display());
    let build_zip = ZipArchive::open(build)?;
    debug!("reading last-build archive: {}", last_build.display());
    let last_zip = ZipArchive::open(last_build)?;
    let central_index = index_central_directory(build)?;

    let mut last_by_name: HashMap<&str, Vec<&ZipEntry>> = HashMap::new();
    for entry in last_zip.entries() {
        last_by_name.entry(entry.name()).or_default().push(entry);
    }

    let mut patches = PatchSet::new();
    for build_entry in build_zip.entries() {
        let name = build_entry.name();
        let last_entry = match last_by_name.get(name) {
            None => {
                info!("new entry not found in last build: {name}");
                continue;
            }
            Some(matches) if matches.len() > 1 => {
                return Err(MergeError::DuplicateName {
                    archive: last_build.to_path_buf(),
                    entry: name.to_string(),
                });
            }
            Some(matches) => matches[0],
        };
        // Same name implies the same trailing-slash shape.
        debug_assert_eq!(build_entry.is_dir(), last_entry.is_dir());

        let build_time = entry_time(codec, build, build_entry)?;
        if build_time > now_rounded {
            warn!("build entry {name} time is in the future: {build_time} ms");
        }
        let last_time = entry_time(codec, last_build, last_entry)?;
        if last_time > now_rounded {
            warn!("last-build entry {name} time is in the future: {last_time} ms");
        }

        let updated = entry_updated(&build_zip, build_entry, &last_zip, last_entry)?;
        debug!(entry = name, updated, "content comparison");

        let expected_time = if updated {
            if last_time < build_time {
                // Last build predates this content; the build time stands.
                build_time
            } else {
                // Never move a changed entry backwards in time.
                now_rounded
            }
        } else {
            // Unchanged: keep the prior timestamp, even a future one.
            last_time
        };

        if build_time != expected_time {
            push_time_patches(
                &mut patches,
                codec,
                &central_index,
                build,
                build_entry,
                build_time,
                expected_time,
            )?;
        } else {
            debug!("entry already at expected timestamp: {name}");
        }
    }
    Ok(patches)
}

/// Queues the paired local-header and central-header patches moving an
/// entry from `from_millis` to `to_millis`.
fn push_time_patches(
    patches: &mut PatchSet,
    codec: &DosTimeCodec,
    central_index: &CentralDirectoryIndex,
    archive: &Path,
    entry: &ZipEntry,
    from_millis: i64,
    to_millis: i64,
) -> Result<(), MergeError> {
    let expected = codec.pack(from_millis)?.to_le_bytes();
    let replacement = codec.pack(to_millis)?.to_le_bytes();
    if expected == replacement {
        // Both instants share a DOS quantum; the field is already correct.
        debug!(
            "times {from_millis} and {to_millis} share a DOS quantum, no patch for {}",
            entry.name()
        );
        return Ok(());
    }

    let local_offset = entry.local_header_offset();
    let record = central_index.get(&local_offset).ok_or_else(|| {
        MergeError::zip_format(
            archive,
            format!("no central directory entry found for local header 0x{local_offset:x}"),
        )
    })?;
    if record.raw_name != entry.raw_name() {
        return Err(MergeError::CentralDirectoryMismatch {
            archive: archive.to_path_buf(),
            entry: entry.name().to_string(),
            index_name: record.raw_name.clone(),
            entry_name: entry.raw_name().to_vec(),
        });
    }

    patches.push(Patch::new(
        local_offset + LOCAL_HEADER_TIME_OFFSET,
        expected,
        replacement,
    ));
    patches.push(Patch::new(
        record.header_offset + CENTRAL_HEADER_TIME_OFFSET,
        expected,
        replacement,
    ));
    Ok(())
}

fn entry_time(codec: &DosTimeCodec, archive: &Path, entry: &ZipEntry) -> Result<i64, MergeError> {
    codec
        .unpack(entry.dos_time())
        .ok_or_else(|| MergeError::NoTimestamp {
            archive: archive.to_path_buf(),
            entry: entry.name().to_string(),
        })
}

fn log_patch_count(build: &Path, patched: usize, total: usize) {
    info!(
        "{}: patching {patched} of {total} {}",
        build.display(),
        if total == 1 { "timestamp" } else { "timestamps" }
    );
}
