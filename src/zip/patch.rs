//! Verified in-place patches for DOS time fields.
//!
//! # Invariants
//! - Expected and replacement spans are the same fixed width (4 bytes)
//!   and never identical.
//! - Application is read-verify-write per patch: the bytes on disk must
//!   equal the expected span before the replacement is written.
//! - An empty patch set never opens the file read-write.
//!
//! # Design Notes
//! - Patches are independent 4-byte overwrites, so an interrupted run
//!   leaves a structurally valid archive; entries may simply be partially
//!   migrated until the next run.
//! - Discovery order (physical entry order) is preserved for
//!   deterministic logs.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::dostime::DosDateTime;
use crate::errors::{hex, MergeError};

/// A single verified 4-byte overwrite of a DOS time field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Patch {
    offset: u64,
    expected: [u8; 4],
    replacement: [u8; 4],
}

impl Patch {
    /// Callers must only construct patches that change bytes; equal spans
    /// mean the entry is already correct and nothing should be queued.
    pub fn new(offset: u64, expected: [u8; 4], replacement: [u8; 4]) -> Self {
        assert_ne!(expected, replacement, "patch replacement equals expected");
        Self {
            offset,
            expected,
            replacement,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn expected(&self) -> [u8; 4] {
        self.expected
    }

    pub fn replacement(&self) -> [u8; 4] {
        self.replacement
    }
}

/// Ordered collection of patches applied under one read-write handle.
#[derive(Debug, Default)]
pub struct PatchSet {
    patches: Vec<Patch>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, patch: Patch) {
        self.patches.push(patch);
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn clear(&mut self) {
        self.patches.clear();
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Applies every patch in discovery order. Each read must see the
    /// expected bytes or the whole operation fails with `UnexpectedData`
    /// before anything else is written.
    pub fn apply(&self, path: &Path) -> Result<(), MergeError> {
        if self.patches.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| MergeError::io(path, e))?;
        for patch in &self.patches {
            tracing::debug!(
                offset = patch.offset,
                "patching {} ({}) to {} ({})",
                hex(&patch.expected),
                DosDateTime(u32::from_le_bytes(patch.expected)),
                hex(&patch.replacement),
                DosDateTime(u32::from_le_bytes(patch.replacement)),
            );
            file.seek(SeekFrom::Start(patch.offset))
                .map_err(|e| MergeError::io(path, e))?;
            let mut actual = [0u8; 4];
            file.read_exact(&mut actual)
                .map_err(|e| MergeError::io(path, e))?;
            if actual != patch.expected {
                return Err(MergeError::UnexpectedData {
                    archive: path.to_path_buf(),
                    offset: patch.offset,
                    expected: patch.expected,
                    actual,
                });
            }
            file.seek(SeekFrom::Start(patch.offset))
                .map_err(|e| MergeError::io(path, e))?;
            file.write_all(&patch.replacement)
                .map_err(|e| MergeError::io(path, e))?;
        }
        Ok(())
    }
}
