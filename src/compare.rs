//! Entry-pair comparison: decides whether content changed between builds.
//!
//! # Invariants
//! - Streams are compared in fixed-size chunks; no entry is ever loaded
//!   whole.
//! - Duplicate immediate children within one directory view are a format
//!   error.
//!
//! # Design Notes
//! - A directory entry is "modified" only when an immediate child is
//!   added or removed; changes inside children are attributed to the
//!   children themselves. Child directories carry their own entries and
//!   are not counted as children here.
//! - Deflate output is not canonical: two encoders can emit different
//!   bytes for identical content. Raw-stream equality therefore proves
//!   "unchanged", but raw inequality only settles the question for
//!   stored entries; everything else falls through to a decompressed
//!   comparison.
//! - `META-INF/` gets one carve-out: a `sitemap-index.xml` present only
//!   in the last build is ignored, because the sitemap generator re-adds
//!   it downstream of this merge. The carve-out is removal-only on
//!   purpose; a newly *added* sitemap still marks the directory updated.

use std::collections::BTreeSet;
use std::io::{self, Read};

use crate::errors::MergeError;
use crate::zip::{ZipArchive, ZipEntry};

/// Chunk size for payload comparison.
const COMPARE_BUF_LEN: usize = 4096;

/// ZIP method code for stored (uncompressed) entries.
const METHOD_STORED: u16 = 0;

/// Directory receiving the sitemap carve-out.
const SITEMAP_DIR: &str = "META-INF/";
/// Child entry added by the downstream sitemap generator.
const SITEMAP_CHILD: &str = "sitemap-index.xml";

/// Returns true when the build entry's content differs from the
/// last-build entry's. Both entries carry the same name.
pub fn entry_updated(
    build: &ZipArchive,
    build_entry: &ZipEntry,
    last: &ZipArchive,
    last_entry: &ZipEntry,
) -> Result<bool, MergeError> {
    if build_entry.uncompressed_size() != last_entry.uncompressed_size() {
        return Ok(true);
    }

    if build_entry.is_dir() {
        debug_assert_eq!(build_entry.uncompressed_size(), 0);
        return directory_updated(build, build_entry, last, last_entry);
    }

    if build_entry.method() == last_entry.method() {
        let raw_equal = streams_match(
            build.raw_reader(build_entry)?,
            last.raw_reader(last_entry)?,
        )
        .map_err(|e| MergeError::io(build.path(), e))?;
        if raw_equal {
            return Ok(false);
        }
        // Raw comparison is authoritative for stored entries.
        if build_entry.method() == METHOD_STORED {
            return Ok(true);
        }
    }

    let equal = streams_match(
        build.content_reader(build_entry)?,
        last.content_reader(last_entry)?,
    )
    .map_err(|e| MergeError::io(build.path(), e))?;
    Ok(!equal)
}

fn directory_updated(
    build: &ZipArchive,
    build_entry: &ZipEntry,
    last: &ZipArchive,
    last_entry: &ZipEntry,
) -> Result<bool, MergeError> {
    let build_children = direct_children(build, build_entry)?;
    let mut last_children = direct_children(last, last_entry)?;

    if build_entry.name().eq_ignore_ascii_case(SITEMAP_DIR) {
        let only_sitemap_missing = {
            let mut missing = last_children.difference(&build_children);
            missing.next().map(String::as_str) == Some(SITEMAP_CHILD) && missing.next().is_none()
        };
        if only_sitemap_missing {
            last_children.remove(SITEMAP_CHILD);
        }
    }

    let updated = build_children != last_children;
    if updated {
        tracing::info!(
            directory = build_entry.name(),
            added = ?build_children.difference(&last_children).collect::<Vec<_>>(),
            removed = ?last_children.difference(&build_children).collect::<Vec<_>>(),
            "directory is modified"
        );
    }
    Ok(updated)
}

/// Immediate child names of a directory entry: name fragments extending
/// `dir/` with no further `/`; empty fragments ignored.
fn direct_children(
    zip: &ZipArchive,
    directory: &ZipEntry,
) -> Result<BTreeSet<String>, MergeError> {
    let dir_name = directory.name();
    debug_assert!(dir_name.ends_with('/'), "not a directory: {dir_name}");
    let mut children = BTreeSet::new();
    for entry in zip.entries() {
        if let Some(fragment) = entry.name().strip_prefix(dir_name) {
            if !fragment.is_empty() && !fragment.contains('/') && !children.insert(fragment.to_string())
            {
                return Err(MergeError::zip_format(
                    zip.path(),
                    format!("duplicate child name of {dir_name}: {fragment}"),
                ));
            }
        }
    }
    tracing::debug!(directory = dir_name, children = ?children, "direct children");
    Ok(children)
}

/// Byte-for-byte stream equality over fixed buffers.
pub fn streams_match(mut a: impl Read, mut b: impl Read) -> io::Result<bool> {
    let mut buf_a = [0u8; COMPARE_BUF_LEN];
    let mut buf_b = [0u8; COMPARE_BUF_LEN];
    loop {
        let n = match a.read(&mut buf_a) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if n == 0 {
            // `a` is exhausted; `b` must be too.
            return Ok(read_some(&mut b, &mut buf_b)? == 0);
        }
        let mut filled = 0;
        while filled < n {
            let m = match b.read(&mut buf_b[filled..n]) {
                Ok(m) => m,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if m == 0 {
                return Ok(false);
            }
            filled += m;
        }
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

fn read_some(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match r.read(buf) {
            Ok(n) => return Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
