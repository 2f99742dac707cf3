//! Build-time post-processor that preserves meaningful per-entry
//! last-modified timestamps inside AAR/JAR/WAR/ZIP archives across
//! successive reproducible builds.
//!
//! A reproducible build stamps every archive entry with one declared
//! instant, which makes downstream consumers (web crawlers, sitemap
//! generators) see the whole archive as freshly modified on every
//! release. This crate compares each build archive against its
//! predecessor entry by entry and surgically rewrites only the two 4-byte
//! DOS time fields per entry (local header and central directory), so a
//! timestamp moves only when the entry's content actually changed. The
//! archive is never rewritten, re-compressed, or reordered.
//!
//! High-level flow (single archive pair):
//! 1) Verify the build archive is reproducible at the declared output
//!    timestamp (or patch it there first).
//! 2) Walk entries in physical order, proving content equality via raw
//!    or decompressed stream comparison.
//! 3) Accumulate verified 4-byte patches and apply them under one
//!    read-write handle.
//!
//! Directory flow: enumerate both directories, pair archives by
//! `(artifactId, classifier, type)` parsed from filenames, enforce the
//! one-to-one mapping, and run the per-file merge for each pair.
//!
//! ZIP64 archives and extended-timestamp (0x5455) extra fields are
//! explicitly refused rather than silently mishandled.

pub mod artifact;
pub mod compare;
pub mod config;
pub mod dirmerge;
pub mod dostime;
pub mod errors;
pub mod merge;
pub mod zip;

pub use artifact::{is_artifact_filename, Identifier, IdentifierError};
pub use config::{MergeConfig, MergeConfigError};
pub use dirmerge::{merge_directory, merge_directory_at, DirectoryOutcome};
pub use dostime::{round_down_to_dos_quantum, DosTimeCodec, DosTimeError, TimeZoneSpec};
pub use errors::MergeError;
pub use merge::{merge_file, merge_file_at, MergeOutcome};
