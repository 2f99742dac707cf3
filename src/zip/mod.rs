//! PKZip structural access: header-level reading and in-place patching.
//!
//! # Scope
//! This module owns exact knowledge of the ZIP on-disk format: locating
//! the end-of-central-directory record, walking central-directory file
//! headers, visiting local headers, and overwriting the two 4-byte DOS
//! time fields each entry carries. Nothing here rewrites, re-compresses,
//! or reorders an archive.
//!
//! # Not Supported
//! - ZIP64 (sentinel fields are a hard error).
//! - Multi-disk archives.
//! - Compression methods other than stored and deflate when a
//!   decompressed payload read is required.

pub mod patch;
pub mod reader;

pub use patch::{Patch, PatchSet};
pub use reader::{
    index_central_directory, CentralDirectoryIndex, CentralDirectoryRecord, EntryReader,
    ExtraField, ZipArchive, ZipEntry, CENTRAL_HEADER_TIME_OFFSET, EXTENDED_TIMESTAMP_ID,
    LOCAL_HEADER_TIME_OFFSET,
};
