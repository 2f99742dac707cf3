//! Error types for archive timestamp merging.
//!
//! A single merge crosses several stages (filename pairing, structural
//! ZIP parsing, reproducibility verification, patch application); the
//! variants below keep each failure mode attributable to its stage and
//! carry the archive path, entry name, or byte offset needed to diagnose
//! it. The enum is `#[non_exhaustive]` so variants can be added without
//! breaking callers.
//!
//! # Design Notes
//! - `detail` strings are human-readable context, not stable for machine
//!   parsing.
//! - I/O errors preserve their source and the path being touched.
//! - Patch verification failures render both byte patterns as decoded DOS
//!   date/times; a mangled time field is far easier to recognize as a
//!   calendar value than as hex.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::artifact::IdentifierError;
use crate::dostime::{DosDateTime, DosTimeError};

/// Errors surfaced by `merge_file` and `merge_directory`.
#[derive(Debug)]
#[non_exhaustive]
pub enum MergeError {
    /// I/O error touching an archive or directory.
    Io { path: PathBuf, source: io::Error },
    /// A filename could not be decomposed into an artifact identifier.
    Parse(IdentifierError),
    /// Two archives in one directory share an identifier.
    DuplicateIdentifier {
        directory: PathBuf,
        identifier: String,
        existing: String,
        duplicate: String,
    },
    /// The two directories' identifier sets differ while a one-to-one
    /// mapping is required.
    NotOneToOne {
        /// Identifiers present in the build directory but absent from the
        /// last-build directory.
        missing_in_last_build: Vec<String>,
        /// Identifiers present in the last-build directory but absent from
        /// the build directory.
        missing_in_build: Vec<String>,
    },
    /// Malformed ZIP structure: missing end-of-central-directory record,
    /// truncated headers, duplicate central entries, ZIP64 sentinels, or
    /// invalid lengths.
    ZipFormat { archive: PathBuf, detail: String },
    /// An entry's DOS time field does not decode to a valid timestamp.
    NoTimestamp { archive: PathBuf, entry: String },
    /// Reproducibility verification found an entry off the declared
    /// output timestamp. Millisecond values are at the DOS quantum.
    NotReproducible {
        archive: PathBuf,
        entry: String,
        expected_millis: i64,
        actual_millis: i64,
    },
    /// An entry carries an extended-timestamp (0x5455) extra field, which
    /// this engine refuses to patch.
    ExtendedTimestampUnsupported { archive: PathBuf, entry: String },
    /// A name appears more than once in the last-build archive.
    DuplicateName { archive: PathBuf, entry: String },
    /// The central directory's raw filename does not match the entry
    /// being patched.
    CentralDirectoryMismatch {
        archive: PathBuf,
        entry: String,
        index_name: Vec<u8>,
        entry_name: Vec<u8>,
    },
    /// A patch verification read did not see the expected bytes.
    UnexpectedData {
        archive: PathBuf,
        offset: u64,
        expected: [u8; 4],
        actual: [u8; 4],
    },
    /// A decompressed comparison was required for a compression method
    /// the engine cannot decode.
    UnsupportedCompression {
        archive: PathBuf,
        entry: String,
        method: u16,
    },
    /// An instant has no DOS representation (output timestamp or merge
    /// target outside 1980..=2107).
    Time(DosTimeError),
    /// A required directory parameter was not supplied.
    MissingDirectory { param: &'static str },
    /// A directory parameter exists but is not a directory, or a required
    /// one does not exist.
    NotADirectory { param: &'static str, path: PathBuf },
}

impl MergeError {
    /// Attaches a path to a raw I/O error.
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a structural-format error for an archive.
    #[inline]
    pub fn zip_format(archive: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::ZipFormat {
            archive: archive.into(),
            detail: detail.into(),
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "I/O error on {}: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "{err}"),
            Self::DuplicateIdentifier {
                directory,
                identifier,
                existing,
                duplicate,
            } => write!(
                f,
                "duplicate {identifier} in {}: {existing} and {duplicate}",
                directory.display()
            ),
            Self::NotOneToOne {
                missing_in_last_build,
                missing_in_build,
            } => {
                write!(f, "not a one-to-one mapping while requireLastBuild = true:")?;
                if !missing_in_last_build.is_empty() {
                    write!(
                        f,
                        " missing in last build: [{}]",
                        missing_in_last_build.join(", ")
                    )?;
                }
                if !missing_in_build.is_empty() {
                    write!(f, " missing in build: [{}]", missing_in_build.join(", "))?;
                }
                Ok(())
            }
            Self::ZipFormat { archive, detail } => {
                write!(f, "malformed ZIP {}: {detail}", archive.display())
            }
            Self::NoTimestamp { archive, entry } => write!(
                f,
                "entry has no timestamp, cannot patch: {entry} in {}",
                archive.display()
            ),
            Self::NotReproducible {
                archive,
                entry,
                expected_millis,
                actual_millis,
            } => write!(
                f,
                "mismatched entry time: expected {expected_millis} ms, got {actual_millis} ms \
                 on ZIP entry {} @ {entry}",
                archive.display()
            ),
            Self::ExtendedTimestampUnsupported { archive, entry } => write!(
                f,
                "extended-timestamp extra field patching not implemented: {} @ {entry}",
                archive.display()
            ),
            Self::DuplicateName { archive, entry } => write!(
                f,
                "more than one entry named {entry} found in {}",
                archive.display()
            ),
            Self::CentralDirectoryMismatch {
                archive,
                entry,
                index_name,
                entry_name,
            } => write!(
                f,
                "raw filename mismatch for {entry} in {}: central directory has {} but entry has {}",
                archive.display(),
                hex(index_name),
                hex(entry_name)
            ),
            Self::UnexpectedData {
                archive,
                offset,
                expected,
                actual,
            } => write!(
                f,
                "unexpected data in patch position: {} offset = {offset}, \
                 expected = {} ({}), actual = {} ({})",
                archive.display(),
                hex(expected),
                DosDateTime(u32::from_le_bytes(*expected)),
                hex(actual),
                DosDateTime(u32::from_le_bytes(*actual))
            ),
            Self::UnsupportedCompression {
                archive,
                entry,
                method,
            } => write!(
                f,
                "cannot decompress method {method} for comparison: {} @ {entry}",
                archive.display()
            ),
            Self::Time(err) => write!(f, "{err}"),
            Self::MissingDirectory { param } => write!(f, "{param} required"),
            Self::NotADirectory { param, path } => {
                write!(f, "{param} is not a directory: {}", path.display())
            }
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Time(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IdentifierError> for MergeError {
    fn from(err: IdentifierError) -> Self {
        Self::Parse(err)
    }
}

impl From<DosTimeError> for MergeError {
    fn from(err: DosTimeError) -> Self {
        Self::Time(err)
    }
}
