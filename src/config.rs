//! Merge policy configuration.
//!
//! # Invariants
//! - The output timestamp is required and must be representable as a DOS
//!   time under the configured offset convention.
//!
//! # Design Notes
//! - Defaults match the strict posture: builds are expected to already be
//!   reproducible, and directory merges require a complete last build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dostime::{DosTimeCodec, TimeZoneSpec};

/// Configuration shared by `merge_file` and `merge_directory`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Reference instant every "reproducible" entry must carry, and the
    /// timestamp stamped onto genuinely new content.
    pub output_timestamp: DateTime<Utc>,

    /// When true the build archive is verified to already sit at the
    /// output timestamp; when false it is patched there first.
    pub build_reproducible: bool,

    /// When true, directory merges require a one-to-one identifier
    /// mapping between the last-build and build directories.
    pub require_last_build: bool,

    /// Offset convention for reading and writing DOS time fields.
    pub time_zone: TimeZoneSpec,
}

impl MergeConfig {
    pub fn new(output_timestamp: DateTime<Utc>) -> Self {
        Self {
            output_timestamp,
            build_reproducible: true,
            require_last_build: true,
            time_zone: TimeZoneSpec::default(),
        }
    }

    /// Validate cross-field invariants. Cheap; intended to be called once
    /// at startup for externally loaded configurations.
    pub fn validate(&self) -> Result<(), MergeConfigError> {
        let codec = DosTimeCodec::new(self.time_zone);
        let millis = self.output_timestamp.timestamp_millis();
        if codec.pack(millis).is_err() {
            return Err(MergeConfigError::OutputTimestampOutOfRange { millis });
        }
        Ok(())
    }
}

/// Validation error returned by `MergeConfig::validate`.
///
/// Callers should treat this as a configuration bug, not hostile input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeConfigError {
    OutputTimestampOutOfRange { millis: i64 },
}

impl fmt::Display for MergeConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeConfigError::OutputTimestampOutOfRange { millis } => {
                write!(f, "outputTimestamp has no DOS representation: {millis} ms")
            }
        }
    }
}

impl std::error::Error for MergeConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_strict() {
        let cfg = MergeConfig::new("2023-09-07T01:38:34Z".parse().unwrap());
        assert!(cfg.build_reproducible);
        assert!(cfg.require_last_build);
        assert_eq!(cfg.time_zone, TimeZoneSpec::Local);
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_pre_dos_timestamps() {
        let mut cfg = MergeConfig::new("1970-01-01T00:00:00Z".parse().unwrap());
        cfg.time_zone = TimeZoneSpec::Fixed(0);
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err,
            MergeConfigError::OutputTimestampOutOfRange { .. }
        ));
    }
}
