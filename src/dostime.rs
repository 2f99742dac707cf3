//! DOS date/time codec for ZIP timestamp fields.
//!
//! # Invariants
//! - The on-disk field is a little-endian u32: time word in the low half,
//!   date word in the high half.
//! - Resolution is 2 seconds; all reproducibility comparisons happen at
//!   that quantum, rounded down.
//! - `unpack(pack(t)) == round_down_to_dos_quantum(t)` for every
//!   representable `t`.
//!
//! # Design Notes
//! - Historical ZIP writers store the writing machine's wall-clock time.
//!   The codec subtracts the configured offset when packing and adds it
//!   back when unpacking, with the offset evaluated at the instant being
//!   converted. A fixed offset makes the conversion host-independent.
//! - Rounding is always downward (`div_euclid`); there is no round-up
//!   variant.

use std::fmt;

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// DOS timestamps are quantized to 2-second intervals.
pub const DOS_QUANTUM_MS: i64 = 2000;

/// First calendar year representable in a DOS date.
pub const DOS_EPOCH_YEAR: i32 = 1980;
/// Last calendar year representable in a DOS date (7-bit year field).
pub const DOS_MAX_YEAR: i32 = 2107;

/// Rounds a millisecond instant down to the DOS 2-second quantum.
#[inline]
pub fn round_down_to_dos_quantum(millis: i64) -> i64 {
    millis.div_euclid(DOS_QUANTUM_MS) * DOS_QUANTUM_MS
}

/// Offset convention applied when converting between UTC instants and
/// DOS wall-clock fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeZoneSpec {
    /// The process's local offset, evaluated per instant (DST-aware).
    #[default]
    Local,
    /// A fixed offset in seconds east of UTC. `Fixed(0)` reads and writes
    /// DOS fields as UTC calendar fields.
    Fixed(i32),
}

/// Packing failed because the shifted instant has no DOS representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DosTimeError {
    /// The UTC millisecond instant that could not be packed.
    pub millis: i64,
}

impl fmt::Display for DosTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "instant not representable as DOS time: {} ms (valid years {DOS_EPOCH_YEAR}..={DOS_MAX_YEAR})",
            self.millis
        )
    }
}

impl std::error::Error for DosTimeError {}

/// Converts between UTC millisecond instants and packed DOS date/time
/// values under a configured offset convention.
#[derive(Clone, Copy, Debug)]
pub struct DosTimeCodec {
    tz: TimeZoneSpec,
}

impl DosTimeCodec {
    pub fn new(tz: TimeZoneSpec) -> Self {
        Self { tz }
    }

    /// Codec using the process-local offset.
    pub fn local() -> Self {
        Self::new(TimeZoneSpec::Local)
    }

    /// Codec that treats DOS fields as UTC calendar fields.
    pub fn utc() -> Self {
        Self::new(TimeZoneSpec::Fixed(0))
    }

    /// Offset in milliseconds east of UTC at the given instant.
    fn offset_millis_at(&self, utc_millis: i64) -> i64 {
        match self.tz {
            TimeZoneSpec::Fixed(seconds) => i64::from(seconds) * 1000,
            TimeZoneSpec::Local => match DateTime::from_timestamp_millis(utc_millis) {
                Some(dt) => {
                    let offset = Local.offset_from_utc_datetime(&dt.naive_utc());
                    i64::from(offset.local_minus_utc()) * 1000
                }
                // Instants outside chrono's range fail packing later anyway.
                None => 0,
            },
        }
    }

    /// Packs a UTC millisecond instant into a DOS date/time value.
    ///
    /// The configured offset is subtracted first, then the shifted
    /// instant's calendar fields are packed. Seconds are truncated to the
    /// 2-second quantum by the field encoding itself.
    pub fn pack(&self, utc_millis: i64) -> Result<u32, DosTimeError> {
        let shifted = utc_millis - self.offset_millis_at(utc_millis);
        let dt = DateTime::from_timestamp_millis(shifted)
            .ok_or(DosTimeError { millis: utc_millis })?;
        let year = dt.year();
        if !(DOS_EPOCH_YEAR..=DOS_MAX_YEAR).contains(&year) {
            return Err(DosTimeError { millis: utc_millis });
        }
        let date = (((year - DOS_EPOCH_YEAR) as u32) << 9) | (dt.month() << 5) | dt.day();
        let time = (dt.hour() << 11) | (dt.minute() << 5) | (dt.second() / 2);
        Ok((date << 16) | time)
    }

    /// Unpacks a DOS date/time value to a UTC millisecond instant.
    ///
    /// Returns `None` when the fields do not form a valid date or time;
    /// callers treat that as the "no timestamp" sentinel.
    pub fn unpack(&self, dos: u32) -> Option<i64> {
        let fields = DosFields::split(dos);
        let naive = NaiveDate::from_ymd_opt(fields.year, fields.month, fields.day)?
            .and_hms_opt(fields.hour, fields.minute, fields.second)?;
        let millis = naive.and_utc().timestamp_millis();
        Some(millis + self.offset_millis_at(millis))
    }
}

/// Raw DOS field decomposition, unvalidated.
struct DosFields {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl DosFields {
    fn split(dos: u32) -> Self {
        let date = dos >> 16;
        let time = dos & 0xFFFF;
        Self {
            year: DOS_EPOCH_YEAR + ((date >> 9) & 0x7F) as i32,
            month: (date >> 5) & 0x0F,
            day: date & 0x1F,
            hour: (time >> 11) & 0x1F,
            minute: (time >> 5) & 0x3F,
            second: (time & 0x1F) * 2,
        }
    }
}

/// Displays a packed DOS value as a calendar date and time, without
/// validating the fields. Used in patch diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DosDateTime(pub u32);

impl fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = DosFields::split(self.0);
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            d.year, d.month, d.day, d.hour, d.minute, d.second
        )
    }
}
