//! Shared fixture builders for merge tests.
//!
//! Two ways to synthesize archives:
//! - `write_archive` drives the `zip` crate for well-formed fixtures;
//! - the `raw` module assembles archives byte-by-byte for shapes the
//!   writer cannot produce (embedded prefixes, extra fields, duplicate
//!   names, targeted corruption).

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Datelike, Timelike, Utc};
use zip::write::FileOptions;
use zip::CompressionMethod;

/// Parses an RFC 3339 instant to epoch milliseconds.
pub fn utc_millis(s: &str) -> i64 {
    s.parse::<DateTime<Utc>>().unwrap().timestamp_millis()
}

/// Converts an RFC 3339 instant to a `zip` crate timestamp carrying the
/// same calendar fields. Tests pair this with `TimeZoneSpec::Fixed(0)`,
/// under which DOS fields are read as UTC.
pub fn zip_time(s: &str) -> zip::DateTime {
    let dt = s.parse::<DateTime<Utc>>().unwrap();
    zip::DateTime::from_date_and_time(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    )
    .unwrap()
}

/// One entry for `write_archive`.
pub struct EntrySpec<'a> {
    pub name: &'a str,
    /// `None` marks a directory entry.
    pub data: Option<&'a [u8]>,
    /// RFC 3339 instant for the entry's DOS timestamp.
    pub time: &'a str,
    pub method: CompressionMethod,
}

impl<'a> EntrySpec<'a> {
    pub fn file(name: &'a str, data: &'a [u8], time: &'a str) -> Self {
        Self {
            name,
            data: Some(data),
            time,
            method: CompressionMethod::Deflated,
        }
    }

    pub fn stored(name: &'a str, data: &'a [u8], time: &'a str) -> Self {
        Self {
            name,
            data: Some(data),
            time,
            method: CompressionMethod::Stored,
        }
    }

    pub fn dir(name: &'a str, time: &'a str) -> Self {
        Self {
            name,
            data: None,
            time,
            method: CompressionMethod::Stored,
        }
    }
}

/// Writes a well-formed archive with per-entry timestamps.
pub fn write_archive(path: &Path, entries: &[EntrySpec<'_>]) {
    let file = File::create(path).unwrap();
    let mut zw = zip::ZipWriter::new(file);
    for spec in entries {
        let options = FileOptions::default()
            .compression_method(spec.method)
            .last_modified_time(zip_time(spec.time));
        match spec.data {
            Some(data) => {
                zw.start_file(spec.name, options).unwrap();
                zw.write_all(data).unwrap();
            }
            None => {
                zw.add_directory(spec.name, options).unwrap();
            }
        }
    }
    zw.finish().unwrap();
}

/// Byte-level ZIP assembly for pathological fixtures.
pub mod raw {
    use std::path::Path;

    use zipstamp::DosTimeCodec;

    pub const METHOD_STORED: u16 = 0;

    pub fn crc32(data: &[u8]) -> u32 {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        crc.sum()
    }

    /// Packs UTC calendar fields of an instant into a DOS value.
    pub fn dos(time: &str) -> u32 {
        DosTimeCodec::utc().pack(super::utc_millis(time)).unwrap()
    }

    fn push_u16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    /// Local file header followed by the stored payload.
    pub fn local_entry(name: &[u8], dos_time: u32, data: &[u8], extra: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        push_u32(&mut out, 0x0403_4b50);
        push_u16(&mut out, 20); // version needed
        push_u16(&mut out, 0); // flags
        push_u16(&mut out, METHOD_STORED);
        push_u32(&mut out, dos_time);
        push_u32(&mut out, crc32(data));
        push_u32(&mut out, data.len() as u32);
        push_u32(&mut out, data.len() as u32);
        push_u16(&mut out, name.len() as u16);
        push_u16(&mut out, extra.len() as u16);
        out.extend_from_slice(name);
        out.extend_from_slice(extra);
        out.extend_from_slice(data);
        out
    }

    /// Central directory file header.
    pub fn central_entry(
        name: &[u8],
        dos_time: u32,
        data: &[u8],
        extra: &[u8],
        relative_offset: u32,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        push_u32(&mut out, 0x0201_4b50);
        push_u16(&mut out, 20); // version made by
        push_u16(&mut out, 20); // version needed
        push_u16(&mut out, 0); // flags
        push_u16(&mut out, METHOD_STORED);
        push_u32(&mut out, dos_time);
        push_u32(&mut out, crc32(data));
        push_u32(&mut out, data.len() as u32);
        push_u32(&mut out, data.len() as u32);
        push_u16(&mut out, name.len() as u16);
        push_u16(&mut out, extra.len() as u16);
        push_u16(&mut out, 0); // comment length
        push_u16(&mut out, 0); // disk number
        push_u16(&mut out, 0); // internal attributes
        push_u32(&mut out, 0); // external attributes
        push_u32(&mut out, relative_offset);
        out.extend_from_slice(name);
        out.extend_from_slice(extra);
        out
    }

    /// End-of-central-directory record.
    pub fn end_of_central_directory(
        entries: u16,
        cd_size: u32,
        cd_offset: u32,
        comment: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        push_u32(&mut out, 0x0605_4b50);
        push_u16(&mut out, 0); // disk number
        push_u16(&mut out, 0); // disk with central directory
        push_u16(&mut out, entries);
        push_u16(&mut out, entries);
        push_u32(&mut out, cd_size);
        push_u32(&mut out, cd_offset);
        push_u16(&mut out, comment.len() as u16);
        out.extend_from_slice(comment);
        out
    }

    /// One stored entry for the builder.
    pub struct RawEntry<'a> {
        pub name: &'a [u8],
        pub data: &'a [u8],
        pub dos_time: u32,
        pub local_extra: &'a [u8],
        pub central_extra: &'a [u8],
    }

    impl<'a> RawEntry<'a> {
        pub fn new(name: &'a [u8], data: &'a [u8], time: &'a str) -> Self {
            Self {
                name,
                data,
                dos_time: dos(time),
                local_extra: &[],
                central_extra: &[],
            }
        }

        pub fn with_central_extra(mut self, extra: &'a [u8]) -> Self {
            self.central_extra = extra;
            self
        }

        pub fn with_dos_time(mut self, dos_time: u32) -> Self {
            self.dos_time = dos_time;
            self
        }
    }

    /// Assembles a stored-only archive, optionally embedded after a
    /// prefix (stored offsets stay relative to the archive start).
    pub fn build(prefix: &[u8], entries: &[RawEntry<'_>], comment: &[u8]) -> Vec<u8> {
        let mut out = prefix.to_vec();
        let mut offsets = Vec::with_capacity(entries.len());
        for e in entries {
            offsets.push((out.len() - prefix.len()) as u32);
            out.extend_from_slice(&local_entry(e.name, e.dos_time, e.data, e.local_extra));
        }
        let cd_start = out.len();
        for (e, off) in entries.iter().zip(&offsets) {
            out.extend_from_slice(&central_entry(
                e.name,
                e.dos_time,
                e.data,
                e.central_extra,
                *off,
            ));
        }
        let cd_size = (out.len() - cd_start) as u32;
        let cd_offset = (cd_start - prefix.len()) as u32;
        out.extend_from_slice(&end_of_central_directory(
            entries.len() as u16,
            cd_size,
            cd_offset,
            comment,
        ));
        out
    }

    pub fn write(path: &Path, bytes: &[u8]) {
        std::fs::write(path, bytes).unwrap();
    }
}
