//! Structural ZIP reader.
//!
//! # Invariants
//! - All sizes and offsets are untrusted and validated against the file
//!   length before use.
//! - Central-directory parsing is sequential; payload reads use cloned
//!   file handles so enumeration state is never disturbed.
//! - Every local-header offset appears in the central directory exactly
//!   once, and each entry's local DOS time field byte-equals the central
//!   copy. Violations are format errors, not warnings.
//!
//! # Design Notes
//! - The first-local-file-header offset (non-zero when the archive is
//!   embedded in a larger file) is computed directly from the
//!   end-of-central-directory record: the central directory physically
//!   ends where that record begins, so its actual start is
//!   `eocd_pos - cd_size` and the bias is that start minus the offset
//!   field claims.
//! - `index_central_directory` is a second, independent pass over the
//!   central directory. Patch construction cross-checks its raw filenames
//!   against the enumeration pass, so a file modified between passes is
//!   caught before any byte is written.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::DeflateDecoder;

use crate::errors::MergeError;

const SIG_LFH: u32 = 0x0403_4b50;
const SIG_CDFH: u32 = 0x0201_4b50;
const SIG_EOCD: u32 = 0x0605_4b50;

/// End-of-central-directory fixed length.
const EOCD_MIN_LEN: usize = 22;
/// EOCD search window: 64 KiB maximum comment plus header margin.
const EOCD_SEARCH_MAX: u64 = 66 * 1024;

/// Central directory file header fixed length, including the signature.
const CDFH_LEN: usize = 46;
/// Local file header fixed length, including the signature.
const LFH_LEN: usize = 30;

/// Byte offset of the DOS time field within a local file header.
pub const LOCAL_HEADER_TIME_OFFSET: u64 = 10;
/// Byte offset of the DOS time field within a central directory file
/// header, counted from the signature.
pub const CENTRAL_HEADER_TIME_OFFSET: u64 = 12;

/// Extra-field header id of the extended-timestamp record, which this
/// engine refuses to patch.
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;

/// Compression method codes the engine can decode.
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

/// One `(header_id, payload)` pair from an entry's extra-field block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraField {
    pub header_id: u16,
    pub data: Vec<u8>,
}

/// A single archive entry, assembled from its central-directory record
/// and a verifying visit to its local header.
#[derive(Clone, Debug)]
pub struct ZipEntry {
    name: String,
    raw_name: Vec<u8>,
    method: u16,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    central_header_offset: u64,
    dos_time: u32,
    data_offset: u64,
    extra_fields: Vec<ExtraField>,
    is_dir: bool,
}

impl ZipEntry {
    /// Entry name with `/` separators; directories end in `/`. Decoded
    /// lossily; `raw_name` preserves the on-disk bytes.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_name(&self) -> &[u8] {
        &self.raw_name
    }

    pub fn method(&self) -> u16 {
        self.method
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Absolute offset of this entry's local file header.
    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    /// Absolute offset of this entry's central-directory signature.
    pub fn central_header_offset(&self) -> u64 {
        self.central_header_offset
    }

    /// Packed DOS date/time as read from the local header (verified to
    /// byte-equal the central copy).
    pub fn dos_time(&self) -> u32 {
        self.dos_time
    }

    pub fn extra_fields(&self) -> &[ExtraField] {
        &self.extra_fields
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }
}

/// Read-only structural view of a ZIP archive with entries in physical
/// (local-header) order. Holds its file handle for the duration of the
/// view; dropping the archive releases it.
#[derive(Debug)]
pub struct ZipArchive {
    path: PathBuf,
    file: File,
    entries: Vec<ZipEntry>,
}

impl ZipArchive {
    /// Parses the archive structure: EOCD, central directory, and every
    /// local header.
    pub fn open(path: &Path) -> Result<Self, MergeError> {
        let mut file = File::open(path).map_err(|e| MergeError::io(path, e))?;
        let (eocd, records) = read_central_records(&mut file, path)?;
        tracing::debug!(
            "central directory parsed: {} entries, cd_start = 0x{:x}, first_lfh_offset = 0x{:x} in {}",
            records.len(),
            eocd.cd_start,
            eocd.first_lfh_offset,
            path.display()
        );

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            entries.push(visit_local_header(&mut file, path, record)?);
        }
        // Physical order: records arrive in central-directory order, which
        // need not match the file layout.
        entries.sort_by_key(|e| e.local_header_offset);

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in physical (local-header) order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Reader over the entry's raw (still compressed) payload bytes.
    pub fn raw_reader(&self, entry: &ZipEntry) -> Result<io::Take<File>, MergeError> {
        let mut file = self
            .file
            .try_clone()
            .map_err(|e| MergeError::io(&self.path, e))?;
        file.seek(SeekFrom::Start(entry.data_offset))
            .map_err(|e| MergeError::io(&self.path, e))?;
        Ok(file.take(entry.compressed_size))
    }

    /// Reader over the entry's decompressed payload bytes.
    pub fn content_reader(&self, entry: &ZipEntry) -> Result<EntryReader, MergeError> {
        let raw = self.raw_reader(entry)?;
        match entry.method {
            METHOD_STORED => Ok(EntryReader::Stored(raw)),
            METHOD_DEFLATE => Ok(EntryReader::Deflate(DeflateDecoder::new(raw))),
            method => Err(MergeError::UnsupportedCompression {
                archive: self.path.clone(),
                entry: entry.name.clone(),
                method,
            }),
        }
    }
}

/// Decompressed payload reader for a single entry.
pub enum EntryReader {
    Stored(io::Take<File>),
    Deflate(DeflateDecoder<io::Take<File>>),
}

impl Read for EntryReader {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stored(r) => r.read(dst),
            Self::Deflate(r) => r.read(dst),
        }
    }
}

/// One central-directory record as seen by the indexing pass.
#[derive(Clone, Debug)]
pub struct CentralDirectoryRecord {
    /// Absolute offset of the record's signature.
    pub header_offset: u64,
    /// Raw filename bytes, exactly as stored.
    pub raw_name: Vec<u8>,
}

/// Central directory keyed by absolute local-header offset, in offset
/// order. Built once per analysis pass and immutable for that pass.
pub type CentralDirectoryIndex = BTreeMap<u64, CentralDirectoryRecord>;

/// Independent central-directory pass recording, per entry, the central
/// header position and raw filename keyed by local-header offset.
pub fn index_central_directory(path: &Path) -> Result<CentralDirectoryIndex, MergeError> {
    let mut file = File::open(path).map_err(|e| MergeError::io(path, e))?;
    let (_, records) = read_central_records(&mut file, path)?;
    let mut index = CentralDirectoryIndex::new();
    for record in records {
        index.insert(
            record.local_header_offset,
            CentralDirectoryRecord {
                header_offset: record.header_offset,
                raw_name: record.raw_name,
            },
        );
    }
    Ok(index)
}

/// Parsed end-of-central-directory record with derived positions.
struct EndOfCentralDirectory {
    /// Actual start of the central directory (`eocd_pos - cd_size`).
    cd_start: u64,
    /// Bias added to every stored local-header offset; non-zero when the
    /// archive is embedded at a positive offset in a larger file.
    first_lfh_offset: u64,
}

/// Raw central-directory record prior to the local-header visit.
struct RawRecord {
    header_offset: u64,
    local_header_offset: u64,
    dos_time: u32,
    method: u16,
    compressed_size: u64,
    uncompressed_size: u64,
    raw_name: Vec<u8>,
    extra: Vec<u8>,
}

/// Locates the EOCD and walks every central-directory record.
///
/// Records are returned in central-directory order. Duplicate
/// local-header offsets and any signature other than a central header or
/// the end record are format errors.
fn read_central_records(
    file: &mut File,
    path: &Path,
) -> Result<(EndOfCentralDirectory, Vec<RawRecord>), MergeError> {
    let eocd = locate_eocd(file, path)?;

    file.seek(SeekFrom::Start(eocd.cd_start))
        .map_err(|e| MergeError::io(path, e))?;

    let mut records = Vec::new();
    let mut seen_offsets = BTreeMap::new();
    let mut pos = eocd.cd_start;
    loop {
        let mut sig = [0u8; 4];
        read_exact_or_format(file, &mut sig, path, "central directory signature")?;
        match u32::from_le_bytes(sig) {
            SIG_EOCD => break,
            SIG_CDFH => {}
            other => {
                return Err(MergeError::zip_format(
                    path,
                    format!("unexpected signature 0x{other:08x} at offset 0x{pos:x}"),
                ));
            }
        }

        let header_offset = pos;
        let mut hdr = [0u8; CDFH_LEN - 4];
        read_exact_or_format(file, &mut hdr, path, "central directory file header")?;

        let method = le_u16(&hdr[6..8]);
        let dos_time = le_u32(&hdr[8..12]);
        let compressed_size = le_u32(&hdr[16..20]);
        let uncompressed_size = le_u32(&hdr[20..24]);
        let name_len = le_u16(&hdr[24..26]) as usize;
        let extra_len = le_u16(&hdr[26..28]) as usize;
        let comment_len = le_u16(&hdr[28..30]) as usize;
        let relative_offset = le_u32(&hdr[38..42]);

        if compressed_size == u32::MAX || uncompressed_size == u32::MAX || relative_offset == u32::MAX
        {
            return Err(MergeError::zip_format(
                path,
                format!("ZIP64 sentinel in central directory record at 0x{header_offset:x}"),
            ));
        }

        let mut raw_name = vec![0u8; name_len];
        read_exact_or_format(file, &mut raw_name, path, "central directory filename")?;
        let mut extra = vec![0u8; extra_len];
        read_exact_or_format(file, &mut extra, path, "central directory extra field")?;
        if comment_len > 0 {
            file.seek(SeekFrom::Current(comment_len as i64))
                .map_err(|e| MergeError::io(path, e))?;
        }

        let local_header_offset = u64::from(relative_offset) + eocd.first_lfh_offset;
        if let Some(previous) = seen_offsets.insert(local_header_offset, header_offset) {
            return Err(MergeError::zip_format(
                path,
                format!(
                    "duplicate central directory entries point to same local header \
                     (0x{local_header_offset:x}): 0x{previous:x} and 0x{header_offset:x}"
                ),
            ));
        }

        records.push(RawRecord {
            header_offset,
            local_header_offset,
            dos_time,
            method,
            compressed_size: u64::from(compressed_size),
            uncompressed_size: u64::from(uncompressed_size),
            raw_name,
            extra,
        });

        pos = header_offset + (CDFH_LEN + name_len + extra_len + comment_len) as u64;
    }

    Ok((eocd, records))
}

/// Scans backward from EOF for the end-of-central-directory record and
/// derives the central-directory start and first-local-header bias.
fn locate_eocd(file: &mut File, path: &Path) -> Result<EndOfCentralDirectory, MergeError> {
    let file_len = file.metadata().map_err(|e| MergeError::io(path, e))?.len();
    if file_len < EOCD_MIN_LEN as u64 {
        return Err(MergeError::zip_format(
            path,
            format!("file too small for a ZIP archive: {file_len} bytes"),
        ));
    }

    let win_len = file_len.min(EOCD_SEARCH_MAX) as usize;
    let win_start = file_len - win_len as u64;
    file.seek(SeekFrom::Start(win_start))
        .map_err(|e| MergeError::io(path, e))?;
    let mut win = vec![0u8; win_len];
    read_exact_or_format(file, &mut win, path, "end of central directory window")?;

    // The comment must run exactly to EOF, which rules out most payload
    // bytes that happen to contain the signature.
    let mut found = None;
    for i in (0..=win_len - EOCD_MIN_LEN).rev() {
        if u32::from_le_bytes([win[i], win[i + 1], win[i + 2], win[i + 3]]) == SIG_EOCD {
            let comment_len = le_u16(&win[i + 20..i + 22]) as usize;
            if i + EOCD_MIN_LEN + comment_len == win_len {
                found = Some(i);
                break;
            }
        }
    }
    let rel = found.ok_or_else(|| {
        MergeError::zip_format(path, "end of central directory signature not found")
    })?;
    let eocd = &win[rel..];
    let eocd_pos = win_start + rel as u64;

    let total_entries = le_u16(&eocd[10..12]);
    let cd_size = le_u32(&eocd[12..16]);
    let cd_offset = le_u32(&eocd[16..20]);
    if total_entries == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX {
        return Err(MergeError::zip_format(
            path,
            "ZIP64 sentinel in end of central directory record",
        ));
    }

    let cd_start = eocd_pos.checked_sub(u64::from(cd_size)).ok_or_else(|| {
        MergeError::zip_format(
            path,
            format!("central directory size {cd_size} exceeds archive length"),
        )
    })?;
    let first_lfh_offset = cd_start.checked_sub(u64::from(cd_offset)).ok_or_else(|| {
        MergeError::zip_format(
            path,
            format!("central directory offset 0x{cd_offset:x} is inconsistent with its position"),
        )
    })?;

    Ok(EndOfCentralDirectory {
        cd_start,
        first_lfh_offset,
    })
}

/// Visits an entry's local header, verifying the signature and the
/// local/central time agreement, and computes the payload offset.
fn visit_local_header(
    file: &mut File,
    path: &Path,
    record: RawRecord,
) -> Result<ZipEntry, MergeError> {
    let name = String::from_utf8_lossy(&record.raw_name).into_owned();

    file.seek(SeekFrom::Start(record.local_header_offset))
        .map_err(|e| MergeError::io(path, e))?;
    let mut lfh = [0u8; LFH_LEN];
    read_exact_or_format(file, &mut lfh, path, "local file header")?;
    if u32::from_le_bytes([lfh[0], lfh[1], lfh[2], lfh[3]]) != SIG_LFH {
        return Err(MergeError::zip_format(
            path,
            format!(
                "no local file header at 0x{:x} for {name}",
                record.local_header_offset
            ),
        ));
    }

    let dos_time = le_u32(&lfh[10..14]);
    if dos_time != record.dos_time {
        return Err(MergeError::zip_format(
            path,
            format!(
                "local and central DOS times disagree for {name}: local 0x{dos_time:08x}, \
                 central 0x{:08x}",
                record.dos_time
            ),
        ));
    }

    let name_len = le_u16(&lfh[26..28]) as u64;
    let extra_len = le_u16(&lfh[28..30]) as u64;
    let data_offset = record.local_header_offset + LFH_LEN as u64 + name_len + extra_len;

    let extra_fields = parse_extra_fields(&record.extra, path, &name)?;
    let is_dir = name.ends_with('/');

    Ok(ZipEntry {
        name,
        raw_name: record.raw_name,
        method: record.method,
        compressed_size: record.compressed_size,
        uncompressed_size: record.uncompressed_size,
        local_header_offset: record.local_header_offset,
        central_header_offset: record.header_offset,
        dos_time,
        data_offset,
        extra_fields,
        is_dir,
    })
}

/// Splits an extra-field block into `(header_id, payload)` pairs.
fn parse_extra_fields(
    extra: &[u8],
    path: &Path,
    entry: &str,
) -> Result<Vec<ExtraField>, MergeError> {
    let mut fields = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= extra.len() {
        let header_id = le_u16(&extra[pos..pos + 2]);
        let size = le_u16(&extra[pos + 2..pos + 4]) as usize;
        let end = pos + 4 + size;
        if end > extra.len() {
            return Err(MergeError::zip_format(
                path,
                format!("truncated extra field 0x{header_id:04x} in {entry}"),
            ));
        }
        fields.push(ExtraField {
            header_id,
            data: extra[pos + 4..end].to_vec(),
        });
        pos = end;
    }
    if pos != extra.len() {
        return Err(MergeError::zip_format(
            path,
            format!("trailing extra-field bytes in {entry}"),
        ));
    }
    Ok(fields)
}

fn read_exact_or_format(
    file: &mut File,
    dst: &mut [u8],
    path: &Path,
    what: &str,
) -> Result<(), MergeError> {
    file.read_exact(dst).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            MergeError::zip_format(path, format!("truncated {what}"))
        } else {
            MergeError::io(path, e)
        }
    })
}

#[inline(always)]
fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

#[inline(always)]
fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
