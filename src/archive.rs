use std::io::Read;

use flate2::read::DeflateDecoder;
use flate2::Crc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::{
    MAX_ARCHIVE_MEMBERS, MAX_ARCHIVE_NESTING, MAX_ARCHIVE_UNCOMPRESSED_BYTES,
    MAX_MEMBER_UNCOMPRESSED_BYTES,
};
use crate::types::{ContentType, SourceFile};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const END_OF_CENTRAL_DIR_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = 0xFFFF;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const FLAG_ENCRYPTED: u16 = 0x0001;

/// Whole-container failures. Per-member problems are reported as [`MemberError`]s.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("not a ZIP archive (no end-of-central-directory record)")]
    NotAnArchive,
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("ZIP64 archives are not supported")]
    Zip64Unsupported,
    #[error("archive lists {0} entries, limit is {max}", max = MAX_ARCHIVE_MEMBERS)]
    TooManyMembers(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberError {
    pub path: String,
    pub message: String,
}

/// Members that matched the predicate plus the members that failed to extract.
#[derive(Debug, Default)]
pub struct Extraction {
    pub files: Vec<SourceFile>,
    pub errors: Vec<MemberError>,
}

#[derive(Debug, Clone)]
struct CentralEntry {
    path: String,
    flags: u16,
    method: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
}

/// Cheap signature check used to route loose files to the extractor.
pub fn is_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06")
}

/// Extract every member whose path satisfies `predicate`. Archives inside the
/// archive are returned as plain members (if the predicate accepts them).
pub fn extract<F>(bytes: &[u8], predicate: F) -> Result<Extraction, ArchiveError>
where
    F: Fn(&str) -> bool,
{
    let mut budget = MAX_ARCHIVE_UNCOMPRESSED_BYTES;
    extract_level(bytes, &predicate, MAX_ARCHIVE_NESTING, "", &mut budget)
}

/// Like [`extract`], but members that are themselves archives are opened and
/// their matching members returned with `outer.zip/inner/path` style paths.
pub fn extract_nested<F>(bytes: &[u8], predicate: F) -> Result<Extraction, ArchiveError>
where
    F: Fn(&str) -> bool,
{
    let mut budget = MAX_ARCHIVE_UNCOMPRESSED_BYTES;
    extract_level(bytes, &predicate, 0, "", &mut budget)
}

fn extract_level<F>(
    bytes: &[u8],
    predicate: &F,
    depth: usize,
    prefix: &str,
    budget: &mut u64,
) -> Result<Extraction, ArchiveError>
where
    F: Fn(&str) -> bool,
{
    let entries = read_central_directory(bytes)?;
    let mut out = Extraction::default();

    for entry in entries {
        let full_path = format!("{}{}", prefix, entry.path);
        if should_skip(&entry.path) || entry.uncompressed_size == 0 {
            debug!("Skipping archive entry {}", full_path);
            continue;
        }

        let is_nested = ContentType::from_path(&entry.path) == ContentType::Archive
            && depth < MAX_ARCHIVE_NESTING;
        if !is_nested && !predicate(&entry.path) {
            continue;
        }

        if entry.uncompressed_size > *budget {
            warn!("Archive uncompressed size limit reached at {}", full_path);
            out.errors.push(MemberError {
                path: full_path,
                message:
                    "archive exceeds the total uncompressed size limit; remaining members skipped"
                    .to_string(),
            });
            break;
        }

        let data = match read_member(bytes, &entry) {
            Ok(data) => data,
            Err(message) => {
                warn!("Failed to extract {}: {}", full_path, message);
                out.errors.push(MemberError {
                    path: full_path,
                    message,
                });
                continue;
            }
        };
        *budget = budget.saturating_sub(data.len() as u64);

        if is_nested {
            let nested_prefix = format!("{}/", full_path);
            match extract_level(&data, predicate, depth + 1, &nested_prefix, budget) {
                Ok(nested) => {
                    debug!(
                        "Nested archive {} yielded {} files, {} errors",
                        full_path,
                        nested.files.len(),
                        nested.errors.len()
                    );
                    out.files.extend(nested.files);
                    out.errors.extend(nested.errors);
                }
                Err(e) => {
                    warn!("Nested archive {} is unreadable: {}", full_path, e);
                    out.errors.push(MemberError {
                        path: full_path,
                        message: format!("nested archive is unreadable: {e}"),
                    });
                }
            }
            continue;
        }

        debug!("Extracted {} ({} bytes)", full_path, data.len());
        out.files.push(SourceFile::new(full_path, data));
    }

    Ok(out)
}

/// Directories, dot-files, resource forks and OS litter never reach adapters.
fn should_skip(path: &str) -> bool {
    if path.is_empty() || path.ends_with('/') || path.ends_with('\\') {
        return true;
    }
    let normalized = path.replace('\\', "/");
    if normalized.starts_with("__MACOSX/") {
        return true;
    }
    let name = normalized.rsplit('/').next().unwrap_or_default();
    if name.is_empty()
        || name.eq_ignore_ascii_case("thumbs.db")
        || name.eq_ignore_ascii_case("desktop.ini")
    {
        return true;
    }
    normalized.split('/').any(|component| component.starts_with('.'))
}

fn read_central_directory(bytes: &[u8]) -> Result<Vec<CentralEntry>, ArchiveError> {
    let eocd = find_end_of_central_directory(bytes).ok_or(ArchiveError::NotAnArchive)?;

    let total_entries = le_u16(bytes, eocd + 10).ok_or(ArchiveError::NotAnArchive)?;
    let cd_size = le_u32(bytes, eocd + 12).ok_or(ArchiveError::NotAnArchive)?;
    let cd_offset = le_u32(bytes, eocd + 16).ok_or(ArchiveError::NotAnArchive)?;

    if total_entries == 0xFFFF || cd_offset == 0xFFFF_FFFF || cd_size == 0xFFFF_FFFF {
        return Err(ArchiveError::Zip64Unsupported);
    }
    let total_entries = total_entries as usize;
    if total_entries > MAX_ARCHIVE_MEMBERS {
        return Err(ArchiveError::TooManyMembers(total_entries));
    }
    let cd_end = cd_offset as usize + cd_size as usize;
    if cd_end > eocd {
        return Err(ArchiveError::Corrupt(
            "central directory extends past its end record".to_string(),
        ));
    }

    let mut entries = Vec::with_capacity(total_entries);
    let mut offset = cd_offset as usize;
    for index in 0..total_entries {
        let corrupt =
            || ArchiveError::Corrupt(format!("central directory entry {index} is truncated"));
        if le_u32(bytes, offset) != Some(CENTRAL_HEADER_SIG) {
            return Err(ArchiveError::Corrupt(format!(
                "bad central directory signature at entry {index}"
            )));
        }
        let flags = le_u16(bytes, offset + 8).ok_or_else(corrupt)?;
        let method = le_u16(bytes, offset + 10).ok_or_else(corrupt)?;
        let crc32 = le_u32(bytes, offset + 16).ok_or_else(corrupt)?;
        let compressed_size = le_u32(bytes, offset + 20).ok_or_else(corrupt)?;
        let uncompressed_size = le_u32(bytes, offset + 24).ok_or_else(corrupt)?;
        let name_len = le_u16(bytes, offset + 28).ok_or_else(corrupt)? as usize;
        let extra_len = le_u16(bytes, offset + 30).ok_or_else(corrupt)? as usize;
        let comment_len = le_u16(bytes, offset + 32).ok_or_else(corrupt)? as usize;
        let local_header_offset = le_u32(bytes, offset + 42).ok_or_else(corrupt)?;

        let name_start = offset + 46;
        let name = bytes
            .get(name_start..name_start + name_len)
            .ok_or_else(corrupt)?;
        if compressed_size == 0xFFFF_FFFF
            || uncompressed_size == 0xFFFF_FFFF
            || local_header_offset == 0xFFFF_FFFF
        {
            return Err(ArchiveError::Zip64Unsupported);
        }

        entries.push(CentralEntry {
            path: String::from_utf8_lossy(name).into_owned(),
            flags,
            method,
            crc32,
            compressed_size: compressed_size as u64,
            uncompressed_size: uncompressed_size as u64,
            local_header_offset: local_header_offset as u64,
        });
        offset = name_start + name_len + extra_len + comment_len;
    }

    Ok(entries)
}

fn find_end_of_central_directory(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < END_OF_CENTRAL_DIR_LEN {
        return None;
    }
    let last = bytes.len() - END_OF_CENTRAL_DIR_LEN;
    let first = last.saturating_sub(MAX_COMMENT_LEN);
    (first..=last)
        .rev()
        .find(|&pos| le_u32(bytes, pos) == Some(END_OF_CENTRAL_DIR_SIG))
}

/// Decompress a single member. Errors are strings because they become member records.
fn read_member(bytes: &[u8], entry: &CentralEntry) -> Result<Vec<u8>, String> {
    if entry.flags & FLAG_ENCRYPTED != 0 {
        return Err("encrypted members are not supported".to_string());
    }
    if entry.uncompressed_size > MAX_MEMBER_UNCOMPRESSED_BYTES {
        return Err(format!(
            "member expands to {} bytes, limit is {}",
            entry.uncompressed_size, MAX_MEMBER_UNCOMPRESSED_BYTES
        ));
    }

    let header = entry.local_header_offset as usize;
    if le_u32(bytes, header) != Some(LOCAL_HEADER_SIG) {
        return Err("local header signature mismatch".to_string());
    }
    let name_len = le_u16(bytes, header + 26).ok_or("local header is truncated")? as usize;
    let extra_len = le_u16(bytes, header + 28).ok_or("local header is truncated")? as usize;
    let data_start = header + 30 + name_len + extra_len;
    let data = bytes
        .get(data_start..data_start + entry.compressed_size as usize)
        .ok_or("member data is truncated")?;

    let out = match entry.method {
        METHOD_STORED => data.to_vec(),
        METHOD_DEFLATED => {
            let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
            DeflateDecoder::new(data)
                .take(MAX_MEMBER_UNCOMPRESSED_BYTES + 1)
                .read_to_end(&mut out)
                .map_err(|e| format!("decompression failed: {e}"))?;
            out
        }
        other => return Err(format!("unsupported compression method {other}")),
    };

    if out.len() as u64 != entry.uncompressed_size {
        return Err(format!(
            "size mismatch: expected {} bytes, got {}",
            entry.uncompressed_size,
            out.len()
        ));
    }
    let mut crc = Crc::new();
    crc.update(&out);
    if crc.sum() != entry.crc32 {
        return Err("CRC-32 mismatch".to_string());
    }
    Ok(out)
}

fn le_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
