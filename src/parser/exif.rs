//! Embedded image metadata (EXIF) reader for JPEG buffers.
//!
//! Walks the JPEG marker segments to the APP1 `Exif\0\0` block, then decodes
//! the TIFF directory structure inside it. Only the handful of tags the import
//! pipeline needs are kept: capture timestamps, GPS position and the camera.
//!
//! Every failure mode degrades: a buffer that is not a JPEG, has no metadata,
//! or is truncated yields `None`, and a directory that points outside the
//! buffer stops that directory only, keeping what was already read.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::constants::{
    MAX_EXIF_ARRAY_BYTES, MAX_EXIF_ARRAY_ELEMENTS, MAX_EXIF_STRING_CHARS, MAX_IFD_ENTRIES,
    MIN_EXIF_YEAR,
};
use crate::normalize::dates::{best_of, create_valid_date, ValidDate};
use crate::types::Location;

const EXIF_SIGNATURE: &[u8; 6] = b"Exif\0\0";
const TIFF_MAGIC: u16 = 42;

const MARKER_SOI: u8 = 0xD8;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_APP1: u8 = 0xE1;

// IFD0
const TAG_MAKE: u16 = 0x010F;
const TAG_MODEL: u16 = 0x0110;
const TAG_ORIENTATION: u16 = 0x0112;
const TAG_DATE_TIME: u16 = 0x0132;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_GPS_IFD: u16 = 0x8825;

// Exif sub-IFD
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
const TAG_DATE_TIME_DIGITIZED: u16 = 0x9004;

// GPS IFD
const TAG_GPS_LATITUDE_REF: u16 = 0x0001;
const TAG_GPS_LATITUDE: u16 = 0x0002;
const TAG_GPS_LONGITUDE_REF: u16 = 0x0003;
const TAG_GPS_LONGITUDE: u16 = 0x0004;
const TAG_GPS_ALTITUDE_REF: u16 = 0x0005;
const TAG_GPS_ALTITUDE: u16 = 0x0006;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageMetadata {
    pub captured_at: Option<String>,
    pub digitized_at: Option<String>,
    pub modified_at: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub orientation: Option<u16>,
}

impl ImageMetadata {
    fn is_empty(&self) -> bool {
        *self == ImageMetadata::default()
    }

    /// Capture time, then digitized time, then the generic modification time.
    pub fn best_date(&self) -> Option<ValidDate> {
        best_of(
            [
                self.captured_at.as_deref(),
                self.digitized_at.as_deref(),
                self.modified_at.as_deref(),
            ],
            parse_exif_timestamp,
        )
    }

    pub fn location(&self) -> Option<Location> {
        Location::new(self.gps_latitude?, self.gps_longitude?, None)
    }

    pub fn camera(&self) -> Option<String> {
        match (&self.camera_make, &self.camera_model) {
            (Some(make), Some(model)) if model.starts_with(make.as_str()) => Some(model.clone()),
            (Some(make), Some(model)) => Some(format!("{make} {model}")),
            (Some(only), None) | (None, Some(only)) => Some(only.clone()),
            (None, None) => None,
        }
    }
}

static EXIF_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}):(\d{2}):(\d{2})[ T](\d{2}):(\d{2}):(\d{2})")
        .expect("valid EXIF timestamp pattern")
});

/// Parse `YYYY:MM:DD HH:MM:SS`, rejecting anything before 1970.
pub fn parse_exif_timestamp(raw: &str) -> Option<ValidDate> {
    let caps = EXIF_TIMESTAMP.captures(raw.trim())?;
    create_valid_date(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
        caps[4].parse().ok()?,
        caps[5].parse().ok()?,
        caps[6].parse().ok()?,
    )?
    .not_before_year(MIN_EXIF_YEAR)
}

/// Degrees/minutes/seconds to signed decimal degrees.
pub fn dms_to_decimal(dms: [f64; 3], negative: bool) -> f64 {
    let value = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
    if negative {
        -value
    } else {
        value
    }
}

/// Read EXIF metadata from a JPEG buffer. Never panics on hostile input.
pub fn extract_image_metadata(bytes: &[u8]) -> Option<ImageMetadata> {
    let (start, end) = find_exif_segment(bytes)?;
    let reader = TiffReader::new(&bytes[start..end])?;
    let ifd0_offset = reader.u32_at(4).ok()? as usize;

    let mut meta = ImageMetadata::default();
    let mut exif_pointer = None;
    let mut gps_pointer = None;

    for (tag, value) in reader.parse_ifd(ifd0_offset) {
        match tag {
            TAG_MAKE => meta.camera_make = value.text(),
            TAG_MODEL => meta.camera_model = value.text(),
            TAG_ORIENTATION => meta.orientation = value.first_u16(),
            TAG_DATE_TIME => meta.modified_at = value.text(),
            TAG_EXIF_IFD => exif_pointer = value.first_u32(),
            TAG_GPS_IFD => gps_pointer = value.first_u32(),
            _ => {}
        }
    }

    if let Some(pointer) = exif_pointer {
        for (tag, value) in reader.parse_ifd(pointer as usize) {
            match tag {
                TAG_DATE_TIME_ORIGINAL => meta.captured_at = value.text(),
                TAG_DATE_TIME_DIGITIZED => meta.digitized_at = value.text(),
                _ => {}
            }
        }
    }

    if let Some(pointer) = gps_pointer {
        apply_gps(&mut meta, reader.parse_ifd(pointer as usize));
    }

    if meta.is_empty() {
        debug!("EXIF block present but no usable tags");
        None
    } else {
        Some(meta)
    }
}

fn apply_gps(meta: &mut ImageMetadata, entries: Vec<(u16, TagValue)>) {
    let mut lat_ref = None;
    let mut lon_ref = None;
    let mut lat = None;
    let mut lon = None;
    let mut alt_below_sea_level = false;
    let mut alt = None;

    for (tag, value) in entries {
        match tag {
            TAG_GPS_LATITUDE_REF => lat_ref = value.text(),
            TAG_GPS_LONGITUDE_REF => lon_ref = value.text(),
            TAG_GPS_LATITUDE => lat = value.dms(),
            TAG_GPS_LONGITUDE => lon = value.dms(),
            TAG_GPS_ALTITUDE_REF => alt_below_sea_level = value.first_byte() == Some(1),
            TAG_GPS_ALTITUDE => alt = value.first_rational(),
            _ => {}
        }
    }

    let is_ref = |r: &Option<String>, wanted: &str| {
        r.as_deref()
            .map(|v| v.eq_ignore_ascii_case(wanted))
            .unwrap_or(false)
    };
    meta.gps_latitude = lat.map(|dms| dms_to_decimal(dms, is_ref(&lat_ref, "S")));
    meta.gps_longitude = lon.map(|dms| dms_to_decimal(dms, is_ref(&lon_ref, "W")));
    meta.gps_altitude = alt.map(|a| if alt_below_sea_level { -a } else { a });
}

/// Locate the TIFF body inside the APP1 Exif segment: `(start, end)` offsets.
fn find_exif_segment(bytes: &[u8]) -> Option<(usize, usize)> {
    if bytes.len() < 2 || bytes[0] != 0xFF || bytes[1] != MARKER_SOI {
        return None;
    }

    let mut pos = 2;
    loop {
        if *bytes.get(pos)? != 0xFF {
            return None;
        }
        // Markers may be preceded by any number of fill bytes.
        let mut marker_pos = pos + 1;
        while *bytes.get(marker_pos)? == 0xFF {
            marker_pos += 1;
        }
        let marker = bytes[marker_pos];
        pos = marker_pos + 1;

        match marker {
            MARKER_SOI | 0x01 | 0xD0..=0xD7 => continue,
            MARKER_EOI | MARKER_SOS => return None,
            _ => {}
        }

        let len = u16::from_be_bytes([*bytes.get(pos)?, *bytes.get(pos + 1)?]) as usize;
        if len < 2 {
            return None;
        }
        let segment_start = pos + 2;
        let segment_end = pos + len;
        if segment_end > bytes.len() {
            return None;
        }
        if marker == MARKER_APP1 && bytes[segment_start..segment_end].starts_with(EXIF_SIGNATURE) {
            return Some((segment_start + EXIF_SIGNATURE.len(), segment_end));
        }
        pos = segment_end;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug)]
struct OutOfBounds;

#[derive(Debug, Clone, PartialEq)]
enum TagValue {
    Bytes(Vec<u8>),
    Ascii(String),
    Shorts(Vec<u16>),
    Longs(Vec<u32>),
    SignedLongs(Vec<i32>),
    Rationals(Vec<f64>),
}

impl TagValue {
    fn text(self) -> Option<String> {
        match self {
            TagValue::Ascii(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    fn first_u16(&self) -> Option<u16> {
        match self {
            TagValue::Shorts(v) => v.first().copied(),
            TagValue::Longs(v) => v.first().and_then(|&x| u16::try_from(x).ok()),
            _ => None,
        }
    }

    fn first_u32(&self) -> Option<u32> {
        match self {
            TagValue::Longs(v) => v.first().copied(),
            TagValue::Shorts(v) => v.first().map(|&x| x as u32),
            TagValue::SignedLongs(v) => v.first().and_then(|&x| u32::try_from(x).ok()),
            _ => None,
        }
    }

    fn first_byte(&self) -> Option<u8> {
        match self {
            TagValue::Bytes(v) => v.first().copied(),
            TagValue::Shorts(v) => v.first().and_then(|&x| u8::try_from(x).ok()),
            _ => None,
        }
    }

    fn first_rational(&self) -> Option<f64> {
        match self {
            TagValue::Rationals(v) => v.first().copied(),
            _ => None,
        }
    }

    fn dms(&self) -> Option<[f64; 3]> {
        match self {
            TagValue::Rationals(v) if v.len() >= 3 => Some([v[0], v[1], v[2]]),
            _ => None,
        }
    }
}

/// Byte size of an entry's value, or `None` when the entry is empty or over
/// the string, element or byte caps.
fn value_size(kind: u16, unit: usize, count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    let element_cap = if kind == 2 { MAX_EXIF_STRING_CHARS } else { MAX_EXIF_ARRAY_ELEMENTS };
    if count > element_cap {
        return None;
    }
    unit.checked_mul(count).filter(|total| *total <= MAX_EXIF_ARRAY_BYTES)
}

struct TiffReader<'a> {
    buf: &'a [u8],
    order: ByteOrder,
}

impl<'a> TiffReader<'a> {
    /// Validates the byte-order mark and the magic number.
    fn new(buf: &'a [u8]) -> Option<Self> {
        let order = match buf.get(0..2)? {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => return None,
        };
        let reader = Self { buf, order };
        (reader.u16_at(2).ok()? == TIFF_MAGIC).then_some(reader)
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], OutOfBounds> {
        let end = offset.checked_add(len).ok_or(OutOfBounds)?;
        self.buf.get(offset..end).ok_or(OutOfBounds)
    }

    fn u16_at(&self, offset: usize) -> Result<u16, OutOfBounds> {
        let raw = self.slice(offset, 2)?;
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes([raw[0], raw[1]]),
            ByteOrder::Big => u16::from_be_bytes([raw[0], raw[1]]),
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32, OutOfBounds> {
        let raw = self.slice(offset, 4)?;
        let arr = [raw[0], raw[1], raw[2], raw[3]];
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(arr),
            ByteOrder::Big => u32::from_be_bytes(arr),
        })
    }

    fn i32_at(&self, offset: usize) -> Result<i32, OutOfBounds> {
        self.u32_at(offset).map(|v| v as i32)
    }

    /// Read one directory. Stops at the first out-of-bounds read and returns
    /// whatever entries were decoded before it.
    fn parse_ifd(&self, offset: usize) -> Vec<(u16, TagValue)> {
        let mut out = Vec::new();
        let declared = match self.u16_at(offset) {
            Ok(count) => count as usize,
            Err(OutOfBounds) => return out,
        };
        if declared > MAX_IFD_ENTRIES {
            debug!("IFD declares {} entries, reading the first {}", declared, MAX_IFD_ENTRIES);
        }

        for index in 0..declared.min(MAX_IFD_ENTRIES) {
            match self.read_entry(offset + 2 + index * 12) {
                Ok(Some(entry)) => out.push(entry),
                Ok(None) => {}
                Err(OutOfBounds) => {
                    debug!("IFD entry {} at offset {} is out of bounds", index, offset);
                    break;
                }
            }
        }
        out
    }

    /// `Ok(None)` means the entry was skipped (unknown type or over a cap).
    fn read_entry(&self, entry: usize) -> Result<Option<(u16, TagValue)>, OutOfBounds> {
        let tag = self.u16_at(entry)?;
        let kind = self.u16_at(entry + 2)?;
        let count = self.u32_at(entry + 4)? as usize;

        let Some(unit) = type_size(kind) else {
            return Ok(None);
        };
        let Some(total) = value_size(kind, unit, count) else {
            return Ok(None);
        };

        let data_offset = if total <= 4 {
            entry + 8
        } else {
            self.u32_at(entry + 8)? as usize
        };
        let data = self.slice(data_offset, total)?;

        let value = match kind {
            1 | 7 => TagValue::Bytes(data.to_vec()),
            2 => {
                let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                TagValue::Ascii(String::from_utf8_lossy(&data[..end]).trim().to_string())
            }
            3 => TagValue::Shorts(
                (0..count)
                    .map(|i| self.u16_at(data_offset + i * 2))
                    .collect::<Result<_, _>>()?,
            ),
            4 => TagValue::Longs(
                (0..count)
                    .map(|i| self.u32_at(data_offset + i * 4))
                    .collect::<Result<_, _>>()?,
            ),
            9 => TagValue::SignedLongs(
                (0..count)
                    .map(|i| self.i32_at(data_offset + i * 4))
                    .collect::<Result<_, _>>()?,
            ),
            5 => TagValue::Rationals(
                (0..count)
                    .map(|i| -> Result<f64, OutOfBounds> {
                        let at = data_offset + i * 8;
                        Ok(ratio(self.u32_at(at)? as f64, self.u32_at(at + 4)? as f64))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            10 => TagValue::Rationals(
                (0..count)
                    .map(|i| -> Result<f64, OutOfBounds> {
                        let at = data_offset + i * 8;
                        Ok(ratio(self.i32_at(at)? as f64, self.i32_at(at + 4)? as f64))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            _ => return Ok(None),
        };
        Ok(Some((tag, value)))
    }
}

fn type_size(kind: u16) -> Option<usize> {
    match kind {
        1 | 2 | 7 => Some(1),
        3 => Some(2),
        4 | 9 => Some(4),
        5 | 10 => Some(8),
        _ => None,
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
