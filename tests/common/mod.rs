#![allow(dead_code)]

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};

struct ZipEntry {
    name: String,
    data: Vec<u8>,
    deflate: bool,
    corrupt_crc: bool,
}

/// In-memory ZIP writer for fixtures.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<ZipEntry>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(ZipEntry {
            name: name.to_string(),
            data: data.into(),
            deflate: false,
            corrupt_crc: false,
        });
        self
    }

    pub fn deflated(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(ZipEntry {
            name: name.to_string(),
            data: data.into(),
            deflate: true,
            corrupt_crc: false,
        });
        self
    }

    /// A member whose recorded CRC-32 does not match its content.
    pub fn corrupt(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(ZipEntry {
            name: name.to_string(),
            data: data.into(),
            deflate: true,
            corrupt_crc: true,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for entry in &self.entries {
            let mut crc = Crc::new();
            crc.update(&entry.data);
            let mut crc = crc.sum();
            if entry.corrupt_crc {
                crc ^= 0xDEAD_BEEF;
            }
            let (method, payload) = if entry.deflate {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&entry.data).unwrap();
                (8u16, encoder.finish().unwrap())
            } else {
                (0u16, entry.data.clone())
            };
            let offset = out.len() as u32;
            let name = entry.name.as_bytes();

            out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&method.to_le_bytes());
            out.extend_from_slice(&[0, 0, 0, 0]);
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name);
            out.extend_from_slice(&payload);

            central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&method.to_le_bytes());
            central.extend_from_slice(&[0, 0, 0, 0]);
            central.extend_from_slice(&crc.to_le_bytes());
            central.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            central.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&[0u8; 8]);
            central.extend_from_slice(&0u32.to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(name);
        }

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&central);
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }
}

struct IfdEntry {
    tag: u16,
    kind: u16,
    count: u32,
    data: Vec<u8>,
}

fn ascii(tag: u16, s: &str) -> IfdEntry {
    let mut data = s.as_bytes().to_vec();
    data.push(0);
    IfdEntry {
        tag,
        kind: 2,
        count: data.len() as u32,
        data,
    }
}

fn long(tag: u16, v: u32) -> IfdEntry {
    IfdEntry {
        tag,
        kind: 4,
        count: 1,
        data: v.to_le_bytes().to_vec(),
    }
}

fn rationals(tag: u16, values: &[(u32, u32)]) -> IfdEntry {
    let data = values
        .iter()
        .flat_map(|(n, d)| n.to_le_bytes().into_iter().chain(d.to_le_bytes()))
        .collect();
    IfdEntry {
        tag,
        kind: 5,
        count: values.len() as u32,
        data,
    }
}

fn ifd_len(entries: &[IfdEntry]) -> usize {
    let heap: usize = entries
        .iter()
        .filter(|e| e.data.len() > 4)
        .map(|e| e.data.len())
        .sum();
    2 + entries.len() * 12 + 4 + heap
}

fn write_ifd(out: &mut Vec<u8>, start: usize, entries: &[IfdEntry]) {
    let mut heap = Vec::new();
    let heap_start = start + 2 + entries.len() * 12 + 4;
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for e in entries {
        out.extend_from_slice(&e.tag.to_le_bytes());
        out.extend_from_slice(&e.kind.to_le_bytes());
        out.extend_from_slice(&e.count.to_le_bytes());
        if e.data.len() <= 4 {
            let mut inline = e.data.clone();
            inline.resize(4, 0);
            out.extend_from_slice(&inline);
        } else {
            out.extend_from_slice(&((heap_start + heap.len()) as u32).to_le_bytes());
            heap.extend_from_slice(&e.data);
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&heap);
}

/// A little-endian JPEG whose EXIF block carries a capture time
/// (`YYYY:MM:DD HH:MM:SS`), a camera make and, optionally, a north/east GPS
/// position given as whole degrees, minutes and seconds.
pub fn jpeg_with_exif(captured_at: &str, gps: Option<([u32; 3], [u32; 3])>) -> Vec<u8> {
    let exif = vec![ascii(0x9003, captured_at)];
    let gps_entries = gps
        .map(|(lat, lon)| {
            vec![
                ascii(0x0001, "N"),
                rationals(0x0002, &[(lat[0], 1), (lat[1], 1), (lat[2], 1)]),
                ascii(0x0003, "E"),
                rationals(0x0004, &[(lon[0], 1), (lon[1], 1), (lon[2], 1)]),
            ]
        })
        .unwrap_or_default();

    let mut ifd0 = vec![ascii(0x010F, "Pixel")];
    let pointer_count = 1 + usize::from(!gps_entries.is_empty());
    let exif_start = 8 + ifd_len(&ifd0) + pointer_count * 12;
    let gps_start = exif_start + ifd_len(&exif);
    ifd0.push(long(0x8769, exif_start as u32));
    if !gps_entries.is_empty() {
        ifd0.push(long(0x8825, gps_start as u32));
    }

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());
    write_ifd(&mut tiff, 8, &ifd0);
    write_ifd(&mut tiff, exif_start, &exif);
    if !gps_entries.is_empty() {
        write_ifd(&mut tiff, gps_start, &gps_entries);
    }

    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0xFF, 0xD9]);
    jpeg
}
