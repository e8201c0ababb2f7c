//! Minimal ZIP container reader/writer.
//!
//! Only what package archives need: single-disk archives without ZIP64,
//! entries stored or deflated. Untouched entries are never decoded; their
//! local records are copied verbatim and only the central directory offsets
//! are rewritten.

use crate::{Error, Result};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const END_OF_CENTRAL_DIR_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = u16::MAX as usize;

pub(crate) const METHOD_STORED: u16 = 0;
pub(crate) const METHOD_DEFLATED: u16 = 8;

const FLAG_ENCRYPTED: u16 = 0x0001;
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub(crate) const FLAG_UTF8: u16 = 0x0800;

/// Version needed to extract deflated entries (2.0).
pub(crate) const VERSION_NEEDED: u16 = 20;

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptArchive(msg.into())
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16> {
    buf.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| corrupt(format!("truncated record at offset {at}")))
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| corrupt(format!("truncated record at offset {at}")))
}

fn slice(buf: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    start
        .checked_add(len)
        .and_then(|end| buf.get(start..end))
        .ok_or_else(|| corrupt(format!("record at offset {start} runs past end of archive")))
}

fn put_u16(out: &mut [u8], at: usize, value: u16) {
    out[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| corrupt(format!("{what} exceeds ZIP limits (ZIP64 unsupported)")))
}

/// One entry as described by the central directory, borrowing the archive.
#[derive(Debug)]
pub(crate) struct Entry<'a> {
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub uncompressed_size: u32,
    /// Central directory record (fixed header, name, extra, comment).
    central: &'a [u8],
    /// Local header, compressed data and optional data descriptor.
    local_record: &'a [u8],
    /// Local header name and extra field.
    local_name_extra: &'a [u8],
    local_version_needed: u16,
    local_time: u16,
    local_date: u16,
    data: &'a [u8],
}

impl Entry<'_> {
    #[cfg(test)]
    pub fn local_record_bytes(&self) -> &[u8] {
        self.local_record
    }

    /// Decode the entry payload, verifying its CRC-32.
    pub fn decompress(&self) -> Result<Vec<u8>> {
        if self.flags & FLAG_ENCRYPTED != 0 {
            return Err(corrupt(format!("entry '{}' is encrypted", self.name)));
        }
        let data = match self.method {
            METHOD_STORED => self.data.to_vec(),
            METHOD_DEFLATED => {
                let mut out = Vec::with_capacity(self.uncompressed_size as usize);
                DeflateDecoder::new(self.data)
                    .read_to_end(&mut out)
                    .map_err(|e| corrupt(format!("entry '{}' inflate failed: {e}", self.name)))?;
                out
            }
            other => {
                return Err(corrupt(format!(
                    "entry '{}' uses unsupported compression method {other}",
                    self.name
                )));
            }
        };
        if crc32fast::hash(&data) != self.crc32 {
            return Err(corrupt(format!("entry '{}' failed CRC check", self.name)));
        }
        Ok(data)
    }
}

/// A parsed archive: entries in central directory order plus the archive comment.
#[derive(Debug)]
pub(crate) struct ZipArchive<'a> {
    pub entries: Vec<Entry<'a>>,
    comment: &'a [u8],
}

impl<'a> ZipArchive<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let eocd = find_end_of_central_dir(bytes)?;

        let disk = read_u16(bytes, eocd + 4)?;
        let cd_disk = read_u16(bytes, eocd + 6)?;
        let disk_entries = read_u16(bytes, eocd + 8)?;
        let total_entries = read_u16(bytes, eocd + 10)?;
        let cd_size = read_u32(bytes, eocd + 12)?;
        let cd_offset = read_u32(bytes, eocd + 16)?;
        let comment_len = read_u16(bytes, eocd + 20)? as usize;

        if total_entries == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX {
            return Err(corrupt("ZIP64 archives are not supported"));
        }
        if disk != 0 || cd_disk != 0 || disk_entries != total_entries {
            return Err(corrupt("multi-disk archives are not supported"));
        }

        let comment = slice(bytes, eocd + END_OF_CENTRAL_DIR_LEN, comment_len)?;
        let directory = slice(bytes, cd_offset as usize, cd_size as usize)?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut pos = 0usize;
        for _ in 0..total_entries {
            let entry = parse_entry(bytes, directory, pos)?;
            pos += entry.central.len();
            entries.push(entry);
        }

        Ok(Self { entries, comment })
    }

    /// Re-serialize the archive, replacing the payload of entry `index`.
    ///
    /// The replacement keeps the entry's name, timestamps, extra fields and
    /// compression method. Every other entry is copied byte-for-byte.
    pub fn write_with_replacement(&self, index: usize, payload: &[u8]) -> Result<Vec<u8>> {
        let target = self
            .entries
            .get(index)
            .ok_or_else(|| corrupt(format!("no entry at index {index}")))?;

        let compressed = compress(target.method, payload)?;
        let crc32 = crc32fast::hash(payload);
        let compressed_size = to_u32(compressed.len(), "entry size")?;
        let uncompressed_size = to_u32(payload.len(), "entry size")?;
        let flags = target.flags & !FLAG_DATA_DESCRIPTOR;

        let total: usize = self.entries.iter().map(|e| e.local_record.len()).sum();
        let mut out = Vec::with_capacity(total + compressed.len());
        let mut directory = Vec::new();

        for (i, entry) in self.entries.iter().enumerate() {
            let offset = to_u32(out.len(), "archive size")?;
            let mut central = entry.central.to_vec();
            put_u32(&mut central, 42, offset);

            if i == index {
                let name_len = read_u16(entry.local_record, 26)?;
                let extra_len = read_u16(entry.local_record, 28)?;
                write_local_header(
                    &mut out,
                    &LocalHeader {
                        version_needed: entry.local_version_needed,
                        flags,
                        method: entry.method,
                        time: entry.local_time,
                        date: entry.local_date,
                        crc32,
                        compressed_size,
                        uncompressed_size,
                        name_len,
                        extra_len,
                    },
                );
                out.extend_from_slice(entry.local_name_extra);
                out.extend_from_slice(&compressed);

                put_u16(&mut central, 8, flags);
                put_u32(&mut central, 16, crc32);
                put_u32(&mut central, 20, compressed_size);
                put_u32(&mut central, 24, uncompressed_size);
            } else {
                out.extend_from_slice(entry.local_record);
            }
            directory.extend_from_slice(&central);
        }

        let cd_offset = to_u32(out.len(), "archive size")?;
        let cd_size = to_u32(directory.len(), "central directory")?;
        out.extend_from_slice(&directory);
        write_end_of_central_dir(&mut out, self.entries.len(), cd_size, cd_offset, self.comment)?;
        Ok(out)
    }
}

fn find_end_of_central_dir(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < END_OF_CENTRAL_DIR_LEN {
        return Err(corrupt("archive too small"));
    }
    let last = bytes.len() - END_OF_CENTRAL_DIR_LEN;
    let first = last.saturating_sub(MAX_COMMENT_LEN);
    for pos in (first..=last).rev() {
        if read_u32(bytes, pos)? == END_OF_CENTRAL_DIR_SIG {
            let comment_len = read_u16(bytes, pos + 20)? as usize;
            if pos + END_OF_CENTRAL_DIR_LEN + comment_len <= bytes.len() {
                return Ok(pos);
            }
        }
    }
    Err(corrupt("end of central directory record not found"))
}

fn parse_entry<'a>(bytes: &'a [u8], directory: &'a [u8], pos: usize) -> Result<Entry<'a>> {
    if read_u32(directory, pos)? != CENTRAL_HEADER_SIG {
        return Err(corrupt(format!("bad central directory signature at {pos}")));
    }
    let flags = read_u16(directory, pos + 8)?;
    let method = read_u16(directory, pos + 10)?;
    let crc32 = read_u32(directory, pos + 16)?;
    let compressed_size = read_u32(directory, pos + 20)?;
    let uncompressed_size = read_u32(directory, pos + 24)?;
    let name_len = read_u16(directory, pos + 28)? as usize;
    let extra_len = read_u16(directory, pos + 30)? as usize;
    let comment_len = read_u16(directory, pos + 32)? as usize;
    let local_offset = read_u32(directory, pos + 42)?;

    if compressed_size == u32::MAX || uncompressed_size == u32::MAX || local_offset == u32::MAX {
        return Err(corrupt("ZIP64 entries are not supported"));
    }

    let central = slice(
        directory,
        pos,
        CENTRAL_HEADER_LEN + name_len + extra_len + comment_len,
    )?;
    let name_bytes = &central[CENTRAL_HEADER_LEN..CENTRAL_HEADER_LEN + name_len];
    let name = String::from_utf8_lossy(name_bytes).into_owned();

    let local = local_offset as usize;
    if read_u32(bytes, local)? != LOCAL_HEADER_SIG {
        return Err(corrupt(format!("bad local header signature for '{name}'")));
    }
    let local_version_needed = read_u16(bytes, local + 4)?;
    let local_time = read_u16(bytes, local + 10)?;
    let local_date = read_u16(bytes, local + 12)?;
    let local_name_len = read_u16(bytes, local + 26)? as usize;
    let local_extra_len = read_u16(bytes, local + 28)? as usize;
    let local_name_extra = slice(bytes, local + LOCAL_HEADER_LEN, local_name_len + local_extra_len)?;

    let data_start = local + LOCAL_HEADER_LEN + local_name_len + local_extra_len;
    let data = slice(bytes, data_start, compressed_size as usize)?;
    let mut record_end = data_start + data.len();

    if flags & FLAG_DATA_DESCRIPTOR != 0 {
        let descriptor_len = if read_u32(bytes, record_end)? == DATA_DESCRIPTOR_SIG {
            16
        } else {
            12
        };
        slice(bytes, record_end, descriptor_len)?;
        record_end += descriptor_len;
    }

    Ok(Entry {
        name,
        flags,
        method,
        crc32,
        uncompressed_size,
        central,
        local_record: &bytes[local..record_end],
        local_name_extra,
        local_version_needed,
        local_time,
        local_date,
        data,
    })
}

pub(crate) fn compress(method: u16, payload: &[u8]) -> Result<Vec<u8>> {
    match method {
        METHOD_STORED => Ok(payload.to_vec()),
        METHOD_DEFLATED => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(payload)
                .and_then(|_| encoder.finish())
                .map_err(|e| corrupt(format!("deflate failed: {e}")))
        }
        other => Err(corrupt(format!("unsupported compression method {other}"))),
    }
}

pub(crate) struct LocalHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub time: u16,
    pub date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
}

pub(crate) fn write_local_header(out: &mut Vec<u8>, header: &LocalHeader) {
    out.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
    out.extend_from_slice(&header.version_needed.to_le_bytes());
    out.extend_from_slice(&header.flags.to_le_bytes());
    out.extend_from_slice(&header.method.to_le_bytes());
    out.extend_from_slice(&header.time.to_le_bytes());
    out.extend_from_slice(&header.date.to_le_bytes());
    out.extend_from_slice(&header.crc32.to_le_bytes());
    out.extend_from_slice(&header.compressed_size.to_le_bytes());
    out.extend_from_slice(&header.uncompressed_size.to_le_bytes());
    out.extend_from_slice(&header.name_len.to_le_bytes());
    out.extend_from_slice(&header.extra_len.to_le_bytes());
}

/// Append a central directory record for an entry without extra field or comment.
pub(crate) fn write_central_header(out: &mut Vec<u8>, header: &LocalHeader, offset: u32, name: &[u8]) {
    out.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
    out.extend_from_slice(&VERSION_NEEDED.to_le_bytes()); // version made by
    out.extend_from_slice(&header.version_needed.to_le_bytes());
    out.extend_from_slice(&header.flags.to_le_bytes());
    out.extend_from_slice(&header.method.to_le_bytes());
    out.extend_from_slice(&header.time.to_le_bytes());
    out.extend_from_slice(&header.date.to_le_bytes());
    out.extend_from_slice(&header.crc32.to_le_bytes());
    out.extend_from_slice(&header.compressed_size.to_le_bytes());
    out.extend_from_slice(&header.uncompressed_size.to_le_bytes());
    out.extend_from_slice(&header.name_len.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // extra
    out.extend_from_slice(&0u16.to_le_bytes()); // comment
    out.extend_from_slice(&0u16.to_le_bytes()); // disk number
    out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
    out.extend_from_slice(&0u32.to_le_bytes()); // external attributes
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(name);
}

/// Append a data descriptor (with signature) after streamed entry data.
pub(crate) fn write_data_descriptor(out: &mut Vec<u8>, crc32: u32, compressed: u32, uncompressed: u32) {
    out.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
    out.extend_from_slice(&crc32.to_le_bytes());
    out.extend_from_slice(&compressed.to_le_bytes());
    out.extend_from_slice(&uncompressed.to_le_bytes());
}

pub(crate) fn write_end_of_central_dir(
    out: &mut Vec<u8>,
    entries: usize,
    cd_size: u32,
    cd_offset: u32,
    comment: &[u8],
) -> Result<()> {
    let entries = u16::try_from(entries)
        .ok()
        .filter(|n| *n != u16::MAX)
        .ok_or_else(|| corrupt("too many entries (ZIP64 unsupported)"))?;
    let comment_len =
        u16::try_from(comment.len()).map_err(|_| corrupt("archive comment too long"))?;

    out.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&entries.to_le_bytes());
    out.extend_from_slice(&entries.to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&comment_len.to_le_bytes());
    out.extend_from_slice(comment);
    Ok(())
}
