//! Package archive codec.
//!
//! A package archive is a ZIP container holding exactly one manifest entry
//! (a `*.nuspec` file at the archive root) plus arbitrary content entries.
//! Rewriting touches only the manifest entry; every other entry's local
//! record is carried over byte-for-byte.

mod nuspec;
mod zip;

use crate::edit::{FieldMutation, ManifestField};
use crate::{Error, Result};
use zip::ZipArchive;

const MANIFEST_EXTENSION: &str = ".nuspec";

fn manifest_index(archive: &ZipArchive<'_>) -> Result<usize> {
    let mut found = None;
    for (index, entry) in archive.entries.iter().enumerate() {
        let is_manifest = !entry.name.contains('/')
            && !entry.name.contains('\\')
            && entry.name.to_ascii_lowercase().ends_with(MANIFEST_EXTENSION);
        if !is_manifest {
            continue;
        }
        if found.is_some() {
            return Err(Error::CorruptArchive(
                "archive contains more than one manifest".to_string(),
            ));
        }
        found = Some(index);
    }
    found.ok_or(Error::ManifestMissing)
}

/// Apply field mutations to the archive's manifest and return the new archive.
///
/// Output is deterministic for a given input and mutation list. An empty
/// mutation list yields the input unchanged (after validating the container).
pub fn rewrite_manifest(archive: &[u8], mutations: &[FieldMutation]) -> Result<Vec<u8>> {
    let zip = ZipArchive::parse(archive)?;
    let index = manifest_index(&zip)?;
    if mutations.is_empty() {
        return Ok(archive.to_vec());
    }
    let manifest = zip.entries[index].decompress()?;
    let rewritten = nuspec::rewrite(&manifest, mutations)?;
    zip.write_with_replacement(index, &rewritten)
}

/// Raw bytes of the archive's manifest.
pub fn read_manifest(archive: &[u8]) -> Result<Vec<u8>> {
    let zip = ZipArchive::parse(archive)?;
    let index = manifest_index(&zip)?;
    zip.entries[index].decompress()
}

/// Current value of one manifest field, `None` if the element is absent.
pub fn read_manifest_field(archive: &[u8], field: ManifestField) -> Result<Option<String>> {
    nuspec::read_field(&read_manifest(archive)?, field)
}

/// Entry names in central directory order.
pub fn entry_names(archive: &[u8]) -> Result<Vec<String>> {
    let zip = ZipArchive::parse(archive)?;
    Ok(zip.entries.into_iter().map(|e| e.name).collect())
}

/// Builds package archives from in-memory entries.
///
/// Timestamps are fixed so identical input always produces identical bytes.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: Vec<BuilderEntry>,
    comment: Vec<u8>,
}

#[derive(Debug)]
struct BuilderEntry {
    name: String,
    data: Vec<u8>,
    deflate: bool,
    streamed: bool,
}

/// DOS date for 2000-01-01.
const FIXED_DOS_DATE: u16 = (20 << 9) | (1 << 5) | 1;

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a deflated entry.
    pub fn deflated(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(BuilderEntry {
            name: name.into(),
            data: data.into(),
            deflate: true,
            streamed: false,
        });
        self
    }

    /// Add a stored (uncompressed) entry.
    pub fn stored(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(BuilderEntry {
            name: name.into(),
            data: data.into(),
            deflate: false,
            streamed: false,
        });
        self
    }

    /// Add a deflated entry whose sizes follow the data in a data descriptor.
    pub fn streamed(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(BuilderEntry {
            name: name.into(),
            data: data.into(),
            deflate: true,
            streamed: true,
        });
        self
    }

    /// Set the archive comment.
    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn build(self) -> Result<Vec<u8>> {
        let too_large = || Error::CorruptArchive("entry exceeds ZIP limits".to_string());
        let mut out = Vec::new();
        let mut directory = Vec::new();

        for entry in &self.entries {
            let method = if entry.deflate {
                zip::METHOD_DEFLATED
            } else {
                zip::METHOD_STORED
            };
            let compressed = zip::compress(method, &entry.data)?;
            let mut flags = zip::FLAG_UTF8;
            if entry.streamed {
                flags |= zip::FLAG_DATA_DESCRIPTOR;
            }
            let header = zip::LocalHeader {
                version_needed: zip::VERSION_NEEDED,
                flags,
                method,
                time: 0,
                date: FIXED_DOS_DATE,
                crc32: crc32fast::hash(&entry.data),
                compressed_size: u32::try_from(compressed.len()).map_err(|_| too_large())?,
                uncompressed_size: u32::try_from(entry.data.len()).map_err(|_| too_large())?,
                name_len: u16::try_from(entry.name.len()).map_err(|_| too_large())?,
                extra_len: 0,
            };
            let offset = u32::try_from(out.len()).map_err(|_| too_large())?;

            if entry.streamed {
                // Streaming writers leave the local header's CRC and sizes zeroed
                zip::write_local_header(
                    &mut out,
                    &zip::LocalHeader {
                        crc32: 0,
                        compressed_size: 0,
                        uncompressed_size: 0,
                        ..header
                    },
                );
            } else {
                zip::write_local_header(&mut out, &header);
            }
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&compressed);
            if entry.streamed {
                zip::write_data_descriptor(
                    &mut out,
                    header.crc32,
                    header.compressed_size,
                    header.uncompressed_size,
                );
            }

            zip::write_central_header(&mut directory, &header, offset, entry.name.as_bytes());
        }

        let cd_offset = u32::try_from(out.len()).map_err(|_| too_large())?;
        let cd_size = u32::try_from(directory.len()).map_err(|_| too_large())?;
        out.extend_from_slice(&directory);
        zip::write_end_of_central_dir(&mut out, self.entries.len(), cd_size, cd_offset, &self.comment)?;
        Ok(out)
    }
}
