//! `@FSL` shader container
//!
//! Layout, all integers little-endian:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0 | 4 | magic `@FSL` |
//! | 4 | 4 | derivative count `n` |
//! | 8 | 4 | metadata, bit 0 = multiview |
//! | 12 | 24·n | per derivative: u64 ordinal, u64 absolute offset, u64 size |
//! | 12 + 24·n | … | payloads in entry order |
//!
//! Author: Moroya Sakamoto

use crate::error::FslError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Magic bytes opening every container
pub const FSL_MAGIC: [u8; 4] = *b"@FSL";

/// Magic, count and metadata
pub const HEADER_SIZE: usize = 12;

/// Ordinal, offset and size
pub const ENTRY_SIZE: usize = 24;

/// Metadata bit set for multiview shaders
pub const METADATA_MULTIVIEW: u32 = 1;

/// One compiled derivative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBlob {
    /// Derivative ordinal
    pub ordinal: u64,
    /// Compiled code
    pub code: Vec<u8>,
}

/// Entry table record as stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerEntry {
    /// Derivative ordinal
    pub ordinal: u64,
    /// Absolute offset of the payload
    pub offset: u64,
    /// Payload size in bytes
    pub size: u64,
}

impl ContainerEntry {
    #[inline(always)]
    fn to_bytes(self) -> [u8; ENTRY_SIZE] {
        let mut bytes = [0u8; ENTRY_SIZE];
        bytes[0..8].copy_from_slice(&self.ordinal.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.offset.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }
}

/// Derivative blobs of one shader plus metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FslContainer {
    /// Metadata word
    pub metadata: u32,
    /// Blobs in entry order
    pub blobs: Vec<ContainerBlob>,
}

impl FslContainer {
    /// Empty container
    pub fn new(multiview: bool) -> Self {
        Self { metadata: if multiview { METADATA_MULTIVIEW } else { 0 }, blobs: Vec::new() }
    }

    /// Append a blob
    pub fn push(&mut self, ordinal: u64, code: Vec<u8>) {
        self.blobs.push(ContainerBlob { ordinal, code });
    }

    /// Multiview bit of the metadata
    #[inline(always)]
    pub fn multiview(&self) -> bool {
        self.metadata & METADATA_MULTIVIEW != 0
    }

    /// Entry table with absolute payload offsets
    pub fn entries(&self) -> Vec<ContainerEntry> {
        let mut offset = (HEADER_SIZE + ENTRY_SIZE * self.blobs.len()) as u64;
        self.blobs
            .iter()
            .map(|blob| {
                let entry = ContainerEntry { ordinal: blob.ordinal, offset, size: blob.code.len() as u64 };
                offset += entry.size;
                entry
            })
            .collect()
    }

    /// Total serialized size
    pub fn byte_len(&self) -> usize {
        HEADER_SIZE + ENTRY_SIZE * self.blobs.len() + self.blobs.iter().map(|b| b.code.len()).sum::<usize>()
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len());
        bytes.extend_from_slice(&FSL_MAGIC);
        bytes.extend_from_slice(&(self.blobs.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.metadata.to_le_bytes());
        for entry in self.entries() {
            bytes.extend_from_slice(&entry.to_bytes());
        }
        for blob in &self.blobs {
            bytes.extend_from_slice(&blob.code);
        }
        bytes
    }

    /// Parse and validate serialized bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, FslError> {
        if data.len() < HEADER_SIZE {
            return Err(FslError::InvalidContainer(format!("{} bytes is shorter than the header", data.len())));
        }
        if data[0..4] != FSL_MAGIC {
            return Err(FslError::InvalidContainer(format!("bad magic {:?}", &data[0..4])));
        }
        let count = read_u32(data, 4) as usize;
        let metadata = read_u32(data, 8);
        let table_end = count
            .checked_mul(ENTRY_SIZE)
            .and_then(|t| t.checked_add(HEADER_SIZE))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| FslError::InvalidContainer(format!("entry table for {} derivatives exceeds the data", count)))?;

        let mut blobs = Vec::with_capacity(count);
        for i in 0..count {
            let at = HEADER_SIZE + i * ENTRY_SIZE;
            let ordinal = read_u64(data, at);
            let offset = read_u64(data, at + 8);
            let size = read_u64(data, at + 16);
            let range = usize::try_from(offset)
                .ok()
                .zip(usize::try_from(size).ok())
                .and_then(|(o, s)| o.checked_add(s).map(|end| o..end))
                .filter(|r| r.start >= table_end && r.end <= data.len())
                .ok_or_else(|| {
                    FslError::InvalidContainer(format!(
                        "derivative {} spans {}+{} outside the {} byte payload area",
                        i,
                        offset,
                        size,
                        data.len()
                    ))
                })?;
            blobs.push(ContainerBlob { ordinal, code: data[range].to_vec() });
        }
        Ok(Self { metadata, blobs })
    }

    /// Write to `path`
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), FslError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&self.to_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Read and validate `path`
    pub fn read(path: impl AsRef<Path>) -> Result<Self, FslError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }
}

#[inline(always)]
fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

#[inline(always)]
fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> FslContainer {
        let mut container = FslContainer::new(false);
        container.push(0, vec![0xAA; 120]);
        container.push(1, vec![0xBB; 340]);
        container
    }

    #[test]
    fn test_two_derivative_layout() {
        let bytes = two_blobs().to_bytes();
        assert_eq!(bytes.len(), 4 + 4 + 4 + 2 * 24 + 120 + 340);
        assert_eq!(&bytes[0..4], b"@FSL");
        assert_eq!(read_u32(&bytes, 4), 2);
        assert_eq!(read_u32(&bytes, 8), 0);
        // first entry
        assert_eq!(read_u64(&bytes, 12), 0);
        assert_eq!(read_u64(&bytes, 20), 60);
        assert_eq!(read_u64(&bytes, 28), 120);
        // second entry
        assert_eq!(read_u64(&bytes, 36), 1);
        assert_eq!(read_u64(&bytes, 44), 180);
        assert_eq!(read_u64(&bytes, 52), 340);
        assert!(bytes[60..180].iter().all(|&b| b == 0xAA));
        assert!(bytes[180..].iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn test_reader_accepts_written_container() {
        let mut container = two_blobs();
        container.metadata = METADATA_MULTIVIEW;
        let parsed = FslContainer::from_bytes(&container.to_bytes()).unwrap();
        assert!(parsed.multiview());
        assert_eq!(parsed, container);
    }

    #[test]
    fn test_reader_rejects_damage() {
        let bytes = two_blobs().to_bytes();
        assert!(FslContainer::from_bytes(&bytes[..8]).is_err());

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'#';
        assert!(matches!(FslContainer::from_bytes(&bad_magic), Err(FslError::InvalidContainer(_))));

        let mut big_count = bytes.clone();
        big_count[4..8].copy_from_slice(&1000u32.to_le_bytes());
        assert!(FslContainer::from_bytes(&big_count).is_err());

        let truncated = &bytes[..bytes.len() - 1];
        let err = FslContainer::from_bytes(truncated).unwrap_err();
        assert!(err.to_string().contains("derivative 1"));

        let mut overlapping = bytes;
        overlapping[20..28].copy_from_slice(&8u64.to_le_bytes());
        assert!(FslContainer::from_bytes(&overlapping).is_err());
    }

    #[test]
    fn test_empty_container() {
        let container = FslContainer::new(true);
        let bytes = container.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(read_u32(&bytes, 8), METADATA_MULTIVIEW);
        assert!(FslContainer::from_bytes(&bytes).unwrap().blobs.is_empty());
    }
}
