use crate::error::{InspaError, Result};
use std::io::{Read, Write};

/// Footer magic
pub const FOOTER_MAGIC: [u8; 8] = *b"INSPAF01";

/// Footer size in bytes (fixed)
pub const FOOTER_SIZE: usize = 72;

/// Size of the legacy SHA-256 trailer written before the footer
pub const LEGACY_HASH_SIZE: usize = 32;

/// Size of the header length prefix
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Trailing locator record of an installer container
///
/// Structure (72 bytes fixed, little-endian):
/// - Magic: "INSPAF01" (8 bytes)
/// - Header Offset: uint64, position of the 8-byte header length prefix
/// - Header Length: uint64, must equal the prefix value
/// - Compressed Offset: uint64
/// - Compressed Size: uint64
/// - Archive SHA-256: 32 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FooterRecord {
    pub header_offset: u64,
    pub header_len: u64,
    pub compressed_offset: u64,
    pub compressed_size: u64,
    pub archive_sha256: [u8; 32],
}

impl FooterRecord {
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&FOOTER_MAGIC);
        buf[8..16].copy_from_slice(&self.header_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.header_len.to_le_bytes());
        buf[24..32].copy_from_slice(&self.compressed_offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.compressed_size.to_le_bytes());
        buf[40..72].copy_from_slice(&self.archive_sha256);
        buf
    }

    /// Decode a footer. Only the magic is checked here, see [`validate`](Self::validate).
    pub fn from_bytes(buf: &[u8; FOOTER_SIZE]) -> Result<Self> {
        if !has_magic(buf) {
            return Err(InspaError::InvalidFooter(
                "Invalid footer magic (expected INSPAF01)".to_string(),
            ));
        }

        let mut archive_sha256 = [0u8; 32];
        archive_sha256.copy_from_slice(&buf[40..72]);

        Ok(Self {
            header_offset: le_u64(buf, 8),
            header_len: le_u64(buf, 16),
            compressed_offset: le_u64(buf, 24),
            compressed_size: le_u64(buf, 32),
            archive_sha256,
        })
    }

    /// Write footer to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize> {
        writer.write_all(&self.to_bytes())?;
        Ok(FOOTER_SIZE)
    }

    /// Read footer from a reader
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; FOOTER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }

    /// Check the recorded segments against the real file size
    pub fn validate(&self, file_size: u64) -> Result<()> {
        let body_end = file_size.saturating_sub(FOOTER_SIZE as u64);

        let header_end = self
            .header_offset
            .checked_add(LENGTH_PREFIX_SIZE as u64)
            .and_then(|v| v.checked_add(self.header_len))
            .ok_or_else(|| InspaError::InvalidFooter("Header range overflows".to_string()))?;
        if header_end > file_size {
            return Err(InspaError::InvalidFooter(format!(
                "Header range {}+{} exceeds file size {}",
                self.header_offset, self.header_len, file_size
            )));
        }

        let compressed_end = self
            .compressed_offset
            .checked_add(self.compressed_size)
            .ok_or_else(|| InspaError::InvalidFooter("Archive range overflows".to_string()))?;
        if compressed_end > body_end {
            return Err(InspaError::InvalidFooter(format!(
                "Archive range {}+{} exceeds container body ({} bytes)",
                self.compressed_offset, self.compressed_size, body_end
            )));
        }

        if self.compressed_offset < header_end {
            return Err(InspaError::InvalidFooter(format!(
                "Archive offset {} overlaps header ending at {}",
                self.compressed_offset, header_end
            )));
        }

        Ok(())
    }

    pub fn archive_sha256_hex(&self) -> String {
        hex::encode(self.archive_sha256)
    }
}

/// Whether a trailing block starts with the footer magic
pub fn has_magic(buf: &[u8]) -> bool {
    buf.len() >= FOOTER_MAGIC.len() && buf[..FOOTER_MAGIC.len()] == FOOTER_MAGIC
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
