use crate::container::footer::{FooterRecord, FOOTER_SIZE, LEGACY_HASH_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Write;
use tracing::{debug, info};

/// Write a complete container and return the footer that ends it.
///
/// Layout: `[stub][header_len u64][header][compressed][sha256 32B][footer 72B]`.
/// `header_offset` is the position of the length prefix, not of the JSON.
pub fn write_container<W: Write>(
    mut writer: W,
    stub: &[u8],
    header: &[u8],
    compressed: &[u8],
) -> Result<FooterRecord> {
    let header_offset = stub.len() as u64;
    let header_len = header.len() as u64;
    let compressed_offset = header_offset + LENGTH_PREFIX_SIZE as u64 + header_len;

    writer.write_all(stub)?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header)?;
    writer.write_all(compressed)?;

    let archive_sha256: [u8; 32] = Sha256::digest(compressed).into();
    // Legacy trailer, read by pre-footer installers
    writer.write_all(&archive_sha256)?;

    let footer = FooterRecord {
        header_offset,
        header_len,
        compressed_offset,
        compressed_size: compressed.len() as u64,
        archive_sha256,
    };
    footer.write_to(&mut writer)?;
    writer.flush()?;

    debug!(
        "Footer: header at {} ({} bytes), archive at {} ({} bytes)",
        footer.header_offset, footer.header_len, footer.compressed_offset, footer.compressed_size
    );
    info!(
        "Assembled container: stub {} bytes, header {} bytes, archive {} bytes",
        stub.len(),
        header.len(),
        compressed.len()
    );
    Ok(footer)
}

/// Assemble a container in memory
pub fn assemble(stub: &[u8], header: &[u8], compressed: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(container_size(stub.len(), header.len(), compressed.len()));
    write_container(&mut out, stub, header, compressed)?;
    Ok(out)
}

/// Total size of a container built from segments of these lengths
pub fn container_size(stub: usize, header: usize, compressed: usize) -> usize {
    stub + LENGTH_PREFIX_SIZE + header + compressed + LEGACY_HASH_SIZE + FOOTER_SIZE
}
