use crate::container::footer::{
    has_magic, FooterRecord, FOOTER_SIZE, LEGACY_HASH_SIZE, LENGTH_PREFIX_SIZE,
};
use crate::error::{InspaError, Result};
use crate::header::{sha256_hex, InstallerHeader};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info, warn};

/// Tunables for locating the header in containers written without a footer.
///
/// The defaults match the stub sizes of pre-footer builders. The scan is a
/// best-effort heuristic: it accepts the first plausible length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyScan {
    /// First candidate offset; no stub is expected to be smaller
    pub start: u64,
    pub stride: u64,
    pub min_header_len: u64,
    pub max_header_len: u64,
}

impl Default for LegacyScan {
    fn default() -> Self {
        Self {
            start: 100 * 1024,
            stride: 1024,
            min_header_len: 100,
            max_header_len: 100 * 1024,
        }
    }
}

/// How the header was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatedBy {
    Footer,
    LegacyScan,
}

/// Result of parsing a container
#[derive(Debug, Clone)]
pub struct ParsedContainer {
    pub header: InstallerHeader,
    /// Raw header JSON exactly as stored
    pub header_bytes: Vec<u8>,
    /// Compressed archive segment
    pub compressed: Vec<u8>,
    /// Present only when located through the footer
    pub footer: Option<FooterRecord>,
    pub located_by: LocatedBy,
    /// Offset of the header length prefix
    pub header_offset: u64,
}

impl ParsedContainer {
    /// Check the archive bytes against `hash.archive` and the footer digest
    pub fn verify_digest(&self) -> Result<()> {
        let actual = sha256_hex(&self.compressed);

        if !self.header.hash.archive.eq_ignore_ascii_case(&actual) {
            return Err(InspaError::DigestMismatch {
                expected: self.header.hash.archive.clone(),
                actual,
            });
        }

        if let Some(footer) = &self.footer {
            let recorded = footer.archive_sha256_hex();
            if recorded != actual {
                return Err(InspaError::DigestMismatch {
                    expected: recorded,
                    actual,
                });
            }
        }

        Ok(())
    }
}

/// Locates and reads the segments of an installer container
pub struct ContainerReader<R: Read + Seek> {
    reader: R,
    file_size: u64,
    scan: LegacyScan,
}

impl ContainerReader<BufReader<File>> {
    /// Open a container file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> ContainerReader<R> {
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            file_size,
            scan: LegacyScan::default(),
        })
    }

    pub fn with_legacy_scan(mut self, scan: LegacyScan) -> Self {
        self.scan = scan;
        self
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Parse the container: footer first, legacy scan when there is no usable footer
    pub fn parse(&mut self) -> Result<ParsedContainer> {
        let mut footer_seen = false;

        if self.file_size >= FOOTER_SIZE as u64 {
            let mut buf = [0u8; FOOTER_SIZE];
            self.read_at(self.file_size - FOOTER_SIZE as u64, &mut buf)?;

            if has_magic(&buf) {
                footer_seen = true;
                let footer = FooterRecord::from_bytes(&buf)?;
                match footer.validate(self.file_size) {
                    Ok(()) => return self.parse_with_footer(footer),
                    Err(e) => warn!("Footer present but unusable ({}), trying legacy scan", e),
                }
            }
        }

        match self.parse_legacy() {
            Ok(parsed) => Ok(parsed),
            Err(e) if footer_seen && !matches!(e, InspaError::UnsupportedSchema { .. }) => Err(
                InspaError::CorruptContainer(format!("Footer is inconsistent and legacy scan failed: {}", e)),
            ),
            Err(e) => Err(e),
        }
    }

    /// Read the footer, if the file ends with one
    pub fn read_footer(&mut self) -> Result<Option<FooterRecord>> {
        if self.file_size < FOOTER_SIZE as u64 {
            return Ok(None);
        }
        let mut buf = [0u8; FOOTER_SIZE];
        self.read_at(self.file_size - FOOTER_SIZE as u64, &mut buf)?;
        if !has_magic(&buf) {
            return Ok(None);
        }
        FooterRecord::from_bytes(&buf).map(Some)
    }

    fn parse_with_footer(&mut self, footer: FooterRecord) -> Result<ParsedContainer> {
        let prefix_len = self.read_u64_at(footer.header_offset)?;
        if prefix_len != footer.header_len {
            return Err(InspaError::HeaderLengthMismatch {
                offset: footer.header_offset,
                footer_len: footer.header_len,
                prefix_len,
            });
        }

        let header_bytes = self.read_vec_at(
            footer.header_offset + LENGTH_PREFIX_SIZE as u64,
            footer.header_len,
        )?;
        let header = InstallerHeader::deserialize(&header_bytes).map_err(|e| match e {
            InspaError::UnsupportedSchema { .. } => e,
            other => InspaError::CorruptContainer(format!(
                "Header at offset {} is invalid: {}",
                footer.header_offset, other
            )),
        })?;
        let compressed = self.read_vec_at(footer.compressed_offset, footer.compressed_size)?;

        info!(
            "Located header via footer at offset {} ({} bytes)",
            footer.header_offset, footer.header_len
        );
        Ok(ParsedContainer {
            header,
            header_bytes,
            compressed,
            footer: Some(footer),
            located_by: LocatedBy::Footer,
            header_offset: footer.header_offset,
        })
    }

    fn parse_legacy(&mut self) -> Result<ParsedContainer> {
        let trailer = LEGACY_HASH_SIZE as u64;
        if self.file_size < trailer + LENGTH_PREFIX_SIZE as u64 {
            return Err(InspaError::NotAnInstaller(format!(
                "File too small ({} bytes)",
                self.file_size
            )));
        }

        let mut legacy_hash = [0u8; LEGACY_HASH_SIZE];
        self.read_at(self.file_size - trailer, &mut legacy_hash)?;
        debug!("Legacy trailer hash: {}", hex::encode(legacy_hash));

        let (offset, header_len) = self.scan_for_header()?;
        warn!(
            "No footer, legacy scan accepted header at offset {} ({} bytes)",
            offset, header_len
        );

        let header_start = offset + LENGTH_PREFIX_SIZE as u64;
        let header_bytes = self.read_vec_at(header_start, header_len)?;
        let header = InstallerHeader::deserialize(&header_bytes).map_err(|e| match e {
            InspaError::Json(json) => InspaError::NotAnInstaller(format!(
                "Candidate header at offset {} is not JSON: {}",
                offset, json
            )),
            other => other,
        })?;

        let compressed_start = header_start + header_len;
        let compressed_size = self.file_size - trailer - compressed_start;
        let compressed = self.read_vec_at(compressed_start, compressed_size)?;

        Ok(ParsedContainer {
            header,
            header_bytes,
            compressed,
            footer: None,
            located_by: LocatedBy::LegacyScan,
            header_offset: offset,
        })
    }

    /// Probe candidate offsets for a plausible header length prefix
    fn scan_for_header(&mut self) -> Result<(u64, u64)> {
        let scan = self.scan;
        let stride = scan.stride.max(1);
        let limit = self.file_size.saturating_sub(1024);
        let mut candidate = scan.start;
        let mut probed = 0u64;

        while candidate <= limit {
            let header_len = self.read_u64_at(candidate)?;
            probed += 1;

            if (scan.min_header_len..=scan.max_header_len).contains(&header_len) {
                let used = (LEGACY_HASH_SIZE as u64)
                    .checked_add(candidate)
                    .and_then(|v| v.checked_add(LENGTH_PREFIX_SIZE as u64))
                    .and_then(|v| v.checked_add(header_len));
                if matches!(used, Some(used) if used < self.file_size) {
                    return Ok((candidate, header_len));
                }
            }
            candidate += stride;
        }

        Err(InspaError::NotAnInstaller(format!(
            "No footer and no header candidate found ({} offsets probed from {} in {}-byte steps)",
            probed, scan.start, stride
        )))
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)?;
        Ok(())
    }

    fn read_u64_at(&mut self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_at(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_vec_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| {
            InspaError::CorruptContainer(format!("Segment of {} bytes does not fit in memory", len))
        })?;
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Parse a container file
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ParsedContainer> {
    ContainerReader::open(path)?.parse()
}

/// Parse a container held in memory
pub fn parse_bytes(bytes: &[u8]) -> Result<ParsedContainer> {
    ContainerReader::from_reader(std::io::Cursor::new(bytes))?.parse()
}
