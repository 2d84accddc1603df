//! Read-only summary of an existing container

use crate::archive::{CompressionAlgo, FileEntry};
use crate::container::{ContainerReader, LocatedBy, ParsedContainer};
use crate::error::Result;
use crate::header::BuildInfo;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// What `inspect` reports about a container
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub file_size: u64,
    pub located_by: &'static str,
    pub header_offset: u64,
    pub header_len: u64,
    pub compressed_size: u64,

    pub product: String,
    pub version: String,
    pub algo: CompressionAlgo,
    pub level: i32,

    pub file_count: u64,
    pub original_size: u64,
    pub script_count: usize,
    pub build: BuildInfo,

    /// SHA-256 of the archive matches the recorded digest
    pub digest_ok: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
}

impl InspectReport {
    pub fn from_parsed(parsed: &ParsedContainer, file_size: u64, with_files: bool) -> Self {
        let header = &parsed.header;
        Self {
            file_size,
            located_by: match parsed.located_by {
                LocatedBy::Footer => "footer",
                LocatedBy::LegacyScan => "legacy-scan",
            },
            header_offset: parsed.header_offset,
            header_len: parsed.header_bytes.len() as u64,
            compressed_size: parsed.compressed.len() as u64,
            product: header.product.name.clone(),
            version: header.product.version.clone(),
            algo: header.compression.algo,
            level: header.compression.level,
            file_count: header.file_count(),
            original_size: header.original_size(),
            script_count: header.scripts.len(),
            build: header.build.clone(),
            digest_ok: parsed.verify_digest().is_ok(),
            files: if with_files {
                header.files.clone()
            } else {
                Vec::new()
            },
        }
    }
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Product:      {} {}", self.product, self.version)?;
        writeln!(f, "Container:    {} bytes (located by {})", self.file_size, self.located_by)?;
        writeln!(
            f,
            "Header:       offset {}, {} bytes",
            self.header_offset, self.header_len
        )?;
        writeln!(
            f,
            "Archive:      {} bytes, {} level {}",
            self.compressed_size, self.algo, self.level
        )?;
        writeln!(
            f,
            "Files:        {} ({} bytes uncompressed)",
            self.file_count, self.original_size
        )?;
        writeln!(f, "Scripts:      {}", self.script_count)?;
        writeln!(
            f,
            "Built:        {} by {} (config {})",
            self.build.timestamp, self.build.builder_version, self.build.config_fingerprint
        )?;
        write!(
            f,
            "Digest:       {}",
            if self.digest_ok { "ok" } else { "MISMATCH" }
        )?;
        for entry in &self.files {
            if entry.is_directory {
                write!(f, "\n  {}/", entry.path)?;
            } else {
                write!(f, "\n  {} ({} bytes)", entry.path, entry.size)?;
            }
        }
        Ok(())
    }
}

/// Parse a container and summarize it
pub fn inspect<P: AsRef<Path>>(path: P, with_files: bool) -> Result<InspectReport> {
    let mut reader = ContainerReader::open(path)?;
    let file_size = reader.file_size();
    let parsed = reader.parse()?;
    Ok(InspectReport::from_parsed(&parsed, file_size, with_files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::encode_memory;
    use crate::container::{assemble, parse_bytes};
    use crate::header::{sha256_hex, CompressionInfo, InstallRules, InstallerHeader, ProductInfo};

    #[test]
    fn test_report_from_parsed() {
        let entries = vec![(FileEntry::file("a.txt", 11, 0), b"hello world".to_vec())];
        let archive = encode_memory(&entries, CompressionAlgo::Zip, 6).unwrap();
        let header = InstallerHeader::new(
            ProductInfo::new("Inspect", "3.1"),
            InstallRules::default(),
            CompressionInfo::new(CompressionAlgo::Zip, 6),
            vec![entries[0].0.clone()],
            Vec::new(),
            sha256_hex(&archive),
            BuildInfo::now("fp"),
        );
        let bytes = assemble(b"stub", &header.serialize().unwrap(), &archive).unwrap();
        let parsed = parse_bytes(&bytes).unwrap();

        let report = InspectReport::from_parsed(&parsed, bytes.len() as u64, true);
        assert_eq!(report.file_count, 1);
        assert_eq!(report.original_size, 11);
        assert_eq!(report.located_by, "footer");
        assert!(report.digest_ok);

        let text = report.to_string();
        assert!(text.contains("Inspect 3.1"));
        assert!(text.contains("a.txt (11 bytes)"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["algo"], "zip");
    }
}
