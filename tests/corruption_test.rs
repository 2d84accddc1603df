//! Corruption detection tests
//!
//! Damaged footers, length prefixes, headers and archives must be rejected
//! with the right error kind, never silently accepted.

use inspa_rs::archive::{encode_memory, ExtractOptions};
use inspa_rs::header::{
    sha256_hex, BuildInfo, CompressionInfo, InstallRules, ProductInfo,
};
use inspa_rs::progress::NoProgress;
use inspa_rs::runtime::{extract_container, InstallOptions, Installer};
use inspa_rs::{
    assemble, parse_file, CompressionAlgo, FileEntry, InspaError, InstallState, InstallerHeader,
    FOOTER_SIZE,
};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::{NamedTempFile, TempDir};

const STUB: &[u8] = b"MZ corrupt-test stub";

fn container_bytes() -> Vec<u8> {
    let entries = vec![(
        FileEntry::file("a.txt", 11, 1_700_000_000),
        b"hello world".to_vec(),
    )];
    let compressed = encode_memory(&entries, CompressionAlgo::Zstd, 3).unwrap();
    let header = InstallerHeader::new(
        ProductInfo::new("Corrupt", "1.0"),
        InstallRules::default(),
        CompressionInfo::new(CompressionAlgo::Zstd, 3),
        vec![entries[0].0.clone()],
        Vec::new(),
        sha256_hex(&compressed),
        BuildInfo::now("corruption-test"),
    );
    assemble(STUB, &header.serialize().unwrap(), &compressed).unwrap()
}

fn create_test_installer() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&container_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Overwrite bytes at a specific offset
fn corrupt_bytes_at(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

/// Truncate file to a specific length
fn truncate_at(path: &Path, len: u64) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(len).unwrap();
}

fn find(haystack: &[u8], needle: &[u8]) -> u64 {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("needle present") as u64
}

#[test]
fn test_footer_offset_out_of_range() {
    let file = create_test_installer();
    let size = fs::metadata(file.path()).unwrap().len();

    // header_offset lives right after the 8-byte magic
    let footer_start = size - FOOTER_SIZE as u64;
    corrupt_bytes_at(file.path(), footer_start + 8, &u64::MAX.to_le_bytes());

    match parse_file(file.path()) {
        Err(InspaError::CorruptContainer(msg)) => {
            assert!(msg.contains("legacy scan failed"), "message: {}", msg);
        }
        other => panic!("Expected CorruptContainer, got: {:?}", other.map(|p| p.header_offset)),
    }
}

#[test]
fn test_footer_compressed_size_overlaps_trailer() {
    let file = create_test_installer();
    let size = fs::metadata(file.path()).unwrap().len();
    let footer_start = size - FOOTER_SIZE as u64;

    // compressed_size is the fourth u64 after the magic
    corrupt_bytes_at(file.path(), footer_start + 32, &size.to_le_bytes());

    let err = parse_file(file.path()).unwrap_err();
    assert!(
        matches!(err, InspaError::CorruptContainer(_)),
        "Expected CorruptContainer, got: {:?}",
        err
    );
    assert!(err.is_structural());
}

#[test]
fn test_length_prefix_disagrees_with_footer() {
    let file = create_test_installer();
    let bytes = fs::read(file.path()).unwrap();
    let prefix = u64::from_le_bytes(bytes[STUB.len()..STUB.len() + 8].try_into().unwrap());

    corrupt_bytes_at(file.path(), STUB.len() as u64, &(prefix - 1).to_le_bytes());

    match parse_file(file.path()) {
        Err(InspaError::HeaderLengthMismatch {
            offset,
            footer_len,
            prefix_len,
        }) => {
            assert_eq!(offset, STUB.len() as u64);
            assert_eq!(footer_len, prefix);
            assert_eq!(prefix_len, prefix - 1);
        }
        other => panic!("Expected HeaderLengthMismatch, got: {:?}", other.map(|p| p.header_offset)),
    }
}

#[test]
fn test_header_json_garbage() {
    let file = create_test_installer();
    // First byte of the JSON object
    corrupt_bytes_at(file.path(), STUB.len() as u64 + 8, b"X");

    let err = parse_file(file.path()).unwrap_err();
    assert!(
        matches!(err, InspaError::CorruptContainer(_)),
        "Expected CorruptContainer, got: {:?}",
        err
    );
}

#[test]
fn test_header_wrong_magic() {
    let file = create_test_installer();
    let bytes = fs::read(file.path()).unwrap();
    let at = find(&bytes, b"INSPRO1");
    corrupt_bytes_at(file.path(), at, b"NOTINST");

    let err = parse_file(file.path()).unwrap_err();
    assert!(err.is_structural(), "got: {:?}", err);
}

#[test]
fn test_header_future_schema_version() {
    let file = create_test_installer();
    let bytes = fs::read(file.path()).unwrap();
    let at = find(&bytes, b"\"schema_version\":1");
    corrupt_bytes_at(file.path(), at, b"\"schema_version\":7");

    match parse_file(file.path()) {
        Err(InspaError::UnsupportedSchema { found, expected }) => {
            assert_eq!(found, 7);
            assert_eq!(expected, 1);
        }
        other => panic!("Expected UnsupportedSchema, got: {:?}", other.map(|p| p.header_offset)),
    }
}

#[test]
fn test_archive_byte_flip_detected_by_digest() {
    let file = create_test_installer();
    let parsed = parse_file(file.path()).unwrap();
    let footer = parsed.footer.unwrap();

    let original = parsed.compressed[parsed.compressed.len() / 2];
    corrupt_bytes_at(
        file.path(),
        footer.compressed_offset + parsed.compressed.len() as u64 / 2,
        &[original ^ 0xFF],
    );

    // Locating still works; only the digest check notices
    let parsed = parse_file(file.path()).unwrap();
    match parsed.verify_digest() {
        Err(InspaError::DigestMismatch { expected, actual }) => {
            assert_eq!(expected, parsed.header.hash.archive);
            assert_ne!(expected, actual);
        }
        other => panic!("Expected DigestMismatch, got: {:?}", other),
    }

    let dest = TempDir::new().unwrap();
    let err = extract_container(
        file.path(),
        dest.path(),
        &ExtractOptions::default(),
        &NoProgress,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, InspaError::DigestMismatch { .. }), "got: {:?}", err);
    assert!(!dest.path().join("a.txt").exists());
}

#[test]
fn test_installer_refuses_tampered_archive() {
    let file = create_test_installer();
    let size = fs::metadata(file.path()).unwrap().len();
    // Last byte of the compressed segment, just before the legacy trailer
    let at = size - FOOTER_SIZE as u64 - 32 - 1;
    let bytes = fs::read(file.path()).unwrap();
    corrupt_bytes_at(file.path(), at, &[bytes[at as usize] ^ 0x55]);

    let dest = TempDir::new().unwrap();
    let mut installer = Installer::new(
        file.path(),
        InstallOptions {
            install_dir: Some(dest.path().to_path_buf()),
            run_scripts: false,
            ..InstallOptions::default()
        },
    );

    let err = installer.run().unwrap_err();
    match err {
        InspaError::Stage { source, .. } => {
            assert!(matches!(*source, InspaError::DigestMismatch { .. }), "got: {:?}", source)
        }
        other => panic!("Expected a parse stage error, got: {:?}", other),
    }
    assert_eq!(installer.state(), InstallState::Error);
}

#[test]
fn test_truncated_containers_rejected() {
    let full = container_bytes().len() as u64;

    for len in [0u64, 7, 40, full / 2, full - 1] {
        let file = create_test_installer();
        truncate_at(file.path(), len);

        let err = parse_file(file.path()).unwrap_err();
        assert!(err.is_structural() || matches!(err, InspaError::Io(_)), "len {}: {:?}", len, err);
    }
}

#[test]
fn test_random_bytes_not_an_installer() {
    use rand::RngCore;

    let mut data = vec![0u8; 16 * 1024];
    rand::thread_rng().fill_bytes(&mut data);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();

    let err = parse_file(file.path()).unwrap_err();
    assert!(matches!(err, InspaError::NotAnInstaller(_)), "got: {:?}", err);
}
