//! End-to-end tests: build an installer from a config, then inspect,
//! extract and install it

use inspa_rs::archive::{decode, ExtractOptions};
use inspa_rs::progress::NoProgress;
use inspa_rs::runtime::{extract_container, InstallOptions, Installer};
use inspa_rs::{
    inspect, parse_file, BuildConfig, Builder, CompressionAlgo, InstallState, LocatedBy,
    FOOTER_SIZE,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STUB: &[u8] = b"MZ-test-stub";

fn make_input(root: &Path, files: &[(&str, &[u8])]) -> PathBuf {
    let input = root.join("app");
    for (path, content) in files {
        let target = input.join(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, content).unwrap();
    }
    fs::create_dir_all(&input).unwrap();
    input
}

fn config(input: &Path, output: &Path, algo: &str, level: i32) -> BuildConfig {
    let text = format!(
        r#"
input = {:?}
output = {:?}

[product]
name = "Hello"
version = "1.0.0"

[compression]
algo = "{}"
level = {}
"#,
        input.to_string_lossy(),
        output.to_string_lossy(),
        algo,
        level
    );
    BuildConfig::from_toml_str(&text).unwrap()
}

fn build(dir: &Path, files: &[(&str, &[u8])], algo: &str, level: i32) -> PathBuf {
    let input = make_input(dir, files);
    let output = dir.join("out").join("hello-setup.exe");
    let report = Builder::new(config(&input, &output, algo, level))
        .with_stub(STUB.to_vec())
        .build()
        .unwrap();
    assert_eq!(report.output, output);
    output
}

#[test]
fn test_zip_hello_world_build_and_inspect() {
    let dir = TempDir::new().unwrap();
    let installer = build(dir.path(), &[("a.txt", b"hello world")], "zip", 6);

    let size = fs::metadata(&installer).unwrap().len();
    let parsed = parse_file(&installer).unwrap();
    let overhead = (FOOTER_SIZE + 32 + 8) as u64;
    assert!(size > overhead + parsed.header_bytes.len() as u64 + parsed.compressed.len() as u64);
    assert_eq!(
        size,
        STUB.len() as u64
            + overhead
            + parsed.header_bytes.len() as u64
            + parsed.compressed.len() as u64
    );

    let report = inspect(&installer, true).unwrap();
    assert_eq!(report.file_count, 1);
    assert_eq!(report.original_size, 11);
    assert_eq!(report.algo, CompressionAlgo::Zip);
    assert_eq!(report.level, 6);
    assert_eq!(report.located_by, "footer");
    assert!(report.digest_ok);
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].path, "a.txt");
}

#[test]
fn test_zip_hello_world_extract() {
    let dir = TempDir::new().unwrap();
    let installer = build(dir.path(), &[("a.txt", b"hello world")], "zip", 6);
    let dest = dir.path().join("extracted");

    let summary = extract_container(
        &installer,
        &dest,
        &ExtractOptions::default(),
        &NoProgress,
        None,
    )
    .unwrap();

    assert_eq!(summary.files_written, 1);
    assert_eq!(summary.bytes_written, 11);
    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"hello world");
}

#[test]
fn test_zstd_hello_world_header_and_install() {
    let dir = TempDir::new().unwrap();
    let installer = build(dir.path(), &[("a.txt", b"hello world")], "zstd", 3);

    let parsed = parse_file(&installer).unwrap();
    assert_eq!(parsed.located_by, LocatedBy::Footer);
    assert_eq!(parsed.header.compression.algo, CompressionAlgo::Zstd);

    let json: serde_json::Value = serde_json::from_slice(&parsed.header_bytes).unwrap();
    assert_eq!(json["compression"]["algo"], "zstd");
    assert_eq!(json["magic"], "INSPRO1");
    assert_eq!(json["schema_version"], 1);

    let target = dir.path().join("target");
    let options = InstallOptions {
        install_dir: Some(target.clone()),
        ..InstallOptions::default()
    };
    let mut runner = Installer::new(&installer, options);
    let outcome = runner.run().unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.state, InstallState::Complete);
    assert_eq!(runner.state(), InstallState::Complete);
    assert_eq!(outcome.files_written, 1);
    assert_eq!(fs::read(target.join("a.txt")).unwrap(), b"hello world");
}

#[test]
fn test_nested_tree_roundtrip_both_algorithms() {
    let files: Vec<(&str, &[u8])> = vec![
        ("bin/tool.exe", b"\x00\x01binary\xff"),
        ("docs/readme.md", b"# Readme\n"),
        ("docs/guide/intro.md", b"intro"),
        ("empty.txt", b""),
        ("root.cfg", b"key = value"),
    ];

    for algo in ["zip", "zstd"] {
        let dir = TempDir::new().unwrap();
        let installer = build(dir.path(), &files, algo, 5);
        let dest = dir.path().join("out-files");

        extract_container(
            &installer,
            &dest,
            &ExtractOptions::default(),
            &NoProgress,
            None,
        )
        .unwrap();

        for (path, content) in &files {
            assert_eq!(
                fs::read(dest.join(path)).unwrap(),
                *content,
                "{} mismatch with {}",
                path,
                algo
            );
        }
    }
}

#[test]
fn test_archive_order_matches_header_files() {
    let files: Vec<(&str, &[u8])> = vec![
        ("z.txt", b"last"),
        ("a/b.txt", b"nested"),
        ("m.txt", b"middle"),
        ("a/c/d.txt", b"deep"),
    ];

    for algo in ["zip", "zstd"] {
        let dir = TempDir::new().unwrap();
        let installer = build(dir.path(), &files, algo, 3);
        let parsed = parse_file(&installer).unwrap();

        let decoded = decode(&parsed.compressed, parsed.header.compression.algo).unwrap();
        let archive_paths: Vec<&str> = decoded.iter().map(|(e, _)| e.path.as_str()).collect();
        let header_paths: Vec<&str> = parsed.header.files.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(archive_paths, header_paths, "order differs for {}", algo);

        let mut sorted = header_paths.clone();
        sorted.sort();
        assert_eq!(header_paths, sorted);
    }
}

#[test]
fn test_stats_match_manifest() {
    let dir = TempDir::new().unwrap();
    let installer = build(
        dir.path(),
        &[("one.txt", b"12345"), ("sub/two.txt", b"1234567890")],
        "zstd",
        10,
    );

    let parsed = parse_file(&installer).unwrap();
    let header = &parsed.header;
    let stats = header.stats.unwrap();

    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.original_size, 15);
    assert_eq!(stats.compressed_size, parsed.compressed.len() as u64);
    assert_eq!(header.file_count(), 2);
    // "sub" is listed as a directory entry
    assert!(header.files.iter().any(|f| f.is_directory && f.path == "sub"));
}

#[test]
fn test_header_digest_matches_archive() {
    let dir = TempDir::new().unwrap();
    let installer = build(dir.path(), &[("a.txt", b"hello world")], "zip", 6);

    let parsed = parse_file(&installer).unwrap();
    parsed.verify_digest().unwrap();

    let footer = parsed.footer.unwrap();
    assert_eq!(footer.archive_sha256_hex(), parsed.header.hash.archive);
    assert_eq!(parsed.header.hash.algorithm, "sha256");
    assert_eq!(footer.header_offset, STUB.len() as u64);
}

#[test]
fn test_config_file_relative_paths() {
    let dir = TempDir::new().unwrap();
    make_input(dir.path(), &[("a.txt", b"hello world")]);
    fs::write(dir.path().join("stub.bin"), STUB).unwrap();
    fs::write(
        dir.path().join("inspa.toml"),
        r#"
input = "app"
output = "dist/setup.exe"
stub = "stub.bin"

[product]
name = "Relative"
version = "2.0"
"#,
    )
    .unwrap();

    let config = BuildConfig::from_file(dir.path().join("inspa.toml")).unwrap();
    let report = Builder::new(config).build().unwrap();

    assert_eq!(report.output, dir.path().join("dist").join("setup.exe"));
    let bytes = fs::read(&report.output).unwrap();
    assert!(bytes.starts_with(STUB));
    assert_eq!(report.header.compression.algo, CompressionAlgo::Zstd);
    assert_eq!(report.header.compression.level, 10);
}
