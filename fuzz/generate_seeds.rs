//! Generate seed corpus for fuzzing

use inspa_rs::archive::encode_memory;
use inspa_rs::header::{sha256_hex, BuildInfo, CompressionInfo, InstallRules, ProductInfo};
use inspa_rs::{assemble, CompressionAlgo, FileEntry, InstallerHeader, PostAction, ScriptKind};
use std::fs;

fn seed(
    files: &[(&str, &[u8])],
    algo: CompressionAlgo,
    scripts: Vec<PostAction>,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let entries: Vec<(FileEntry, Vec<u8>)> = files
        .iter()
        .map(|(path, content)| {
            (
                FileEntry::file(*path, content.len() as u64, 1_700_000_000),
                content.to_vec(),
            )
        })
        .collect();
    let compressed = encode_memory(&entries, algo, algo.default_level())?;
    let header = InstallerHeader::new(
        ProductInfo::new("Seed", "1.0"),
        InstallRules::default(),
        CompressionInfo::new(algo, algo.default_level()),
        entries.into_iter().map(|(e, _)| e).collect(),
        scripts,
        sha256_hex(&compressed),
        BuildInfo::now("fuzz-seed"),
    );
    Ok(assemble(b"MZ", &header.serialize()?, &compressed)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let corpus_dir = "fuzz/corpus/fuzz_container_parse";
    fs::create_dir_all(corpus_dir)?;

    println!("Generating seed corpus...");

    let large = b"This is test data for compression. ".repeat(1000);
    let seeds: Vec<(&str, Vec<u8>)> = vec![
        ("seed_empty_zstd", seed(&[], CompressionAlgo::Zstd, Vec::new())?),
        (
            "seed_single_zip",
            seed(&[("a.txt", b"hello world")], CompressionAlgo::Zip, Vec::new())?,
        ),
        (
            "seed_multi_zstd",
            seed(
                &[
                    ("file1.txt", b"First file"),
                    ("file2.txt", b"Second file"),
                    ("dir/file3.txt", b"Third file in directory"),
                ],
                CompressionAlgo::Zstd,
                Vec::new(),
            )?,
        ),
        (
            "seed_large_zstd",
            seed(&[("large.txt", &large[..])], CompressionAlgo::Zstd, Vec::new())?,
        ),
        (
            "seed_scripts_zip",
            seed(
                &[("setup.ps1", b"Write-Host done")],
                CompressionAlgo::Zip,
                vec![PostAction::new(ScriptKind::Powershell, "setup.ps1")],
            )?,
        ),
    ];

    for (name, bytes) in &seeds {
        let path = format!("{}/{}.exe", corpus_dir, name);
        fs::write(&path, bytes)?;
        println!("✓ Generated: {} ({} bytes)", path, bytes.len());
    }

    // Same containers with the footer cut off, for the legacy scan
    let seed = &seeds[1].1;
    let path = format!("{}/seed_no_footer.exe", corpus_dir);
    fs::write(&path, &seed[..seed.len() - inspa_rs::FOOTER_SIZE])?;
    println!("✓ Generated: {}", path);

    println!("\nSeed corpus generated in {}", corpus_dir);
    Ok(())
}
