//! Build pipeline: collect -> compress -> header -> assemble
//!
//! Each stage takes the previous stage's result by value and returns a new
//! one. [`BuildStats`] travels along and is only ever replaced, never patched.

use crate::archive::{collect_entries, encode_to, CompressionAlgo, FileEntry, SourceEntry};
use crate::config::BuildConfig;
use crate::container::{write_container, FooterRecord};
use crate::error::{InspaError, Result};
use crate::header::{sha256_hex, BuildInfo, BuildStats, CompressionInfo, InstallerHeader};
use crate::progress::{CancelToken, NoProgress, ProgressSink, Stage};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Output of the collect stage
#[derive(Debug, Clone)]
pub struct Collected {
    pub entries: Vec<SourceEntry>,
    pub stats: BuildStats,
}

/// Output of the compress stage
#[derive(Debug, Clone)]
pub struct Compressed {
    pub files: Vec<FileEntry>,
    pub archive: Vec<u8>,
    /// What was actually used, after any fallback
    pub compression: CompressionInfo,
    pub stats: BuildStats,
}

/// Output of the header stage
#[derive(Debug, Clone)]
pub struct Headed {
    pub header: InstallerHeader,
    pub header_bytes: Vec<u8>,
    pub archive: Vec<u8>,
    pub stats: BuildStats,
}

/// Final result of a build
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub output: PathBuf,
    pub header: InstallerHeader,
    pub footer: FooterRecord,
    pub stats: BuildStats,
    pub container_size: u64,
    pub elapsed: Duration,
}

/// Collect the input tree
pub fn collect(root: &Path, excludes: &[String]) -> Result<Collected> {
    let entries = collect_entries(root, excludes)?;
    let stats = BuildStats {
        original_size: entries.iter().map(|e| e.entry.size).sum(),
        compressed_size: 0,
        file_count: entries.iter().filter(|e| !e.entry.is_directory).count() as u64,
    };
    info!(
        "Collected {} files ({} bytes) from {}",
        stats.file_count,
        stats.original_size,
        root.display()
    );
    Ok(Collected { entries, stats })
}

/// Compress collected entries, retrying with zip when zstd fails and fallback is on
pub fn compress(
    collected: Collected,
    compression: &CompressionInfo,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<Compressed> {
    let mut used = compression.clone();
    let encode = |algo: CompressionAlgo, level: i32| {
        encode_to(Vec::new(), &collected.entries, algo, level, sink, Some(cancel))
    };
    let archive = match encode(used.algo, used.level) {
        Ok(bytes) => bytes,
        Err(e) if should_fallback(&e, compression) => {
            warn!("zstd compression failed ({}), falling back to zip", e);
            used.algo = CompressionAlgo::Zip;
            used.level = CompressionAlgo::Zip.default_level();
            encode(used.algo, used.level)?
        }
        Err(e) => return Err(e),
    };

    let stats = BuildStats {
        compressed_size: archive.len() as u64,
        ..collected.stats
    };
    info!(
        "Compressed {} -> {} bytes with {} level {}",
        stats.original_size, stats.compressed_size, used.algo, used.level
    );

    Ok(Compressed {
        files: collected.entries.into_iter().map(|e| e.entry).collect(),
        archive,
        compression: used,
        stats,
    })
}

fn should_fallback(error: &InspaError, compression: &CompressionInfo) -> bool {
    compression.fallback_to_zip
        && compression.algo == CompressionAlgo::Zstd
        && matches!(error, InspaError::CompressionFailed(_))
}

/// Build and serialize the header for a compressed archive
pub fn make_header(compressed: Compressed, config: &BuildConfig) -> Result<Headed> {
    let fingerprint = config.fingerprint()?;
    let mut header = InstallerHeader::new(
        config.product.clone(),
        config.install.clone(),
        compressed.compression,
        compressed.files,
        config.scripts.clone(),
        sha256_hex(&compressed.archive),
        BuildInfo::now(fingerprint),
    )
    .with_ui(config.ui.clone())
    .with_stats(compressed.stats);
    if let Some(env) = &config.env {
        header = header.with_env(env.clone());
    }

    let header_bytes = header.serialize()?;
    Ok(Headed {
        header,
        header_bytes,
        archive: compressed.archive,
        stats: compressed.stats,
    })
}

/// Write the container atomically to `output`, returning the footer and file size
pub fn write_output(headed: &Headed, stub: &[u8], output: &Path) -> Result<(FooterRecord, u64)> {
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    let footer = write_container(
        BufWriter::new(tmp.as_file_mut()),
        stub,
        &headed.header_bytes,
        &headed.archive,
    )?;
    let file = tmp.persist(output).map_err(|e| InspaError::Io(e.error))?;
    let size = file.metadata()?.len();

    Ok((footer, size))
}

/// Runs the whole pipeline for one configuration
///
/// ```no_run
/// use inspa_rs::{BuildConfig, Builder};
/// # fn main() -> inspa_rs::Result<()> {
/// let config = BuildConfig::from_file("inspa.toml")?;
/// let report = Builder::new(config).build()?;
/// println!("{} ({} bytes)", report.output.display(), report.container_size);
/// # Ok(())
/// # }
/// ```
pub struct Builder {
    config: BuildConfig,
    stub: Option<Vec<u8>>,
    output: Option<PathBuf>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelToken,
}

impl Builder {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            stub: None,
            output: None,
            sink: Arc::new(NoProgress),
            cancel: CancelToken::new(),
        }
    }

    /// Use these stub bytes instead of `config.stub`
    pub fn with_stub(mut self, stub: Vec<u8>) -> Self {
        self.stub = Some(stub);
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_progress<S: ProgressSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn build(&self) -> Result<BuildReport> {
        let started = Instant::now();
        self.config.validate()?;
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| self.config.output_path());
        let stub = self.load_stub()?;

        let collected = self.stage(Stage::Collect, || {
            collect(&self.config.input, &self.config.exclude)
        })?;
        let compressed = self.stage(Stage::Compress, || {
            compress(
                collected,
                &self.config.compression.to_info(),
                self.sink.as_ref(),
                &self.cancel,
            )
        })?;
        let headed = self.stage(Stage::Header, || make_header(compressed, &self.config))?;
        let (footer, container_size) = self.stage(Stage::Assemble, || {
            let (footer, size) = write_output(&headed, &stub, &output)?;
            self.sink
                .progress(Stage::Assemble, size, size, &output.to_string_lossy());
            Ok((footer, size))
        })?;
        let Headed { header, stats, .. } = headed;

        let elapsed = started.elapsed();
        info!(
            "Built {} ({} bytes, {} files) in {:.2}s",
            output.display(),
            container_size,
            stats.file_count,
            elapsed.as_secs_f64()
        );

        Ok(BuildReport {
            output,
            header,
            footer,
            stats,
            container_size,
            elapsed,
        })
    }

    fn load_stub(&self) -> Result<Vec<u8>> {
        if let Some(stub) = &self.stub {
            return Ok(stub.clone());
        }
        match &self.config.stub {
            Some(path) => fs::read(path).map_err(|e| InspaError::SourceUnreadable {
                path: path.clone(),
                source: e,
            }),
            None => {
                warn!("No stub configured, the container will not be self-executing");
                Ok(Vec::new())
            }
        }
    }

    /// Run one stage with progress bracketing and stage-tagged errors
    fn stage<T>(&self, stage: Stage, run: impl FnOnce() -> Result<T>) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(InspaError::Cancelled);
        }
        self.sink.started(stage);
        match run() {
            Ok(value) => {
                self.sink.finished(stage);
                Ok(value)
            }
            Err(InspaError::Cancelled) => {
                self.sink.failed(stage, &InspaError::Cancelled);
                Err(InspaError::Cancelled)
            }
            Err(e) => {
                self.sink.failed(stage, &e);
                Err(e.in_stage(stage))
            }
        }
    }
}
