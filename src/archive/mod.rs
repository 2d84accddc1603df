//! Archive codec: packs collected entries into one compressed blob and back
//!
//! Two encodings are supported:
//! - `zip`: one deflate entry per file, directories as trailing-slash entries
//! - `zstd`: a single zstd stream of self-describing entry records
//!   (see [`zstd_stream`])

mod entry;
mod zip_codec;
pub mod zstd_stream;

pub use entry::{
    collect_entries, is_safe_path, normalize_path, safe_join, unix_seconds, FileEntry,
    SourceEntry, MAX_PATH_LENGTH,
};
pub use zip_codec::{ZipArchiveReader, ZipArchiveWriter};
pub use zstd_stream::{EntryContent, ZstdArchiveReader, ZstdArchiveWriter, CHUNK_SIZE};

use crate::error::{InspaError, Result};
use crate::progress::{CancelToken, ProgressSink, Stage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Compression algorithm for the archive segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgo {
    #[default]
    Zstd,
    Zip,
}

impl CompressionAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgo::Zstd => "zstd",
            CompressionAlgo::Zip => "zip",
        }
    }

    /// Level used when the configuration does not name one
    pub fn default_level(&self) -> i32 {
        match self {
            CompressionAlgo::Zstd => 10,
            CompressionAlgo::Zip => 6,
        }
    }

    /// Inclusive range of accepted compression levels
    pub fn level_range(&self) -> (i32, i32) {
        match self {
            CompressionAlgo::Zstd => (1, 22),
            CompressionAlgo::Zip => (0, 9),
        }
    }
}

impl fmt::Display for CompressionAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgo {
    type Err = InspaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zstd" => Ok(CompressionAlgo::Zstd),
            "zip" => Ok(CompressionAlgo::Zip),
            other => Err(InspaError::Config(format!(
                "Unknown compression algorithm '{}' (expected zstd or zip)",
                other
            ))),
        }
    }
}

/// Streaming archive encoder over either algorithm
pub struct ArchiveEncoder<W: Write> {
    inner: EncoderInner<W>,
}

enum EncoderInner<W: Write> {
    Zstd(ZstdArchiveWriter<W>),
    // zip needs Seek, so it is staged in memory and copied out on finish
    Zip(ZipArchiveWriter<Cursor<Vec<u8>>>, W),
}

impl<W: Write> ArchiveEncoder<W> {
    pub fn new(writer: W, algo: CompressionAlgo, level: i32) -> Result<Self> {
        let inner = match algo {
            CompressionAlgo::Zstd => EncoderInner::Zstd(ZstdArchiveWriter::new(writer, level)?),
            CompressionAlgo::Zip => {
                EncoderInner::Zip(ZipArchiveWriter::new(Cursor::new(Vec::new()), level), writer)
            }
        };
        Ok(Self { inner })
    }

    pub fn add_directory(&mut self, entry: &FileEntry) -> Result<()> {
        match &mut self.inner {
            EncoderInner::Zstd(w) => w.add_directory(entry),
            EncoderInner::Zip(w, _) => w.add_directory(entry),
        }
    }

    pub fn add_file<R: Read>(&mut self, entry: &FileEntry, content: R) -> Result<()> {
        match &mut self.inner {
            EncoderInner::Zstd(w) => w.add_file(entry, content),
            EncoderInner::Zip(w, _) => w.add_file(entry, content),
        }
    }

    pub fn add_source(&mut self, source: &SourceEntry) -> Result<()> {
        match &mut self.inner {
            EncoderInner::Zstd(w) => w.add_source(source),
            EncoderInner::Zip(w, _) => w.add_source(source),
        }
    }

    pub fn finish(self) -> Result<W> {
        match self.inner {
            EncoderInner::Zstd(w) => w.finish(),
            EncoderInner::Zip(w, mut out) => {
                let staged = w.finish()?.into_inner();
                out.write_all(&staged)?;
                Ok(out)
            }
        }
    }
}

/// Encode collected entries, reading content from disk.
///
/// Emits one `Progress` event per entry on [`Stage::Compress`].
pub fn encode(
    entries: &[SourceEntry],
    algo: CompressionAlgo,
    level: i32,
    sink: &dyn ProgressSink,
) -> Result<Vec<u8>> {
    encode_to(Vec::new(), entries, algo, level, sink, None)
}

/// Encode collected entries into an arbitrary writer.
///
/// Cancellation is checked before each entry.
pub fn encode_to<W: Write>(
    writer: W,
    entries: &[SourceEntry],
    algo: CompressionAlgo,
    level: i32,
    sink: &dyn ProgressSink,
    cancel: Option<&CancelToken>,
) -> Result<W> {
    let total: u64 = entries.iter().map(|e| e.entry.size).sum();
    let mut encoder = ArchiveEncoder::new(writer, algo, level)?;
    let mut processed = 0u64;

    for source in entries {
        if cancel.map_or(false, |c| c.is_cancelled()) {
            return Err(InspaError::Cancelled);
        }
        encoder.add_source(source)?;
        processed += source.entry.size;
        sink.progress(Stage::Compress, processed, total, &source.entry.path);
    }

    let out = encoder.finish()?;
    info!(
        "Encoded {} entries ({} bytes) with {}",
        entries.len(),
        total,
        algo
    );
    Ok(out)
}

/// Encode entries whose content is already in memory
pub fn encode_memory(
    entries: &[(FileEntry, Vec<u8>)],
    algo: CompressionAlgo,
    level: i32,
) -> Result<Vec<u8>> {
    let mut encoder = ArchiveEncoder::new(Vec::new(), algo, level)?;
    for (entry, content) in entries {
        if entry.is_directory {
            encoder.add_directory(entry)?;
        } else {
            encoder.add_file(entry, &content[..])?;
        }
    }
    encoder.finish()
}

/// Walk every entry of an encoded archive.
///
/// `visit` receives each entry with a reader over its content; anything it
/// leaves unread is skipped. `total` is only used for progress reporting.
/// Cancellation is checked before each entry.
pub fn decode_with<F>(
    bytes: &[u8],
    algo: CompressionAlgo,
    total: u64,
    sink: &dyn ProgressSink,
    cancel: Option<&CancelToken>,
    mut visit: F,
) -> Result<usize>
where
    F: FnMut(&FileEntry, &mut dyn Read) -> Result<()>,
{
    let mut processed = 0u64;
    let mut count = 0usize;
    let mut step = |entry: &FileEntry, content: &mut dyn Read| -> Result<()> {
        if cancel.map_or(false, |c| c.is_cancelled()) {
            return Err(InspaError::Cancelled);
        }
        visit(entry, content)?;
        processed += entry.size;
        count += 1;
        sink.progress(Stage::Extract, processed, total, &entry.path);
        Ok(())
    };

    match algo {
        CompressionAlgo::Zip => {
            let mut reader = ZipArchiveReader::new(Cursor::new(bytes))?;
            reader.for_each_entry(&mut step)?;
        }
        CompressionAlgo::Zstd => {
            let mut reader = ZstdArchiveReader::new(bytes)?;
            while let Some(entry) = reader.next_entry()? {
                let mut content = reader.content();
                step(&entry, &mut content)?;
            }
        }
    }

    Ok(count)
}

/// Decode a whole archive into memory
pub fn decode(bytes: &[u8], algo: CompressionAlgo) -> Result<Vec<(FileEntry, Vec<u8>)>> {
    let mut out = Vec::new();
    decode_with(bytes, algo, 0, &crate::progress::NoProgress, None, |entry, content| {
        let mut data = Vec::with_capacity(entry.size.min(CHUNK_SIZE as u64) as usize);
        content
            .read_to_end(&mut data)
            .map_err(|e| InspaError::DecompressionFailed(format!("{}: {}", entry.path, e)))?;
        out.push((entry.clone(), data));
        Ok(())
    })?;
    Ok(out)
}

/// Extraction policy
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Record write failures and keep going instead of aborting
    pub continue_on_io_error: bool,
    /// Set each file's modification time from the archive
    pub restore_mtime: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            continue_on_io_error: false,
            restore_mtime: true,
        }
    }
}

/// What an extraction wrote
#[derive(Debug, Clone, Default)]
pub struct ExtractSummary {
    pub files_written: usize,
    pub directories_created: usize,
    pub bytes_written: u64,
    /// Entries that could not be written, with the reason
    pub failed: Vec<(String, String)>,
    /// Stopped early by the cancel token
    pub cancelled: bool,
}

/// Extract an encoded archive under `dest`.
///
/// Writes are not transactional: on error or cancellation everything already
/// written stays on disk. Cancellation is not an error; it is reported through
/// [`ExtractSummary::cancelled`].
pub fn extract_to(
    bytes: &[u8],
    algo: CompressionAlgo,
    dest: &Path,
    total: u64,
    options: &ExtractOptions,
    sink: &dyn ProgressSink,
    cancel: Option<&CancelToken>,
) -> Result<ExtractSummary> {
    let (summary, result) = extract_partial(bytes, algo, dest, total, options, sink, cancel);
    result.map(|_| summary)
}

/// Like [`extract_to`], but the summary of what reached the disk is returned
/// even when extraction aborts.
pub fn extract_partial(
    bytes: &[u8],
    algo: CompressionAlgo,
    dest: &Path,
    total: u64,
    options: &ExtractOptions,
    sink: &dyn ProgressSink,
    cancel: Option<&CancelToken>,
) -> (ExtractSummary, Result<()>) {
    let mut summary = ExtractSummary::default();
    if let Err(e) = fs::create_dir_all(dest) {
        return (summary, Err(e.into()));
    }
    let mut buffer = vec![0u8; CHUNK_SIZE];

    let result = decode_with(bytes, algo, total, sink, cancel, |entry, content| {
        let target = safe_join(dest, &entry.path)?;

        if entry.is_directory {
            fs::create_dir_all(&target)?;
            summary.directories_created += 1;
            return Ok(());
        }

        match write_entry(&target, entry, content, options, &mut buffer) {
            Ok(written) => {
                debug!("Extracted {} ({} bytes)", entry.path, written);
                summary.files_written += 1;
                summary.bytes_written += written;
                Ok(())
            }
            Err(InspaError::Io(e)) if options.continue_on_io_error => {
                warn!("Failed to write {}: {}", entry.path, e);
                summary.failed.push((entry.path.clone(), e.to_string()));
                Ok(())
            }
            Err(e) => Err(e),
        }
    });

    match result {
        Ok(_) => {}
        Err(InspaError::Cancelled) => {
            warn!("Extraction cancelled after {} files", summary.files_written);
            summary.cancelled = true;
        }
        Err(e) => {
            warn!(
                "Extraction aborted after {} files: {}",
                summary.files_written, e
            );
            return (summary, Err(e));
        }
    }

    info!(
        "Extracted {} files ({} bytes) to {}",
        summary.files_written,
        summary.bytes_written,
        dest.display()
    );
    (summary, Ok(()))
}

/// Write one file. Read-side failures are decode errors, write-side are I/O.
fn write_entry(
    target: &Path,
    entry: &FileEntry,
    content: &mut dyn Read,
    options: &ExtractOptions,
    buffer: &mut [u8],
) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(target)?;
    let mut out = BufWriter::new(file);
    let mut written = 0u64;
    loop {
        let n = match content.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(InspaError::DecompressionFailed(format!(
                    "{}: {}",
                    entry.path, e
                )))
            }
        };
        out.write_all(&buffer[..n])?;
        written += n as u64;
    }

    let file = out.into_inner().map_err(|e| e.into_error())?;
    if options.restore_mtime {
        file.set_modified(UNIX_EPOCH + Duration::from_secs(entry.mtime))?;
    }
    Ok(written)
}

/// Copy exactly `size` bytes from `content` into `out` in chunk-sized pieces
pub(crate) fn copy_exact<R: Read, W: Write>(
    mut content: R,
    mut out: W,
    size: u64,
    path: &str,
    buffer: &mut [u8],
) -> Result<()> {
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let n = match content.read(&mut buffer[..want]) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(InspaError::Io(e)),
        };
        if n == 0 {
            return Err(InspaError::CompressionFailed(format!(
                "{} shrank while packing ({} bytes missing)",
                path, remaining
            )));
        }
        out.write_all(&buffer[..n])
            .map_err(|e| InspaError::CompressionFailed(format!("Write failed for {}: {}", path, e)))?;
        remaining -= n as u64;
    }
    Ok(())
}
