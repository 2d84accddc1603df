use crate::archive::copy_exact;
use crate::archive::entry::{FileEntry, SourceEntry, MAX_PATH_LENGTH};
use crate::error::{InspaError, Result};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use tracing::{debug, warn};

/// Content is moved through the compressor in chunks of this size (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Per-entry record inside the zstd stream
///
/// Structure (variable length, little-endian):
/// - Path Length: uint32 (4 bytes), must be in (0, 4096]
/// - Path: UTF-8 bytes (path_len)
/// - Size: uint64 (8 bytes)
/// - Modified Timestamp: uint64 (8 bytes)
/// - Is Directory: uint8 (1 byte)
/// - Content: `size` raw bytes, only when is_directory == 0
///
/// Records follow each other with no outer framing. The stream ends where the
/// next 4-byte length prefix cannot be read.
impl FileEntry {
    /// Write the record header (everything but the content)
    pub fn write_record<W: Write>(&self, mut writer: W) -> Result<usize> {
        let path_bytes = self.path.as_bytes();
        if path_bytes.is_empty() || path_bytes.len() > MAX_PATH_LENGTH {
            return Err(InspaError::PathTooLong(path_bytes.len()));
        }

        writer.write_all(&(path_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(path_bytes)?;
        writer.write_all(&self.size.to_le_bytes())?;
        writer.write_all(&self.mtime.to_le_bytes())?;
        writer.write_all(&[self.is_directory as u8])?;

        Ok(self.record_header_size())
    }

    /// Read a record header.
    ///
    /// Returns `Ok(None)` at end of stream. A short read on the length prefix
    /// and an out-of-range path length both count as end of stream.
    pub fn read_record<R: Read>(mut reader: R) -> Result<Option<Self>> {
        let mut len_buf = [0u8; 4];
        let got = read_full(&mut reader, &mut len_buf);
        match got {
            Ok(4) => {}
            Ok(0) => return Ok(None),
            Ok(n) => {
                warn!("Short read ({} bytes) on record length prefix, treating as end of stream", n);
                return Ok(None);
            }
            Err(e) => {
                warn!("Read failed on record length prefix ({}), treating as end of stream", e);
                return Ok(None);
            }
        }

        let path_len = u32::from_le_bytes(len_buf) as usize;
        if path_len == 0 || path_len > MAX_PATH_LENGTH {
            warn!(
                "Record path length {} outside (0, {}], treating as end of stream",
                path_len, MAX_PATH_LENGTH
            );
            return Ok(None);
        }

        let mut path_buf = vec![0u8; path_len];
        reader.read_exact(&mut path_buf).map_err(truncated)?;
        let path = String::from_utf8(path_buf).map_err(|e| {
            InspaError::DecompressionFailed(format!("Invalid UTF-8 in entry path: {}", e))
        })?;

        let size = read_u64(&mut reader)?;
        let mtime = read_u64(&mut reader)?;

        let mut dir_flag = [0u8; 1];
        reader.read_exact(&mut dir_flag).map_err(truncated)?;
        let is_directory = dir_flag[0] != 0;

        Ok(Some(Self {
            path,
            size: if is_directory { 0 } else { size },
            mtime,
            is_directory,
        }))
    }

    /// Calculate the size of the record header when written
    pub fn record_header_size(&self) -> usize {
        4 + // Path length
        self.path.len() +
        8 + // Size
        8 + // Modified timestamp
        1 // Directory flag
    }
}

/// Streaming writer for the zstd archive format
pub struct ZstdArchiveWriter<W: Write> {
    encoder: zstd::stream::write::Encoder<'static, W>,
    buffer: Vec<u8>,
    content_bytes: u64,
    entry_count: usize,
}

impl<W: Write> ZstdArchiveWriter<W> {
    /// Start a new zstd stream on top of `writer`
    pub fn new(writer: W, level: i32) -> Result<Self> {
        let mut encoder = zstd::stream::write::Encoder::new(writer, level)
            .map_err(|e| InspaError::CompressionFailed(format!("Zstd init failed: {}", e)))?;
        encoder
            .include_checksum(true)
            .map_err(|e| InspaError::CompressionFailed(format!("Zstd init failed: {}", e)))?;

        Ok(Self {
            encoder,
            buffer: vec![0u8; CHUNK_SIZE],
            content_bytes: 0,
            entry_count: 0,
        })
    }

    /// Add a directory record (no content)
    pub fn add_directory(&mut self, entry: &FileEntry) -> Result<()> {
        let mut dir = entry.clone();
        dir.is_directory = true;
        dir.size = 0;
        dir.write_record(&mut self.encoder)?;
        self.entry_count += 1;
        Ok(())
    }

    /// Add a file record followed by exactly `entry.size` bytes from `content`
    pub fn add_file<R: Read>(&mut self, entry: &FileEntry, content: R) -> Result<()> {
        entry.write_record(&mut self.encoder)?;
        copy_exact(content, &mut self.encoder, entry.size, &entry.path, &mut self.buffer)?;

        self.content_bytes += entry.size;
        self.entry_count += 1;
        Ok(())
    }

    /// Add a collected entry, reading file content from disk
    pub fn add_source(&mut self, source: &SourceEntry) -> Result<()> {
        if source.entry.is_directory {
            return self.add_directory(&source.entry);
        }

        let file = File::open(&source.source).map_err(|e| InspaError::SourceUnreadable {
            path: source.source.clone(),
            source: e,
        })?;
        self.add_file(&source.entry, BufReader::new(file))
            .map_err(|e| match e {
                InspaError::Io(io) => InspaError::SourceUnreadable {
                    path: source.source.clone(),
                    source: io,
                },
                other => other,
            })
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn content_bytes(&self) -> u64 {
        self.content_bytes
    }

    /// Close the zstd frame and hand back the inner writer
    pub fn finish(self) -> Result<W> {
        debug!(
            "Finishing zstd stream: {} entries, {} content bytes",
            self.entry_count, self.content_bytes
        );
        self.encoder
            .finish()
            .map_err(|e| InspaError::CompressionFailed(format!("Zstd finish failed: {}", e)))
    }
}

/// Incremental reader for the zstd archive format
///
/// ```no_run
/// # use inspa_rs::archive::ZstdArchiveReader;
/// # use std::io::Read;
/// # fn main() -> inspa_rs::Result<()> {
/// # let bytes: Vec<u8> = Vec::new();
/// let mut reader = ZstdArchiveReader::new(&bytes[..])?;
/// while let Some(entry) = reader.next_entry()? {
///     let mut content = Vec::new();
///     reader.content().read_to_end(&mut content)?;
///     println!("{} ({} bytes)", entry.path, content.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ZstdArchiveReader<R: Read> {
    decoder: zstd::stream::read::Decoder<'static, BufReader<R>>,
    remaining: u64,
    done: bool,
}

impl<R: Read> ZstdArchiveReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let decoder = zstd::stream::read::Decoder::new(reader)
            .map_err(|e| InspaError::DecompressionFailed(format!("Zstd init failed: {}", e)))?;
        Ok(Self {
            decoder,
            remaining: 0,
            done: false,
        })
    }

    /// Advance to the next entry, skipping unread content of the current one
    pub fn next_entry(&mut self) -> Result<Option<FileEntry>> {
        if self.done {
            return Ok(None);
        }

        if self.remaining > 0 {
            let skipped = io::copy(
                &mut (&mut self.decoder).take(self.remaining),
                &mut io::sink(),
            )
            .map_err(truncated)?;
            if skipped != self.remaining {
                return Err(InspaError::DecompressionFailed(format!(
                    "Stream ended {} bytes inside an entry",
                    self.remaining - skipped
                )));
            }
            self.remaining = 0;
        }

        match FileEntry::read_record(&mut self.decoder)? {
            Some(entry) => {
                self.remaining = if entry.is_directory { 0 } else { entry.size };
                Ok(Some(entry))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Reader over the current entry's content, bounded to its size
    pub fn content(&mut self) -> EntryContent<'_, R> {
        EntryContent { archive: self }
    }
}

/// Bounded view of one entry's content inside the decompression stream
pub struct EntryContent<'a, R: Read> {
    archive: &'a mut ZstdArchiveReader<R>,
}

impl<R: Read> Read for EntryContent<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.archive.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let max = buf.len().min(self.archive.remaining.min(usize::MAX as u64) as usize);
        let n = self.archive.decoder.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "zstd stream ended inside an entry",
            ));
        }
        self.archive.remaining -= n as u64;
        Ok(n)
    }
}

/// Read until `buf` is full or the reader is exhausted
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn truncated(e: io::Error) -> InspaError {
    InspaError::DecompressionFailed(format!("Truncated entry record: {}", e))
}

fn read_u64<R: Read>(mut reader: R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(u64::from_le_bytes(buf))
}
