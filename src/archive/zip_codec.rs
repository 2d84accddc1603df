use crate::archive::copy_exact;
use crate::archive::entry::{is_safe_path, normalize_path, FileEntry, SourceEntry};
use crate::archive::zstd_stream::CHUNK_SIZE;
use crate::error::{InspaError, Result};
use chrono::{Datelike, NaiveDate, Timelike};
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod as ZipMethod, DateTime, ZipArchive, ZipWriter};

/// Extended timestamp extra field ("UT"), carries the exact unix mtime
const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;

/// Private extra field ("In") with a 64-bit mtime, for times past 2106
const WIDE_MTIME_ID: u16 = 0x6E49;

/// Deflate-based zip writer, one zip entry per `FileEntry`
pub struct ZipArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    level: i32,
    buffer: Vec<u8>,
    entry_count: usize,
}

impl<W: Write + Seek> ZipArchiveWriter<W> {
    pub fn new(writer: W, level: i32) -> Self {
        Self {
            zip: ZipWriter::new(writer),
            level: level.clamp(0, 9),
            buffer: vec![0u8; CHUNK_SIZE],
            entry_count: 0,
        }
    }

    fn options(&self, entry: &FileEntry) -> FileOptions {
        FileOptions::default()
            .compression_method(ZipMethod::Deflated)
            .compression_level(Some(self.level))
            .last_modified_time(dos_time(entry.mtime))
            .large_file(entry.size >= u32::MAX as u64)
    }

    fn start_entry(&mut self, name: String, entry: &FileEntry) -> Result<()> {
        let options = self.options(entry);
        self.zip.start_file_with_extra_data(name, options)?;
        self.zip.write_all(&mtime_extra(entry.mtime))?;
        self.zip.end_extra_data()?;
        Ok(())
    }

    /// Add a directory as a trailing-slash entry with no content
    pub fn add_directory(&mut self, entry: &FileEntry) -> Result<()> {
        let mut name = normalize_path(&entry.path);
        if !name.ends_with('/') {
            name.push('/');
        }
        self.start_entry(name, entry)?;
        self.entry_count += 1;
        Ok(())
    }

    /// Add a file with exactly `entry.size` bytes from `content`
    pub fn add_file<R: Read>(&mut self, entry: &FileEntry, content: R) -> Result<()> {
        self.start_entry(normalize_path(&entry.path), entry)?;
        copy_exact(content, &mut self.zip, entry.size, &entry.path, &mut self.buffer)?;
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

    /// Write the central directory and hand back the inner writer
    pub fn finish(mut self) -> Result<W> {
        debug!("Finishing zip archive: {} entries", self.entry_count);
        Ok(self.zip.finish()?)
    }
}

/// Zip reader that refuses entries escaping the extraction root
pub struct ZipArchiveReader<R: Read + Seek> {
    archive: ZipArchive<R>,
}

impl<R: Read + Seek> ZipArchiveReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let archive = ZipArchive::new(reader)
            .map_err(|e| InspaError::DecompressionFailed(format!("Invalid zip archive: {}", e)))?;
        Ok(Self { archive })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    /// Visit every entry in archive order.
    ///
    /// An entry named with `..` components or an absolute path aborts the
    /// walk with `UnsafePath` before any of its content is handed out.
    pub fn for_each_entry<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&FileEntry, &mut dyn Read) -> Result<()>,
    {
        for index in 0..self.archive.len() {
            let mut file = self
                .archive
                .by_index(index)
                .map_err(|e| InspaError::DecompressionFailed(format!("Zip entry {}: {}", index, e)))?;

            let raw_name = file.name().to_string();
            if !is_safe_path(&raw_name) {
                warn!("Rejecting zip entry with unsafe path: {}", raw_name);
                return Err(InspaError::UnsafePath(raw_name));
            }

            let is_directory = file.is_dir();
            let path = normalize_path(raw_name.trim_end_matches('/'));
            let mtime = extra_mtime(file.extra_data())
                .unwrap_or_else(|| unix_from_dos(file.last_modified()));
            let entry = FileEntry {
                path,
                size: if is_directory { 0 } else { file.size() },
                mtime,
                is_directory,
            };

            visit(&entry, &mut file)?;
        }
        Ok(())
    }
}

/// Extra field block for `mtime`: "UT" when it fits in 32 bits, else "In"
fn mtime_extra(mtime: u64) -> Vec<u8> {
    let mut extra = Vec::with_capacity(12);
    match u32::try_from(mtime) {
        Ok(short) => {
            extra.extend_from_slice(&EXTENDED_TIMESTAMP_ID.to_le_bytes());
            extra.extend_from_slice(&5u16.to_le_bytes());
            extra.push(0x01); // modification time present
            extra.extend_from_slice(&short.to_le_bytes());
        }
        Err(_) => {
            extra.extend_from_slice(&WIDE_MTIME_ID.to_le_bytes());
            extra.extend_from_slice(&8u16.to_le_bytes());
            extra.extend_from_slice(&mtime.to_le_bytes());
        }
    }
    extra
}

/// Pull the modification time out of the extra field blocks
fn extra_mtime(extra: &[u8]) -> Option<u64> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let len = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let data = extra.get(pos + 4..pos + 4 + len)?;
        match id {
            WIDE_MTIME_ID if data.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(data);
                return Some(u64::from_le_bytes(raw));
            }
            EXTENDED_TIMESTAMP_ID if data.len() >= 5 && data[0] & 0x01 != 0 => {
                return Some(u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as u64);
            }
            _ => {}
        }
        pos += 4 + len;
    }
    None
}

fn dos_time(mtime: u64) -> DateTime {
    i64::try_from(mtime)
        .ok()
        .and_then(|secs| chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0))
        .map(|t| t.naive_utc())
        .and_then(|t| {
            DateTime::from_date_and_time(
                u16::try_from(t.year()).ok()?,
                t.month() as u8,
                t.day() as u8,
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

fn unix_from_dos(time: DateTime) -> u64 {
    NaiveDate::from_ymd_opt(time.year() as i32, time.month() as u32, time.day() as u32)
        .and_then(|d| d.and_hms_opt(time.hour() as u32, time.minute() as u32, time.second() as u32))
        .map(|t| t.and_utc().timestamp().max(0) as u64)
        .unwrap_or(0)
}
