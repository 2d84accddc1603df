use crate::error::{InspaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Maximum encoded path length accepted by the archive formats (bytes, UTF-8)
pub const MAX_PATH_LENGTH: usize = 4096;

/// One packaged file or directory.
///
/// Serialized into `header.files` as `{path, size, mtime, is_directory}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the packaged root, forward-slash separated
    pub path: String,
    /// Content size in bytes (0 for directories)
    pub size: u64,
    /// Modification time, unix seconds
    pub mtime: u64,
    #[serde(default)]
    pub is_directory: bool,
}

impl FileEntry {
    pub fn file(path: impl Into<String>, size: u64, mtime: u64) -> Self {
        Self {
            path: normalize_path(&path.into()),
            size,
            mtime,
            is_directory: false,
        }
    }

    pub fn directory(path: impl Into<String>, mtime: u64) -> Self {
        Self {
            path: normalize_path(&path.into()),
            size: 0,
            mtime,
            is_directory: true,
        }
    }
}

/// A collected entry plus where its content lives on disk
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub entry: FileEntry,
    pub source: PathBuf,
}

/// Normalize path to forward slashes (cross-platform compatibility)
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Walk `root` and collect every file and directory below it.
///
/// Entries are sorted by relative path; archive encoding and `header.files`
/// both rely on this order. A path is skipped when it contains any of the
/// `excludes` substrings.
pub fn collect_entries(root: &Path, excludes: &[String]) -> Result<Vec<SourceEntry>> {
    if !root.is_dir() {
        return Err(InspaError::SourceUnreadable {
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let mut entries = Vec::new();
    for item in WalkDir::new(root).follow_links(false).min_depth(1) {
        let item = item?;
        let relative = relative_path(root, item.path())?;
        if excludes.iter().any(|e| !e.is_empty() && relative.contains(e.as_str())) {
            continue;
        }

        let metadata = item.metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let entry = if metadata.is_dir() {
            FileEntry::directory(relative, mtime)
        } else if metadata.is_file() {
            FileEntry::file(relative, metadata.len(), mtime)
        } else {
            // Symlinks, sockets and fifos are not packaged
            continue;
        };

        if entry.path.len() > MAX_PATH_LENGTH {
            return Err(InspaError::PathTooLong(entry.path.len()));
        }

        entries.push(SourceEntry {
            entry,
            source: item.path().to_path_buf(),
        });
    }

    entries.sort_by(|a, b| a.entry.path.cmp(&b.entry.path));
    Ok(entries)
}

fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| InspaError::UnsafePath(path.display().to_string()))?;

    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Check that an archive path stays inside the extraction root
pub fn is_safe_path(path: &str) -> bool {
    let normalized = normalize_path(path);
    if normalized.is_empty() || normalized.starts_with('/') || normalized.contains('\0') {
        return false;
    }
    // Windows drive prefixes such as C:foo
    if normalized.len() >= 2 && normalized.as_bytes()[1] == b':' {
        return false;
    }
    !normalized.split('/').any(|part| part == "..")
}

/// Join an archive path onto `root`, refusing anything that escapes it
pub fn safe_join(root: &Path, path: &str) -> Result<PathBuf> {
    if !is_safe_path(path) {
        return Err(InspaError::UnsafePath(path.to_string()));
    }

    let mut out = root.to_path_buf();
    for component in Path::new(&normalize_path(path)).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(InspaError::UnsafePath(path.to_string())),
        }
    }
    Ok(out)
}

/// Unix seconds for a `SystemTime`, clamped at the epoch
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
