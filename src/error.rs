use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::progress::Stage;

/// Result type for inspa operations
pub type Result<T> = std::result::Result<T, InspaError>;

/// Unified error type for all inspa operations
#[derive(Debug, Error)]
pub enum InspaError {
    // Container structure errors
    #[error("Not an Inspa installer: {0}")]
    NotAnInstaller(String),

    #[error("Corrupt Inspa installer: {0}")]
    CorruptContainer(String),

    #[error("Unsupported header schema version {found} (expected {expected})")]
    UnsupportedSchema { found: u64, expected: u32 },

    #[error("Invalid footer record: {0}")]
    InvalidFooter(String),

    // Integrity errors
    #[error(
        "Header length mismatch at offset {offset}: footer says {footer_len}, length prefix says {prefix_len}"
    )]
    HeaderLengthMismatch {
        offset: u64,
        footer_len: u64,
        prefix_len: u64,
    },

    #[error("Archive digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    // Codec errors
    #[error("Cannot read source file {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("Unsafe entry path rejected: {0}")]
    UnsafePath(String),

    #[error("Path too long: {0} bytes (max 4096)")]
    PathTooLong(usize),

    #[error("Zip error: {0}")]
    Zip(String),

    // Post-install errors
    #[error("Script '{command}' failed: {reason}")]
    Script { command: String, reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<InspaError>,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl InspaError {
    /// Wrap an error with the pipeline stage it came from
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ InspaError::Stage { .. } => already,
            other => InspaError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Container could not be located or trusted. Never downgraded to a warning.
    pub fn is_structural(&self) -> bool {
        match self {
            InspaError::NotAnInstaller(_)
            | InspaError::CorruptContainer(_)
            | InspaError::UnsupportedSchema { .. }
            | InspaError::InvalidFooter(_)
            | InspaError::HeaderLengthMismatch { .. }
            | InspaError::DigestMismatch { .. } => true,
            InspaError::Stage { source, .. } => source.is_structural(),
            _ => false,
        }
    }

    /// Compression or decompression failure
    pub fn is_codec(&self) -> bool {
        match self {
            InspaError::SourceUnreadable { .. }
            | InspaError::CompressionFailed(_)
            | InspaError::DecompressionFailed(_)
            | InspaError::UnsafePath(_)
            | InspaError::PathTooLong(_)
            | InspaError::Zip(_) => true,
            InspaError::Stage { source, .. } => source.is_codec(),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for InspaError {
    fn from(err: toml::de::Error) -> Self {
        InspaError::Toml(err.to_string())
    }
}

impl From<zip::result::ZipError> for InspaError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => InspaError::Io(e),
            other => InspaError::Zip(other.to_string()),
        }
    }
}

impl From<walkdir::Error> for InspaError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
        let msg = err.to_string();
        let source = err
            .into_io_error()
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, msg));
        InspaError::SourceUnreadable { path, source }
    }
}
