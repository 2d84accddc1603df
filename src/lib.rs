//! Inspa-rs: self-extracting installer containers
//!
//! An installer is a single executable laid out as:
//! - a runtime stub (opaque bytes)
//! - a length-prefixed JSON header (product, install rules, file manifest,
//!   post-install actions, build provenance)
//! - a compressed archive (zip, or zstd with per-entry framing)
//! - a legacy SHA-256 trailer and a 72-byte footer for O(1) location
//!
//! Containers written before the footer existed are still located through a
//! best-effort linear scan.
//!
//! # Example
//!
//! ```no_run
//! use inspa_rs::{BuildConfig, Builder, InstallOptions, Installer};
//!
//! // Build an installer
//! let config = BuildConfig::from_file("inspa.toml")?;
//! let report = Builder::new(config).build()?;
//!
//! // Install it somewhere
//! let options = InstallOptions {
//!     install_dir: Some("target/demo-install".into()),
//!     run_scripts: false,
//!     ..InstallOptions::default()
//! };
//! let outcome = Installer::new(&report.output, options).run()?;
//! assert!(outcome.success);
//! # Ok::<(), inspa_rs::InspaError>(())
//! ```

// Core modules
pub mod archive;
pub mod builder;
pub mod config;
pub mod container;
pub mod error;
pub mod header;
pub mod inspect;
pub mod progress;
pub mod runtime;
pub mod worker;

// Re-export commonly used types
pub use archive::{CompressionAlgo, FileEntry, MAX_PATH_LENGTH};
pub use builder::{BuildReport, Builder};
pub use config::BuildConfig;
pub use container::{
    assemble, parse_file, ContainerReader, FooterRecord, LegacyScan, LocatedBy, ParsedContainer,
    FOOTER_MAGIC, FOOTER_SIZE,
};
pub use error::{InspaError, Result};
pub use header::{
    BuildStats, InstallerHeader, PostAction, RunIf, ScriptKind, HEADER_MAGIC, SCHEMA_VERSION,
};
pub use inspect::{inspect, InspectReport};
pub use progress::{CancelToken, ProgressEvent, ProgressSink, Stage};
pub use runtime::{InstallOptions, InstallOutcome, InstallState, Installer};
