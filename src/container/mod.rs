//! Installer container framing
//!
//! ```text
//! [stub bytes]
//! [header_len: u64 LE]        <- footer.header_offset
//! [header JSON]
//! [compressed archive]
//! [legacy sha256: 32 bytes]
//! [footer: 72 bytes]
//! ```

mod footer;
mod reader;
mod writer;

pub use footer::{
    FooterRecord, FOOTER_MAGIC, FOOTER_SIZE, LEGACY_HASH_SIZE, LENGTH_PREFIX_SIZE,
};
pub use reader::{parse_bytes, parse_file, ContainerReader, LegacyScan, LocatedBy, ParsedContainer};
pub use writer::{assemble, container_size, write_container};
