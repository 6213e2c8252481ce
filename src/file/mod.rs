//! Byte-level reading and writing primitives.
//!
//! # Key Components
//!
//! - [`crate::file::io::CilIO`] - little-endian conversion for fixed-size primitives
//! - [`crate::file::Parser`] - bounds-checked cursor over a byte slice
//! - [`crate::file::ByteWriter`] - append-only writer producing the same encodings
//!
//! Module and symbol files are always read fully into memory before parsing, so the original
//! files on disk are never held open or mapped while a mod is loaded. This lets cache files be
//! deleted and regenerated while earlier versions are still in use.

pub mod io;
pub mod parser;
pub mod writer;

use std::path::Path;

pub use parser::Parser;
pub use writer::ByteWriter;

use crate::{Error::Empty, Result};

/// Read a whole file into memory.
///
/// # Errors
/// Returns [`crate::Error::FileError`] on I/O failure or [`crate::Error::Empty`] for a
/// zero-length file.
pub fn read_all(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path)?;
    if data.is_empty() {
        return Err(Empty);
    }
    Ok(data)
}
