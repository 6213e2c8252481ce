//! Hashing helpers shared by the cache validator and mod metadata.
//!
//! All checksums persisted by this crate are lowercase hex strings, so that they can be
//! written one per line into `.sum` manifests and compared after trimming.

use std::{fmt::Write, path::Path};

use md5::{Digest, Md5};
use sha1::Sha1;

use crate::Result;

/// Lowercase hex encoding of `bytes`.
#[must_use]
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut hex_string = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut hex_string, "{byte:02x}");
    }
    hex_string
}

/// MD5 of `data` as hex.
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    bytes_to_hex(&Md5::digest(data))
}

/// SHA-1 of `data` as hex.
#[must_use]
pub fn sha1_hex(data: &[u8]) -> String {
    bytes_to_hex(&Sha1::digest(data))
}

/// MD5 of the file at `path` as hex.
///
/// # Errors
/// Returns [`crate::Error::FileError`] if the file cannot be read.
pub fn md5_file_hex(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    Ok(md5_hex(&data))
}
