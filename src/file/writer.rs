//! Growable byte buffer writer, the inverse of [`crate::file::Parser`].
//!
//! [`ByteWriter`] appends the same encodings the parser reads: little-endian primitives,
//! ECMA-335 compressed unsigned integers, 7-bit length-prefixed UTF-8 strings and GUIDs.

use uguid::Guid;

use crate::{file::io::CilIO, Result};

/// Append-only binary writer backed by a `Vec<u8>`.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the writer and return the produced bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Append a primitive in little-endian byte order.
    pub fn write_le<T: CilIO>(&mut self, value: T) {
        self.buffer.extend_from_slice(value.to_le_bytes().as_ref());
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Append a compressed unsigned integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`, which the encoding
    /// cannot represent.
    pub fn write_compressed_uint(&mut self, value: u32) -> Result<()> {
        if value <= 0x7F {
            self.buffer.push(value as u8);
        } else if value <= 0x3FFF {
            self.buffer.push(((value >> 8) as u8) | 0x80);
            self.buffer.push(value as u8);
        } else if value <= 0x1FFF_FFFF {
            self.buffer.push(((value >> 24) as u8) | 0xC0);
            self.buffer.push((value >> 16) as u8);
            self.buffer.push((value >> 8) as u8);
            self.buffer.push(value as u8);
        } else {
            return Err(malformed_error!(
                "Value {:#x} is too large for compressed encoding",
                value
            ));
        }
        Ok(())
    }

    /// Append a collection length as a compressed unsigned integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the count does not fit the encoding.
    pub fn write_count(&mut self, count: usize) -> Result<()> {
        let value = u32::try_from(count)
            .map_err(|_| malformed_error!("Element count {} does not fit into u32", count))?;
        self.write_compressed_uint(value)
    }

    /// Append a 7-bit encoded integer.
    pub fn write_7bit_encoded_int(&mut self, mut value: u32) {
        while value >= 0x80 {
            self.buffer.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buffer.push(value as u8);
    }

    /// Append a 7-bit length-prefixed UTF-8 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the string is longer than `u32::MAX` bytes.
    pub fn write_prefixed_string_utf8(&mut self, value: &str) -> Result<()> {
        let length = u32::try_from(value.len())
            .map_err(|_| malformed_error!("String of {} bytes is too long", value.len()))?;
        self.write_7bit_encoded_int(length);
        self.buffer.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Append a GUID in the layout [`crate::file::Parser::read_guid`] expects.
    pub fn write_guid(&mut self, guid: &Guid) {
        self.buffer.extend_from_slice(&guid.to_bytes());
    }
}
