//! Cursor-based byte stream parser for module and symbol files.
//!
//! [`Parser`] keeps a position inside a borrowed byte slice and offers bounds-checked reads
//! of the primitive encodings used by the module format: little-endian fixed-size integers,
//! ECMA-335 compressed unsigned integers, 7-bit length-prefixed UTF-8 strings and raw GUIDs.
//! Every read validates the remaining length first, so truncated or hostile input surfaces as
//! [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] instead of a panic.
//!
//! # Examples
//!
//! ```rust
//! use modscope::file::Parser;
//!
//! let data = [0x01, 0x02, 0x81, 0x00, 0x05, b'H', b'e', b'l', b'l', b'o'];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u16>()?, 0x0201);
//! assert_eq!(parser.read_compressed_uint()?, 0x100);
//! assert_eq!(parser.read_prefixed_string_utf8()?, "Hello");
//! assert!(!parser.has_more_data());
//! # Ok::<(), modscope::Error>(())
//! ```

use uguid::Guid;

use crate::{
    file::io::{read_le_at, CilIO},
    Result,
};

/// A generic binary data parser for reading module structures.
///
/// The parser owns no data; it borrows the input for its lifetime `'a` and tracks the
/// current read position.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current read position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Read a value of type `T` in little-endian byte order.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read `length` raw bytes as a borrowed slice.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .ok_or_else(|| out_of_bounds_error!())?;
        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Consume `magic` from the current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the bytes differ, or
    /// [`crate::Error::OutOfBounds`] if the input is too short.
    pub fn expect_magic(&mut self, magic: &[u8]) -> Result<()> {
        let found = self.read_bytes(magic.len())?;
        if found != magic {
            return Err(malformed_error!(
                "Invalid magic - expected {:?}, found {:?}",
                magic,
                found
            ));
        }
        Ok(())
    }

    /// Read a compressed unsigned integer (1, 2 or 4 bytes, ECMA-335 II.23.2).
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length or
    /// [`crate::Error::Malformed`] for an invalid leading byte.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        if (first_byte & 0xE0) == 0xC0 {
            let tail = self.read_bytes(3)?;
            return Ok(((u32::from(first_byte) & 0x1F) << 24)
                | (u32::from(tail[0]) << 16)
                | (u32::from(tail[1]) << 8)
                | u32::from(tail[2]));
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed count and convert it to `usize`, refusing counts that cannot fit in the
    /// remaining input (each element needs at least one byte).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an implausible count.
    pub fn read_count(&mut self) -> Result<usize> {
        let count = self.read_compressed_uint()? as usize;
        if count > self.remaining() {
            return Err(malformed_error!(
                "Element count {} exceeds remaining {} bytes at offset {}",
                count,
                self.remaining(),
                self.position
            ));
        }
        Ok(count)
    }

    /// Read a 7-bit encoded integer, as used for string length prefixes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncation or [`crate::Error::Malformed`] if
    /// the value does not fit into a `u32`.
    pub fn read_7bit_encoded_int(&mut self) -> Result<u32> {
        let mut value = 0u32;
        let mut shift = 0;

        loop {
            let byte = self.read_le::<u8>()?;
            value |= u32::from(byte & 0x7F) << shift;
            shift += 7;

            if (byte & 0x80) == 0 {
                break;
            }

            if shift >= 32 {
                return Err(malformed_error!(
                    "7-bit encoded integer overflow after {} bits",
                    shift
                ));
            }
        }

        Ok(value)
    }

    /// Read a 7-bit length-prefixed UTF-8 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length or
    /// [`crate::Error::Malformed`] for invalid UTF-8 encoding.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_7bit_encoded_int()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(length)?;

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                start + length,
                e.utf8_error()
            )
        })
    }

    /// Read a 16 byte GUID in its mixed-endian wire layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than 16 bytes remain.
    pub fn read_guid(&mut self) -> Result<Guid> {
        let bytes = self.read_bytes(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Guid::from_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_compressed_uint() {
        let test_cases = vec![
            (vec![0x03], 0x03),
            (vec![0x7F], 0x7F),
            (vec![0x80, 0x80], 0x80),
            (vec![0xAE, 0x57], 0x2E57),
            (vec![0xBF, 0xFF], 0x3FFF),
            (vec![0xC0, 0x00, 0x40, 0x00], 0x4000),
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_uint().unwrap(), expected);
            assert!(!parser.has_more_data());
        }
    }

    #[test]
    fn test_read_compressed_uint_invalid() {
        let mut parser = Parser::new(&[0xFF]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_read_prefixed_string() {
        let data = [0x03, b'a', b'b', b'c', 0x05, b'x'];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "abc");
        assert!(matches!(
            parser.read_prefixed_string_utf8(),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_read_count_rejects_huge() {
        let data = [0x8F, 0xFF, 0x00];
        let mut parser = Parser::new(&data);
        assert!(matches!(parser.read_count(), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_expect_magic() {
        let mut parser = Parser::new(b"MSCPrest");
        parser.expect_magic(b"MSCP").unwrap();
        assert_eq!(parser.pos(), 4);

        let mut parser = Parser::new(b"XXXX");
        assert!(parser.expect_magic(b"MSCP").is_err());
    }

    #[test]
    fn test_read_guid() {
        let raw: Vec<u8> = (0u8..16).collect();
        let mut parser = Parser::new(&raw);
        let guid = parser.read_guid().unwrap();
        assert_eq!(guid.to_bytes().to_vec(), raw);
    }
}
