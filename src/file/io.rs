//! Endian-aware primitive conversion used by the module [`crate::file::Parser`] and
//! [`crate::file::ByteWriter`].
//!
//! The [`CilIO`] trait maps every fixed-size primitive onto its little-endian byte array so
//! that the cursor types can read and write generically (`read_le::<u32>()`,
//! `write_le(7u16)`). All module and symbol files handled by this crate are little-endian.
//!
//! # Supported Types
//! - **Unsigned integers**: `u8`, `u16`, `u32`, `u64`
//! - **Signed integers**: `i8`, `i16`, `i32`, `i64`

use crate::Result;

/// Trait for implementing type specific safe readers and writers
///
/// Implemented for all primitives the module format stores. The associated `Bytes` type is the
/// fixed-size array representation of the value.
pub trait CilIO: Sized {
    /// Internal type for reading and writing the bytes of the implementing primitive
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte-array in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Convert T into a byte-array in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $n:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $n];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(
    u64 => 8,
    i64 => 8,
    u32 => 4,
    i32 => 4,
    u16 => 2,
    i16 => 2,
    u8 => 1,
    i8 => 1,
);

/// Reads a `T` from the start of `data` in little-endian byte order.
///
/// # Arguments
/// * `data` - The buffer to read from
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a `T` at `offset` in little-endian byte order and advances `offset` past it.
///
/// # Arguments
/// * `data` - The buffer to read from
/// * `offset` - Position to read at, advanced by `size_of::<T>()` on success
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would pass the end of `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset
        .checked_add(type_len)
        .ok_or_else(|| out_of_bounds_error!())?;
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn test_read_le_primitives() {
        assert_eq!(read_le::<u8>(&TEST_BUFFER).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&TEST_BUFFER).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&TEST_BUFFER).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<u64>(&TEST_BUFFER).unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(read_le::<i8>(&[0xFF]).unwrap(), -1);
        assert_eq!(read_le::<i32>(&[0xFE, 0xFF, 0xFF, 0xFF]).unwrap(), -2);
    }

    #[test]
    fn test_read_le_at_advances() {
        let mut offset = 0;
        let first: u16 = read_le_at(&TEST_BUFFER, &mut offset).unwrap();
        let second: u32 = read_le_at(&TEST_BUFFER, &mut offset).unwrap();

        assert_eq!(first, 0x0201);
        assert_eq!(second, 0x0605_0403);
        assert_eq!(offset, 6);
    }

    #[test]
    fn test_read_out_of_bounds() {
        let mut offset = 6;
        let result = read_le_at::<u32>(&TEST_BUFFER, &mut offset);

        assert!(matches!(result, Err(Error::OutOfBounds { .. })));
        assert_eq!(offset, 6);
    }
}
