//! Portable debug symbols.
//!
//! Symbols live in a sidecar file next to the module (`Foo.dll` / `Foo.pdb`). The file starts
//! with its own magic, followed by the MVID of the module it was produced for; a symbol file
//! whose MVID differs from the module is rejected so that stale symbols are never attached to
//! a rewritten module.
//!
//! # Layout
//!
//! ```text
//! "MSPD" | version u16 | mvid [16] | documents: count, str* |
//! methods: count, (member id str, document cu, points: count, (offset cu, line cu, column u16)*)*
//! ```

use uguid::Guid;

use crate::{
    file::{ByteWriter, Parser},
    Result,
};

/// Magic bytes at the start of every symbol file.
pub const SYMBOLS_MAGIC: &[u8; 4] = b"MSPD";
const SYMBOLS_FORMAT_VERSION: u16 = 1;

/// Maps an instruction offset to a source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    /// Instruction index within the method body
    pub offset: u32,
    /// 1-based source line
    pub line: u32,
    /// 1-based source column
    pub column: u16,
}

/// Debug information for a single method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSymbols {
    /// Member identifier of the method
    pub method: String,
    /// Index into [`SymbolTable::documents`]
    pub document: u32,
    /// Sequence points, ordered by offset
    pub sequence_points: Vec<SequencePoint>,
}

/// Debug symbols of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    /// Source document paths
    pub documents: Vec<String>,
    /// Per-method debug information
    pub methods: Vec<MethodSymbols>,
}

impl SymbolTable {
    /// Parse a symbol file produced for the module with `expected_mvid`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a bad header, an MVID mismatch or a document
    /// index out of range, and [`crate::Error::OutOfBounds`] for truncated input.
    pub fn read(data: &[u8], expected_mvid: &Guid) -> Result<Self> {
        let mut parser = Parser::new(data);
        parser.expect_magic(SYMBOLS_MAGIC)?;

        let version = parser.read_le::<u16>()?;
        if version != SYMBOLS_FORMAT_VERSION {
            return Err(malformed_error!("Unsupported symbol format version {}", version));
        }

        let mvid = parser.read_guid()?;
        if &mvid != expected_mvid {
            return Err(malformed_error!(
                "Symbol file belongs to module {} but module is {}",
                mvid,
                expected_mvid
            ));
        }

        let document_count = parser.read_count()?;
        let mut documents = Vec::with_capacity(document_count);
        for _ in 0..document_count {
            documents.push(parser.read_prefixed_string_utf8()?);
        }

        let method_count = parser.read_count()?;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            let method = parser.read_prefixed_string_utf8()?;
            let document = parser.read_compressed_uint()?;
            if document as usize >= documents.len() {
                return Err(malformed_error!(
                    "Method {} references missing document {}",
                    method,
                    document
                ));
            }

            let point_count = parser.read_count()?;
            let mut sequence_points = Vec::with_capacity(point_count);
            for _ in 0..point_count {
                sequence_points.push(SequencePoint {
                    offset: parser.read_compressed_uint()?,
                    line: parser.read_compressed_uint()?,
                    column: parser.read_le::<u16>()?,
                });
            }

            methods.push(MethodSymbols {
                method,
                document,
                sequence_points,
            });
        }

        Ok(SymbolTable { documents, methods })
    }

    /// Serialize the table for the module with `mvid`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a value exceeds the encodable range.
    pub fn to_bytes(&self, mvid: &Guid) -> Result<Vec<u8>> {
        let mut writer = ByteWriter::new();
        writer.write_bytes(SYMBOLS_MAGIC);
        writer.write_le(SYMBOLS_FORMAT_VERSION);
        writer.write_guid(mvid);

        writer.write_count(self.documents.len())?;
        for document in &self.documents {
            writer.write_prefixed_string_utf8(document)?;
        }

        writer.write_count(self.methods.len())?;
        for method in &self.methods {
            writer.write_prefixed_string_utf8(&method.method)?;
            writer.write_compressed_uint(method.document)?;
            writer.write_count(method.sequence_points.len())?;
            for point in &method.sequence_points {
                writer.write_compressed_uint(point.offset)?;
                writer.write_compressed_uint(point.line)?;
                writer.write_le(point.column);
            }
        }

        Ok(writer.into_inner())
    }

    /// Rename method entries after a member was redirected or renamed.
    pub fn rename_method(&mut self, old_id: &str, new_id: &str) {
        for method in self.methods.iter_mut().filter(|m| m.method == old_id) {
            method.method = new_id.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SymbolTable {
        SymbolTable {
            documents: vec!["src/FooModule.cs".into()],
            methods: vec![MethodSymbols {
                method: "System.Void Foo.FooModule::Load()".into(),
                document: 0,
                sequence_points: vec![
                    SequencePoint {
                        offset: 0,
                        line: 12,
                        column: 9,
                    },
                    SequencePoint {
                        offset: 3,
                        line: 13,
                        column: 9,
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_read_back() {
        let mvid = Guid::from_bytes([7; 16]);
        let bytes = sample().to_bytes(&mvid).unwrap();
        assert_eq!(&bytes[..4], SYMBOLS_MAGIC);

        let table = SymbolTable::read(&bytes, &mvid).unwrap();
        assert_eq!(table, sample());
    }

    #[test]
    fn test_mvid_mismatch_rejected() {
        let bytes = sample().to_bytes(&Guid::from_bytes([1; 16])).unwrap();
        let result = SymbolTable::read(&bytes, &Guid::from_bytes([2; 16]));
        assert!(matches!(result, Err(crate::Error::Malformed { .. })));
    }

    #[test]
    fn test_truncated() {
        let mvid = Guid::from_bytes([7; 16]);
        let bytes = sample().to_bytes(&mvid).unwrap();
        assert!(SymbolTable::read(&bytes[..bytes.len() - 3], &mvid).is_err());
    }

    #[test]
    fn test_rename_method() {
        let mut table = sample();
        table.rename_method(
            "System.Void Foo.FooModule::Load()",
            "System.Void Foo.FooModule::Initialize()",
        );
        assert_eq!(
            table.methods[0].method,
            "System.Void Foo.FooModule::Initialize()"
        );
    }
}
