//! Module file parsing.
//!
//! Reading is always eager: the complete graph, including every method body, is decoded up
//! front and all table indices are validated before the module is returned. A module that
//! passes [`ModuleDefinition::read`] can therefore be rewritten without further bounds checks.

use std::path::Path;

use crate::{
    file::{read_all, Parser},
    metadata::{
        identity::{AssemblyIdentity, AssemblyVersion},
        instruction::{Instruction, Operand},
        module::{
            MemberRef, MethodDef, MethodImplFlags, ModuleDefinition, ModuleFlags, RuleDef,
            SymbolTable, TypeDef, TypeRef, MODULE_FORMAT_VERSION, MODULE_MAGIC,
        },
    },
    Error::Empty,
    Result,
};

impl ModuleDefinition {
    /// Parse a module from `data`, attaching `symbols` if given.
    ///
    /// # Arguments
    /// * `data` - Raw module bytes
    /// * `symbols` - Raw bytes of the sibling symbol file, if any
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::Malformed`] for
    /// an invalid structure or symbols belonging to a different module, and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn read(data: &[u8], symbols: Option<&[u8]>) -> Result<Self> {
        if data.is_empty() {
            return Err(Empty);
        }

        let mut parser = Parser::new(data);
        parser.expect_magic(MODULE_MAGIC)?;

        let version = parser.read_le::<u16>()?;
        if version != MODULE_FORMAT_VERSION {
            return Err(malformed_error!("Unsupported module format version {}", version));
        }

        let name = parser.read_prefixed_string_utf8()?;
        let mvid = parser.read_guid()?;
        let flags = ModuleFlags::from_bits_truncate(parser.read_le::<u32>()?);
        let assembly = read_identity(&mut parser)?;

        let count = parser.read_count()?;
        let mut assembly_refs = Vec::with_capacity(count);
        for _ in 0..count {
            assembly_refs.push(read_identity(&mut parser)?);
        }

        let count = parser.read_count()?;
        let mut module_refs = Vec::with_capacity(count);
        for _ in 0..count {
            module_refs.push(parser.read_prefixed_string_utf8()?);
        }

        let count = parser.read_count()?;
        let mut type_refs = Vec::with_capacity(count);
        for _ in 0..count {
            let scope = match parser.read_compressed_uint()? {
                0 => None,
                n => Some(n - 1),
            };
            type_refs.push(TypeRef {
                scope,
                namespace: parser.read_prefixed_string_utf8()?,
                name: parser.read_prefixed_string_utf8()?,
            });
        }

        let count = parser.read_count()?;
        let mut member_refs = Vec::with_capacity(count);
        for _ in 0..count {
            let parent = parser.read_compressed_uint()?;
            let name = parser.read_prefixed_string_utf8()?;
            let return_type = parser.read_prefixed_string_utf8()?;
            let parameters = match parser.read_le::<u8>()? {
                0 => None,
                1 => Some(read_string_list(&mut parser)?),
                other => return Err(malformed_error!("Invalid member kind {}", other)),
            };
            member_refs.push(MemberRef {
                parent,
                name,
                return_type,
                parameters,
            });
        }

        let count = parser.read_count()?;
        let mut types = Vec::with_capacity(count);
        for _ in 0..count {
            let namespace = parser.read_prefixed_string_utf8()?;
            let name = parser.read_prefixed_string_utf8()?;
            let method_count = parser.read_count()?;
            let mut methods = Vec::with_capacity(method_count);
            for _ in 0..method_count {
                methods.push(read_method(&mut parser)?);
            }
            types.push(TypeDef {
                namespace,
                name,
                methods,
            });
        }

        let count = parser.read_count()?;
        let mut rules = Vec::with_capacity(count);
        for _ in 0..count {
            rules.push(RuleDef {
                kind: parser.read_prefixed_string_utf8()?,
                target: parser.read_prefixed_string_utf8()?,
                args: read_string_list(&mut parser)?,
            });
        }

        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after module body",
                parser.remaining()
            ));
        }

        let symbols = symbols
            .map(|bytes| SymbolTable::read(bytes, &mvid))
            .transpose()?;

        let module = ModuleDefinition {
            name,
            mvid,
            flags,
            assembly,
            assembly_refs,
            module_refs,
            type_refs,
            member_refs,
            types,
            rules,
            symbols,
        };
        module.validate()?;
        Ok(module)
    }

    /// Read a module and its optional symbol file from disk.
    ///
    /// Both files are read fully into memory; no handle stays open afterwards.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] on I/O failure or any error of
    /// [`ModuleDefinition::read`].
    pub fn from_file(path: &Path, symbols: Option<&Path>) -> Result<Self> {
        let data = read_all(path)?;
        let symbol_data = symbols.map(read_all).transpose()?;
        Self::read(&data, symbol_data.as_deref())
    }

    /// Check every cross-table index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] naming the first dangling index.
    pub fn validate(&self) -> Result<()> {
        for (i, type_ref) in self.type_refs.iter().enumerate() {
            if let Some(scope) = type_ref.scope {
                if scope as usize >= self.assembly_refs.len() {
                    return Err(malformed_error!(
                        "Type reference {} has invalid scope {}",
                        i,
                        scope
                    ));
                }
            }
        }

        for (i, member) in self.member_refs.iter().enumerate() {
            if member.parent as usize >= self.type_refs.len() {
                return Err(malformed_error!(
                    "Member reference {} has invalid parent {}",
                    i,
                    member.parent
                ));
            }
        }

        for ty in &self.types {
            for method in &ty.methods {
                for instruction in &method.body {
                    let valid = match instruction.operand {
                        Operand::Member(index) => (index as usize) < self.member_refs.len(),
                        Operand::Type(index) => (index as usize) < self.type_refs.len(),
                        _ => true,
                    };
                    if !valid {
                        return Err(malformed_error!(
                            "Method {}::{} has a dangling operand {:?}",
                            ty.full_name(),
                            method.name,
                            instruction.operand
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

fn read_identity(parser: &mut Parser) -> Result<AssemblyIdentity> {
    let name = parser.read_prefixed_string_utf8()?;
    let version = AssemblyVersion::new(
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
    );
    let culture = parser.read_prefixed_string_utf8()?;

    Ok(AssemblyIdentity {
        name,
        version,
        culture: if culture.is_empty() {
            None
        } else {
            Some(culture)
        },
    })
}

fn read_string_list(parser: &mut Parser) -> Result<Vec<String>> {
    let count = parser.read_count()?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(parser.read_prefixed_string_utf8()?);
    }
    Ok(values)
}

fn read_method(parser: &mut Parser) -> Result<MethodDef> {
    let name = parser.read_prefixed_string_utf8()?;
    let return_type = parser.read_prefixed_string_utf8()?;
    let parameters = read_string_list(parser)?;
    let impl_flags = MethodImplFlags::from_bits_truncate(parser.read_le::<u16>()?);

    let count = parser.read_count()?;
    let mut body = Vec::with_capacity(count);
    for _ in 0..count {
        body.push(Instruction::read(parser)?);
    }

    Ok(MethodDef {
        name,
        return_type,
        parameters,
        impl_flags,
        body,
    })
}
