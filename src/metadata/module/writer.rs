//! Module serialization.

use std::{fs, io::ErrorKind, path::Path};

use crate::{
    file::ByteWriter,
    metadata::{
        identity::AssemblyIdentity,
        module::{ModuleDefinition, MODULE_FORMAT_VERSION, MODULE_MAGIC},
    },
    Result,
};

impl ModuleDefinition {
    /// Serialize the module and, if attached, its symbols.
    ///
    /// # Returns
    /// The module bytes and the symbol file bytes (`None` when no symbols are attached).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a table or value exceeds the encodable range.
    pub fn to_bytes(&self) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let mut writer = ByteWriter::new();
        writer.write_bytes(MODULE_MAGIC);
        writer.write_le(MODULE_FORMAT_VERSION);
        writer.write_prefixed_string_utf8(&self.name)?;
        writer.write_guid(&self.mvid);
        writer.write_le(self.flags.bits());
        write_identity(&mut writer, &self.assembly)?;

        writer.write_count(self.assembly_refs.len())?;
        for identity in &self.assembly_refs {
            write_identity(&mut writer, identity)?;
        }

        write_string_list(&mut writer, &self.module_refs)?;

        writer.write_count(self.type_refs.len())?;
        for type_ref in &self.type_refs {
            let scope = match type_ref.scope {
                None => 0,
                Some(index) => index
                    .checked_add(1)
                    .ok_or_else(|| malformed_error!("Type reference scope overflow"))?,
            };
            writer.write_compressed_uint(scope)?;
            writer.write_prefixed_string_utf8(&type_ref.namespace)?;
            writer.write_prefixed_string_utf8(&type_ref.name)?;
        }

        writer.write_count(self.member_refs.len())?;
        for member in &self.member_refs {
            writer.write_compressed_uint(member.parent)?;
            writer.write_prefixed_string_utf8(&member.name)?;
            writer.write_prefixed_string_utf8(&member.return_type)?;
            match &member.parameters {
                None => writer.write_le(0_u8),
                Some(parameters) => {
                    writer.write_le(1_u8);
                    write_string_list(&mut writer, parameters)?;
                }
            }
        }

        writer.write_count(self.types.len())?;
        for ty in &self.types {
            writer.write_prefixed_string_utf8(&ty.namespace)?;
            writer.write_prefixed_string_utf8(&ty.name)?;
            writer.write_count(ty.methods.len())?;
            for method in &ty.methods {
                writer.write_prefixed_string_utf8(&method.name)?;
                writer.write_prefixed_string_utf8(&method.return_type)?;
                write_string_list(&mut writer, &method.parameters)?;
                writer.write_le(method.impl_flags.bits());
                writer.write_count(method.body.len())?;
                for instruction in &method.body {
                    instruction.write(&mut writer)?;
                }
            }
        }

        writer.write_count(self.rules.len())?;
        for rule in &self.rules {
            writer.write_prefixed_string_utf8(&rule.kind)?;
            writer.write_prefixed_string_utf8(&rule.target)?;
            write_string_list(&mut writer, &rule.args)?;
        }

        let symbols = self
            .symbols
            .as_ref()
            .map(|table| table.to_bytes(&self.mvid))
            .transpose()?;

        Ok((writer.into_inner(), symbols))
    }

    /// Write the module to `path`.
    ///
    /// With `with_symbols` set and symbols attached, the symbol file is written to the sibling
    /// `.pdb`. Without symbols any stale sibling `.pdb` is removed so that it cannot be paired
    /// with the new module later.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if either file cannot be written.
    pub fn write_to_file(&self, path: &Path, with_symbols: bool) -> Result<()> {
        let (module_bytes, symbol_bytes) = self.to_bytes()?;
        let symbol_path = path.with_extension("pdb");

        fs::write(path, module_bytes)?;
        match symbol_bytes {
            Some(bytes) if with_symbols => fs::write(&symbol_path, bytes)?,
            _ => match fs::remove_file(&symbol_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }

        Ok(())
    }
}

fn write_identity(writer: &mut ByteWriter, identity: &AssemblyIdentity) -> Result<()> {
    writer.write_prefixed_string_utf8(&identity.name)?;
    writer.write_le(identity.version.major);
    writer.write_le(identity.version.minor);
    writer.write_le(identity.version.build);
    writer.write_le(identity.version.revision);
    writer.write_prefixed_string_utf8(identity.culture.as_deref().unwrap_or_default())
}

fn write_string_list(writer: &mut ByteWriter, values: &[String]) -> Result<()> {
    writer.write_count(values.len())?;
    for value in values {
        writer.write_prefixed_string_utf8(value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::metadata::module::{ModuleBuilder, ModuleDefinition};

    #[test]
    fn test_write_to_file_with_and_without_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Foo.dll");
        let module = ModuleBuilder::new("Foo")
            .method("Foo.FooModule", "Load", "System.Void", &[], &["ret"])
            .with_symbols()
            .build()
            .unwrap();

        module.write_to_file(&path, true).unwrap();
        assert!(path.with_extension("pdb").exists());

        let read = ModuleDefinition::from_file(&path, Some(&path.with_extension("pdb"))).unwrap();
        assert!(read.has_symbols());

        module.write_to_file(&path, false).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("pdb").exists());
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("Foo.dll");
        let module = ModuleBuilder::new("Foo").build().unwrap();

        assert!(module.write_to_file(&path, false).is_err());
    }
}
