//! Editable in-memory module representation.
//!
//! A [`ModuleDefinition`] is the structural view of a mod or host assembly that the relinker
//! reads, rewrites and writes back. It owns the module's identity, its reference tables
//! (assembly, module, type and member references), its type definitions with method bodies,
//! any embedded rewrite rule records and, optionally, attached debug symbols.
//!
//! # Architecture
//!
//! References are stored in flat tables and addressed by index, the same way metadata tables
//! work in a real assembly. Rewriting therefore mostly means editing table rows: renaming a
//! member reference redirects every call site at once, remapping a type reference's scope
//! moves all uses of that type to another assembly.
//!
//! # Member Identifiers
//!
//! Members are identified by strings of the form
//!
//! ```text
//! <return or field type> <Namespace.Type>::<Name>(<Param1>,<Param2>)
//! ```
//!
//! Fields omit the parameter list. [`MemberId`] parses and formats this form.
//!
//! # Key Components
//!
//! - [`ModuleDefinition`] - the module graph
//! - [`ModuleBuilder`] - programmatic construction
//! - [`SymbolTable`] - portable debug symbols stored beside the module
//! - [`ModuleFlags`] / [`MethodImplFlags`] - module and method attribute flags
//!
//! # Examples
//!
//! ```rust,ignore
//! use modscope::metadata::module::ModuleDefinition;
//!
//! let module = ModuleDefinition::from_file(Path::new("Foo.dll"), Some(Path::new("Foo.pdb")))?;
//! for asm in &module.assembly_refs {
//!     println!("references {}", asm);
//! }
//! ```

mod builder;
mod reader;
mod symbols;
mod writer;

use std::fmt;

use bitflags::bitflags;
use uguid::Guid;

pub use builder::ModuleBuilder;
pub use symbols::{MethodSymbols, SequencePoint, SymbolTable};

use crate::{
    metadata::{identity::AssemblyIdentity, instruction::Instruction},
    Result,
};

/// Magic bytes at the start of every module file.
pub const MODULE_MAGIC: &[u8; 4] = b"MSCP";
/// Current module format version.
pub const MODULE_FORMAT_VERSION: u16 = 1;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Module level attributes
    pub struct ModuleFlags: u32 {
        /// Module was compiled against the legacy framework runtime ABI
        const LEGACY_RUNTIME = 0x0001;
        /// Module has been produced by the relinker
        const RELINKED = 0x0002;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method implementation options
    pub struct MethodImplFlags: u16 {
        /// Method cannot be inlined
        const NO_INLINING = 0x0008;
        /// Method is synchronized
        const SYNCHRONIZED = 0x0020;
        /// Method should be inlined if possible
        const AGGRESSIVE_INLINING = 0x0100;
    }
}

/// A reference to a type defined elsewhere (or in this module).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    /// Index into [`ModuleDefinition::assembly_refs`]; `None` for types defined in this module
    pub scope: Option<u32>,
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple type name
    pub name: String,
}

impl TypeRef {
    /// `Namespace.Name`, or just `Name` in the global namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        join_type_name(&self.namespace, &self.name)
    }
}

/// A reference to a method or field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Index into [`ModuleDefinition::type_refs`] of the declaring type
    pub parent: u32,
    /// Member name
    pub name: String,
    /// Return type for methods, field type for fields
    pub return_type: String,
    /// Parameter types; `None` for fields
    pub parameters: Option<Vec<String>>,
}

/// A method defined in this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Return type
    pub return_type: String,
    /// Parameter types
    pub parameters: Vec<String>,
    /// Implementation flags
    pub impl_flags: MethodImplFlags,
    /// Instruction body
    pub body: Vec<Instruction>,
}

/// A type defined in this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple type name
    pub name: String,
    /// Methods declared on the type
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// `Namespace.Name`, or just `Name` in the global namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        join_type_name(&self.namespace, &self.name)
    }
}

impl MethodDef {
    /// Member identifier of this method when declared on `declaring_type`.
    #[must_use]
    pub fn id(&self, declaring_type: &str) -> String {
        MemberId {
            return_type: self.return_type.clone(),
            declaring_type: declaring_type.to_string(),
            name: self.name.clone(),
            parameters: Some(self.parameters.clone()),
        }
        .to_string()
    }
}

/// An embedded rewrite rule record.
///
/// The module only stores rule records; interpreting them is the job of
/// [`crate::relink::rules::RuleRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDef {
    /// Rule kind, e.g. `"redirect-member"`
    pub kind: String,
    /// Rule target, usually a method as `Namespace.Type::Method`
    pub target: String,
    /// Kind specific arguments
    pub args: Vec<String>,
}

/// Parsed member identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberId {
    /// Return type for methods, field type for fields
    pub return_type: String,
    /// Full name of the declaring type
    pub declaring_type: String,
    /// Member name
    pub name: String,
    /// Parameter types; `None` for fields
    pub parameters: Option<Vec<String>>,
}

impl MemberId {
    /// Parse `Ret Ns.Type::Name(P1,P2)` or `FieldType Ns.Type::name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the identifier does not have this shape.
    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim();
        let (return_type, rest) = id
            .split_once(' ')
            .ok_or_else(|| malformed_error!("Member id '{}' has no return type", id))?;
        let (declaring_type, tail) = rest
            .trim()
            .split_once("::")
            .ok_or_else(|| malformed_error!("Member id '{}' has no declaring type", id))?;

        let (name, parameters) = match tail.split_once('(') {
            Some((name, params)) => {
                let params = params
                    .strip_suffix(')')
                    .ok_or_else(|| malformed_error!("Member id '{}' has an open parameter list", id))?;
                let parameters = if params.trim().is_empty() {
                    Vec::new()
                } else {
                    params.split(',').map(|p| p.trim().to_string()).collect()
                };
                (name, Some(parameters))
            }
            None => (tail, None),
        };

        if return_type.is_empty() || declaring_type.is_empty() || name.is_empty() {
            return Err(malformed_error!("Member id '{}' is incomplete", id));
        }

        Ok(Self {
            return_type: return_type.to_string(),
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            parameters,
        })
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{}",
            self.return_type, self.declaring_type, self.name
        )?;
        if let Some(parameters) = &self.parameters {
            write!(f, "({})", parameters.join(","))?;
        }
        Ok(())
    }
}

/// Split `Namespace.Name` at the last dot.
#[must_use]
pub fn split_type_name(full_name: &str) -> (&str, &str) {
    full_name.rsplit_once('.').unwrap_or(("", full_name))
}

fn join_type_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// The structural representation of a module.
#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    /// Module file name, e.g. `"Foo.dll"`
    pub name: String,
    /// Module version id; symbols must carry the same value
    pub mvid: Guid,
    /// Module attributes
    pub flags: ModuleFlags,
    /// Identity of the assembly this module belongs to
    pub assembly: AssemblyIdentity,
    /// Referenced assemblies
    pub assembly_refs: Vec<AssemblyIdentity>,
    /// Referenced module files
    pub module_refs: Vec<String>,
    /// Type reference table
    pub type_refs: Vec<TypeRef>,
    /// Member reference table
    pub member_refs: Vec<MemberRef>,
    /// Type definitions
    pub types: Vec<TypeDef>,
    /// Embedded rewrite rule records
    pub rules: Vec<RuleDef>,
    /// Attached debug symbols
    pub symbols: Option<SymbolTable>,
}

impl ModuleDefinition {
    /// Identity of the module's assembly.
    #[must_use]
    pub fn identity(&self) -> &AssemblyIdentity {
        &self.assembly
    }

    /// Returns `true` if debug symbols are attached.
    #[must_use]
    pub fn has_symbols(&self) -> bool {
        self.symbols.is_some()
    }

    /// Full name of the type reference at `index`.
    #[must_use]
    pub fn type_ref_full_name(&self, index: u32) -> Option<String> {
        self.type_refs.get(index as usize).map(TypeRef::full_name)
    }

    /// Parsed identifier of the member reference at `index`.
    #[must_use]
    pub fn member_id(&self, index: u32) -> Option<MemberId> {
        let member = self.member_refs.get(index as usize)?;
        Some(MemberId {
            return_type: member.return_type.clone(),
            declaring_type: self.type_ref_full_name(member.parent)?,
            name: member.name.clone(),
            parameters: member.parameters.clone(),
        })
    }

    /// Identifier string of the member reference at `index`.
    #[must_use]
    pub fn member_ref_id(&self, index: u32) -> Option<String> {
        self.member_id(index).map(|id| id.to_string())
    }

    /// Index of the type reference with the given full name.
    #[must_use]
    pub fn find_type_ref(&self, full_name: &str) -> Option<u32> {
        self.type_refs
            .iter()
            .position(|t| t.full_name() == full_name)
            .and_then(|i| u32::try_from(i).ok())
    }

    /// Index of the member reference with the given identifier.
    #[must_use]
    pub fn find_member_ref(&self, id: &str) -> Option<u32> {
        (0..self.member_refs.len())
            .filter_map(|i| u32::try_from(i).ok())
            .find(|&i| self.member_ref_id(i).as_deref() == Some(id))
    }

    /// Index of the assembly reference with the given name, compared case-insensitively.
    #[must_use]
    pub fn assembly_ref_index(&self, name: &str) -> Option<u32> {
        self.assembly_refs
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
            .and_then(|i| u32::try_from(i).ok())
    }

    /// Add an assembly reference unless one with the same name already exists, returning its
    /// index.
    pub fn add_assembly_ref(&mut self, identity: AssemblyIdentity) -> u32 {
        if let Some(index) = self.assembly_ref_index(&identity.name) {
            return index;
        }
        self.assembly_refs.push(identity);
        table_index(self.assembly_refs.len() - 1)
    }

    /// Intern a type reference by full name. An existing reference with the same name is
    /// reused regardless of `scope`.
    pub fn import_type(&mut self, full_name: &str, scope: Option<u32>) -> u32 {
        if let Some(index) = self.find_type_ref(full_name) {
            return index;
        }
        let (namespace, name) = split_type_name(full_name);
        self.type_refs.push(TypeRef {
            scope,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        table_index(self.type_refs.len() - 1)
    }

    /// Intern a member reference by identifier, creating the declaring type reference when
    /// needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid identifier.
    pub fn import_member(&mut self, id: &str) -> Result<u32> {
        let parsed = MemberId::parse(id)?;
        if let Some(index) = self.find_member_ref(&parsed.to_string()) {
            return Ok(index);
        }

        let parent = self.import_type(&parsed.declaring_type, None);
        self.member_refs.push(MemberRef {
            parent,
            name: parsed.name,
            return_type: parsed.return_type,
            parameters: parsed.parameters,
        });
        Ok(table_index(self.member_refs.len() - 1))
    }

    /// Find a method by `Namespace.Type::Name` or by its full member identifier.
    pub fn find_method_mut(&mut self, target: &str) -> Option<&mut MethodDef> {
        let target = target.trim();
        let full_id = target.contains(' ');
        let (type_name, method_name) = if full_id {
            let id = MemberId::parse(target).ok()?;
            (id.declaring_type, id.name)
        } else {
            let (t, m) = target.split_once("::")?;
            (t.to_string(), m.to_string())
        };

        let ty = self.types.iter_mut().find(|t| t.full_name() == type_name)?;
        ty.methods.iter_mut().find(|m| {
            if full_id {
                m.id(&type_name) == target
            } else {
                m.name == method_name
            }
        })
    }

    /// Iterate mutably over every method body in the module.
    pub fn methods_mut(&mut self) -> impl Iterator<Item = &mut MethodDef> {
        self.types.iter_mut().flat_map(|t| t.methods.iter_mut())
    }

    /// Append `.suffix` to both the module and assembly names.
    pub fn rename(&mut self, suffix: &str) {
        let (stem, ext) = match self.name.rsplit_once('.') {
            Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
            None => (self.name.clone(), String::new()),
        };
        self.name = format!("{stem}.{suffix}{ext}");
        self.assembly.name = format!("{}.{suffix}", self.assembly.name);
    }
}

pub(crate) fn table_index(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::identity::AssemblyVersion;

    #[test]
    fn test_member_id_parse_method() {
        let id = MemberId::parse("System.String MonoMod.Utils.Extensions::GetID(Mono.Cecil.MethodReference,System.String,System.String,System.Boolean,System.Boolean)").unwrap();

        assert_eq!(id.return_type, "System.String");
        assert_eq!(id.declaring_type, "MonoMod.Utils.Extensions");
        assert_eq!(id.name, "GetID");
        assert_eq!(id.parameters.as_ref().map(Vec::len), Some(5));
    }

    #[test]
    fn test_member_id_parse_field_and_empty_params() {
        let field = MemberId::parse("System.Int32 Celeste.Player::Dashes").unwrap();
        assert!(field.parameters.is_none());
        assert_eq!(field.to_string(), "System.Int32 Celeste.Player::Dashes");

        let method = MemberId::parse("System.Void Celeste.Player::Die()").unwrap();
        assert_eq!(method.parameters, Some(vec![]));
        assert_eq!(method.to_string(), "System.Void Celeste.Player::Die()");
    }

    #[test]
    fn test_member_id_parse_invalid() {
        assert!(MemberId::parse("NoSpaceAtAll").is_err());
        assert!(MemberId::parse("System.Void NoColons()").is_err());
        assert!(MemberId::parse("System.Void T::M(").is_err());
    }

    #[test]
    fn test_import_reuses_rows() {
        let mut module = ModuleBuilder::new("Foo").build().unwrap();

        let a = module.import_member("System.Void Bar.Api::Run()").unwrap();
        let b = module.import_member("System.Void Bar.Api::Stop()").unwrap();
        let c = module.import_member("System.Void Bar.Api::Run()").unwrap();

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(module.type_refs.len(), 1);
        assert_eq!(module.member_refs[b as usize].parent, 0);
    }

    #[test]
    fn test_add_assembly_ref_dedupes() {
        let mut module = ModuleBuilder::new("Foo").build().unwrap();
        let first = module.add_assembly_ref(AssemblyIdentity::new(
            "System.Runtime",
            AssemblyVersion::new(4, 0, 0, 0),
        ));
        let second = module.add_assembly_ref(AssemblyIdentity::new(
            "system.runtime",
            AssemblyVersion::new(6, 0, 0, 0),
        ));

        assert_eq!(first, second);
        assert_eq!(module.assembly_refs.len(), 1);
    }

    #[test]
    fn test_find_method_by_short_and_full_id() {
        let mut module = ModuleBuilder::new("Foo")
            .method("Foo.Mod", "Load", "System.Void", &["System.Int32"], &[])
            .build()
            .unwrap();

        assert!(module.find_method_mut("Foo.Mod::Load").is_some());
        assert!(module
            .find_method_mut("System.Void Foo.Mod::Load(System.Int32)")
            .is_some());
        assert!(module
            .find_method_mut("System.Void Foo.Mod::Load(System.String)")
            .is_none());
        assert!(module.find_method_mut("Foo.Other::Load").is_none());
    }

    #[test]
    fn test_rename() {
        let mut module = ModuleBuilder::new("Foo").build().unwrap();
        module.rename("1700000000000");

        assert_eq!(module.name, "Foo.1700000000000.dll");
        assert_eq!(module.assembly.name, "Foo.1700000000000");
    }
}
