//! Fluent construction of [`ModuleDefinition`]s.
//!
//! Hosts use the builder to describe their own assemblies (for example the rules module or
//! the game executable) and tests use it to fabricate mod assemblies. Method bodies are given
//! in the instruction text form; referenced members and types are interned while building.
//!
//! # Examples
//!
//! ```rust
//! use modscope::metadata::module::ModuleBuilder;
//!
//! let module = ModuleBuilder::new("Foo")
//!     .assembly_ref("Bar", "1.0")
//!     .type_ref("Bar", "Bar.Api")
//!     .method(
//!         "Foo.FooModule",
//!         "Load",
//!         "System.Void",
//!         &[],
//!         &["call System.Void Bar.Api::Hello()", "ret"],
//!     )
//!     .with_symbols()
//!     .build()?;
//!
//! assert_eq!(module.name, "Foo.dll");
//! assert_eq!(module.member_refs.len(), 1);
//! # Ok::<(), modscope::Error>(())
//! ```

use sha1::{Digest, Sha1};
use uguid::Guid;

use crate::{
    metadata::{
        identity::{AssemblyIdentity, AssemblyVersion},
        instruction::Instruction,
        module::{
            MethodDef, MethodImplFlags, MethodSymbols, ModuleDefinition, ModuleFlags, RuleDef,
            SequencePoint, SymbolTable, TypeDef, split_type_name,
        },
    },
    Result,
};

struct PendingMethod {
    declaring_type: String,
    name: String,
    return_type: String,
    parameters: Vec<String>,
    body: Vec<String>,
    impl_flags: MethodImplFlags,
}

/// Builder for [`ModuleDefinition`].
pub struct ModuleBuilder {
    assembly_name: String,
    version: AssemblyVersion,
    mvid: Option<Guid>,
    flags: ModuleFlags,
    assembly_refs: Vec<(String, String)>,
    module_refs: Vec<String>,
    type_refs: Vec<(String, String)>,
    methods: Vec<PendingMethod>,
    rules: Vec<RuleDef>,
    with_symbols: bool,
}

impl ModuleBuilder {
    /// Start a module for the assembly `assembly_name`. The module file name becomes
    /// `<assembly_name>.dll`.
    #[must_use]
    pub fn new(assembly_name: impl Into<String>) -> Self {
        Self {
            assembly_name: assembly_name.into(),
            version: AssemblyVersion::new(1, 0, 0, 0),
            mvid: None,
            flags: ModuleFlags::empty(),
            assembly_refs: Vec::new(),
            module_refs: Vec::new(),
            type_refs: Vec::new(),
            methods: Vec::new(),
            rules: Vec::new(),
            with_symbols: false,
        }
    }

    /// Set the assembly version.
    #[must_use]
    pub fn version(mut self, version: AssemblyVersion) -> Self {
        self.version = version;
        self
    }

    /// Set an explicit MVID instead of the name-derived default.
    #[must_use]
    pub fn mvid(mut self, mvid: Guid) -> Self {
        self.mvid = Some(mvid);
        self
    }

    /// Set module flags.
    #[must_use]
    pub fn flags(mut self, flags: ModuleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Reference another assembly; `version` uses the dotted form.
    #[must_use]
    pub fn assembly_ref(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.assembly_refs.push((name.into(), version.into()));
        self
    }

    /// Reference another module file.
    #[must_use]
    pub fn module_ref(mut self, name: impl Into<String>) -> Self {
        self.module_refs.push(name.into());
        self
    }

    /// Reference a type from a previously added assembly reference.
    #[must_use]
    pub fn type_ref(mut self, assembly: impl Into<String>, full_name: impl Into<String>) -> Self {
        self.type_refs.push((assembly.into(), full_name.into()));
        self
    }

    /// Define a method, creating its declaring type on first use.
    #[must_use]
    pub fn method(
        mut self,
        declaring_type: &str,
        name: &str,
        return_type: &str,
        parameters: &[&str],
        body: &[&str],
    ) -> Self {
        self.methods.push(PendingMethod {
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            return_type: return_type.to_string(),
            parameters: parameters.iter().map(ToString::to_string).collect(),
            body: body.iter().map(ToString::to_string).collect(),
            impl_flags: MethodImplFlags::empty(),
        });
        self
    }

    /// Set implementation flags on the most recently defined method.
    #[must_use]
    pub fn impl_flags(mut self, flags: MethodImplFlags) -> Self {
        if let Some(method) = self.methods.last_mut() {
            method.impl_flags = flags;
        }
        self
    }

    /// Embed a rewrite rule record.
    #[must_use]
    pub fn rule(mut self, kind: &str, target: &str, args: &[&str]) -> Self {
        self.rules.push(RuleDef {
            kind: kind.to_string(),
            target: target.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// Generate debug symbols with one sequence point per instruction.
    #[must_use]
    pub fn with_symbols(mut self) -> Self {
        self.with_symbols = true;
        self
    }

    /// Build the module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid version string, a type reference
    /// naming an unknown assembly, or an unparsable instruction.
    pub fn build(self) -> Result<ModuleDefinition> {
        let mvid = self.mvid.unwrap_or_else(|| name_mvid(&self.assembly_name));
        let mut module = ModuleDefinition {
            name: format!("{}.dll", self.assembly_name),
            mvid,
            flags: self.flags,
            assembly: AssemblyIdentity::new(self.assembly_name, self.version),
            assembly_refs: Vec::new(),
            module_refs: self.module_refs,
            type_refs: Vec::new(),
            member_refs: Vec::new(),
            types: Vec::new(),
            rules: self.rules,
            symbols: None,
        };

        for (name, version) in self.assembly_refs {
            let version = AssemblyVersion::parse(&version)?;
            module.add_assembly_ref(AssemblyIdentity::new(name, version));
        }

        for (assembly, full_name) in self.type_refs {
            let scope = module.assembly_ref_index(&assembly).ok_or_else(|| {
                malformed_error!("Type {} references unknown assembly {}", full_name, assembly)
            })?;
            module.import_type(&full_name, Some(scope));
        }

        let mut symbols = SymbolTable::default();
        for pending in self.methods {
            let mut body = Vec::with_capacity(pending.body.len());
            for text in &pending.body {
                body.push(Instruction::parse(text, &mut module)?);
            }

            let method = MethodDef {
                name: pending.name,
                return_type: pending.return_type,
                parameters: pending.parameters,
                impl_flags: pending.impl_flags,
                body,
            };

            if self.with_symbols {
                let (_, type_name) = split_type_name(&pending.declaring_type);
                let document = format!("src/{type_name}.cs");
                let document_index = match symbols.documents.iter().position(|d| *d == document) {
                    Some(index) => index,
                    None => {
                        symbols.documents.push(document);
                        symbols.documents.len() - 1
                    }
                };
                symbols.methods.push(MethodSymbols {
                    method: method.id(&pending.declaring_type),
                    document: u32::try_from(document_index).unwrap_or(u32::MAX),
                    sequence_points: (0..method.body.len())
                        .map(|i| SequencePoint {
                            offset: u32::try_from(i).unwrap_or(u32::MAX),
                            line: u32::try_from(i + 10).unwrap_or(u32::MAX),
                            column: 9,
                        })
                        .collect(),
                });
            }

            let full_name = pending.declaring_type;
            match module.types.iter_mut().find(|t| t.full_name() == full_name) {
                Some(ty) => ty.methods.push(method),
                None => {
                    let (namespace, name) = split_type_name(&full_name);
                    module.types.push(TypeDef {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                        methods: vec![method],
                    });
                }
            }
        }

        if self.with_symbols {
            module.symbols = Some(symbols);
        }

        module.validate()?;
        Ok(module)
    }
}

fn name_mvid(name: &str) -> Guid {
    let digest = Sha1::digest(name.as_bytes());
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&digest[..16]);
    Guid::from_bytes(raw)
}
