//! Legacy runtime ABI conversion.
//!
//! Mods compiled against the legacy framework reference the framework's facade assemblies
//! (`mscorlib`, `System`, `System.Core`, ...) directly. The modern runtime forwards all of
//! these through `System.Runtime`, so conversion folds every legacy reference into a single
//! `System.Runtime` reference and moves the affected type references over to it.
//!
//! Method bodies rewritten by the relinker no longer match what the original compiler
//! assumed about inlining, so inlining is suppressed on every method as well.

use crate::metadata::{
    identity::{AssemblyIdentity, AssemblyVersion},
    module::{table_index, MethodImplFlags, ModuleDefinition, ModuleFlags},
};

/// Framework assemblies folded into `System.Runtime`.
pub const LEGACY_FRAMEWORK_ASSEMBLIES: &[&str] = &[
    "mscorlib",
    "System",
    "System.Core",
    "System.Xml",
    "System.Runtime.Serialization",
];

/// Name of the modern runtime facade.
pub const RUNTIME_ASSEMBLY: &str = "System.Runtime";

/// Options of [`coreify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreifyOptions {
    /// Merge legacy references into one shared `System.Runtime` reference
    pub share_dependencies: bool,
    /// Set `NO_INLINING` and clear `AGGRESSIVE_INLINING` on every method
    pub prevent_inlining: bool,
}

impl Default for CoreifyOptions {
    fn default() -> Self {
        CoreifyOptions {
            share_dependencies: true,
            prevent_inlining: true,
        }
    }
}

/// Changes made by [`coreify`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoreifyStats {
    /// Legacy assembly references replaced
    pub references: usize,
    /// Type references moved to a new scope
    pub type_refs: usize,
    /// Methods whose inlining flags changed
    pub methods: usize,
}

fn is_legacy(identity: &AssemblyIdentity) -> bool {
    LEGACY_FRAMEWORK_ASSEMBLIES
        .iter()
        .any(|name| identity.name.eq_ignore_ascii_case(name))
}

/// Convert `module` to the modern runtime ABI.
pub fn coreify(module: &mut ModuleDefinition, options: CoreifyOptions) -> CoreifyStats {
    let mut stats = CoreifyStats::default();

    let old_refs = std::mem::take(&mut module.assembly_refs);
    let mut remap = Vec::with_capacity(old_refs.len());
    let mut runtime: Option<u32> = None;

    for identity in old_refs {
        let legacy = is_legacy(&identity);
        if legacy {
            stats.references += 1;
        }

        let is_runtime = legacy || identity.name.eq_ignore_ascii_case(RUNTIME_ASSEMBLY);
        if is_runtime && options.share_dependencies {
            if let Some(index) = runtime {
                remap.push(index);
                continue;
            }
        }

        let identity = if legacy {
            AssemblyIdentity::new(RUNTIME_ASSEMBLY, AssemblyVersion::new(4, 2, 2, 0))
        } else {
            identity
        };
        module.assembly_refs.push(identity);
        let index = table_index(module.assembly_refs.len() - 1);
        if is_runtime && runtime.is_none() {
            runtime = Some(index);
        }
        remap.push(index);
    }

    for type_ref in &mut module.type_refs {
        let Some(old) = type_ref.scope else {
            continue;
        };
        let new = remap.get(old as usize).copied().unwrap_or(old);
        if new != old {
            type_ref.scope = Some(new);
            stats.type_refs += 1;
        }
    }

    if options.prevent_inlining {
        for method in module.methods_mut() {
            let before = method.impl_flags;
            method.impl_flags.insert(MethodImplFlags::NO_INLINING);
            method.impl_flags.remove(MethodImplFlags::AGGRESSIVE_INLINING);
            if method.impl_flags != before {
                stats.methods += 1;
            }
        }
    }

    module.flags.remove(ModuleFlags::LEGACY_RUNTIME);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::module::ModuleBuilder;

    fn legacy_module() -> ModuleDefinition {
        ModuleBuilder::new("Foo")
            .flags(ModuleFlags::LEGACY_RUNTIME)
            .assembly_ref("mscorlib", "4.0.0.0")
            .assembly_ref("Game", "1.0")
            .assembly_ref("System.Core", "4.0.0.0")
            .type_ref("mscorlib", "System.Object")
            .type_ref("Game", "Celeste.Player")
            .type_ref("System.Core", "System.Linq.Enumerable")
            .method("Foo.Mod", "Hot", "System.Void", &[], &["ret"])
            .impl_flags(MethodImplFlags::AGGRESSIVE_INLINING)
            .method("Foo.Mod", "Cold", "System.Void", &[], &["ret"])
            .impl_flags(MethodImplFlags::NO_INLINING)
            .build()
            .unwrap()
    }

    #[test]
    fn test_coreify_shares_runtime_reference() {
        let mut module = legacy_module();
        let stats = coreify(&mut module, CoreifyOptions::default());

        assert_eq!(stats.references, 2);
        assert_eq!(stats.methods, 1);
        let names: Vec<&str> = module.assembly_refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["System.Runtime", "Game"]);

        assert_eq!(module.type_refs[0].scope, Some(0));
        assert_eq!(module.type_refs[1].scope, Some(1));
        assert_eq!(module.type_refs[2].scope, Some(0));
        assert_eq!(stats.type_refs, 1);

        assert!(!module.flags.contains(ModuleFlags::LEGACY_RUNTIME));
        for method in &module.types[0].methods {
            assert!(method.impl_flags.contains(MethodImplFlags::NO_INLINING));
            assert!(!method.impl_flags.contains(MethodImplFlags::AGGRESSIVE_INLINING));
        }
        module.validate().unwrap();
    }

    #[test]
    fn test_coreify_without_sharing() {
        let mut module = legacy_module();
        let stats = coreify(
            &mut module,
            CoreifyOptions {
                share_dependencies: false,
                prevent_inlining: false,
            },
        );

        assert_eq!(stats.references, 2);
        assert_eq!(stats.methods, 0);
        assert_eq!(module.assembly_refs.len(), 3);
        assert_eq!(module.assembly_refs[2].name, "System.Runtime");
        assert!(module.types[0].methods[0]
            .impl_flags
            .contains(MethodImplFlags::AGGRESSIVE_INLINING));
    }

    #[test]
    fn test_coreify_merges_existing_runtime() {
        let mut module = ModuleBuilder::new("Foo")
            .assembly_ref("System.Runtime", "6.0.0.0")
            .assembly_ref("System", "4.0.0.0")
            .type_ref("System", "System.Uri")
            .build()
            .unwrap();

        coreify(&mut module, CoreifyOptions::default());

        assert_eq!(module.assembly_refs.len(), 1);
        assert_eq!(module.assembly_refs[0].version, AssemblyVersion::new(6, 0, 0, 0));
        assert_eq!(module.type_refs[0].scope, Some(0));
    }
}
