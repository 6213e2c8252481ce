//! State of a single relink operation.
//!
//! A [`RelinkSession`] owns the module being rewritten together with the modules its
//! references were resolved to. It is created by [`crate::relink::Relinker`] inside the global
//! rewrite lock and consumed once patching is done.

use std::sync::Arc;

use crate::{
    context::ResolutionStack,
    metadata::{
        identity::AssemblyIdentity,
        module::{split_type_name, table_index, MemberId, ModuleDefinition, ModuleFlags},
    },
    relink::{
        maps::{RelinkMapEntry, SharedRelinkMaps},
        rules::{RuleRegistry, RuleSet},
        AssemblyResolver,
    },
    Result,
};

/// Split a symbol map member entry `Ret Name(Params)` into return type and the rest.
pub(crate) fn split_member_entry(member: &str) -> Option<(&str, &str)> {
    let (ret, rest) = member.trim().split_once(' ')?;
    if ret.is_empty() || rest.trim().is_empty() {
        return None;
    }
    Some((ret, rest.trim()))
}

/// Summary of the changes made by [`RelinkSession::auto_patch`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PatchStats {
    /// Type references redirected through the symbol map
    pub types: usize,
    /// Member references redirected through the symbol map
    pub members: usize,
    /// Changes reported by rewrite rules
    pub rules: usize,
}

/// One in-progress relink.
pub struct RelinkSession<'a> {
    module: ModuleDefinition,
    maps: &'a SharedRelinkMaps,
    rules_module: &'a Arc<ModuleDefinition>,
    dependencies: Vec<Arc<ModuleDefinition>>,
}

impl<'a> RelinkSession<'a> {
    /// Start a session for `module`.
    #[must_use]
    pub fn new(
        module: ModuleDefinition,
        maps: &'a SharedRelinkMaps,
        rules_module: &'a Arc<ModuleDefinition>,
    ) -> Self {
        RelinkSession {
            module,
            maps,
            rules_module,
            dependencies: Vec::new(),
        }
    }

    /// The module being rewritten.
    #[must_use]
    pub fn module(&self) -> &ModuleDefinition {
        &self.module
    }

    /// Modules the assembly references were resolved to, in reference order.
    #[must_use]
    pub fn dependencies(&self) -> &[Arc<ModuleDefinition>] {
        &self.dependencies
    }

    /// Resolve every assembly reference of the module.
    ///
    /// Lookup order is the shared module map, the rules module, then `resolver`. References
    /// that cannot be resolved are logged and skipped.
    ///
    /// # Errors
    /// Only fatal resolver errors are returned.
    pub fn map_dependencies(
        &mut self,
        resolver: &dyn AssemblyResolver,
        stack: &mut ResolutionStack,
    ) -> Result<()> {
        let names: Vec<String> = self
            .module
            .assembly_refs
            .iter()
            .map(|r| r.name.clone())
            .collect();

        for name in names {
            if let Some(module) = self.maps.module(&name) {
                self.dependencies.push(module.clone());
                continue;
            }

            if name.eq_ignore_ascii_case(&self.rules_module.assembly.name) {
                self.dependencies.push(self.rules_module.clone());
                continue;
            }

            match resolver.resolve(&name, stack) {
                Ok(Some(assembly)) => self.dependencies.push(assembly.module().clone()),
                Ok(None) => tracing::warn!(
                    target: "relinker",
                    "Relinker couldn't find dependency {} -> {}",
                    self.module.assembly.name,
                    name
                ),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!(
                    target: "relinker",
                    "Relinker failed resolving dependency {} -> {}: {}",
                    self.module.assembly.name,
                    name,
                    e
                ),
            }
        }

        Ok(())
    }

    /// Apply symbol map redirects, then shared rules, then the module's own rules.
    ///
    /// Afterwards the module's rule records are cleared and it is flagged as relinked.
    ///
    /// # Errors
    /// Returns [`crate::Error::Rule`] or [`crate::Error::Malformed`] if a rule or redirect
    /// cannot be applied.
    pub fn auto_patch(&mut self, registry: &RuleRegistry) -> Result<PatchStats> {
        let mut stats = PatchStats {
            types: self.redirect_types(),
            members: self.redirect_members()?,
            rules: 0,
        };

        let mut rules = RuleSet::parse(self.rules_module, registry)?;
        rules.extend(RuleSet::parse(&self.module, registry)?);
        stats.rules = rules.apply(&mut self.module)?;

        self.module.rules.clear();
        self.module.flags.insert(ModuleFlags::RELINKED);

        tracing::debug!(
            target: "relinker",
            "Patched {}: {} types, {} members, {} rule changes",
            self.module.assembly.name,
            stats.types,
            stats.members,
            stats.rules
        );
        Ok(stats)
    }

    /// Finish the session and hand back the rewritten module.
    #[must_use]
    pub fn into_module(self) -> ModuleDefinition {
        self.module
    }

    /// Dependency module that defines `full_name`.
    fn defining_dependency(&self, full_name: &str) -> Option<&Arc<ModuleDefinition>> {
        self.dependencies
            .iter()
            .find(|dep| dep.types.iter().any(|t| t.full_name() == full_name))
    }

    /// Assembly reference scope for a redirected type.
    fn scope_for(&mut self, full_name: &str) -> Option<u32> {
        let identity: AssemblyIdentity = self.defining_dependency(full_name)?.assembly.clone();
        if identity == self.module.assembly {
            return None;
        }
        Some(self.module.add_assembly_ref(identity))
    }

    fn redirect_types(&mut self) -> usize {
        let maps = self.maps;
        let mut changes = 0;
        for index in 0..self.module.type_refs.len() {
            let old = self.module.type_refs[index].full_name();
            let Some(RelinkMapEntry::Type(new)) = maps.symbol(&old) else {
                continue;
            };

            let (namespace, name) = split_type_name(new);
            let (namespace, name) = (namespace.to_string(), name.to_string());
            let scope = self.scope_for(new);

            let type_ref = &mut self.module.type_refs[index];
            type_ref.namespace = namespace;
            type_ref.name = name;
            if scope.is_some() {
                type_ref.scope = scope;
            }
            changes += 1;
        }
        changes
    }

    fn redirect_members(&mut self) -> Result<usize> {
        let mut changes = 0;
        for index in 0..self.module.member_refs.len() {
            let Some(id) = self.module.member_ref_id(table_index(index)) else {
                continue;
            };
            let Some(target) = self.maps.symbol(&id).and_then(RelinkMapEntry::member_id) else {
                continue;
            };

            let target = MemberId::parse(&target)?;
            let scope = self.scope_for(&target.declaring_type);
            let parent = self.module.import_type(&target.declaring_type, scope);

            let member = &mut self.module.member_refs[index];
            member.parent = parent;
            member.name = target.name;
            member.return_type = target.return_type;
            member.parameters = target.parameters;
            changes += 1;
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::Path};

    use super::*;
    use crate::{context::LoadedAssembly, metadata::module::ModuleBuilder};

    struct NoResolver;

    impl AssemblyResolver for NoResolver {
        fn resolve(
            &self,
            _name: &str,
            _stack: &mut ResolutionStack,
        ) -> Result<Option<Arc<LoadedAssembly>>> {
            Ok(None)
        }

        fn load_relinked_assembly(&self, _path: &Path) -> Result<Option<Arc<LoadedAssembly>>> {
            Ok(None)
        }

        fn is_blacklisted(&self, _name: &str) -> bool {
            false
        }
    }

    fn maps() -> SharedRelinkMaps {
        let utils = ModuleBuilder::new("MonoMod.Utils")
            .method("MonoMod.Utils.Extensions", "GetID", "System.String", &[], &[])
            .build()
            .unwrap();
        let mut modules = HashMap::new();
        modules.insert("MonoMod.Utils".to_string(), Arc::new(utils));

        let mut symbols: HashMap<_, _> = crate::relink::maps::legacy_entries().into_iter().collect();
        symbols.insert(
            "Celeste.OldApi".to_string(),
            RelinkMapEntry::Type("Celeste.NewApi".to_string()),
        );
        SharedRelinkMaps::from_parts(modules, symbols)
    }

    #[test]
    fn test_split_member_entry() {
        assert_eq!(
            split_member_entry("System.String GetID(System.String)"),
            Some(("System.String", "GetID(System.String)"))
        );
        assert_eq!(split_member_entry("NoSpace"), None);
    }

    #[test]
    fn test_auto_patch_redirects_and_rules() {
        let module = ModuleBuilder::new("Foo")
            .assembly_ref("MonoMod.Utils", "22.0")
            .assembly_ref("Game", "1.0")
            .type_ref("MonoMod.Utils", "MonoMod.Utils.MonoModExt")
            .type_ref("Game", "Celeste.OldApi")
            .method(
                "Foo.Mod",
                "Load",
                "System.Void",
                &[],
                &[
                    "call System.String MonoMod.Utils.MonoModExt::GetFindableID(System.Reflection.MethodBase,System.String,System.String,System.Boolean,System.Boolean,System.Boolean)",
                    "nop",
                    "ret",
                ],
            )
            .rule("remove-instructions", "Foo.Mod::Load", &["1", "1"])
            .build()
            .unwrap();
        let rules_module = Arc::new(
            ModuleBuilder::new("Game.Mod.mm")
                .rule("remove-instructions", "Foo.Mod::Missing", &["0", "1"])
                .build()
                .unwrap(),
        );
        let maps = maps();

        let mut session = RelinkSession::new(module, &maps, &rules_module);
        session
            .map_dependencies(&NoResolver, &mut ResolutionStack::new())
            .unwrap();
        assert_eq!(session.dependencies().len(), 1);

        let stats = session.auto_patch(&RuleRegistry::default()).unwrap();
        assert_eq!(stats.types, 2);
        assert_eq!(stats.members, 1);
        assert_eq!(stats.rules, 1);

        let module = session.into_module();
        assert!(module.flags.contains(ModuleFlags::RELINKED));
        assert!(module.rules.is_empty());
        assert_eq!(module.type_refs[1].full_name(), "Celeste.NewApi");
        assert_eq!(
            module.member_ref_id(0).as_deref(),
            Some("System.String MonoMod.Utils.Extensions::GetID(System.Reflection.MethodBase,System.String,System.String,System.Boolean,System.Boolean,System.Boolean)")
        );
        assert_eq!(module.types[0].methods[0].body.len(), 2);
    }

    #[test]
    fn test_rules_module_reference_resolves_to_itself() {
        let module = ModuleBuilder::new("Foo")
            .assembly_ref("Game.Mod.mm", "1.0")
            .assembly_ref("Unknown", "1.0")
            .build()
            .unwrap();
        let rules_module = Arc::new(ModuleBuilder::new("Game.Mod.mm").build().unwrap());
        let maps = SharedRelinkMaps::default();

        let mut session = RelinkSession::new(module, &maps, &rules_module);
        session
            .map_dependencies(&NoResolver, &mut ResolutionStack::new())
            .unwrap();

        assert_eq!(session.dependencies().len(), 1);
        assert!(Arc::ptr_eq(&session.dependencies()[0], &rules_module));
    }
}
