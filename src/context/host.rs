//! The host's default load context.
//!
//! Assemblies that ship with the game or the runtime are loaded once by the host and are
//! visible to every mod. The isolation contexts consult them in the global tier before
//! scanning other mods, and their names are never loadable from a mod package.

use std::{collections::HashMap, fmt::Debug, path::Path, sync::Arc};

use parking_lot::RwLock;

use crate::{context::LoadedAssembly, metadata::module::ModuleDefinition, Result};

/// Access to assemblies loaded by the host.
pub trait HostAssemblies: Send + Sync + Debug {
    /// Look up a host assembly by simple name, case-insensitively.
    fn load(&self, name: &str) -> Option<Arc<LoadedAssembly>>;

    /// Names of all host assemblies.
    fn names(&self) -> Vec<String>;
}

/// A simple in-memory set of host assemblies.
#[derive(Debug, Default)]
pub struct HostAssemblySet {
    assemblies: RwLock<HashMap<String, Arc<LoadedAssembly>>>,
}

impl HostAssemblySet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module as a host assembly, replacing one with the same name.
    pub fn insert(&self, module: ModuleDefinition, location: &Path) -> Arc<LoadedAssembly> {
        let assembly = Arc::new(LoadedAssembly::new(module, location, None));
        self.assemblies
            .write()
            .insert(assembly.name().to_ascii_lowercase(), assembly.clone());
        assembly
    }

    /// Read a module from disk and add it.
    ///
    /// # Errors
    /// Returns the read error of [`ModuleDefinition::from_file`].
    pub fn insert_file(&self, path: &Path) -> Result<Arc<LoadedAssembly>> {
        let module = ModuleDefinition::from_file(path, None)?;
        Ok(self.insert(module, path))
    }

    /// Number of host assemblies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assemblies.read().len()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assemblies.read().is_empty()
    }
}

impl HostAssemblies for HostAssemblySet {
    fn load(&self, name: &str) -> Option<Arc<LoadedAssembly>> {
        self.assemblies
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    fn names(&self) -> Vec<String> {
        self.assemblies
            .read()
            .values()
            .map(|a| a.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::module::ModuleBuilder;

    #[test]
    fn test_host_lookup_is_case_insensitive() {
        let host = HostAssemblySet::new();
        assert!(host.is_empty());

        let game = host.insert(
            ModuleBuilder::new("Game").build().unwrap(),
            Path::new("/game/Game.exe"),
        );

        let found = host.load("game").unwrap();
        assert!(Arc::ptr_eq(&game, &found));
        assert!(host.load("Other").is_none());
        assert_eq!(host.names(), vec!["Game".to_string()]);
        assert_eq!(host.len(), 1);
    }
}
