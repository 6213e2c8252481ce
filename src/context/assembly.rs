//! Loaded assembly handles.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    context::ContextId,
    metadata::{identity::AssemblyIdentity, module::ModuleDefinition},
};

static NEXT_ASSEMBLY_ID: AtomicU64 = AtomicU64::new(1);

/// An assembly loaded into an isolation context or provided by the host.
///
/// Handles are shared behind `Arc`; two requests observing the same load see pointer-equal
/// handles.
pub struct LoadedAssembly {
    id: u64,
    identity: AssemblyIdentity,
    location: PathBuf,
    module: Arc<ModuleDefinition>,
    context: Option<ContextId>,
    has_symbols: bool,
}

impl LoadedAssembly {
    /// Wrap `module`, loaded from `location`, as owned by `context` (`None` for the host).
    #[must_use]
    pub fn new(
        module: ModuleDefinition,
        location: impl Into<PathBuf>,
        context: Option<ContextId>,
    ) -> Self {
        Self::from_shared(Arc::new(module), location, context)
    }

    /// Like [`LoadedAssembly::new`] for an already shared module.
    #[must_use]
    pub fn from_shared(
        module: Arc<ModuleDefinition>,
        location: impl Into<PathBuf>,
        context: Option<ContextId>,
    ) -> Self {
        LoadedAssembly {
            id: NEXT_ASSEMBLY_ID.fetch_add(1, Ordering::Relaxed),
            identity: module.assembly.clone(),
            has_symbols: module.has_symbols(),
            location: location.into(),
            module,
            context,
        }
    }

    /// Process-unique handle id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Assembly identity.
    #[must_use]
    pub fn identity(&self) -> &AssemblyIdentity {
        &self.identity
    }

    /// Simple assembly name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// File the assembly was loaded from.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The loaded module.
    #[must_use]
    pub fn module(&self) -> &Arc<ModuleDefinition> {
        &self.module
    }

    /// Owning context, `None` for host assemblies.
    #[must_use]
    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    /// Whether debug symbols were attached when loading.
    #[must_use]
    pub fn has_symbols(&self) -> bool {
        self.has_symbols
    }
}

impl fmt::Debug for LoadedAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedAssembly")
            .field("id", &self.id)
            .field("identity", &self.identity.display_name())
            .field("location", &self.location)
            .field("context", &self.context)
            .field("has_symbols", &self.has_symbols)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::module::ModuleBuilder;

    #[test]
    fn test_loaded_assembly_fields() {
        let module = ModuleBuilder::new("Foo").with_symbols().build().unwrap();
        let a = LoadedAssembly::new(module.clone(), "/cache/Foo.Foo.dll", Some(ContextId(3)));
        let b = LoadedAssembly::new(module, "/cache/Foo.Foo.dll", None);

        assert_eq!(a.name(), "Foo");
        assert!(a.has_symbols());
        assert_eq!(a.context(), Some(ContextId(3)));
        assert_eq!(b.context(), None);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.location(), Path::new("/cache/Foo.Foo.dll"));
    }
}
