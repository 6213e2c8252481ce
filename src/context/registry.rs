//! Global context registry.
//!
//! The [`ContextRegistry`] is the single service shared by all isolation contexts of a
//! process. It owns the loader configuration, the [`Relinker`], the host assemblies and the
//! native library loader, and it keeps a name-keyed table of every live
//! [`ModAssemblyContext`].
//!
//! # Locking
//!
//! The context table is guarded by a reader/writer lock. Global-tier scans hold a recursive
//! read lock for their whole duration, since a scan can materialize an assembly in another
//! context which may scan again on the same thread. Context construction and disposal take
//! the write lock only briefly and never while holding the relinker lock.
//!
//! The table holds weak references; the owning mod holds the context itself.

use std::{
    collections::BTreeMap,
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use parking_lot::RwLock;

use crate::{
    config::LoaderConfig,
    context::{
        host::{HostAssemblies, HostAssemblySet},
        native::{NativeLibraryLoader, SystemLibraryLoader},
        package::normalize_path,
        ContextId, LoadedAssembly, ModAssemblyContext,
    },
    modinfo::ModMetadata,
    relink::{rules::RuleRegistry, Relinker},
    Error, Result,
};

/// Assembly names that are never loadable from a mod, in addition to host assemblies.
pub const BUILTIN_BLACKLIST: &[&str] = &["Mono.Cecil.Pdb", "Mono.Cecil.Mdb"];

type UnloadListener = Arc<dyn Fn(&str, &LoadedAssembly) + Send + Sync>;
type ReloadHandler = Arc<dyn Fn(&Arc<ModMetadata>) + Send + Sync>;

/// Process-wide registry of live isolation contexts.
pub struct ContextRegistry {
    config: Arc<LoaderConfig>,
    relinker: Relinker,
    host: Arc<dyn HostAssemblies>,
    native_loader: Arc<dyn NativeLibraryLoader>,
    contexts: RwLock<BTreeMap<String, Weak<ModAssemblyContext>>>,
    next_id: AtomicUsize,
    scan_count: AtomicUsize,
    unload_listeners: RwLock<Vec<UnloadListener>>,
    reload_handler: RwLock<Option<ReloadHandler>>,
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("contexts", &self.names())
            .field("relinker", &self.relinker)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ContextRegistry`].
pub struct ContextRegistryBuilder {
    config: LoaderConfig,
    rules: RuleRegistry,
    host: Option<Arc<dyn HostAssemblies>>,
    native_loader: Option<Arc<dyn NativeLibraryLoader>>,
}

impl ContextRegistryBuilder {
    /// Use a custom rule registry.
    #[must_use]
    pub fn rules(mut self, rules: RuleRegistry) -> Self {
        self.rules = rules;
        self
    }

    /// Provide the host's assemblies.
    #[must_use]
    pub fn host(mut self, host: Arc<dyn HostAssemblies>) -> Self {
        self.host = Some(host);
        self
    }

    /// Use a custom native library loader.
    #[must_use]
    pub fn native_loader(mut self, loader: Arc<dyn NativeLibraryLoader>) -> Self {
        self.native_loader = Some(loader);
        self
    }

    /// Build the registry.
    #[must_use]
    pub fn build(self) -> Arc<ContextRegistry> {
        let config = Arc::new(self.config);
        Arc::new(ContextRegistry {
            relinker: Relinker::with_rules(config.clone(), self.rules),
            config,
            host: self
                .host
                .unwrap_or_else(|| Arc::new(HostAssemblySet::new())),
            native_loader: self
                .native_loader
                .unwrap_or_else(|| Arc::new(SystemLibraryLoader)),
            contexts: RwLock::new(BTreeMap::new()),
            next_id: AtomicUsize::new(1),
            scan_count: AtomicUsize::new(0),
            unload_listeners: RwLock::new(Vec::new()),
            reload_handler: RwLock::new(None),
        })
    }
}

impl ContextRegistry {
    /// A registry with no host assemblies and the system native loader.
    #[must_use]
    pub fn new(config: LoaderConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    /// Start building a registry.
    #[must_use]
    pub fn builder(config: LoaderConfig) -> ContextRegistryBuilder {
        ContextRegistryBuilder {
            config,
            rules: RuleRegistry::with_builtins(),
            host: None,
            native_loader: None,
        }
    }

    /// The loader configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<LoaderConfig> {
        &self.config
    }

    /// The process-wide relinker.
    #[must_use]
    pub fn relinker(&self) -> &Relinker {
        &self.relinker
    }

    /// The host's assemblies.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn HostAssemblies> {
        &self.host
    }

    /// The native library loader.
    #[must_use]
    pub fn native_loader(&self) -> &Arc<dyn NativeLibraryLoader> {
        &self.native_loader
    }

    /// The live context for mod `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ModAssemblyContext>> {
        self.contexts.read_recursive().get(name).and_then(Weak::upgrade)
    }

    /// Names of all live contexts, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.contexts
            .read_recursive()
            .iter()
            .filter(|(_, ctx)| ctx.strong_count() > 0)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of live contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names().len()
    }

    /// Returns `true` if no context is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of global-tier scans performed so far.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scan_count.load(Ordering::Acquire)
    }

    /// Returns `true` if mods may never load an assembly named `name`.
    #[must_use]
    pub fn is_blacklisted(&self, name: &str) -> bool {
        BUILTIN_BLACKLIST
            .iter()
            .any(|b| b.eq_ignore_ascii_case(name))
            || self
                .config
                .blacklist()
                .iter()
                .any(|b| b.eq_ignore_ascii_case(name))
            || self
                .host
                .names()
                .iter()
                .any(|b| b.eq_ignore_ascii_case(name))
    }

    /// Register a listener called once per assembly unloaded by a disposing context.
    pub fn on_unload(&self, listener: impl Fn(&str, &LoadedAssembly) + Send + Sync + 'static) {
        self.unload_listeners.write().push(Arc::new(listener));
    }

    /// Set the handler invoked when a reloadable mod's assembly changes on disk.
    pub fn set_reload_handler(&self, handler: impl Fn(&Arc<ModMetadata>) + Send + Sync + 'static) {
        *self.reload_handler.write() = Some(Arc::new(handler));
    }

    /// Report a changed file. If code reload is enabled and `path` is an assembly loaded by a
    /// mod that supports reloading, the reload handler is invoked with that mod.
    ///
    /// # Returns
    /// `true` if a reload was triggered.
    pub fn notify_assembly_changed(&self, path: &Path) -> bool {
        if !self.config.code_reload() {
            return false;
        }
        let Some(handler) = self.reload_handler.read().clone() else {
            return false;
        };

        let changed = normalize_path(&path.to_string_lossy());
        let owner = self
            .contexts()
            .into_iter()
            .find(|ctx| ctx.meta().supports_code_reload && ctx.owns_path(&changed));

        match owner {
            Some(ctx) => {
                tracing::info!(
                    target: "modasmctx",
                    "Assembly {} of {} changed, reloading",
                    changed,
                    ctx.name()
                );
                handler(ctx.meta());
                true
            }
            None => false,
        }
    }

    /// Drop resolution caches of every live context once all mods have loaded.
    pub fn post_boot_cleanup(&self) {
        for ctx in self.contexts() {
            ctx.post_boot_cleanup();
        }
    }

    /// Snapshot of all live contexts.
    #[must_use]
    pub fn contexts(&self) -> Vec<Arc<ModAssemblyContext>> {
        self.contexts
            .read_recursive()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn next_id(&self) -> ContextId {
        ContextId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, ctx: &Arc<ModAssemblyContext>) -> Result<()> {
        let mut contexts = self.contexts.write();
        if contexts.get(ctx.name()).is_some_and(|c| c.strong_count() > 0) {
            return Err(Error::Configuration(format!(
                "a context for mod '{}' is already registered",
                ctx.name()
            )));
        }
        contexts.insert(ctx.name().to_string(), Arc::downgrade(ctx));
        Ok(())
    }

    pub(crate) fn unregister(&self, name: &str, id: ContextId) {
        let mut contexts = self.contexts.write();
        let is_same = contexts
            .get(name)
            .is_some_and(|c| c.upgrade().map_or(true, |ctx| ctx.id() == id));
        if is_same {
            contexts.remove(name);
        }
    }

    pub(crate) fn notify_unload(&self, mod_name: &str, assembly: &LoadedAssembly) {
        let listeners = self.unload_listeners.read().clone();
        for listener in listeners {
            listener(mod_name, assembly);
        }
    }

    /// Offer every live context except `exclude` to `f` until one yields a value. The read
    /// lock is held for the whole scan.
    pub(crate) fn scan<T>(
        &self,
        exclude: ContextId,
        mut f: impl FnMut(&Arc<ModAssemblyContext>) -> Result<Option<T>>,
    ) -> Result<Option<(Arc<ModAssemblyContext>, T)>> {
        self.scan_count.fetch_add(1, Ordering::AcqRel);
        let contexts = self.contexts.read_recursive();
        for ctx in contexts.values().filter_map(Weak::upgrade) {
            if ctx.id() == exclude {
                continue;
            }
            if let Some(value) = f(&ctx)? {
                return Ok(Some((ctx, value)));
            }
        }
        Ok(None)
    }
}
