//! Per-mod assembly isolation.
//!
//! Every loaded mod gets a [`ModAssemblyContext`]: an isolation boundary that owns the
//! assemblies relinked for that mod and answers assembly and native library requests on its
//! behalf. Requests are answered in three tiers:
//!
//! 1. **Local-this** - the mod's own package contains `<name>.dll` next to its main assembly.
//!    This is the only tier that relinks.
//! 2. **Local-dependency** - the local-this tier of each declared (or previously promoted)
//!    dependency context that is not already resolving for this request.
//! 3. **Global** - the host's assemblies, then the local-this tier of every other live
//!    context. A context found this way is promoted to a dependency.
//!
//! Hits are memoized per tier; misses are not, so a mod installed later can still satisfy a
//! request.
//!
//! # Lifecycle
//!
//! ```text
//! Constructed -> Live -> Disposing -> Disposed
//! ```
//!
//! A context is registered with the [`ContextRegistry`] while it becomes live and removed
//! during disposal. Every operation on a disposing or disposed context fails with
//! [`crate::Error::Disposed`].
//!
//! # Locking
//!
//! Materializing an assembly takes the relinker's global lock first and the context's own
//! reentrant lock second. Both are reentrant, so relinking one assembly may resolve and
//! relink others on the same thread. Memoized hits take neither lock.
//!
//! # Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use modscope::{ContextRegistry, ModAssemblyContext};
//!
//! let ctx = ModAssemblyContext::new(Arc::new(meta), &registry)?;
//! let main = ctx.load_assembly_from_mod_path("Code/Foo.dll", "Foo")?;
//! let helper = ctx.load("Foo.Helpers")?;
//! ctx.dispose();
//! assert!(ctx.load("Foo.Helpers").is_err());
//! ```

pub mod assembly;
pub mod host;
pub mod native;
pub mod package;
pub mod registry;
pub mod resolution;
pub mod watcher;

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use strum::Display;

pub use assembly::LoadedAssembly;
pub use host::{HostAssemblies, HostAssemblySet};
pub use native::{NativeLibrary, NativeLibraryLoader, Platform, SystemLibraryLoader};
pub use registry::ContextRegistry;
pub use resolution::ResolutionStack;
pub use watcher::ReloadWatcher;

use crate::{
    context::{
        native::{find_library, unpack_archive_libraries},
        package::{is_plain_file_name, join_path, normalize_path, ModPackage},
    },
    metadata::module::ModuleDefinition,
    modinfo::{ModMetadata, ModSource},
    relink::{AssemblyBytes, AssemblyResolver, RelinkRequest},
    Error, Result,
};

/// Process-unique identifier of an isolation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub usize);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a [`ModAssemblyContext`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created but not yet registered
    Constructed,
    /// Serving loads and resolves
    Live,
    /// One caller is unloading the context
    Disposing,
    /// Unloaded and removed from the registry
    Disposed,
}

/// A memo split into the local and global tier.
struct TierCache<T> {
    local: DashMap<String, T>,
    global: DashMap<String, T>,
}

impl<T: Clone> TierCache<T> {
    fn new() -> Self {
        TierCache {
            local: DashMap::new(),
            global: DashMap::new(),
        }
    }

    fn get(&self, name: &str) -> Option<T> {
        self.local
            .get(name)
            .or_else(|| self.global.get(name))
            .map(|entry| entry.value().clone())
    }

    fn clear(&self) {
        self.local.clear();
        self.global.clear();
    }
}

type LocalTier<T> = fn(&ModAssemblyContext, &str, &mut ResolutionStack) -> Result<Option<T>>;

#[derive(Default)]
struct LoadState {
    /// Materialized assemblies by normalized package path; `None` while in flight
    loaded: HashMap<String, Option<Arc<LoadedAssembly>>>,
    /// Every assembly loaded into the context, in load order
    assemblies: Vec<Arc<LoadedAssembly>>,
    /// Directory holding this mod's native libraries, once located
    unmanaged_dir: Option<PathBuf>,
}

/// The isolation boundary of one mod.
pub struct ModAssemblyContext {
    id: ContextId,
    meta: Arc<ModMetadata>,
    registry: Arc<ContextRegistry>,
    base_dir: String,
    state: RwLock<ContextState>,
    load_state: ReentrantMutex<RefCell<LoadState>>,
    load_cache: TierCache<Arc<LoadedAssembly>>,
    resolve_cache: TierCache<Arc<LoadedAssembly>>,
    unmanaged_cache: TierCache<Arc<NativeLibrary>>,
    dependencies: RwLock<Vec<String>>,
    active_dependencies: RwLock<Vec<String>>,
    watchers: Mutex<Vec<ReloadWatcher>>,
}

impl fmt::Debug for ModAssemblyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModAssemblyContext")
            .field("id", &self.id)
            .field("name", &self.meta.name)
            .field("state", &self.state())
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl ModAssemblyContext {
    /// Create and register the context for `meta`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Configuration`] if a live context with the same mod name is
    /// already registered.
    pub fn new(meta: Arc<ModMetadata>, registry: &Arc<ContextRegistry>) -> Result<Arc<Self>> {
        let base_dir = meta
            .dll
            .as_deref()
            .map(normalize_path)
            .and_then(|dll| dll.rsplit_once('/').map(|(dir, _)| dir.to_string()))
            .unwrap_or_default();
        let dependencies = meta.all_dependencies().map(|d| d.name.clone()).collect();

        let ctx = Arc::new(ModAssemblyContext {
            id: registry.next_id(),
            meta,
            registry: registry.clone(),
            base_dir,
            state: RwLock::new(ContextState::Constructed),
            load_state: ReentrantMutex::new(RefCell::new(LoadState::default())),
            load_cache: TierCache::new(),
            resolve_cache: TierCache::new(),
            unmanaged_cache: TierCache::new(),
            dependencies: RwLock::new(dependencies),
            active_dependencies: RwLock::new(Vec::new()),
            watchers: Mutex::new(Vec::new()),
        });

        registry.register(&ctx)?;
        *ctx.state.write() = ContextState::Live;
        tracing::info!(target: "modasmctx", "Created mod assembly context {}", ctx.name());
        Ok(ctx)
    }

    /// Context id.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Name of the owning mod.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Metadata of the owning mod.
    #[must_use]
    pub fn meta(&self) -> &Arc<ModMetadata> {
        &self.meta
    }

    /// Package directory of the main assembly, normalized; empty for the package root.
    #[must_use]
    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    /// The registry this context belongs to.
    #[must_use]
    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContextState {
        *self.state.read()
    }

    /// Returns `true` once disposal has started.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(
            self.state(),
            ContextState::Disposing | ContextState::Disposed
        )
    }

    /// Assemblies loaded into this context, in load order.
    #[must_use]
    pub fn assemblies(&self) -> Vec<Arc<LoadedAssembly>> {
        self.load_state.lock().borrow().assemblies.clone()
    }

    /// Declared and promoted dependency mod names.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        self.dependencies.read().clone()
    }

    /// Directories watched for code reload.
    #[must_use]
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.watchers
            .lock()
            .iter()
            .map(|w| w.dir().to_path_buf())
            .collect()
    }

    /// Dependency mod names that actually satisfied a request.
    #[must_use]
    pub fn active_dependencies(&self) -> Vec<String> {
        self.active_dependencies.read().clone()
    }

    /// Load an assembly by name from this mod or its dependency graph.
    ///
    /// # Errors
    /// Returns [`crate::Error::Disposed`] after disposal, or any fatal error.
    pub fn load(&self, name: &str) -> Result<Option<Arc<LoadedAssembly>>> {
        let mut stack = ResolutionStack::new();
        let result = self.tiered(
            name,
            &mut stack,
            &self.load_cache,
            Self::load_local,
            |name| self.registry.host().load(name),
        );
        if result.as_ref().is_ok_and(Option::is_none) {
            tracing::debug!(target: "modasmctx", "{} could not load {}", self.name(), name);
        }
        result
    }

    /// Resolve a referenced assembly by name, using `stack` as the cycle guard.
    ///
    /// # Errors
    /// Returns [`crate::Error::Disposed`] after disposal, or any fatal error.
    pub fn resolve(
        &self,
        name: &str,
        stack: &mut ResolutionStack,
    ) -> Result<Option<Arc<LoadedAssembly>>> {
        self.tiered(
            name,
            stack,
            &self.resolve_cache,
            Self::load_local,
            |name| self.registry.host().load(name),
        )
    }

    /// Load a native library by name from this mod or its dependency graph.
    ///
    /// # Errors
    /// Returns [`crate::Error::Disposed`] after disposal, or any fatal error.
    pub fn load_unmanaged(&self, name: &str) -> Result<Option<Arc<NativeLibrary>>> {
        let mut stack = ResolutionStack::new();
        self.tiered(
            name,
            &mut stack,
            &self.unmanaged_cache,
            Self::unmanaged_local,
            |name| self.registry.native_loader().load_system(name),
        )
    }

    /// Relink and load the assembly at `path` inside this mod's package.
    ///
    /// # Returns
    /// `Ok(None)` if the file does not exist or relinking or loading failed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Disposed`] after disposal, or any fatal error.
    pub fn load_assembly_from_mod_path(
        &self,
        path: &str,
        assembly_name: &str,
    ) -> Result<Option<Arc<LoadedAssembly>>> {
        self.ensure_live()?;
        let mut stack = ResolutionStack::new();
        stack.scoped(self.id, |stack| self.materialize(path, assembly_name, stack))
    }

    /// Load an already relinked file into this context.
    ///
    /// If an assembly with the same name is already loaded the existing one is returned.
    ///
    /// # Errors
    /// Returns [`crate::Error::Blacklisted`] for forbidden identities, a read error for
    /// invalid files, or [`crate::Error::Disposed`] after disposal.
    pub fn load_relinked_assembly(&self, path: &Path) -> Result<Option<Arc<LoadedAssembly>>> {
        self.ensure_live()?;

        let symbol_path = path.with_extension("pdb");
        let module = if symbol_path.is_file() {
            match ModuleDefinition::from_file(path, Some(&symbol_path)) {
                Ok(module) => module,
                Err(e) => {
                    tracing::warn!(
                        target: "modasmctx",
                        "Ignoring unusable symbols {}: {}",
                        symbol_path.display(),
                        e
                    );
                    ModuleDefinition::from_file(path, None)?
                }
            }
        } else {
            ModuleDefinition::from_file(path, None)?
        };

        if self.registry.is_blacklisted(&module.assembly.name) {
            return Err(Error::Blacklisted {
                module: self.meta.name.clone(),
                assembly: module.assembly.name.clone(),
            });
        }

        let guard = self.load_state.lock();
        let mut state = guard.borrow_mut();
        if let Some(existing) = state
            .assemblies
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(&module.assembly.name))
        {
            tracing::warn!(
                target: "modasmctx",
                "Assembly {} is already loaded in {}, keeping the first one",
                existing.name(),
                self.name()
            );
            return Ok(Some(existing.clone()));
        }

        let assembly = Arc::new(LoadedAssembly::new(module, path, Some(self.id)));
        state.assemblies.push(assembly.clone());
        tracing::debug!(
            target: "modasmctx",
            "Loaded {} into {}",
            assembly.name(),
            self.name()
        );
        Ok(Some(assembly))
    }

    /// Unload every assembly and leave the registry.
    ///
    /// Concurrent and repeated calls return immediately while the first caller finishes the
    /// teardown.
    pub fn dispose(&self) {
        {
            let mut state = self.state.write();
            if matches!(*state, ContextState::Disposing | ContextState::Disposed) {
                return;
            }
            *state = ContextState::Disposing;
        }
        tracing::info!(target: "modasmctx", "Disposing mod assembly context {}", self.name());

        let assemblies = {
            let _global = self.registry.relinker().lock();
            let guard = self.load_state.lock();
            let mut state = guard.borrow_mut();
            state.loaded.clear();
            state.unmanaged_dir = None;
            std::mem::take(&mut state.assemblies)
        };

        self.load_cache.clear();
        self.resolve_cache.clear();
        self.unmanaged_cache.clear();
        self.dependencies.write().clear();
        self.active_dependencies.write().clear();
        let watchers = std::mem::take(&mut *self.watchers.lock());
        drop(watchers);

        for assembly in &assemblies {
            self.registry.notify_unload(self.name(), assembly);
        }
        drop(assemblies);

        self.registry.unregister(self.name(), self.id);
        *self.state.write() = ContextState::Disposed;
    }

    /// Drop the resolve caches, which are only needed while relinking.
    pub fn post_boot_cleanup(&self) {
        self.resolve_cache.clear();
    }

    /// Returns `true` if `path` is a package file or output of an assembly in this context.
    #[must_use]
    pub fn owns_path(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let package = ModPackage::new(&self.meta.source);
        let guard = self.load_state.lock();
        let state = guard.borrow();

        state
            .loaded
            .keys()
            .any(|key| normalize_path(&package.file_path(key).to_string_lossy()) == path)
            || state
                .assemblies
                .iter()
                .any(|a| normalize_path(&a.location().to_string_lossy()) == path)
    }

    fn ensure_live(&self) -> Result<()> {
        match self.state() {
            ContextState::Disposing | ContextState::Disposed => {
                Err(Error::Disposed(self.meta.name.clone()))
            }
            ContextState::Constructed | ContextState::Live => Ok(()),
        }
    }

    fn tiered<T: Clone>(
        &self,
        name: &str,
        stack: &mut ResolutionStack,
        cache: &TierCache<T>,
        local: LocalTier<T>,
        host: impl Fn(&str) -> Option<T>,
    ) -> Result<Option<T>> {
        self.ensure_live()?;
        if let Some(hit) = cache.get(name) {
            return Ok(Some(hit));
        }

        stack.scoped(self.id, |stack| {
            if let Some(found) = local(self, name, stack)? {
                tracing::debug!(target: "modasmctx", "{}: {} found locally", self.name(), name);
                cache.local.insert(name.to_string(), found.clone());
                return Ok(Some(found));
            }

            for dep in self.dependency_contexts() {
                if stack.contains(dep.id) {
                    continue;
                }
                if let Some(found) = Self::try_local(&dep, name, stack, local)? {
                    tracing::debug!(
                        target: "modasmctx",
                        "{}: {} found in dependency {}",
                        self.name(),
                        name,
                        dep.name()
                    );
                    self.promote(dep.name());
                    cache.local.insert(name.to_string(), found.clone());
                    return Ok(Some(found));
                }
            }

            if let Some(found) = host(name) {
                cache.global.insert(name.to_string(), found.clone());
                return Ok(Some(found));
            }

            let scanned = self.registry.scan(self.id, |other| {
                if stack.contains(other.id) {
                    return Ok(None);
                }
                Self::try_local(other, name, stack, local)
            })?;

            match scanned {
                Some((other, found)) => {
                    tracing::debug!(
                        target: "modasmctx",
                        "{}: {} found globally in {}",
                        self.name(),
                        name,
                        other.name()
                    );
                    self.promote(other.name());
                    cache.global.insert(name.to_string(), found.clone());
                    Ok(Some(found))
                }
                None => Ok(None),
            }
        })
    }

    /// Run another context's local tier with it on the stack. Non-fatal errors are a miss.
    fn try_local<T>(
        other: &ModAssemblyContext,
        name: &str,
        stack: &mut ResolutionStack,
        local: LocalTier<T>,
    ) -> Result<Option<T>> {
        match stack.scoped(other.id, |stack| local(other, name, stack)) {
            Ok(found) => Ok(found),
            Err(e) if e.is_fatal() => Err(e),
            Err(Error::Disposed(_)) => Ok(None),
            Err(e) => {
                tracing::warn!(
                    target: "modasmctx",
                    "Failed looking up {} in {}: {}",
                    name,
                    other.name(),
                    e
                );
                Ok(None)
            }
        }
    }

    fn dependency_contexts(&self) -> Vec<Arc<ModAssemblyContext>> {
        self.dependencies
            .read()
            .iter()
            .filter_map(|name| self.registry.get(name))
            .filter(|ctx| ctx.id != self.id)
            .collect()
    }

    fn promote(&self, name: &str) {
        {
            let mut dependencies = self.dependencies.write();
            if !dependencies.iter().any(|d| d == name) {
                dependencies.push(name.to_string());
            }
        }
        let mut active = self.active_dependencies.write();
        if !active.iter().any(|d| d == name) {
            active.push(name.to_string());
        }
    }

    fn load_local(
        &self,
        name: &str,
        stack: &mut ResolutionStack,
    ) -> Result<Option<Arc<LoadedAssembly>>> {
        self.ensure_live()?;
        if let Some(existing) = self
            .load_state
            .lock()
            .borrow()
            .assemblies
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(name))
        {
            return Ok(Some(existing.clone()));
        }
        if !is_plain_file_name(name) {
            tracing::warn!(
                target: "modasmctx",
                "{}: ignoring assembly name {:?}",
                self.name(),
                name
            );
            return Ok(None);
        }

        let relative = join_path(&self.base_dir, &format!("{name}.dll"));
        if !ModPackage::new(&self.meta.source).contains(&relative)? {
            return Ok(None);
        }
        self.materialize(&relative, name, stack)
    }

    fn unmanaged_local(
        &self,
        name: &str,
        _stack: &mut ResolutionStack,
    ) -> Result<Option<Arc<NativeLibrary>>> {
        self.ensure_live()?;
        if !is_plain_file_name(name) {
            return Ok(None);
        }
        let Some(dir) = self.unmanaged_dir()? else {
            return Ok(None);
        };
        let platform = self.registry.config().platform();
        match find_library(&dir, platform, name) {
            Some(path) => self
                .registry
                .native_loader()
                .load(name, &path)
                .map(Some),
            None => Ok(None),
        }
    }

    fn unmanaged_dir(&self) -> Result<Option<PathBuf>> {
        let guard = self.load_state.lock();
        if let Some(dir) = guard.borrow().unmanaged_dir.clone() {
            return Ok(Some(dir));
        }

        let config = self.registry.config();
        let platform = config.platform();
        let folder = join_path(&self.base_dir, platform.folder());
        let dir = match &self.meta.source {
            ModSource::Directory(root) => {
                let dir = root.join(&folder);
                if !dir.is_dir() {
                    return Ok(None);
                }
                dir
            }
            ModSource::Archive(archive) => unpack_archive_libraries(
                archive,
                &folder,
                platform,
                &config.unmanaged_cache_dir(),
                &self.meta.name,
                &self.meta.hash()?,
            )?,
        };

        guard.borrow_mut().unmanaged_dir = Some(dir.clone());
        Ok(Some(dir))
    }

    /// Relink and load a package file, at most once per path.
    fn materialize(
        &self,
        relative: &str,
        assembly_name: &str,
        stack: &mut ResolutionStack,
    ) -> Result<Option<Arc<LoadedAssembly>>> {
        let key = normalize_path(relative);
        let relinker = self.registry.relinker();
        let _global = relinker.lock();
        let guard = self.load_state.lock();
        self.ensure_live()?;

        let existing = guard.borrow().loaded.get(&key).cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }
        guard.borrow_mut().loaded.insert(key.clone(), None);

        let package = ModPackage::new(&self.meta.source);
        let symbol_key = normalize_path(&Path::new(&key).with_extension("pdb").to_string_lossy());
        let path = package.file_path(&key);
        let symbol_path = package.file_path(&symbol_key);
        let open = || -> Result<AssemblyBytes> {
            let bytes = package.read(&key)?.ok_or_else(|| {
                Error::FileError(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{key} not found in mod {}", self.meta.name),
                ))
            })?;
            Ok((bytes, package.read(&symbol_key)?))
        };
        let request = RelinkRequest {
            assembly_name,
            path: &path,
            symbol_path: Some(&symbol_path),
            open: &open,
        };

        let result = relinker.get_relinked_assembly(&self.meta, self, &request, stack);

        let mut state = guard.borrow_mut();
        match &result {
            Ok(Some(assembly)) => {
                state.loaded.insert(key, Some(assembly.clone()));
                drop(state);
                self.watch(&path);
            }
            _ => {
                state.loaded.remove(&key);
            }
        }
        result
    }

    /// Watch the directory of a package file for code reload, once per directory.
    fn watch(&self, path: &Path) {
        let config = self.registry.config();
        if !config.code_reload() || !self.meta.supports_code_reload {
            return;
        }
        let ModSource::Directory(_) = &self.meta.source else {
            return;
        };
        let Some(dir) = path.parent() else {
            return;
        };

        let mut watchers = self.watchers.lock();
        if watchers.iter().any(|w| w.dir() == dir) {
            return;
        }
        match ReloadWatcher::spawn(
            dir.to_path_buf(),
            config.reload_poll_interval(),
            Arc::downgrade(&self.registry),
        ) {
            Ok(watcher) => watchers.push(watcher),
            Err(e) => tracing::warn!(
                target: "modasmctx",
                "Failed watching {} for {}: {}",
                dir.display(),
                self.name(),
                e
            ),
        }
    }
}

impl AssemblyResolver for ModAssemblyContext {
    fn resolve(
        &self,
        name: &str,
        stack: &mut ResolutionStack,
    ) -> Result<Option<Arc<LoadedAssembly>>> {
        ModAssemblyContext::resolve(self, name, stack)
    }

    fn load_relinked_assembly(&self, path: &Path) -> Result<Option<Arc<LoadedAssembly>>> {
        ModAssemblyContext::load_relinked_assembly(self, path)
    }

    fn is_blacklisted(&self, name: &str) -> bool {
        self.registry.is_blacklisted(name)
    }
}

impl Drop for ModAssemblyContext {
    fn drop(&mut self) {
        if *self.state.get_mut() == ContextState::Disposed {
            return;
        }
        let assemblies = std::mem::take(&mut self.load_state.get_mut().get_mut().assemblies);
        for assembly in &assemblies {
            self.registry.notify_unload(&self.meta.name, assembly);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::LoaderConfig, metadata::identity::AssemblyVersion,
        metadata::module::ModuleBuilder,
    };

    #[derive(Debug, Default)]
    struct FileTrackingLoader;

    impl NativeLibraryLoader for FileTrackingLoader {
        fn load(&self, name: &str, path: &Path) -> Result<Arc<NativeLibrary>> {
            Ok(Arc::new(NativeLibrary::new(name, path, None)))
        }

        fn load_system(&self, _name: &str) -> Option<Arc<NativeLibrary>> {
            None
        }
    }

    fn setup() -> (TempDir, Arc<ContextRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path().join("game");
        fs::create_dir_all(&game).unwrap();
        ModuleBuilder::new("Game")
            .build()
            .unwrap()
            .write_to_file(&game.join("Game.exe"), false)
            .unwrap();
        ModuleBuilder::new("Game.Mod.mm")
            .build()
            .unwrap()
            .write_to_file(&game.join("Game.Mod.mm.dll"), false)
            .unwrap();

        let config = LoaderConfig::builder()
            .game_dir(&game)
            .cache_dir(dir.path().join("cache"))
            .temp_dir(dir.path().join("temp"))
            .host_executable("Game.exe")
            .host_checksum("host-1")
            .platform(Platform::Linux)
            .build()
            .unwrap();
        let registry = ContextRegistry::builder(config)
            .native_loader(Arc::new(FileTrackingLoader))
            .build();
        (dir, registry)
    }

    fn directory_mod(dir: &Path, name: &str, assemblies: &[&str]) -> ModMetadata {
        let root = dir.join("mods").join(name);
        fs::create_dir_all(root.join("Code")).unwrap();
        for assembly in assemblies {
            ModuleBuilder::new(*assembly)
                .build()
                .unwrap()
                .write_to_file(&root.join("Code").join(format!("{assembly}.dll")), false)
                .unwrap();
        }
        ModMetadata::new(
            name,
            AssemblyVersion::new(1, 0, 0, 0),
            ModSource::Directory(root),
        )
        .with_dll(format!("Code/{name}.dll"))
    }

    #[test]
    fn test_lifecycle() {
        let (dir, registry) = setup();
        let meta = Arc::new(directory_mod(dir.path(), "Foo", &["Foo"]));

        let ctx = ModAssemblyContext::new(meta.clone(), &registry).unwrap();
        assert_eq!(ctx.state(), ContextState::Live);
        assert_eq!(ctx.base_dir(), "Code");
        assert!(Arc::ptr_eq(&registry.get("Foo").unwrap(), &ctx));

        let duplicate = ModAssemblyContext::new(meta, &registry);
        assert!(matches!(duplicate, Err(Error::Configuration(_))));

        ctx.dispose();
        assert_eq!(ctx.state(), ContextState::Disposed);
        assert!(registry.get("Foo").is_none());
        assert!(matches!(ctx.load("Foo"), Err(Error::Disposed(_))));
        assert!(matches!(
            ctx.load_assembly_from_mod_path("Code/Foo.dll", "Foo"),
            Err(Error::Disposed(_))
        ));
        assert!(matches!(ctx.load_unmanaged("fmod"), Err(Error::Disposed(_))));

        ctx.dispose();
        assert_eq!(ctx.state(), ContextState::Disposed);
    }

    #[test]
    fn test_load_local_assemblies() {
        let (dir, registry) = setup();
        let meta = Arc::new(directory_mod(dir.path(), "Foo", &["Foo", "Foo.Helpers"]));
        let ctx = ModAssemblyContext::new(meta, &registry).unwrap();

        let main = ctx
            .load_assembly_from_mod_path("Code/Foo.dll", "Foo")
            .unwrap()
            .unwrap();
        assert_eq!(main.name(), "Foo");
        assert_eq!(main.context(), Some(ctx.id()));

        let helpers = ctx.load("Foo.Helpers").unwrap().unwrap();
        let again = ctx.load("Foo.Helpers").unwrap().unwrap();
        assert!(Arc::ptr_eq(&helpers, &again));
        assert_eq!(ctx.assemblies().len(), 2);
        assert_eq!(registry.relinker().relink_count(), 2);

        assert!(ctx.load("Missing").unwrap().is_none());
        assert!(ctx.owns_path(&main.location().to_string_lossy()));
    }

    #[test]
    fn test_names_cannot_leave_assembly_dir() {
        let (dir, registry) = setup();
        let meta = directory_mod(dir.path(), "Foo", &["Foo"]);
        ModuleBuilder::new("Secret")
            .build()
            .unwrap()
            .write_to_file(&meta.source.path().join("Secret.dll"), false)
            .unwrap();
        let ctx = ModAssemblyContext::new(Arc::new(meta), &registry).unwrap();

        assert!(ctx.load("../Secret").unwrap().is_none());
        assert!(ctx.load("..\\Secret").unwrap().is_none());
        assert!(ctx.load_unmanaged("../lib-linux/fmod").unwrap().is_none());
        assert!(ctx.assemblies().is_empty());
        assert_eq!(registry.relinker().relink_count(), 0);
    }

    #[test]
    fn test_host_assemblies_are_visible() {
        let (dir, _) = setup();
        let host = Arc::new(HostAssemblySet::new());
        let game = host.insert(
            ModuleBuilder::new("Game").build().unwrap(),
            Path::new("Game.exe"),
        );
        let config = LoaderConfig::builder()
            .game_dir(dir.path().join("game"))
            .host_executable("Game.exe")
            .platform(Platform::Linux)
            .build()
            .unwrap();
        let registry = ContextRegistry::builder(config).host(host).build();

        let ctx = ModAssemblyContext::new(
            Arc::new(directory_mod(dir.path(), "Foo", &["Foo"])),
            &registry,
        )
        .unwrap();
        let found = ctx.load("Game").unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &game));
        assert_eq!(registry.scan_count(), 0);
    }

    #[test]
    fn test_unmanaged_from_directory_mod() {
        let (dir, registry) = setup();
        let meta = directory_mod(dir.path(), "Foo", &["Foo"]);
        let native = meta.source.path().join("Code").join("lib-linux");
        fs::create_dir_all(&native).unwrap();
        fs::write(native.join("libfmod.so"), b"elf").unwrap();
        let root_native = meta.source.path().join("lib-linux");
        fs::create_dir_all(&root_native).unwrap();
        fs::write(root_native.join("libsteam.so"), b"elf").unwrap();

        let ctx = ModAssemblyContext::new(Arc::new(meta), &registry).unwrap();
        let library = ctx.load_unmanaged("fmod").unwrap().unwrap();
        assert_eq!(library.path(), native.join("libfmod.so"));
        assert!(library.library().is_none());

        let again = ctx.load_unmanaged("fmod").unwrap().unwrap();
        assert!(Arc::ptr_eq(&library, &again));
        assert!(ctx.load_unmanaged("steam").unwrap().is_none());
    }

    #[test]
    fn test_drop_notifies_unload() {
        let (dir, registry) = setup();
        let unloaded = Arc::new(AtomicUsize::new(0));
        let counter = unloaded.clone();
        registry.on_unload(move |name, _| {
            assert_eq!(name, "Foo");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let ctx = ModAssemblyContext::new(
            Arc::new(directory_mod(dir.path(), "Foo", &["Foo"])),
            &registry,
        )
        .unwrap();
        ctx.load_assembly_from_mod_path("Code/Foo.dll", "Foo")
            .unwrap()
            .unwrap();
        drop(ctx);

        assert_eq!(unloaded.load(Ordering::SeqCst), 1);
        assert!(registry.get("Foo").is_none());
        assert!(registry.is_empty());
    }
}
