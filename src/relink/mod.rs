//! Binary reference rewriting.
//!
//! The [`Relinker`] turns a mod assembly built against an older game, framework or API
//! surface into one that loads against the running host. It combines the cache validator
//! ([`cache`]), the shared reference maps ([`maps`]), the declarative rewrite rules
//! ([`rules`]) and the ABI conversion pass ([`coreify`]).
//!
//! # Pipeline
//!
//! 1. Compute the checksum list for the requested assembly and compare it with the cached
//!    manifest. A valid entry is loaded directly; a cached file that fails to load is deleted.
//! 2. Read the module eagerly, retrying without symbols if they are unusable.
//! 3. Reject blacklisted identities before touching anything else.
//! 4. Resolve dependencies through the module map, the rules module and the caller's
//!    [`AssemblyResolver`].
//! 5. Apply symbol map redirects, the shared rules and the mod's own rules.
//! 6. Convert legacy runtime references unless the mod targets the modern runtime only.
//! 7. Write the output with symbols, then without, then to a uniquely named temporary file.
//! 8. Load the output through the resolver and persist the manifest for primary outputs.
//!
//! # Thread Safety
//!
//! The whole pipeline runs under one reentrant lock. Rewrites of different mods are
//! serialized; a rewrite may re-enter the relinker on the same thread when resolving a
//! dependency requires relinking another assembly. [`Relinker::lock`] lets callers take the
//! lock before their own locks so that every thread acquires them in the same order.
//!
//! # Examples
//!
//! ```rust,ignore
//! use modscope::{ContextRegistry, LoaderConfig, ModAssemblyContext};
//!
//! let registry = ContextRegistry::new(LoaderConfig::builder()
//!     .game_dir("/opt/game")
//!     .host_executable("Game.exe")
//!     .build()?);
//! let ctx = ModAssemblyContext::new(meta, &registry)?;
//! let asm = ctx.load_assembly_from_mod_path("Code/Foo.dll", "Foo")?;
//! println!("relinked {} assemblies", registry.relinker().relink_count());
//! ```

pub mod cache;
pub mod coreify;
pub mod maps;
pub mod rules;
pub mod session;

use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

pub use session::{PatchStats, RelinkSession};

use crate::{
    config::LoaderConfig,
    context::{LoadedAssembly, ResolutionStack},
    metadata::module::ModuleDefinition,
    modinfo::ModMetadata,
    relink::{
        cache::{compute_checksums, CacheEntry},
        coreify::{coreify, CoreifyOptions},
        maps::SharedRelinkMaps,
        rules::RuleRegistry,
    },
    utils::md5_file_hex,
    Error, Result,
};

/// Assembly resolution capability the relinker needs from an isolation context.
pub trait AssemblyResolver: Send + Sync {
    /// Resolve a referenced assembly by name.
    ///
    /// # Errors
    /// Fatal errors must be propagated; everything else may be reported as `Ok(None)`.
    fn resolve(&self, name: &str, stack: &mut ResolutionStack)
        -> Result<Option<Arc<LoadedAssembly>>>;

    /// Load a relinked output file into the resolver's isolation boundary.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid module.
    fn load_relinked_assembly(&self, path: &Path) -> Result<Option<Arc<LoadedAssembly>>>;

    /// Returns `true` if assemblies named `name` must never be loaded by mods.
    fn is_blacklisted(&self, name: &str) -> bool;
}

/// Raw module bytes and optional symbol bytes.
pub type AssemblyBytes = (Vec<u8>, Option<Vec<u8>>);

/// One request to [`Relinker::get_relinked_assembly`].
pub struct RelinkRequest<'a> {
    /// Assembly name; names the cache entry
    pub assembly_name: &'a str,
    /// Assembly path, hashed for directory mods
    pub path: &'a Path,
    /// Symbol file path, hashed for directory mods when it exists
    pub symbol_path: Option<&'a Path>,
    /// Produces the input bytes; only called on a cache miss
    pub open: &'a dyn Fn() -> Result<AssemblyBytes>,
}

/// Where a relinked module was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelinkOutput {
    /// Output file
    pub path: PathBuf,
    /// The output is a temporary fallback and must not get a manifest
    pub temporary: bool,
}

#[derive(Debug, Default)]
struct RelinkState {
    rules_module: Option<Arc<ModuleDefinition>>,
}

/// Held global rewrite lock, see [`Relinker::lock`].
pub struct RelinkLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<RelinkState>>,
}

/// The process-wide binary reference rewriter.
pub struct Relinker {
    config: Arc<LoaderConfig>,
    rules: RuleRegistry,
    state: ReentrantMutex<RefCell<RelinkState>>,
    maps: Mutex<Option<Arc<SharedRelinkMaps>>>,
    host_checksum: OnceLock<String>,
    relink_count: AtomicUsize,
}

impl std::fmt::Debug for Relinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relinker")
            .field("game_dir", &self.config.game_dir())
            .field("relink_count", &self.relink_count())
            .finish_non_exhaustive()
    }
}

impl Relinker {
    /// Create a relinker with the built-in rule kinds.
    #[must_use]
    pub fn new(config: Arc<LoaderConfig>) -> Self {
        Self::with_rules(config, RuleRegistry::with_builtins())
    }

    /// Create a relinker using a custom rule registry.
    #[must_use]
    pub fn with_rules(config: Arc<LoaderConfig>, rules: RuleRegistry) -> Self {
        Relinker {
            config,
            rules,
            state: ReentrantMutex::new(RefCell::new(RelinkState::default())),
            maps: Mutex::new(None),
            host_checksum: OnceLock::new(),
            relink_count: AtomicUsize::new(0),
        }
    }

    /// The loader configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<LoaderConfig> {
        &self.config
    }

    /// Acquire the global rewrite lock. Reentrant on the owning thread.
    pub fn lock(&self) -> RelinkLock<'_> {
        RelinkLock {
            _guard: self.state.lock(),
        }
    }

    /// Number of rewrites performed so far. Cache hits are not counted.
    #[must_use]
    pub fn relink_count(&self) -> usize {
        self.relink_count.load(Ordering::Acquire)
    }

    /// The host checksum: the configured override, or the MD5 of the host executable.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the host executable cannot be read.
    pub fn host_checksum(&self) -> Result<String> {
        if let Some(checksum) = self.host_checksum.get() {
            return Ok(checksum.clone());
        }

        let checksum = match self.config.host_checksum() {
            Some(checksum) => checksum.to_string(),
            None => md5_file_hex(&self.config.host_executable())?,
        };
        Ok(self.host_checksum.get_or_init(|| checksum).clone())
    }

    /// The shared module and symbol maps, built on first use.
    ///
    /// # Errors
    /// Returns any error of [`SharedRelinkMaps::build`]; a later call retries.
    pub fn shared_maps(&self) -> Result<Arc<SharedRelinkMaps>> {
        let mut maps = self.maps.lock();
        if let Some(maps) = maps.as_ref() {
            return Ok(maps.clone());
        }

        let built = Arc::new(SharedRelinkMaps::build(&self.config)?);
        tracing::debug!(
            target: "relinker",
            "Built shared relink maps with {} modules",
            built.module_count()
        );
        *maps = Some(built.clone());
        Ok(built)
    }

    /// The shared rules module, read on first use.
    ///
    /// # Errors
    /// Returns [`crate::Error::MissingRulesModule`] if none of the candidate files exists, or
    /// the read error if it cannot be parsed.
    pub fn rules_module(&self) -> Result<Arc<ModuleDefinition>> {
        let guard = self.state.lock();
        if let Some(module) = guard.borrow().rules_module.as_ref() {
            return Ok(module.clone());
        }

        let candidates: Vec<PathBuf> = self
            .config
            .rules_module_candidates()
            .iter()
            .map(|name| self.config.game_dir().join(name))
            .collect();
        let Some(path) = candidates.iter().find(|path| path.is_file()).cloned() else {
            return Err(Error::MissingRulesModule(
                candidates.into_iter().next().unwrap_or_default(),
            ));
        };
        tracing::debug!(target: "relinker", "Using rules module {}", path.display());

        let module = Arc::new(ModuleDefinition::from_file(&path, None)?);
        guard.borrow_mut().rules_module = Some(module.clone());
        Ok(module)
    }

    /// Return the relinked form of an assembly, from cache when possible.
    ///
    /// # Returns
    /// `Ok(Some(..))` with the loaded assembly, or `Ok(None)` if relinking or loading failed
    /// for this mod. Failures are logged.
    ///
    /// # Errors
    /// Only fatal errors are returned, see [`crate::Error::is_fatal`].
    pub fn get_relinked_assembly(
        &self,
        meta: &ModMetadata,
        resolver: &dyn AssemblyResolver,
        request: &RelinkRequest<'_>,
        stack: &mut ResolutionStack,
    ) -> Result<Option<Arc<LoadedAssembly>>> {
        let _guard = self.state.lock();
        let name = request.assembly_name;
        let entry = CacheEntry::new(self.config.cache_dir(), &meta.name, name);

        let checksums = match self.host_checksum().and_then(|host| {
            compute_checksums(&host, meta, request.path, request.symbol_path)
        }) {
            Ok(checksums) => checksums,
            Err(e) => {
                tracing::error!(
                    target: "relinker",
                    "Failed computing checksums for {} ({}): {}",
                    name,
                    meta.name,
                    e
                );
                return Ok(None);
            }
        };

        if entry.is_valid(&checksums) {
            match resolver.load_relinked_assembly(&entry.output) {
                Ok(Some(assembly)) => {
                    tracing::info!(
                        target: "relinker",
                        "Loading cached assembly for {} - {}",
                        meta.name,
                        name
                    );
                    return Ok(Some(assembly));
                }
                Ok(None) => tracing::warn!(
                    target: "relinker",
                    "Failed loading cached assembly for {} - {}",
                    meta.name,
                    name
                ),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!(
                    target: "relinker",
                    "Failed loading cached assembly for {} - {}: {}",
                    meta.name,
                    name,
                    e
                ),
            }
        }
        entry.invalidate();

        tracing::info!(target: "relinker", "Relinking {} ({})", name, meta.name);
        self.relink_count.fetch_add(1, Ordering::AcqRel);

        let output = match self.relink_assembly(meta, resolver, request, &entry.output, stack) {
            Ok(output) => output,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!(
                    target: "relinker",
                    "Failed relinking {} ({}): {}",
                    name,
                    meta.name,
                    e
                );
                return Ok(None);
            }
        };

        let assembly = match resolver.load_relinked_assembly(&output.path) {
            Ok(Some(assembly)) => assembly,
            Ok(None) => {
                tracing::error!(
                    target: "relinker",
                    "Failed loading relinked assembly {} ({})",
                    name,
                    meta.name
                );
                return Ok(None);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!(
                    target: "relinker",
                    "Failed loading relinked assembly {} ({}): {}",
                    name,
                    meta.name,
                    e
                );
                return Ok(None);
            }
        };

        // A name conflict keeps the earlier assembly; the new output was never loaded
        let superseded = assembly.location() != output.path;
        if superseded {
            tracing::warn!(
                target: "relinker",
                "Not caching {} ({}), another assembly with its name is loaded",
                name,
                meta.name
            );
        } else if !output.temporary {
            if let Err(e) = entry.write_manifest(&checksums) {
                tracing::warn!(
                    target: "relinker",
                    "Failed writing checksum manifest for {}: {}",
                    name,
                    e
                );
            }
        }

        Ok(Some(assembly))
    }

    /// Rewrite an assembly and write it to `output` or a temporary fallback.
    ///
    /// # Errors
    /// Returns [`crate::Error::Blacklisted`] for forbidden identities, and any read, rule or
    /// write error of the individual steps.
    pub fn relink_assembly(
        &self,
        meta: &ModMetadata,
        resolver: &dyn AssemblyResolver,
        request: &RelinkRequest<'_>,
        output: &Path,
        stack: &mut ResolutionStack,
    ) -> Result<RelinkOutput> {
        let _guard = self.state.lock();
        let (bytes, symbols) = (request.open)()?;

        let module = match ModuleDefinition::read(&bytes, symbols.as_deref()) {
            Ok(module) => module,
            Err(e) if symbols.is_some() => {
                tracing::warn!(
                    target: "relinker",
                    "Failed reading {} with symbols, retrying without: {}",
                    request.assembly_name,
                    e
                );
                ModuleDefinition::read(&bytes, None)?
            }
            Err(e) => return Err(e),
        };

        if resolver.is_blacklisted(&module.assembly.name) {
            return Err(Error::Blacklisted {
                module: meta.name.clone(),
                assembly: module.assembly.name.clone(),
            });
        }

        let rules_module = self.rules_module()?;
        let maps = self.shared_maps()?;

        let mut session = RelinkSession::new(module, &maps, &rules_module);
        session.map_dependencies(resolver, stack)?;
        session.auto_patch(&self.rules)?;
        let mut module = session.into_module();

        if !meta.netcore_only {
            let stats = coreify(&mut module, CoreifyOptions::default());
            tracing::debug!(
                target: "relinker",
                "Converted {} legacy references in {}",
                stats.references,
                module.assembly.name
            );
        }

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        self.write_output(module, output)
    }

    fn write_output(&self, mut module: ModuleDefinition, output: &Path) -> Result<RelinkOutput> {
        match module.write_to_file(output, true) {
            Ok(()) => {
                return Ok(RelinkOutput {
                    path: output.to_path_buf(),
                    temporary: false,
                })
            }
            Err(e) => tracing::warn!(
                target: "relinker",
                "Failed writing {} with symbols, retrying without: {}",
                output.display(),
                e
            ),
        }

        match module.write_to_file(output, false) {
            Ok(()) => {
                return Ok(RelinkOutput {
                    path: output.to_path_buf(),
                    temporary: false,
                })
            }
            Err(e) => tracing::warn!(
                target: "relinker",
                "Failed writing {}, falling back to a temporary file: {}",
                output.display(),
                e
            ),
        }

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
            .to_string();
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        fs::create_dir_all(self.config.temp_dir())?;
        let temp = self
            .config
            .temp_dir()
            .join(format!("Relinked.{stem}.{stamp}.dll"));
        module.rename(&stamp);

        if let Err(e) = module.write_to_file(&temp, true) {
            tracing::warn!(
                target: "relinker",
                "Failed writing temporary {} with symbols: {}",
                temp.display(),
                e
            );
            module.write_to_file(&temp, false)?;
        }

        Ok(RelinkOutput {
            path: temp,
            temporary: true,
        })
    }
}
