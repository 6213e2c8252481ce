//! Loader configuration.
//!
//! [`LoaderConfig`] collects every path and policy knob the relinker and the isolation
//! contexts need. It is built once at startup through [`LoaderConfig::builder`] and shared
//! behind an `Arc` by the [`crate::ContextRegistry`].
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---|---|
//! | cache dir | `<game dir>/Mods/Cache` |
//! | temp dir | `<game dir>/temp` |
//! | rules module | `<host exe stem>.Mod.mm.dll`, then `Celeste.Mod.mm.dll` |
//! | platform | detected from the build target |
//! | reload poll interval | 500 ms |
//!
//! # Examples
//!
//! ```rust,no_run
//! use modscope::LoaderConfig;
//!
//! let config = LoaderConfig::builder()
//!     .game_dir("/opt/game")
//!     .host_executable("Game.exe")
//!     .code_reload(true)
//!     .blacklist("Mono.Cecil.Rocks")
//!     .build()?;
//!
//! assert_eq!(
//!     config.rules_module_candidates(),
//!     vec!["Game.Mod.mm.dll".to_string(), "Celeste.Mod.mm.dll".to_string()]
//! );
//! # Ok::<(), modscope::Error>(())
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{context::native::Platform, relink::maps::RelinkMapEntry, Error, Result};

/// Runtime configuration shared by the relinker and all isolation contexts.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    game_dir: PathBuf,
    cache_dir: PathBuf,
    temp_dir: PathBuf,
    host_executable: PathBuf,
    rules_module: Option<String>,
    default_rules_module: String,
    host_checksum: Option<String>,
    code_reload: bool,
    reload_poll_interval: Duration,
    blacklist: Vec<String>,
    relink_map: Vec<(String, RelinkMapEntry)>,
    platform: Platform,
}

/// Rules module name used when the host executable has been renamed.
pub const DEFAULT_RULES_MODULE: &str = "Celeste.Mod.mm.dll";

impl LoaderConfig {
    /// Start building a configuration.
    #[must_use]
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// The game installation directory, scanned for `*.mm.dll` auxiliary modules.
    #[must_use]
    pub fn game_dir(&self) -> &Path {
        &self.game_dir
    }

    /// Directory holding relinked assemblies and their `.sum` manifests.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory used when the primary output path cannot be written.
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Root of the unpacked native library cache.
    #[must_use]
    pub fn unmanaged_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("unmanaged-libs")
    }

    /// Absolute path of the host executable.
    #[must_use]
    pub fn host_executable(&self) -> PathBuf {
        if self.host_executable.is_absolute() {
            self.host_executable.clone()
        } else {
            self.game_dir.join(&self.host_executable)
        }
    }

    /// File names the shared rules module may have, in lookup order.
    ///
    /// An explicit override is the only candidate. Otherwise the name derived from the host
    /// executable comes first and the default name second.
    #[must_use]
    pub fn rules_module_candidates(&self) -> Vec<String> {
        if let Some(name) = &self.rules_module {
            return vec![name.clone()];
        }
        let stem = self
            .host_executable
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let derived = format!("{stem}.Mod.mm.dll");
        if derived == self.default_rules_module {
            vec![derived]
        } else {
            vec![derived, self.default_rules_module.clone()]
        }
    }

    /// Returns `true` if `file_name` is one of the rules module candidates.
    #[must_use]
    pub fn is_rules_module(&self, file_name: &str) -> bool {
        self.rules_module_candidates()
            .iter()
            .any(|candidate| candidate == file_name)
    }

    /// Explicit host checksum, if configured.
    #[must_use]
    pub fn host_checksum(&self) -> Option<&str> {
        self.host_checksum.as_deref()
    }

    /// Whether code reload notifications are honoured.
    #[must_use]
    pub fn code_reload(&self) -> bool {
        self.code_reload
    }

    /// How often code reload watchers poll their directories.
    #[must_use]
    pub fn reload_poll_interval(&self) -> Duration {
        self.reload_poll_interval
    }

    /// Additional assembly names that mods may never load.
    #[must_use]
    pub fn blacklist(&self) -> &[String] {
        &self.blacklist
    }

    /// Additional symbol relink entries.
    #[must_use]
    pub fn relink_map(&self) -> &[(String, RelinkMapEntry)] {
        &self.relink_map
    }

    /// Native library platform.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }
}

/// Builder for [`LoaderConfig`].
#[derive(Debug, Default)]
pub struct LoaderConfigBuilder {
    game_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    host_executable: Option<PathBuf>,
    rules_module: Option<String>,
    default_rules_module: Option<String>,
    host_checksum: Option<String>,
    code_reload: bool,
    reload_poll_interval: Option<Duration>,
    blacklist: Vec<String>,
    relink_map: Vec<(String, RelinkMapEntry)>,
    platform: Option<Platform>,
}

impl LoaderConfigBuilder {
    /// Game installation directory (required).
    #[must_use]
    pub fn game_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.game_dir = Some(path.into());
        self
    }

    /// Relink cache directory.
    #[must_use]
    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Fallback output directory.
    #[must_use]
    pub fn temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(path.into());
        self
    }

    /// Host executable, absolute or relative to the game directory (required).
    #[must_use]
    pub fn host_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_executable = Some(path.into());
        self
    }

    /// Override the rules module file name.
    #[must_use]
    pub fn rules_module(mut self, name: impl Into<String>) -> Self {
        self.rules_module = Some(name.into());
        self
    }

    /// Rules module file name tried after the one derived from the host executable.
    #[must_use]
    pub fn default_rules_module(mut self, name: impl Into<String>) -> Self {
        self.default_rules_module = Some(name.into());
        self
    }

    /// Use `checksum` instead of hashing the host executable.
    #[must_use]
    pub fn host_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.host_checksum = Some(checksum.into());
        self
    }

    /// Enable code reload notifications.
    #[must_use]
    pub fn code_reload(mut self, enabled: bool) -> Self {
        self.code_reload = enabled;
        self
    }

    /// Poll interval of code reload watchers.
    #[must_use]
    pub fn reload_poll_interval(mut self, interval: Duration) -> Self {
        self.reload_poll_interval = Some(interval);
        self
    }

    /// Forbid an additional assembly name.
    #[must_use]
    pub fn blacklist(mut self, name: impl Into<String>) -> Self {
        self.blacklist.push(name.into());
        self
    }

    /// Add a symbol relink entry.
    #[must_use]
    pub fn relink_entry(mut self, from: impl Into<String>, to: RelinkMapEntry) -> Self {
        self.relink_map.push((from.into(), to));
        self
    }

    /// Override native library platform detection.
    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    /// Returns [`crate::Error::Configuration`] if the game directory or host executable is
    /// missing, or if no platform could be detected.
    pub fn build(self) -> Result<LoaderConfig> {
        let game_dir = self
            .game_dir
            .ok_or_else(|| Error::Configuration("game directory is not set".to_string()))?;
        let host_executable = self
            .host_executable
            .ok_or_else(|| Error::Configuration("host executable is not set".to_string()))?;
        if host_executable.file_stem().is_none() {
            return Err(Error::Configuration(format!(
                "host executable '{}' has no file name",
                host_executable.display()
            )));
        }

        let platform = match self.platform {
            Some(platform) => platform,
            None => Platform::current().ok_or_else(|| {
                Error::Configuration("unsupported platform for native libraries".to_string())
            })?,
        };

        Ok(LoaderConfig {
            cache_dir: self
                .cache_dir
                .unwrap_or_else(|| game_dir.join("Mods").join("Cache")),
            temp_dir: self.temp_dir.unwrap_or_else(|| game_dir.join("temp")),
            game_dir,
            host_executable,
            rules_module: self.rules_module,
            default_rules_module: self
                .default_rules_module
                .unwrap_or_else(|| DEFAULT_RULES_MODULE.to_string()),
            host_checksum: self.host_checksum,
            code_reload: self.code_reload,
            reload_poll_interval: self
                .reload_poll_interval
                .unwrap_or(Duration::from_millis(500)),
            blacklist: self.blacklist,
            relink_map: self.relink_map,
            platform,
        })
    }
}
