//! Process-wide relink maps.
//!
//! Two read-mostly tables are shared by every relink operation:
//!
//! - The **module map** points an assembly name at a concrete module to use instead. It is
//!   built by scanning the game directory for `*.mm.dll` auxiliary modules: the rules module
//!   maps to the host executable, `XYZ.mm.dll` maps to `XYZ.dll` when that file exists and is
//!   skipped otherwise.
//! - The **symbol map** redirects legacy type names and member identifiers to their current
//!   replacements, keeping old mods working after APIs moved.
//!
//! Both are built once by [`crate::relink::Relinker`] on first use and are immutable
//! afterwards.

use std::{collections::HashMap, fs, path::Path, sync::Arc};

use crate::{
    config::LoaderConfig, metadata::module::ModuleDefinition, relink::session::split_member_entry,
    Result,
};

/// Target of a symbol map entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelinkMapEntry {
    /// Redirect a type to another full type name
    Type(String),
    /// Redirect a member to another declaring type and member
    Member {
        /// Full name of the new declaring type
        declaring_type: String,
        /// New member without declaring type, e.g. `System.String GetID(System.String)`
        member: String,
    },
}

impl RelinkMapEntry {
    /// Convenience constructor for [`RelinkMapEntry::Member`].
    #[must_use]
    pub fn member(declaring_type: impl Into<String>, member: impl Into<String>) -> Self {
        RelinkMapEntry::Member {
            declaring_type: declaring_type.into(),
            member: member.into(),
        }
    }

    /// Full member identifier this entry redirects to, or `None` for type entries.
    #[must_use]
    pub fn member_id(&self) -> Option<String> {
        match self {
            RelinkMapEntry::Type(_) => None,
            RelinkMapEntry::Member {
                declaring_type,
                member,
            } => split_member_entry(member)
                .map(|(ret, rest)| format!("{ret} {declaring_type}::{rest}")),
        }
    }
}

/// Legacy API redirects that are always present.
#[must_use]
pub fn legacy_entries() -> Vec<(String, RelinkMapEntry)> {
    vec![
        (
            "MonoMod.Utils.MonoModExt".to_string(),
            RelinkMapEntry::Type("MonoMod.Utils.Extensions".to_string()),
        ),
        (
            "System.String MonoMod.Utils.Extensions::GetFindableID(Mono.Cecil.MethodReference,System.String,System.String,System.Boolean,System.Boolean)".to_string(),
            RelinkMapEntry::member(
                "MonoMod.Utils.Extensions",
                "System.String GetID(Mono.Cecil.MethodReference,System.String,System.String,System.Boolean,System.Boolean)",
            ),
        ),
        (
            "System.String MonoMod.Utils.Extensions::GetFindableID(System.Reflection.MethodBase,System.String,System.String,System.Boolean,System.Boolean,System.Boolean)".to_string(),
            RelinkMapEntry::member(
                "MonoMod.Utils.Extensions",
                "System.String GetID(System.Reflection.MethodBase,System.String,System.String,System.Boolean,System.Boolean,System.Boolean)",
            ),
        ),
        (
            "Mono.Cecil.ModuleDefinition MonoMod.Utils.Extensions::ReadModule(System.String,Mono.Cecil.ReaderParameters)".to_string(),
            RelinkMapEntry::member(
                "Mono.Cecil.ModuleDefinition",
                "Mono.Cecil.ModuleDefinition ReadModule(System.String,Mono.Cecil.ReaderParameters)",
            ),
        ),
    ]
}

/// The shared module and symbol maps.
#[derive(Debug, Default)]
pub struct SharedRelinkMaps {
    modules: HashMap<String, Arc<ModuleDefinition>>,
    symbols: HashMap<String, RelinkMapEntry>,
}

impl SharedRelinkMaps {
    /// Build both maps from the game directory and configuration.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the game directory cannot be listed, or any
    /// read error of the host executable, which the rules module is mapped to.
    pub fn build(config: &LoaderConfig) -> Result<Self> {
        let mut modules = HashMap::new();

        let mut entries: Vec<_> = fs::read_dir(config.game_dir())?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        entries.sort();

        for path in entries {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(".mm.dll") else {
                continue;
            };
            let key = format!("{stem}.mm");

            if config.is_rules_module(&file_name) {
                let host = ModuleDefinition::from_file(&config.host_executable(), None)?;
                modules.insert(key, Arc::new(host));
                continue;
            }

            tracing::warn!(target: "relinker", "Found unexpected mod assembly {}!", file_name);
            let remapped = config.game_dir().join(format!("{stem}.dll"));
            if !remapped.is_file() {
                tracing::info!(target: "relinker", "-> couldn't remap, ignoring...");
                continue;
            }

            match ModuleDefinition::from_file(&remapped, None) {
                Ok(module) => {
                    tracing::info!(
                        target: "relinker",
                        "-> remapping to {}",
                        display_name(&remapped)
                    );
                    modules.insert(key, Arc::new(module));
                }
                Err(e) => tracing::warn!(
                    target: "relinker",
                    "-> failed to read {}: {}",
                    display_name(&remapped),
                    e
                ),
            }
        }

        let mut symbols: HashMap<String, RelinkMapEntry> = legacy_entries().into_iter().collect();
        for (from, to) in config.relink_map() {
            symbols.insert(from.clone(), to.clone());
        }

        Ok(SharedRelinkMaps { modules, symbols })
    }

    /// Construct maps directly, mainly for hosts that manage their own module set.
    #[must_use]
    pub fn from_parts(
        modules: HashMap<String, Arc<ModuleDefinition>>,
        symbols: HashMap<String, RelinkMapEntry>,
    ) -> Self {
        SharedRelinkMaps { modules, symbols }
    }

    /// Module mapped for assembly `name`.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Arc<ModuleDefinition>> {
        self.modules.get(name)
    }

    /// Number of mapped modules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Symbol map entry for a type full name or member identifier.
    #[must_use]
    pub fn symbol(&self, key: &str) -> Option<&RelinkMapEntry> {
        self.symbols.get(key)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::native::Platform, metadata::module::ModuleBuilder};

    fn config(dir: &Path) -> LoaderConfig {
        LoaderConfig::builder()
            .game_dir(dir)
            .host_executable("Game.exe")
            .platform(Platform::Linux)
            .relink_entry("Old.Api", RelinkMapEntry::Type("New.Api".into()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_member_entry_id() {
        let entry = RelinkMapEntry::member("A.B", "System.Void Run(System.Int32)");
        assert_eq!(
            entry.member_id().as_deref(),
            Some("System.Void A.B::Run(System.Int32)")
        );
        assert!(RelinkMapEntry::Type("X".into()).member_id().is_none());
    }

    #[test]
    fn test_build_scans_game_dir() {
        let dir = tempfile::tempdir().unwrap();
        let host = ModuleBuilder::new("Game").build().unwrap();
        host.write_to_file(&dir.path().join("Game.exe"), false).unwrap();
        std::fs::write(dir.path().join("Game.Mod.mm.dll"), b"rules").unwrap();

        let fna = ModuleBuilder::new("FNA").build().unwrap();
        fna.write_to_file(&dir.path().join("FNA.dll"), false).unwrap();
        std::fs::write(dir.path().join("FNA.mm.dll"), b"patch").unwrap();
        std::fs::write(dir.path().join("Orphan.mm.dll"), b"patch").unwrap();

        let maps = SharedRelinkMaps::build(&config(dir.path())).unwrap();

        assert_eq!(maps.module_count(), 2);
        assert_eq!(maps.module("Game.Mod.mm").unwrap().assembly.name, "Game");
        assert_eq!(maps.module("FNA.mm").unwrap().assembly.name, "FNA");
        assert!(maps.module("Orphan.mm").is_none());

        assert_eq!(
            maps.symbol("MonoMod.Utils.MonoModExt"),
            Some(&RelinkMapEntry::Type("MonoMod.Utils.Extensions".into()))
        );
        assert_eq!(
            maps.symbol("Old.Api"),
            Some(&RelinkMapEntry::Type("New.Api".into()))
        );
    }

    #[test]
    fn test_build_requires_readable_host() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Game.Mod.mm.dll"), b"rules").unwrap();

        assert!(SharedRelinkMaps::build(&config(dir.path())).is_err());
    }
}
