//! Mod identity and package metadata.
//!
//! A [`ModMetadata`] describes one installed mod package: its name and version, the mods it
//! depends on, where its content lives and the content hash used for cache validation. The
//! mod discovery layer creates these records; everything else in the crate only reads them,
//! except [`ModMetadata::rehash`] which refreshes the hash when a mod is reloaded.
//!
//! # Package Sources
//!
//! A mod is either an archive ([`ModSource::Archive`]) or an unpacked directory
//! ([`ModSource::Directory`]), never both. The package hash is the SHA-1 of the archive file,
//! or for directories the SHA-1 over every file's relative path and content in sorted order.
//!
//! # Examples
//!
//! ```rust
//! use modscope::modinfo::{ModMetadata, ModSource};
//! use modscope::metadata::identity::AssemblyVersion;
//!
//! let meta = ModMetadata::new("Foo", AssemblyVersion::new(1, 0, 0, 0), ModSource::Directory("Mods/Foo".into()))
//!     .with_dependency("Bar", AssemblyVersion::new(1, 2, 0, 0))
//!     .with_dll("Code/Foo.dll");
//!
//! assert_eq!(meta.dependencies.len(), 1);
//! assert!(!meta.is_archive());
//! ```

use std::{
    io::Read,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use walkdir::WalkDir;

use crate::{
    metadata::identity::AssemblyVersion,
    utils::{bytes_to_hex, sha1_hex},
    Result,
};

/// A dependency declaration: mod name plus minimum version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModDependency {
    /// Name of the required mod
    pub name: String,
    /// Minimum acceptable version
    pub version: AssemblyVersion,
}

/// Where a mod package's content lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModSource {
    /// A zip archive
    Archive(PathBuf),
    /// An unpacked directory
    Directory(PathBuf),
}

impl ModSource {
    /// Path to the archive file or directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ModSource::Archive(path) | ModSource::Directory(path) => path,
        }
    }
}

/// Metadata of one installed mod.
#[derive(Debug)]
pub struct ModMetadata {
    /// Stable mod name; also the isolation context name
    pub name: String,
    /// Mod version
    pub version: AssemblyVersion,
    /// Required dependencies
    pub dependencies: Vec<ModDependency>,
    /// Optional dependencies, used when present
    pub optional_dependencies: Vec<ModDependency>,
    /// Package location
    pub source: ModSource,
    /// Path of the main assembly relative to the package root
    pub dll: Option<String>,
    /// The mod targets the modern runtime only and needs no ABI conversion
    pub netcore_only: bool,
    /// The mod opted into code reloading
    pub supports_code_reload: bool,
    hash: RwLock<Option<String>>,
}

impl ModMetadata {
    /// Create metadata for a mod without dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, version: AssemblyVersion, source: ModSource) -> Self {
        Self {
            name: name.into(),
            version,
            dependencies: Vec::new(),
            optional_dependencies: Vec::new(),
            source,
            dll: None,
            netcore_only: false,
            supports_code_reload: false,
            hash: RwLock::new(None),
        }
    }

    /// Add a required dependency.
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>, version: AssemblyVersion) -> Self {
        self.dependencies.push(ModDependency {
            name: name.into(),
            version,
        });
        self
    }

    /// Add an optional dependency.
    #[must_use]
    pub fn with_optional_dependency(
        mut self,
        name: impl Into<String>,
        version: AssemblyVersion,
    ) -> Self {
        self.optional_dependencies.push(ModDependency {
            name: name.into(),
            version,
        });
        self
    }

    /// Set the main assembly path.
    #[must_use]
    pub fn with_dll(mut self, dll: impl Into<String>) -> Self {
        self.dll = Some(dll.into());
        self
    }

    /// Mark the mod as targeting the modern runtime only.
    #[must_use]
    pub fn netcore_only(mut self, value: bool) -> Self {
        self.netcore_only = value;
        self
    }

    /// Opt the mod into code reloading.
    #[must_use]
    pub fn code_reload(mut self, value: bool) -> Self {
        self.supports_code_reload = value;
        self
    }

    /// Returns `true` for archive packaged mods.
    #[must_use]
    pub fn is_archive(&self) -> bool {
        matches!(self.source, ModSource::Archive(_))
    }

    /// The package content hash, computed on first use.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the package cannot be read.
    pub fn hash(&self) -> Result<String> {
        if let Some(hash) = self.hash.read().as_ref() {
            return Ok(hash.clone());
        }
        self.rehash()
    }

    /// Recompute the package hash, e.g. after the mod changed on disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the package cannot be read.
    pub fn rehash(&self) -> Result<String> {
        let hash = match &self.source {
            ModSource::Archive(path) => sha1_hex(&std::fs::read(path)?),
            ModSource::Directory(path) => hash_directory(path)?,
        };
        *self.hash.write() = Some(hash.clone());
        Ok(hash)
    }

    /// All declared dependencies, required first.
    pub fn all_dependencies(&self) -> impl Iterator<Item = &ModDependency> {
        self.dependencies
            .iter()
            .chain(self.optional_dependencies.iter())
    }
}

fn hash_directory(root: &Path) -> Result<String> {
    let mut hasher = Sha1::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| crate::Error::Error(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());

        let mut file = std::fs::File::open(entry.path())?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        hasher.update(&buffer);
    }
    Ok(bytes_to_hex(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(major: u16) -> AssemblyVersion {
        AssemblyVersion::new(major, 0, 0, 0)
    }

    #[test]
    fn test_directory_hash_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"one").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b.txt"), b"two").unwrap();

        let meta = ModMetadata::new("Foo", v(1), ModSource::Directory(dir.path().into()));
        let first = meta.hash().unwrap();
        assert_eq!(first, meta.hash().unwrap());

        std::fs::write(dir.path().join("sub").join("b.txt"), b"changed").unwrap();
        assert_eq!(first, meta.hash().unwrap());
        assert_ne!(first, meta.rehash().unwrap());
    }

    #[test]
    fn test_archive_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Foo.zip");
        std::fs::write(&path, b"PK fake").unwrap();

        let meta = ModMetadata::new("Foo", v(1), ModSource::Archive(path));
        assert!(meta.is_archive());
        assert_eq!(meta.hash().unwrap(), sha1_hex(b"PK fake"));
    }

    #[test]
    fn test_missing_archive() {
        let meta = ModMetadata::new("Foo", v(1), ModSource::Archive("/nonexistent/Foo.zip".into()));
        assert!(meta.hash().is_err());
    }

    #[test]
    fn test_all_dependencies_order() {
        let meta = ModMetadata::new("Foo", v(1), ModSource::Directory("x".into()))
            .with_optional_dependency("Opt", v(1))
            .with_dependency("Bar", v(2));

        let names: Vec<&str> = meta.all_dependencies().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Bar", "Opt"]);
    }
}
