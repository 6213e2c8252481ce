//! Relink cache validation.
//!
//! Every relinked assembly is stored as `<cache>/<mod>.<assembly>.dll` next to a `.sum`
//! manifest listing, one per line, the checksums it was produced from. The first line is
//! always the host checksum, so a host update invalidates every cached assembly at once.
//! The remaining lines depend on how the mod is packaged:
//!
//! - **Archive mods**: the whole package hash. Reading the archive twice just to hash a
//!   single entry is avoided, at the cost of invalidating every assembly of the mod when any
//!   file in the archive changes.
//! - **Directory mods**: the MD5 of the assembly file, followed by the MD5 of its symbol file
//!   when one exists.
//!
//! A cache entry is valid only if the output exists, the manifest exists and both checksum
//! lists have the same length and are equal element-wise after trimming.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::{modinfo::ModMetadata, utils::md5_file_hex, Result};

/// Location of one cached relink result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The relinked assembly
    pub output: PathBuf,
    /// The checksum manifest
    pub manifest: PathBuf,
}

impl CacheEntry {
    /// Cache entry for `assembly` of mod `mod_name` inside `cache_dir`.
    #[must_use]
    pub fn new(cache_dir: &Path, mod_name: &str, assembly: &str) -> Self {
        let output = cache_dir.join(format!("{mod_name}.{assembly}.dll"));
        let manifest = output.with_extension("sum");
        CacheEntry { output, manifest }
    }

    /// Sibling symbol file of the output.
    #[must_use]
    pub fn symbols(&self) -> PathBuf {
        self.output.with_extension("pdb")
    }

    /// Read the manifest lines, or `None` if it does not exist or cannot be read.
    #[must_use]
    pub fn read_manifest(&self) -> Option<Vec<String>> {
        let text = fs::read_to_string(&self.manifest).ok()?;
        Some(text.lines().map(ToString::to_string).collect())
    }

    /// Write `checksums` to the manifest, one per line.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the manifest cannot be written.
    pub fn write_manifest(&self, checksums: &[String]) -> Result<()> {
        let mut text = checksums.join("\n");
        text.push('\n');
        fs::write(&self.manifest, text)?;
        Ok(())
    }

    /// Returns `true` if the output exists and its manifest matches `checksums`.
    #[must_use]
    pub fn is_valid(&self, checksums: &[String]) -> bool {
        self.output.is_file()
            && self
                .read_manifest()
                .is_some_and(|cached| checksums_equal(&cached, checksums))
    }

    /// Delete the output, its symbols and the manifest. Files that do not exist are ignored;
    /// other failures are logged since the following write will surface them again.
    pub fn invalidate(&self) {
        for path in [&self.output, &self.symbols(), &self.manifest] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    target: "relinker",
                    "Failed to delete stale cache file {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }
}

/// Compute the ordered checksum list for an assembly of `meta`.
///
/// # Arguments
/// * `host_checksum` - Checksum of the running host
/// * `meta` - The owning mod
/// * `path` - Assembly path (only hashed for directory mods)
/// * `symbol_path` - Symbol file path (only hashed for directory mods, if it exists)
///
/// # Errors
/// Returns [`crate::Error::FileError`] if a file that must be hashed cannot be read.
pub fn compute_checksums(
    host_checksum: &str,
    meta: &ModMetadata,
    path: &Path,
    symbol_path: Option<&Path>,
) -> Result<Vec<String>> {
    let mut checksums = vec![host_checksum.to_string()];

    if meta.is_archive() {
        checksums.push(meta.hash()?);
    } else {
        checksums.push(md5_file_hex(path)?);
        if let Some(symbol_path) = symbol_path.filter(|p| p.is_file()) {
            checksums.push(md5_file_hex(symbol_path)?);
        }
    }

    Ok(checksums)
}

/// Element-wise comparison of two checksum lists after trimming whitespace.
#[must_use]
pub fn checksums_equal(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.trim() == y.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::identity::AssemblyVersion, modinfo::ModSource};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_checksums_equal() {
        assert!(checksums_equal(&strings(&["a", "b"]), &strings(&["a ", "\tb"])));
        assert!(!checksums_equal(&strings(&["a", "b"]), &strings(&["a"])));
        assert!(!checksums_equal(&strings(&["a", "b"]), &strings(&["b", "a"])));
        assert!(checksums_equal(&[], &[]));
    }

    #[test]
    fn test_entry_paths() {
        let entry = CacheEntry::new(Path::new("/cache"), "Foo", "Foo.Helpers");
        assert_eq!(entry.output, PathBuf::from("/cache/Foo.Foo.Helpers.dll"));
        assert_eq!(entry.manifest, PathBuf::from("/cache/Foo.Foo.Helpers.sum"));
        assert_eq!(entry.symbols(), PathBuf::from("/cache/Foo.Foo.Helpers.pdb"));
    }

    #[test]
    fn test_manifest_validity() {
        let dir = tempfile::tempdir().unwrap();
        let entry = CacheEntry::new(dir.path(), "Foo", "Foo");
        let sums = strings(&["host", "asm"]);

        assert!(!entry.is_valid(&sums));

        entry.write_manifest(&sums).unwrap();
        assert!(!entry.is_valid(&sums), "missing output must invalidate");

        fs::write(&entry.output, b"x").unwrap();
        assert!(entry.is_valid(&sums));
        assert!(!entry.is_valid(&strings(&["host2", "asm"])));

        fs::write(entry.symbols(), b"pdb").unwrap();
        entry.invalidate();
        assert!(!entry.output.exists());
        assert!(!entry.manifest.exists());
        assert!(!entry.symbols().exists());
    }

    #[test]
    fn test_directory_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let dll = dir.path().join("Foo.dll");
        let pdb = dir.path().join("Foo.pdb");
        fs::write(&dll, b"module").unwrap();

        let meta = ModMetadata::new(
            "Foo",
            AssemblyVersion::new(1, 0, 0, 0),
            ModSource::Directory(dir.path().into()),
        );

        let without = compute_checksums("host", &meta, &dll, Some(&pdb)).unwrap();
        assert_eq!(without.len(), 2);
        assert_eq!(without[0], "host");

        fs::write(&pdb, b"symbols").unwrap();
        let with = compute_checksums("host", &meta, &dll, Some(&pdb)).unwrap();
        assert_eq!(with.len(), 3);
        assert_eq!(with[1], without[1]);
    }

    #[test]
    fn test_archive_checksums_use_package_hash() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("Foo.zip");
        fs::write(&zip, b"archive bytes").unwrap();

        let meta = ModMetadata::new(
            "Foo",
            AssemblyVersion::new(1, 0, 0, 0),
            ModSource::Archive(zip),
        );

        let sums =
            compute_checksums("host", &meta, Path::new("Code/Foo.dll"), None).unwrap();
        assert_eq!(sums, vec!["host".to_string(), meta.hash().unwrap()]);
    }
}
