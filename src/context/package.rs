//! Reading files out of a mod package.

use std::{
    collections::HashSet,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use zip::{result::ZipError, ZipArchive};

use crate::{modinfo::ModSource, Result};

/// Normalize a package relative path: forward slashes, no leading `./` or `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut path = path.as_str();
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest;
        } else {
            break;
        }
    }
    path.to_string()
}

/// Join a normalized directory and a file name.
#[must_use]
pub fn join_path(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{dir}/{file}")
    }
}

/// Returns `true` if `name` names a file inside one directory: no separators, no parent or
/// current directory reference and no drive prefix.
#[must_use]
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', ':'])
}

/// Read-only view of a mod package.
#[derive(Debug)]
pub struct ModPackage<'a> {
    source: &'a ModSource,
}

impl<'a> ModPackage<'a> {
    /// View over `source`.
    #[must_use]
    pub fn new(source: &'a ModSource) -> Self {
        ModPackage { source }
    }

    /// Filesystem path used to identify `relative` in checksums and logs. For archives this
    /// is the entry path below the archive file.
    #[must_use]
    pub fn file_path(&self, relative: &str) -> PathBuf {
        self.source.path().join(relative)
    }

    /// All file entries of an archive package, normalized.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] or [`crate::Error::Zip`] if the archive is
    /// unreadable.
    pub fn archive_entries(archive: &Path) -> Result<HashSet<String>> {
        let zip = ZipArchive::new(File::open(archive)?)?;
        Ok(zip.file_names().map(normalize_path).collect())
    }

    /// Returns `true` if the package contains the file `relative`.
    ///
    /// # Errors
    /// Returns an error if an archive package cannot be read.
    pub fn contains(&self, relative: &str) -> Result<bool> {
        match self.source {
            ModSource::Directory(root) => Ok(root.join(relative).is_file()),
            ModSource::Archive(archive) => {
                Ok(Self::archive_entries(archive)?.contains(&normalize_path(relative)))
            }
        }
    }

    /// Read the file `relative`, `None` if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the package or the file cannot be read.
    pub fn read(&self, relative: &str) -> Result<Option<Vec<u8>>> {
        let relative = normalize_path(relative);
        match self.source {
            ModSource::Directory(root) => {
                let path = root.join(&relative);
                if !path.is_file() {
                    return Ok(None);
                }
                Ok(Some(std::fs::read(path)?))
            }
            ModSource::Archive(archive) => {
                let mut zip = ZipArchive::new(File::open(archive)?)?;
                let mut entry = match zip.by_name(&relative) {
                    Ok(entry) => entry,
                    Err(ZipError::FileNotFound) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                Ok(Some(data))
            }
        }
    }
}
