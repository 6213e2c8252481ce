//! Unmanaged (native) library support.
//!
//! Mods may ship native libraries in a platform specific folder next to their main assembly,
//! e.g. `Code/lib-linux` for a mod whose main assembly is `Code/Foo.dll`:
//!
//! | Platform | Folder | File name |
//! |---|---|---|
//! | Windows x64 | `lib-win-x64` | `name.dll` |
//! | Windows x86 | `lib-win-x86` | `name.dll` |
//! | Linux | `lib-linux` | `libname.so` |
//! | macOS | `lib-osx` | `libname.dylib` |
//!
//! Directory mods resolve against that folder directly. Archive mods have the folder unpacked
//! into `<cache>/unmanaged-libs/<folder>/<mod>` first; a sibling `<mod>.sum` records the mod
//! hash the unpacked copy belongs to, and the folder is only extracted again when it changes.

use std::{
    fmt::{self, Debug},
    fs::{self, File},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};

use strum::Display;
use zip::ZipArchive;

use crate::{Error, Result};

/// Target platform for native library resolution.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// 64-bit Windows
    #[strum(serialize = "win-x64")]
    WinX64,
    /// 32-bit Windows
    #[strum(serialize = "win-x86")]
    WinX86,
    /// Linux
    #[strum(serialize = "linux")]
    Linux,
    /// macOS
    #[strum(serialize = "osx")]
    Osx,
}

impl Platform {
    /// The platform this crate was built for, if supported.
    #[must_use]
    pub fn current() -> Option<Self> {
        if cfg!(all(windows, target_pointer_width = "64")) {
            Some(Platform::WinX64)
        } else if cfg!(all(windows, target_pointer_width = "32")) {
            Some(Platform::WinX86)
        } else if cfg!(target_os = "macos") {
            Some(Platform::Osx)
        } else if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else {
            None
        }
    }

    /// Package folder holding this platform's native libraries.
    #[must_use]
    pub fn folder(self) -> &'static str {
        match self {
            Platform::WinX64 => "lib-win-x64",
            Platform::WinX86 => "lib-win-x86",
            Platform::Linux => "lib-linux",
            Platform::Osx => "lib-osx",
        }
    }

    /// Platform specific file name for library `name`.
    #[must_use]
    pub fn library_file_name(self, name: &str) -> String {
        match self {
            Platform::WinX64 | Platform::WinX86 => format!("{name}.dll"),
            Platform::Linux => format!("lib{name}.so"),
            Platform::Osx => format!("lib{name}.dylib"),
        }
    }

    /// File names to try for `name`: the raw name, then the platform specific name.
    #[must_use]
    pub fn candidates(self, name: &str) -> Vec<String> {
        let specific = self.library_file_name(name);
        if specific == name {
            vec![specific]
        } else {
            vec![name.to_string(), specific]
        }
    }
}

/// A loaded native library.
pub struct NativeLibrary {
    name: String,
    path: PathBuf,
    library: Option<libloading::Library>,
}

impl NativeLibrary {
    /// Wrap a library handle. `library` is `None` for loaders that only track files.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        library: Option<libloading::Library>,
    ) -> Self {
        NativeLibrary {
            name: name.into(),
            path: path.into(),
            library,
        }
    }

    /// Requested library name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved library file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The OS handle, if the library was actually loaded.
    #[must_use]
    pub fn library(&self) -> Option<&libloading::Library> {
        self.library.as_ref()
    }
}

impl Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("loaded", &self.library.is_some())
            .finish()
    }
}

/// Loads native libraries on behalf of the isolation contexts.
pub trait NativeLibraryLoader: Send + Sync + Debug {
    /// Load the library file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NativeLibrary`] if the library cannot be loaded.
    fn load(&self, name: &str, path: &Path) -> Result<Arc<NativeLibrary>>;

    /// Load a library through the system search path, `None` if unavailable.
    fn load_system(&self, name: &str) -> Option<Arc<NativeLibrary>>;
}

/// [`NativeLibraryLoader`] backed by the operating system's dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLibraryLoader;

impl NativeLibraryLoader for SystemLibraryLoader {
    fn load(&self, name: &str, path: &Path) -> Result<Arc<NativeLibrary>> {
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| Error::NativeLibrary(format!("{}: {}", path.display(), e)))?;
        Ok(Arc::new(NativeLibrary::new(name, path, Some(library))))
    }

    fn load_system(&self, name: &str) -> Option<Arc<NativeLibrary>> {
        let file_name = Platform::current()?.library_file_name(name);
        let library = unsafe { libloading::Library::new(&file_name) }.ok()?;
        Some(Arc::new(NativeLibrary::new(name, file_name, Some(library))))
    }
}

/// First existing candidate file for `name` inside `dir`.
#[must_use]
pub fn find_library(dir: &Path, platform: Platform, name: &str) -> Option<PathBuf> {
    platform
        .candidates(name)
        .into_iter()
        .map(|candidate| dir.join(candidate))
        .find(|path| path.is_file())
}

/// Unpack the platform folder of an archive mod into the native library cache.
///
/// # Arguments
/// * `archive` - The mod archive
/// * `folder` - Package-relative folder holding the libraries, e.g. `Code/lib-linux`
/// * `platform` - Platform the libraries are unpacked for
/// * `cache_root` - `<cache>/unmanaged-libs`
/// * `mod_name` - Owning mod; names the target directory and sum file
/// * `hash` - Current mod hash, compared against the sum file
///
/// # Returns
/// The directory holding the unpacked libraries.
///
/// # Errors
/// Returns [`crate::Error::FileError`] or [`crate::Error::Zip`] if extraction fails.
pub fn unpack_archive_libraries(
    archive: &Path,
    folder: &str,
    platform: Platform,
    cache_root: &Path,
    mod_name: &str,
    hash: &str,
) -> Result<PathBuf> {
    let platform_dir = cache_root.join(platform.folder());
    let target = platform_dir.join(mod_name);
    let sum_file = platform_dir.join(format!("{mod_name}.sum"));

    let cached_hash = fs::read_to_string(&sum_file).ok();
    if target.is_dir() && cached_hash.as_deref().map(str::trim) == Some(hash) {
        return Ok(target);
    }

    tracing::info!(
        target: "modasmctx",
        "Unpacking native libraries of {} for {}",
        mod_name,
        platform
    );

    match fs::remove_dir_all(&target) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(&target)?;

    let prefix = format!("{}/", folder.trim_end_matches('/'));
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry
            .enclosed_name()
            .and_then(|p| p.strip_prefix(&prefix).ok())
            .map(Path::to_path_buf)
        else {
            continue;
        };

        let destination = target.join(relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&destination)?;
        io::copy(&mut entry, &mut out)?;
    }

    fs::write(&sum_file, hash)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::{write::FileOptions, ZipWriter};

    use super::*;

    #[test]
    fn test_platform_names() {
        assert_eq!(Platform::Linux.folder(), "lib-linux");
        assert_eq!(Platform::Osx.library_file_name("steam"), "libsteam.dylib");
        assert_eq!(Platform::WinX64.library_file_name("steam"), "steam.dll");
        assert_eq!(
            Platform::Linux.candidates("steam"),
            vec!["steam".to_string(), "libsteam.so".to_string()]
        );
        assert_eq!(Platform::WinX86.to_string(), "win-x86");
    }

    #[test]
    fn test_find_library() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("libfmod.so"), b"elf").unwrap();

        assert_eq!(
            find_library(dir.path(), Platform::Linux, "fmod"),
            Some(dir.path().join("libfmod.so"))
        );
        assert!(find_library(dir.path(), Platform::Osx, "fmod").is_none());
    }

    #[test]
    fn test_unpack_is_keyed_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Foo.zip");
        {
            let mut zip = ZipWriter::new(File::create(&archive).unwrap());
            zip.start_file("Code/lib-linux/libfoo.so", FileOptions::default())
                .unwrap();
            zip.write_all(b"native").unwrap();
            zip.start_file("Code/lib-osx/libfoo.dylib", FileOptions::default())
                .unwrap();
            zip.write_all(b"other").unwrap();
            zip.start_file("lib-linux/libroot.so", FileOptions::default())
                .unwrap();
            zip.write_all(b"root").unwrap();
            zip.finish().unwrap();
        }
        let cache = dir.path().join("unmanaged-libs");

        let unpack = |hash| {
            unpack_archive_libraries(
                &archive,
                "Code/lib-linux",
                Platform::Linux,
                &cache,
                "Foo",
                hash,
            )
            .unwrap()
        };

        let out = unpack("h1");
        assert_eq!(out, cache.join("lib-linux").join("Foo"));
        assert_eq!(fs::read(out.join("libfoo.so")).unwrap(), b"native");
        assert!(!out.join("libfoo.dylib").exists());
        assert!(!out.join("libroot.so").exists());
        assert_eq!(
            fs::read_to_string(cache.join("lib-linux").join("Foo.sum")).unwrap(),
            "h1"
        );

        fs::write(out.join("marker"), b"x").unwrap();
        unpack("h1");
        assert!(out.join("marker").exists(), "same hash must not re-extract");

        unpack("h2");
        assert!(!out.join("marker").exists());
        assert!(out.join("libfoo.so").exists());
    }
}
