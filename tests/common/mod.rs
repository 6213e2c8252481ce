//! Shared fixture for the integration tests: a fake game installation with a host
//! executable, the shared rules module and a mods folder.

#![allow(dead_code)]

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use modscope::prelude::*;
use tempfile::TempDir;
use zip::{write::FileOptions, ZipWriter};

pub const HOST_CHECKSUM: &str = "host-checksum-1";

pub struct GameFixture {
    pub root: TempDir,
    pub game: PathBuf,
    pub mods: PathBuf,
    pub cache: PathBuf,
    pub temp: PathBuf,
}

impl GameFixture {
    pub fn new() -> Result<Self> {
        Self::with_rules_module(ModuleBuilder::new("Game.Mod.mm"))
    }

    pub fn with_rules_module(rules: ModuleBuilder) -> Result<Self> {
        let root = tempfile::tempdir()?;
        let game = root.path().join("game");
        let mods = game.join("Mods");
        fs::create_dir_all(&mods)?;

        ModuleBuilder::new("Game")
            .method("Game.Engine", "Run", "System.Void", &[], &["ret"])
            .build()?
            .write_to_file(&game.join("Game.exe"), false)?;
        rules.build()?.write_to_file(&game.join("Game.Mod.mm.dll"), false)?;

        Ok(GameFixture {
            cache: mods.join("Cache"),
            temp: root.path().join("temp"),
            root,
            game,
            mods,
        })
    }

    pub fn config(&self) -> LoaderConfigBuilder {
        LoaderConfig::builder()
            .game_dir(&self.game)
            .cache_dir(&self.cache)
            .temp_dir(&self.temp)
            .host_executable("Game.exe")
            .host_checksum(HOST_CHECKSUM)
            .platform(Platform::Linux)
    }

    /// A registry whose host exposes the game executable.
    pub fn registry_with(&self, config: LoaderConfig) -> Result<Arc<ContextRegistry>> {
        let host = Arc::new(HostAssemblySet::new());
        host.insert_file(&self.game.join("Game.exe"))?;
        Ok(ContextRegistry::builder(config).host(host).build())
    }

    pub fn registry(&self) -> Result<Arc<ContextRegistry>> {
        self.registry_with(self.config().build()?)
    }

    /// Write `modules` to `Mods/<name>/Code` and describe the mod.
    pub fn directory_mod(&self, name: &str, modules: &[ModuleDefinition]) -> Result<ModMetadata> {
        let root = self.mods.join(name);
        let code = root.join("Code");
        fs::create_dir_all(&code)?;
        for module in modules {
            module.write_to_file(&code.join(&module.name), true)?;
        }
        Ok(ModMetadata::new(
            name,
            AssemblyVersion::new(1, 0, 0, 0),
            ModSource::Directory(root),
        )
        .with_dll(format!("Code/{name}.dll")))
    }

    /// Pack `modules` and `extra` files into `Mods/<name>.zip` and describe the mod.
    pub fn archive_mod(
        &self,
        name: &str,
        modules: &[ModuleDefinition],
        extra: &[(&str, &[u8])],
    ) -> Result<ModMetadata> {
        let archive = self.mods.join(format!("{name}.zip"));
        let mut zip = ZipWriter::new(File::create(&archive)?);
        for module in modules {
            let (bytes, symbols) = module.to_bytes()?;
            zip.start_file(format!("Code/{}", module.name), FileOptions::default())?;
            zip.write_all(&bytes)?;
            if let Some(symbols) = symbols {
                let pdb = Path::new(&module.name).with_extension("pdb");
                zip.start_file(format!("Code/{}", pdb.display()), FileOptions::default())?;
                zip.write_all(&symbols)?;
            }
        }
        for (path, data) in extra {
            zip.start_file(*path, FileOptions::default())?;
            zip.write_all(data)?;
        }
        zip.finish()?;

        Ok(ModMetadata::new(
            name,
            AssemblyVersion::new(1, 0, 0, 0),
            ModSource::Archive(archive),
        )
        .with_dll(format!("Code/{name}.dll")))
    }

    pub fn cache_output(&self, mod_name: &str, assembly: &str) -> PathBuf {
        self.cache.join(format!("{mod_name}.{assembly}.dll"))
    }

    pub fn cache_manifest(&self, mod_name: &str, assembly: &str) -> PathBuf {
        self.cache.join(format!("{mod_name}.{assembly}.sum"))
    }
}

pub fn module(name: &str) -> Result<ModuleDefinition> {
    ModuleBuilder::new(name)
        .method(&format!("{name}.Entry"), "Load", "System.Void", &[], &["ret"])
        .build()
}
