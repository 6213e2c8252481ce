//! Integration tests for the rewrite steps of the relinker: symbol map redirects, shared and
//! per-mod rules, and legacy runtime conversion.

mod common;

use std::sync::Arc;

use common::GameFixture;
use modscope::{
    metadata::module::{MethodImplFlags, ModuleFlags},
    prelude::*,
};

fn relink(
    fixture: &GameFixture,
    config: LoaderConfig,
    meta: ModMetadata,
) -> Result<Option<Arc<LoadedAssembly>>> {
    let registry = fixture.registry_with(config)?;
    let name = meta.name.clone();
    let ctx = ModAssemblyContext::new(Arc::new(meta), &registry)?;
    ctx.load_assembly_from_mod_path(&format!("Code/{name}.dll"), &name)
}

#[test]
fn redirects_and_rules_are_applied() -> Result<()> {
    let fixture = GameFixture::with_rules_module(ModuleBuilder::new("Game.Mod.mm").rule(
        "redirect-member",
        "System.Void Game.Engine::OldTick()",
        &["System.Void Game.Engine::Tick()"],
    ))?;
    let config = fixture
        .config()
        .relink_entry(
            "Game.LegacyEngine",
            RelinkMapEntry::Type("Game.Engine".to_string()),
        )
        .build()?;

    let foo = ModuleBuilder::new("Foo")
        .assembly_ref("Game", "1.0")
        .type_ref("Game", "Game.LegacyEngine")
        .type_ref("Game", "Game.Engine")
        .method(
            "Foo.Entry",
            "Load",
            "System.Void",
            &[],
            &["call System.Void Game.Engine::OldTick()", "ret"],
        )
        .rule("rename-identifier", "Foo.Entry", &["Foo.Main"])
        .build()?;
    let meta = fixture.directory_mod("Foo", &[foo])?;

    let loaded = relink(&fixture, config, meta)?.expect("relinked");
    let module = loaded.module();

    assert!(module.find_type_ref("Game.LegacyEngine").is_none());
    assert!(module.find_type_ref("Game.Engine").is_some());
    assert!(module
        .find_member_ref("System.Void Game.Engine::Tick()")
        .is_some());
    assert!(module
        .find_member_ref("System.Void Game.Engine::OldTick()")
        .is_none());
    assert!(module.types.iter().any(|t| t.full_name() == "Foo.Main"));
    assert!(module.rules.is_empty());
    assert!(module.flags.contains(ModuleFlags::RELINKED));
    Ok(())
}

#[test]
fn legacy_runtime_references_are_converted() -> Result<()> {
    let fixture = GameFixture::new()?;
    let foo = ModuleBuilder::new("Foo")
        .flags(ModuleFlags::LEGACY_RUNTIME)
        .assembly_ref("mscorlib", "4.0.0.0")
        .assembly_ref("System.Core", "4.0.0.0")
        .type_ref("mscorlib", "System.Object")
        .type_ref("System.Core", "System.Linq.Enumerable")
        .method("Foo.Entry", "Load", "System.Void", &[], &["ret"])
        .impl_flags(MethodImplFlags::AGGRESSIVE_INLINING)
        .build()?;
    let meta = fixture.directory_mod("Foo", &[foo])?;

    let loaded = relink(&fixture, fixture.config().build()?, meta)?.expect("relinked");
    let module = loaded.module();

    let names: Vec<&str> = module.assembly_refs.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["System.Runtime"]);
    assert!(!module.flags.contains(ModuleFlags::LEGACY_RUNTIME));
    assert!(module.type_refs.iter().all(|t| t.scope == Some(0)));

    let method = &module.types[0].methods[0];
    assert!(method.impl_flags.contains(MethodImplFlags::NO_INLINING));
    assert!(!method.impl_flags.contains(MethodImplFlags::AGGRESSIVE_INLINING));
    Ok(())
}

#[test]
fn netcore_only_mods_skip_conversion() -> Result<()> {
    let fixture = GameFixture::new()?;
    let foo = ModuleBuilder::new("Foo")
        .assembly_ref("mscorlib", "4.0.0.0")
        .type_ref("mscorlib", "System.Object")
        .build()?;
    let meta = fixture.directory_mod("Foo", &[foo])?.netcore_only(true);

    let loaded = relink(&fixture, fixture.config().build()?, meta)?.expect("relinked");
    assert_eq!(loaded.module().assembly_refs[0].name, "mscorlib");
    Ok(())
}

#[test]
fn unknown_rule_fails_the_assembly_only() -> Result<()> {
    let fixture = GameFixture::new()?;
    let foo = ModuleBuilder::new("Foo")
        .rule("no-such-rule", "Foo.Entry", &[])
        .build()?;
    let meta = fixture.directory_mod("Foo", &[foo])?;

    assert!(relink(&fixture, fixture.config().build()?, meta)?.is_none());
    assert!(!fixture.cache_output("Foo", "Foo").exists());
    Ok(())
}
