// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'context/native.rs' calls into the platform dynamic loader through libloading

//! # modscope
//!
//! Loader core for managed game mods. Mods are compiled against a particular version of the
//! game, the runtime and the modding API; `modscope` rewrites their assemblies so they load
//! against whatever the host currently provides, caches the result, and loads every mod into
//! its own isolation context with a well-defined resolution order.
//!
//! ## Features
//!
//! - **🔗 Relinking** - Redirect assembly, type and member references, apply declarative
//!   rewrite rules and convert legacy runtime references
//! - **💾 Cache validation** - Reuse relinked output only while the host, the mod package and
//!   the assembly files are unchanged
//! - **🧱 Isolation** - One context per mod with local, dependency and global lookup tiers for
//!   managed and native libraries
//! - **♻️ Lifecycle** - Deterministic disposal with unload notifications and code reload hooks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modscope::prelude::*;
//!
//! let config = LoaderConfig::builder()
//!     .game_dir("/opt/game")
//!     .host_executable("Game.exe")
//!     .build()?;
//! let registry = ContextRegistry::new(config);
//!
//! let meta = ModMetadata::new(
//!     "Foo",
//!     AssemblyVersion::new(1, 0, 0, 0),
//!     ModSource::Directory("/opt/game/Mods/Foo".into()),
//! )
//! .with_dll("Code/Foo.dll");
//!
//! let ctx = ModAssemblyContext::new(Arc::new(meta), &registry)?;
//! if let Some(foo) = ctx.load_assembly_from_mod_path("Code/Foo.dll", "Foo")? {
//!     println!("Loaded {} from {}", foo.name(), foo.location().display());
//! }
//! registry.post_boot_cleanup();
//! # Ok::<(), modscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`relink`] - The [`Relinker`] pipeline, the cache validator and the rewrite rules
//! - [`context`] - [`ModAssemblyContext`], the [`ContextRegistry`] and native library support
//! - [`metadata`] - The editable module model the relinker operates on
//! - [`modinfo`] - Mod metadata and package hashing
//! - [`config`] - Loader configuration
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`]. Per-mod failures are logged through `tracing` and
//! surface as "no assembly"; only errors for which [`Error::is_fatal`] holds escape a mod
//! loading boundary.

#[macro_use]
pub(crate) mod error;

pub mod config;
pub mod context;
pub mod file;
pub mod metadata;
pub mod modinfo;
pub mod prelude;
pub mod relink;
pub mod utils;

pub use config::LoaderConfig;
pub use context::{ContextRegistry, ModAssemblyContext};
pub use error::Error;
pub use modinfo::ModMetadata;
pub use relink::Relinker;

/// `modscope` Result type
pub type Result<T> = std::result::Result<T, Error>;
