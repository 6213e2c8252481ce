//! Structural module representation.
//!
//! This module contains everything needed to read, edit and write the modules the relinker
//! operates on.
//!
//! # Key Components
//!
//! - [`crate::metadata::identity`] - Assembly names, versions and identity matching
//! - [`crate::metadata::instruction`] - Opcodes and method body instructions
//! - [`crate::metadata::module`] - The editable module graph, its file format, symbols and
//!   builder
//!
//! # Examples
//!
//! ```rust,ignore
//! use modscope::metadata::module::ModuleDefinition;
//!
//! let mut module = ModuleDefinition::from_file(Path::new("Foo.dll"), None)?;
//! if let Some(index) = module.find_member_ref("System.Void Celeste.Player::Die()") {
//!     module.member_refs[index as usize].name = "Kill".into();
//! }
//! module.write_to_file(Path::new("Foo.relinked.dll"), false)?;
//! ```

pub mod identity;
pub mod instruction;
pub mod module;
