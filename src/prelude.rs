//! # modscope Prelude
//!
//! Convenient re-exports of the types most hosts need to load mods.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all modscope operations
pub use crate::Error;

/// The result type used throughout modscope
pub use crate::Result;

/// Loader configuration
pub use crate::config::{LoaderConfig, LoaderConfigBuilder};

// ================================================================================================
// Mods and Isolation
// ================================================================================================

/// Mod metadata and package sources
pub use crate::modinfo::{ModDependency, ModMetadata, ModSource};

/// Isolation contexts and the process-wide registry
pub use crate::context::{
    ContextId, ContextRegistry, ContextState, HostAssemblies, HostAssemblySet, LoadedAssembly,
    ModAssemblyContext, ResolutionStack,
};

/// Native library loading
pub use crate::context::{NativeLibrary, NativeLibraryLoader, Platform, SystemLibraryLoader};

// ================================================================================================
// Relinking
// ================================================================================================

/// The relinker and its resolver seam
pub use crate::relink::{AssemblyResolver, Relinker};

/// Symbol map entries
pub use crate::relink::maps::RelinkMapEntry;

/// Rewrite rules
pub use crate::relink::rules::{RewriteRule, RuleRegistry};

// ================================================================================================
// Module Model
// ================================================================================================

/// Assembly identities
pub use crate::metadata::identity::{AssemblyIdentity, AssemblyVersion};

/// Editable modules
pub use crate::metadata::module::{ModuleBuilder, ModuleDefinition};
