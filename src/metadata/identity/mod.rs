//! Assembly identity types.
//!
//! - [`AssemblyIdentity`] - name, version and culture of an assembly
//! - [`AssemblyVersion`] - four-part version with ordering

mod assembly;

pub use assembly::{AssemblyIdentity, AssemblyVersion};
