//! Error types for relinking, cache validation and mod assembly loading.
//!
//! Every fallible operation in this crate returns [`crate::Result`], whose error side is the
//! [`Error`] enum below. Most variants describe per-mod failures that the relinker and the
//! isolation contexts log and convert into "no assembly produced"; only the variants for which
//! [`Error::is_fatal`] returns `true` are allowed to escape a mod loading boundary.
//!
//! # Error Categories
//!
//! ## Module Parsing Errors
//! - [`Error::Malformed`] - Corrupted or invalid module / symbol structure
//! - [`Error::OutOfBounds`] - Attempted to read beyond the end of the input
//! - [`Error::Empty`] - Empty input provided
//!
//! ## I/O Errors
//! - [`Error::FileError`] - Filesystem I/O errors
//! - [`Error::Zip`] - Mod archive errors
//!
//! ## Loading Policy Errors
//! - [`Error::Blacklisted`] - A mod assembly declares a forbidden identity
//! - [`Error::Disposed`] - Operation on an isolation context that finished disposal
//! - [`Error::NativeLibrary`] - A native library could not be loaded
//! - [`Error::Rule`] - A rewrite rule could not be parsed or applied
//!
//! ## Fatal Errors
//! - [`Error::MissingRulesModule`] - The shared rules module is not on disk
//! - [`Error::ResolutionStack`] - The resolution cycle guard lost its balance
//! - [`Error::Configuration`] - Invalid loader configuration

use std::path::PathBuf;

use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Examples
///
/// ```rust,ignore
/// use modscope::{Error, ModAssemblyContext};
///
/// match ctx.load("Foo.Helpers") {
///     Ok(Some(asm)) => println!("loaded {}", asm.identity().name),
///     Ok(None) => println!("not found"),
///     Err(Error::Disposed(name)) => println!("context {} is gone", name),
///     Err(e) if e.is_fatal() => panic!("{}", e),
///     Err(e) => println!("load failed: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be parsed.
    ///
    /// Contains the location in the source where the problem was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error while reading a mod archive.
    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),

    /// A mod assembly declares an identity that must never be user-loadable.
    #[error("Mod {module} attempted to load blacklisted assembly {assembly}")]
    Blacklisted {
        /// Name of the mod that shipped the assembly
        module: String,
        /// The forbidden assembly name
        assembly: String,
    },

    /// The isolation context with the given mod name has been disposed.
    #[error("Mod assembly context '{0}' is already disposed")]
    Disposed(String),

    /// The shared rules module could not be found on disk.
    #[error("Could not find the shared rules module at {}", .0.display())]
    MissingRulesModule(PathBuf),

    /// The resolution cycle guard popped a frame that was not on top of the stack.
    #[error("Resolution stack mismatch - expected '{expected}' but found '{found}'")]
    ResolutionStack {
        /// Context id that the caller tried to pop
        expected: String,
        /// Context id that was actually on top of the stack
        found: String,
    },

    /// Invalid loader configuration or registry usage.
    #[error("Configuration - {0}")]
    Configuration(String),

    /// A native library could not be located or loaded.
    #[error("Native library - {0}")]
    NativeLibrary(String),

    /// A rewrite rule could not be parsed or applied.
    #[error("Rule '{rule}' - {message}")]
    Rule {
        /// Kind or name of the failing rule
        rule: String,
        /// Description of the failure
        message: String,
    },

    /// Generic error for miscellaneous cases.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns `true` for errors that indicate a configuration or logic defect rather than a
    /// single bad mod, and therefore must not be swallowed at a mod loading boundary.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MissingRulesModule(_) | Error::ResolutionStack { .. } | Error::Configuration(_)
        )
    }
}
