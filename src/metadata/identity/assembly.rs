//! Assembly identity and version representation.
//!
//! An [`AssemblyIdentity`] names a module's assembly the way references and the loader see
//! it: simple name, four-part [`AssemblyVersion`] and optional culture. Identities are used
//! for blacklist checks, for keying the per-context load caches and for matching mod
//! dependency requirements.
//!
//! # Display Name Format
//!
//! ```text
//! Name, Version=1.2.3.4, Culture=neutral
//! ```
//!
//! Only the name is mandatory; omitted version components default to `0`.
//!
//! # Examples
//!
//! ```rust
//! use modscope::metadata::identity::{AssemblyIdentity, AssemblyVersion};
//!
//! let identity = AssemblyIdentity::parse("Foo.Helpers, Version=1.2, Culture=neutral")?;
//! assert_eq!(identity.name, "Foo.Helpers");
//! assert_eq!(identity.version, AssemblyVersion::new(1, 2, 0, 0));
//! assert!(identity.culture.is_none());
//! # Ok::<(), modscope::Error>(())
//! ```

use std::{fmt, str::FromStr};

use crate::Result;

/// Identity of an assembly: name, version and culture.
///
/// Equality and hashing compare the name case-insensitively, as the runtime loader does.
#[derive(Debug, Clone)]
pub struct AssemblyIdentity {
    /// Simple assembly name, e.g. `"Foo.Helpers"`
    pub name: String,
    /// Four-part assembly version
    pub version: AssemblyVersion,
    /// Culture, `None` for culture-neutral assemblies
    pub culture: Option<String>,
}

impl PartialEq for AssemblyIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.version == other.version
            && self.culture == other.culture
    }
}

impl Eq for AssemblyIdentity {}

impl std::hash::Hash for AssemblyIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.to_ascii_lowercase().hash(state);
        self.version.hash(state);
        self.culture.hash(state);
    }
}

/// Four-part assembly version `major.minor.build.revision`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyIdentity {
    /// Create a culture-neutral identity.
    #[must_use]
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        Self {
            name: name.into(),
            version,
            culture: None,
        }
    }

    /// Parse an identity from its display name form.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an empty name or an invalid version.
    pub fn parse(display_name: &str) -> Result<Self> {
        let mut parts = display_name.split(',').map(str::trim);

        let name = parts.next().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(malformed_error!("Assembly name cannot be empty"));
        }

        let mut version = AssemblyVersion::default();
        let mut culture = None;
        for part in parts {
            if let Some(value) = part.strip_prefix("Version=") {
                version = AssemblyVersion::parse(value)?;
            } else if let Some(value) = part.strip_prefix("Culture=") {
                if value != "neutral" && !value.is_empty() {
                    culture = Some(value.to_string());
                }
            }
        }

        Ok(Self {
            name,
            version,
            culture,
        })
    }

    /// Render the display name, e.g. `Foo, Version=1.0.0.0, Culture=neutral`.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!(
            "{}, Version={}, Culture={}",
            self.name,
            self.version,
            self.culture.as_deref().unwrap_or("neutral")
        )
    }

    /// Returns `true` if this identity can stand in for `required`: same name (ignoring case)
    /// and a version at least as high.
    #[must_use]
    pub fn satisfies(&self, required: &AssemblyIdentity) -> bool {
        self.name.eq_ignore_ascii_case(&required.name)
            && self.version.is_compatible_with(&required.version)
    }
}

impl AssemblyVersion {
    /// Create a version from its four components.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Returns `true` if this version is greater than or equal to `required`.
    #[must_use]
    pub fn is_compatible_with(&self, required: &AssemblyVersion) -> bool {
        self >= required
    }

    /// Parse `1`, `1.2`, `1.2.3` or `1.2.3.4`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for more than four components or a component that
    /// is not a `u16`.
    pub fn parse(version_str: &str) -> Result<Self> {
        let parts: Vec<&str> = version_str.trim().split('.').collect();
        if parts.len() > 4 {
            return Err(malformed_error!("Invalid version format: {}", version_str));
        }

        let mut components = [0u16; 4];
        for (i, part) in parts.iter().enumerate() {
            components[i] = part
                .parse::<u16>()
                .map_err(|_| malformed_error!("Invalid version component: {}", part))?;
        }

        Ok(Self::new(
            components[0],
            components[1],
            components[2],
            components[3],
        ))
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for AssemblyVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl FromStr for AssemblyIdentity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_display_name() {
        let identity =
            AssemblyIdentity::parse("MonoMod.Utils, Version=22.5.1.1, Culture=en-US").unwrap();

        assert_eq!(identity.name, "MonoMod.Utils");
        assert_eq!(identity.version, AssemblyVersion::new(22, 5, 1, 1));
        assert_eq!(identity.culture.as_deref(), Some("en-US"));
    }

    #[test]
    fn test_parse_name_only() {
        let identity = AssemblyIdentity::parse("Foo").unwrap();
        assert_eq!(identity.version, AssemblyVersion::default());
        assert_eq!(
            identity.display_name(),
            "Foo, Version=0.0.0.0, Culture=neutral"
        );
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(AssemblyIdentity::parse("").is_err());
        assert!(AssemblyIdentity::parse(" , Version=1.0").is_err());
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(
            AssemblyVersion::parse("1.4").unwrap(),
            AssemblyVersion::new(1, 4, 0, 0)
        );
        assert!(AssemblyVersion::parse("1.2.3.4.5").is_err());
        assert!(AssemblyVersion::parse("1.x").is_err());
        assert!(AssemblyVersion::parse("70000").is_err());
    }

    #[test]
    fn test_satisfies() {
        let have = AssemblyIdentity::new("bar", AssemblyVersion::new(1, 3, 0, 0));
        let want = AssemblyIdentity::new("Bar", AssemblyVersion::new(1, 2, 0, 0));
        let newer = AssemblyIdentity::new("Bar", AssemblyVersion::new(2, 0, 0, 0));

        assert!(have.satisfies(&want));
        assert!(!have.satisfies(&newer));
    }

    #[test]
    fn test_case_insensitive_equality() {
        let a = AssemblyIdentity::new("Foo", AssemblyVersion::new(1, 0, 0, 0));
        let b = AssemblyIdentity::new("FOO", AssemblyVersion::new(1, 0, 0, 0));
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }
}
