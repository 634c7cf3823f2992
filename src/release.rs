//! Release versions.
//!
//! This module contains the version of a java release and the specifier used to select one.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The version of a release, made of dot-separated numeric components.
///
/// Versions compare component by component, numerically. A version that is a prefix of another compares lower
/// (`17 < 17.0.1`).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct ReleaseVersion(Vec<u64>);

impl ReleaseVersion {
    /// Creates a new `ReleaseVersion` from the given components.
    pub(crate) fn new(components: impl Into<Vec<u64>>) -> Self {
        Self(components.into())
    }

    /// Returns the major (first) component.
    pub(crate) fn major(&self) -> u64 {
        self.0.first().copied().unwrap_or_default()
    }

    /// Whether this version starts with all components of the given prefix.
    pub(crate) fn starts_with(&self, prefix: &ReleaseVersion) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl FromStr for ReleaseVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty version".to_string());
        }

        let components = s
            .split('.')
            .map(|c| c.parse::<u64>().map_err(|_| format!("invalid version '{s}'")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self(components))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }

        Ok(())
    }
}

impl Serialize for ReleaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// Deserializes a [ReleaseVersion] from either unsigned integer or string.
// see https://serde.rs/string-or-struct.html
impl<'de> Deserialize<'de> for ReleaseVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct UintOrString;

        impl Visitor<'_> for UintOrString {
            type Value = ReleaseVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("unsigned integer or dotted version string")
            }

            fn visit_str<E>(self, value: &str) -> Result<ReleaseVersion, E>
            where
                E: de::Error,
            {
                value.parse().map_err(E::custom)
            }

            fn visit_u64<E>(self, value: u64) -> Result<ReleaseVersion, E>
            where
                E: de::Error,
            {
                Ok(ReleaseVersion(vec![value]))
            }
        }

        deserializer.deserialize_any(UintOrString)
    }
}

/// The specifier used to select a release.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum VersionSpec {
    /// The highest stable release.
    Latest,
    /// The highest stable release whose version starts with the given components.
    Prefix(ReleaseVersion),
}

impl VersionSpec {
    /// Whether the given version is selected by this specifier.
    pub(crate) fn matches(&self, version: &ReleaseVersion) -> bool {
        match self {
            Self::Latest => true,
            Self::Prefix(prefix) => version.starts_with(prefix),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }

        s.parse().map(Self::Prefix)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Prefix(prefix) => write!(f, "{prefix}"),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use test_log::test;

    fn v(s: &str) -> ReleaseVersion {
        s.parse().unwrap()
    }

    #[test]
    fn numeric_ordering() {
        assert!(v("11.2.0") > v("11.0.9"));
        assert!(v("11.0.10") > v("11.0.9"));
        assert!(v("17") < v("17.0.1"));
        assert_eq!(v("17.0.2").to_string(), "17.0.2");
    }

    #[test]
    fn invalid_versions() {
        assert!("".parse::<ReleaseVersion>().is_err());
        assert!("17.x".parse::<ReleaseVersion>().is_err());
        assert!("17..2".parse::<ReleaseVersion>().is_err());
    }

    #[test]
    fn spec_latest() {
        assert_eq!("latest".parse::<VersionSpec>().unwrap(), VersionSpec::Latest);
        assert_eq!("LATEST".parse::<VersionSpec>().unwrap(), VersionSpec::Latest);
    }

    #[test]
    fn spec_prefix_matches_by_component() {
        let spec: VersionSpec = "11".parse().unwrap();
        assert!(spec.matches(&v("11.0.2")));
        assert!(!spec.matches(&v("110.0.1")));
        assert!(!spec.matches(&v("1.1")));
    }

    #[test]
    fn deserialize_from_uint_or_string() {
        let version: ReleaseVersion = serde_yaml::from_str("17").unwrap();
        assert_eq!(version, v("17"));
        let version: ReleaseVersion = serde_yaml::from_str("\"17.0.2\"").unwrap();
        assert_eq!(version, v("17.0.2"));
    }
}
