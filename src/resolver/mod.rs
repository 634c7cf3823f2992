//! Version resolver.
//!
//! This module contains the code to resolve a version specifier (`latest`, `17`, `11.0.2`, ...) to a concrete,
//! downloadable artifact. The releases are provided by a pluggable [ReleaseIndex].

#[cfg(feature = "azul")]
mod azul;
mod file;

#[cfg(feature = "azul")]
pub(crate) use self::azul::AzulIndex;
pub(crate) use self::file::FileIndex;

use crate::platform::Platform;
use crate::release::{ReleaseVersion, VersionSpec};
use std::fmt;
use tracing::{debug, instrument, trace};

/// The error type for resolving a version specifier.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ResolveError {
    /// The specifier itself could not be parsed.
    #[error("invalid version specifier '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },
    /// The platform is not supported.
    #[error("{0}")]
    Platform(String),
    /// No release matches the specifier.
    #[error("no release matches '{spec}' for {platform}")]
    NotFound { spec: String, platform: Platform },
    /// Different artifacts share the highest matching version.
    #[error("version {version} is ambiguous ({count} different artifacts)")]
    Ambiguous { version: ReleaseVersion, count: usize },
    /// The release index could not be queried.
    #[error("failed to query release index")]
    Index(#[source] anyhow::Error),
}

/// A release as published by a [ReleaseIndex].
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Release {
    /// The version of the release.
    pub(crate) version: ReleaseVersion,
    /// Whether the release is generally available.
    pub(crate) stable: bool,
    /// The download URL of the archive.
    pub(crate) url: String,
    /// The name of the archive file.
    pub(crate) file_name: String,
    /// The checksum (SHA256) of the archive, if the index lists it inline.
    pub(crate) checksum: Option<String>,
    /// An index specific identifier to look up details.
    pub(crate) id: Option<String>,
}

/// Trait for sources of releases.
pub(crate) trait ReleaseIndex: fmt::Debug {
    /// Lists the releases for the given platform. Implementations may narrow the list by the given specifier, but
    /// are not required to.
    fn releases(&self, spec: &VersionSpec, platform: Platform) -> anyhow::Result<Vec<Release>>;

    /// Returns the checksum (SHA256) of the given release.
    fn checksum(&self, release: &Release) -> anyhow::Result<String> {
        release
            .checksum
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no checksum published for {}", release.url))
    }
}

/// The resolved artifact. Immutable once resolved.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ArtifactDescriptor {
    pub(crate) requested_version: String,
    pub(crate) resolved_version: ReleaseVersion,
    pub(crate) download_url: String,
    pub(crate) checksum: String,
    pub(crate) file_name: String,
    pub(crate) platform: Platform,
}

/// Resolves the given specifier to an artifact for the given platform.
#[instrument(level = "trace", skip(index), err)]
pub(crate) fn resolve(index: &dyn ReleaseIndex, spec: &str, platform: Platform) -> Result<ArtifactDescriptor, ResolveError> {
    let version_spec: VersionSpec = spec.parse().map_err(|reason| ResolveError::InvalidSpec {
        spec: spec.to_string(),
        reason,
    })?;
    debug!(%version_spec, %platform, ?index, "resolving");

    let releases = index.releases(&version_spec, platform).map_err(ResolveError::Index)?;
    trace!(releases = releases.len());
    let Some(release) = select(&version_spec, releases)? else {
        return Err(ResolveError::NotFound {
            spec: spec.to_string(),
            platform,
        });
    };

    let checksum = index.checksum(&release).map_err(ResolveError::Index)?;

    Ok(ArtifactDescriptor {
        requested_version: spec.to_string(),
        resolved_version: release.version,
        download_url: release.url,
        checksum: checksum.to_lowercase(),
        file_name: release.file_name,
        platform,
    })
}

// Selects the highest stable release matching the specifier.
fn select(spec: &VersionSpec, releases: Vec<Release>) -> Result<Option<Release>, ResolveError> {
    let mut candidates: Vec<Release> = releases //
        .into_iter()
        .filter(|release| release.stable && spec.matches(&release.version))
        .collect();
    // highest first, ties broken by url to stay deterministic
    candidates.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.url.cmp(&b.url)));
    candidates.dedup_by(|a, b| a.version == b.version && a.url == b.url && a.checksum == b.checksum);

    let mut candidates = candidates.into_iter();
    let Some(best) = candidates.next() else {
        return Ok(None);
    };

    let rivals = candidates.take_while(|release| release.version == best.version).count();
    if rivals > 0 {
        return Err(ResolveError::Ambiguous {
            version: best.version,
            count: rivals + 1,
        });
    }

    Ok(Some(best))
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::platform::{Arch, Os};
    use test_log::test;

    /// [`ReleaseIndex`] implementation serving a fixed list of releases.
    #[derive(Debug)]
    struct StaticIndex(Vec<Release>);

    impl ReleaseIndex for StaticIndex {
        fn releases(&self, _spec: &VersionSpec, _platform: Platform) -> anyhow::Result<Vec<Release>> {
            Ok(self.0.clone())
        }
    }

    fn release(version: &str, stable: bool) -> Release {
        Release {
            version: version.parse().unwrap(),
            stable,
            url: format!("https://example.org/jdk-{version}.tar.gz"),
            file_name: format!("jdk-{version}.tar.gz"),
            checksum: Some(format!("ABC{}", version.replace('.', ""))),
            id: None,
        }
    }

    const LINUX: Platform = Platform::new(Os::Linux, Arch::X86_64);

    #[test]
    fn picks_highest_by_numeric_components() {
        let index = StaticIndex(vec![release("11.0.1", true), release("11.0.9", true), release("11.2.0", true)]);
        for _ in 0..3 {
            let descriptor = resolve(&index, "11", LINUX).unwrap();
            assert_eq!(descriptor.resolved_version.to_string(), "11.2.0");
        }
    }

    #[test]
    fn latest_skips_unstable() {
        let index = StaticIndex(vec![release("17.0.2", true), release("21.0.1", true), release("22.0.0", false)]);
        let descriptor = resolve(&index, "latest", LINUX).unwrap();
        assert_eq!(descriptor.resolved_version.to_string(), "21.0.1");
        assert_eq!(descriptor.requested_version, "latest");
        assert_eq!(descriptor.checksum, "abc2101");
        assert_eq!(descriptor.file_name, "jdk-21.0.1.tar.gz");
    }

    #[test]
    fn exact_version() {
        let index = StaticIndex(vec![release("11.0.2", true), release("11.0.20", true)]);
        let descriptor = resolve(&index, "11.0.2", LINUX).unwrap();
        assert_eq!(descriptor.resolved_version.to_string(), "11.0.2");
    }

    #[test]
    fn not_found() {
        let index = StaticIndex(vec![release("17.0.2", true)]);
        let err = resolve(&index, "11", LINUX).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn invalid_spec() {
        let index = StaticIndex(vec![]);
        let err = resolve(&index, "seventeen", LINUX).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidSpec { .. }));
    }

    #[test]
    fn duplicate_listing_is_not_ambiguous() {
        let index = StaticIndex(vec![release("17.0.2", true), release("17.0.2", true)]);
        assert!(resolve(&index, "17", LINUX).is_ok());
    }

    #[test]
    fn different_artifacts_with_same_version_are_ambiguous() {
        let mut other = release("17.0.2", true);
        other.url = "https://mirror.example.org/jdk-17.0.2.tar.gz".to_string();
        let index = StaticIndex(vec![release("17.0.2", true), other, release("17.0.1", true)]);
        let err = resolve(&index, "17", LINUX).unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous { count: 2, .. }));
    }

    #[test]
    fn missing_checksum_is_an_index_error() {
        let mut without = release("17.0.2", true);
        without.checksum = None;
        let index = StaticIndex(vec![without]);
        let err = resolve(&index, "17", LINUX).unwrap_err();
        assert!(matches!(err, ResolveError::Index(_)));
    }
}
