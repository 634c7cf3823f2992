//! Version.
//!
//! This module contains the build information printed on start-up.

use std::fmt;

/// The build information embedded at compile time.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Version {
    pkg_name: &'static str,
    pkg_version: &'static str,
    git_describe: &'static str,
    rustc_semver: &'static str,
}

impl Version {
    /// Returns the build information of this program.
    pub(crate) const fn current() -> Self {
        Self {
            pkg_name: env!("CARGO_PKG_NAME"),
            pkg_version: env!("CARGO_PKG_VERSION"),
            git_describe: env!("VERGEN_GIT_DESCRIBE"),
            rustc_semver: env!("VERGEN_RUSTC_SEMVER"),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (git/{}) (rustc/{})", self.pkg_name, self.pkg_version, self.git_describe, self.rustc_semver)
    }
}
