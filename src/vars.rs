//! Variables.
//!
//! This module contains the expansion of installation directory templates like `~/.tools/java-${version}`.

use crate::platform::Platform;
use crate::release::ReleaseVersion;
use std::env;
use std::fmt;
use std::path::{self, PathBuf};

// Prefix of variables naming an environment variable.
#[doc(hidden)]
const ENV_PREFIX: &str = "env.";

/// The error type for operations interacting with variables.
#[cfg_attr(test, derive(PartialEq))]
#[derive(Debug, thiserror::Error)]
pub(crate) enum VarError {
    /// The specified variable is not present.
    #[error("variable '{0}' not found")]
    NotPresent(String),
}

/// Trait for variable resolvers.
pub(crate) trait VarResolver: fmt::Debug {
    /// Resolves the variable with the given name. Returns `None` for variables this resolver does not know.
    fn resolve_var(&self, name: &str) -> Option<String>;
}

/// [`VarResolver`] for the variables describing a release on a platform: `version`, `major`, `os` and `arch`.
#[derive(Debug)]
pub(crate) struct ReleaseVars<'a> {
    version: &'a ReleaseVersion,
    platform: Platform,
}

impl<'a> ReleaseVars<'a> {
    /// Constructs a new `ReleaseVars` for the given release.
    pub(crate) fn new(version: &'a ReleaseVersion, platform: Platform) -> Self {
        Self { version, platform }
    }
}

impl VarResolver for ReleaseVars<'_> {
    fn resolve_var(&self, name: &str) -> Option<String> {
        match name {
            "version" => Some(self.version.to_string()),
            "major" => Some(self.version.major().to_string()),
            "os" => Some(self.platform.os.id().to_string()),
            "arch" => Some(self.platform.arch.id().to_string()),
            _ => None,
        }
    }
}

/// [`VarResolver`] for environment variables of the operating system, named `env.NAME`.
#[derive(Debug)]
pub(crate) struct EnvVars;

impl VarResolver for EnvVars {
    fn resolve_var(&self, name: &str) -> Option<String> {
        env::var(name.strip_prefix(ENV_PREFIX)?).ok()
    }
}

/// Expands variables in strings with the help of variable resolvers. The first resolver knowing a variable wins.
#[derive(Debug)]
pub(crate) struct VarExpander<'a> {
    resolvers: Vec<&'a dyn VarResolver>,
}

impl<'a> VarExpander<'a> {
    /// Constructs a new `VarExpander` with the given variable resolvers.
    pub(crate) fn new(resolvers: impl IntoIterator<Item = &'a dyn VarResolver>) -> Self {
        Self {
            resolvers: resolvers.into_iter().collect(),
        }
    }

    /// Expands all variables in the given string in a single pass. Values are taken literally, a value containing
    /// `${...}` itself is not expanded again.
    #[tracing::instrument(level = "trace", skip(self), ret, err)]
    pub(crate) fn expand(&self, s: &str) -> Result<String, VarError> {
        let expanded = shellexpand::env_with_context(s, |name| self.resolve(name)).map_err(|err| err.cause)?;

        Ok(expanded.into_owned())
    }

    // Provides the context for `expand`.
    #[doc(hidden)]
    fn resolve(&self, name: &str) -> Result<Option<String>, VarError> {
        match self.resolvers.iter().find_map(|resolver| resolver.resolve_var(name)) {
            Some(value) => Ok(Some(value)),
            None => Err(VarError::NotPresent(name.to_owned())),
        }
    }
}

/// Expands the given installation directory template for the given release.
///
/// Known variables are `${version}`, `${major}`, `${os}`, `${arch}` and `${env.NAME}` for environment variables. A
/// leading `~` denotes the home directory. Relative results are made absolute against the working directory.
pub(crate) fn expand_directory(template: &str, version: &ReleaseVersion, platform: Platform) -> Result<PathBuf, VarError> {
    let release_vars = ReleaseVars::new(version, platform);
    let var_expander = VarExpander::new([&release_vars as &dyn VarResolver, &EnvVars]);

    // expand
    let directory = var_expander.expand(template)?;
    let directory = PathBuf::from(shellexpand::tilde(&directory).as_ref());
    let directory = path::absolute(&directory).unwrap_or(directory);

    Ok(directory)
}
