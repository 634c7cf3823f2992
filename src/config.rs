//! Configuration.
//!
//! This module contains the configuration read from a YAML file and the settings derived from it together with the
//! command-line arguments. Command-line arguments (and their environment variables) take precedence over the file,
//! the file takes precedence over the built-in defaults.
//!
//! ```yaml
//! directory: ~/.tools/java-${version}
//! anchor: JAVA_HOME
//! type: jdk
//! timeout: 30s
//! retries: 3
//! ```

use crate::args::Args;
use anyhow::anyhow;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::env;
use std::fmt;
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

/// Name of the default configuration file.
pub(crate) const CONFIG_FILENAME: &str = "java-bootstrap.yml";

/// The default template of the installation directory.
pub(crate) const DEFAULT_DIRECTORY: &str = "~/.tools/java-${version}";

/// The default name of the variable pointing at the installation.
pub(crate) const DEFAULT_ANCHOR: &str = "JAVA_HOME";

/// The default package type.
pub(crate) const DEFAULT_PACKAGE_TYPE: &str = "jdk";

/// The default timeout for network operations and the verification.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The default number of download attempts.
pub(crate) const DEFAULT_RETRIES: u32 = 3;

/// The struct that holds the configuration loaded from a YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// The version specifier used when none is given on the command-line.
    #[serde(default, deserialize_with = "uint_or_string_deser")]
    pub(crate) version: Option<String>,
    /// The template of the installation directory.
    pub(crate) directory: Option<String>,
    /// The name of the variable pointing at the installation.
    pub(crate) anchor: Option<String>,
    /// The package type (JDK or JRE).
    #[serde(rename = "type")]
    pub(crate) package_type: Option<String>,
    /// A local release index to use instead of the vendor API.
    pub(crate) index: Option<PathBuf>,
    /// The cache directory.
    pub(crate) cache: Option<PathBuf>,
    /// The shell profile to edit.
    pub(crate) profile: Option<PathBuf>,
    /// The timeout for network operations and the verification.
    #[serde(default, deserialize_with = "duration_deser")]
    pub(crate) timeout: Option<Duration>,
    /// The number of download attempts.
    pub(crate) retries: Option<u32>,
}

impl Config {
    /// Loads the configuration from the given filename.
    #[instrument(err, level = "trace")]
    pub(crate) fn load_from_file<P>(filename: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path> + std::fmt::Debug,
    {
        let config_file = File::open(filename)?;

        let de = serde_yaml::Deserializer::from_reader(config_file);
        let value = serde_yaml::Value::deserialize(de)?;
        // an empty file is a valid configuration
        if value.is_null() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_value(value)?;

        Ok(config)
    }
}

/// Returns the configuration file to load: the given one or, if none is given, the default file (if present).
pub(crate) fn config_path(filename: Option<&Path>) -> Option<PathBuf> {
    match filename {
        Some(filename) => Some(filename.to_path_buf()),
        None => Some(PathBuf::from(CONFIG_FILENAME)).filter(|filename| filename.is_file()),
    }
}

// Deserializes an optional field from either unsigned integer or string.
// see https://serde.rs/string-or-struct.html
#[doc(hidden)]
fn uint_or_string_deser<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UintOrString(PhantomData<fn() -> Option<String>>);

    impl<'de> Visitor<'de> for UintOrString {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("unsigned integer or string")
        }

        fn visit_str<E>(self, value: &str) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_unit<E>(self) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(UintOrString(PhantomData))
}

// Deserializes an optional duration from either unsigned integer (seconds) or a human readable string (`1m 30s`).
#[doc(hidden)]
fn duration_deser<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = uint_or_string_deser(deserializer)? else {
        return Ok(None);
    };

    let duration = match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(&value).map_err(de::Error::custom)?,
    };

    Ok(Some(duration))
}

/// The effective settings of a run.
#[derive(Debug)]
pub(crate) struct Settings {
    /// The version specifier used when none is given on the command-line.
    pub(crate) version: Option<String>,
    /// The template of the installation directory.
    pub(crate) directory: String,
    /// The name of the variable pointing at the installation.
    pub(crate) anchor: String,
    /// The package type (JDK or JRE).
    pub(crate) package_type: String,
    /// A local release index to use instead of the vendor API.
    pub(crate) index: Option<PathBuf>,
    /// The cache directory.
    pub(crate) cache: PathBuf,
    /// The shell profile to edit.
    pub(crate) profile: PathBuf,
    /// The timeout for network operations and the verification.
    pub(crate) timeout: Duration,
    /// The number of download attempts.
    pub(crate) retries: u32,
}

impl Settings {
    /// Merges the given arguments and configuration (in this order of precedence) with the defaults.
    pub(crate) fn merge(args: &Args, config: Config) -> anyhow::Result<Self> {
        let cache = match args.cache.clone().or(config.cache) {
            Some(cache) => cache,
            None => default_cache_dir()?,
        };
        let profile = match args.profile.clone().or(config.profile) {
            Some(profile) => profile,
            None => default_profile(env::var("SHELL").ok().as_deref())?,
        };

        Ok(Self {
            version: config.version,
            directory: config.directory.unwrap_or_else(|| DEFAULT_DIRECTORY.to_string()),
            anchor: config.anchor.unwrap_or_else(|| DEFAULT_ANCHOR.to_string()),
            package_type: config.package_type.unwrap_or_else(|| DEFAULT_PACKAGE_TYPE.to_string()),
            index: config.index,
            cache,
            profile,
            timeout: config.timeout.unwrap_or(DEFAULT_TIMEOUT),
            retries: config.retries.unwrap_or(DEFAULT_RETRIES).max(1),
        })
    }
}

// Returns the default cache directory.
#[doc(hidden)]
fn default_cache_dir() -> anyhow::Result<PathBuf> {
    let cache_dir = dirs::cache_dir().ok_or_else(|| anyhow!("failed to determine cache directory"))?;

    Ok(cache_dir.join(env!("CARGO_PKG_NAME")))
}

// Returns the profile of the given shell within the home directory.
#[doc(hidden)]
fn default_profile(shell: Option<&str>) -> anyhow::Result<PathBuf> {
    let home_dir = dirs::home_dir().ok_or_else(|| anyhow!("failed to determine home directory"))?;
    let shell = shell.map(Path::new).and_then(Path::file_name).and_then(|name| name.to_str());
    let profile = match shell {
        Some("zsh") => ".zshrc",
        Some("bash") => ".bashrc",
        _ => ".profile",
    };

    Ok(home_dir.join(profile))
}
