//! Installation metadata.
//!
//! This module contains the installation metadata read from a file within the installation directory.

use crate::release::ReleaseVersion;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Name of the metadata directory within the installation directory.
pub(crate) const METADATA_DIR: &str = ".java-bootstrap";

/// Name of the metadata file within the metadata directory.
pub(crate) const METADATA_FILE: &str = "meta";

/// Struct to hold the metadata for an installation.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Metadata {
    /// The checksum of the installed package
    pub(crate) checksum: String,
    /// The URL the package was downloaded from
    pub(crate) source: String,
    /// The version of the installation
    pub(crate) version: ReleaseVersion,
}

impl Metadata {
    /// Creates a new `Metadata`.
    pub(crate) fn new(version: ReleaseVersion, checksum: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            checksum: checksum.into(),
            source: source.into(),
            version,
        }
    }

    /// Returns the path of the metadata file for the installation at the given directory.
    pub(crate) fn path_in(root: &Path) -> PathBuf {
        root.join(METADATA_DIR).join(METADATA_FILE)
    }

    /// Loads the `Metadata` of the installation at the given directory.
    #[instrument(err(level = "trace"), level = "trace")]
    pub(crate) fn load_from(root: &Path) -> Result<Self> {
        let metadata_file = File::open(Self::path_in(root))?;

        let de = serde_yaml::Deserializer::from_reader(metadata_file);
        let value = serde_yaml::Value::deserialize(de)?;
        let metadata: Metadata = serde_yaml::from_value(value)?;

        Ok(metadata)
    }

    /// Saves the `Metadata` into the installation at the given directory.
    #[instrument(err(level = "trace"), level = "trace")]
    pub(crate) fn save_to(&self, root: &Path) -> Result<()> {
        let filename = Self::path_in(root);
        if let Some(dir) = filename.parent() {
            fs::create_dir_all(dir)?;
        }
        let metadata_file = File::create(filename)?;
        let mut metadata_ser = serde_yaml::Serializer::new(&metadata_file);
        self.serialize(&mut metadata_ser)?;

        Ok(())
    }
}
