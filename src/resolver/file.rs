//! File index.
//!
//! Release index backed by a local YAML (or JSON) document, e.g. for mirrors or machines without internet access.
//!
//! ```yaml
//! releases:
//!   - version: "17.0.2"
//!     os: linux
//!     arch: x86_64
//!     url: zulu17.32.13-ca-jdk17.0.2-linux_x64.tar.gz
//!     sha256: 73d5c4bae20325ca41b606f7eae64669db3aac638c5b3ead4a975055846ad6de
//! ```
//!
//! Relative URLs are resolved against the directory of the index file.

use super::*;
use crate::platform::{Arch, Os};
use anyhow::{Context, anyhow};
use reqwest::Url;
use serde::Deserialize;
use std::fs::File;
use std::path::{self, Path, PathBuf};
use tracing::instrument;

/// The document stored in an index file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexDocument {
    #[serde(default)]
    releases: Vec<IndexEntry>,
}

/// A single release within an index file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexEntry {
    version: ReleaseVersion,
    #[serde(default = "entry_stable_default")]
    stable: bool,
    os: String,
    arch: String,
    url: String,
    sha256: String,
    file_name: Option<String>,
}

// Returns the default value for [IndexEntry::stable].
#[doc(hidden)]
#[inline]
fn entry_stable_default() -> bool {
    true
}

/// [`ReleaseIndex`] implementation reading the releases from a local file.
#[derive(Debug)]
pub(crate) struct FileIndex {
    base: PathBuf,
    document: IndexDocument,
}

impl FileIndex {
    /// Loads the index from the given file.
    #[instrument(err, level = "trace")]
    pub(crate) fn load(filename: &Path) -> anyhow::Result<Self> {
        let filename = path::absolute(filename)?;
        let index_file = File::open(&filename).with_context(|| format!("failed to open index {}", filename.display()))?;
        let document: IndexDocument = serde_yaml::from_reader(index_file)?;
        let base = filename.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(Self { base, document })
    }

    // Resolves the (maybe relative) URL of an entry.
    fn url(&self, url: &str) -> anyhow::Result<Url> {
        if let Ok(url) = Url::parse(url) {
            return Ok(url);
        }

        let path = self.base.join(url);
        Url::from_file_path(&path).map_err(|()| anyhow!("invalid path {}", path.display()))
    }

    // Converts an entry into a release, if it is built for the given platform.
    fn release(&self, entry: &IndexEntry, platform: Platform) -> anyhow::Result<Option<Release>> {
        let os = Os::try_from(entry.os.as_str()).map_err(|err| anyhow!("release {}: {err}", entry.version))?;
        let arch = Arch::try_from(entry.arch.as_str()).map_err(|err| anyhow!("release {}: {err}", entry.version))?;
        if Platform::new(os, arch) != platform {
            return Ok(None);
        }

        let url = self.url(&entry.url)?;
        let file_name = match entry.file_name {
            Some(ref file_name) => file_name.clone(),
            None => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .map(ToString::to_string)
                .ok_or_else(|| anyhow!("release {}: cannot derive file name from {url}", entry.version))?,
        };

        Ok(Some(Release {
            version: entry.version.clone(),
            stable: entry.stable,
            url: url.to_string(),
            file_name,
            checksum: Some(entry.sha256.clone()),
            id: None,
        }))
    }
}

impl ReleaseIndex for FileIndex {
    fn releases(&self, _spec: &VersionSpec, platform: Platform) -> anyhow::Result<Vec<Release>> {
        let mut releases = Vec::new();
        for entry in &self.document.releases {
            if let Some(release) = self.release(entry, platform)? {
                releases.push(release);
            }
        }

        Ok(releases)
    }
}
