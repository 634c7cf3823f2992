//! Azul.
//!
//! Release index backed by the Azul Zulu metadata API.

// https://docs.azul.com/core/install/metadata-api
// https://api.azul.com/metadata/v1/docs/swagger

use super::*;
use crate::platform::{Arch, Os};
use anyhow::anyhow;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

// Base URL for the API endpoint.
#[doc(hidden)]
const API_URL: &str = "https://api.azul.com/metadata/v1/zulu/packages/";

// Number of packages requested per page.
#[doc(hidden)]
const PAGE_SIZE: usize = 100;

// Upper bound for the number of pages requested per query.
#[doc(hidden)]
const MAX_PAGES: u32 = 20;

/// [`ReleaseIndex`] implementation querying the Azul metadata API.
#[derive(Debug)]
pub(crate) struct AzulIndex {
    client: Client,
    package_type: String,
}

impl AzulIndex {
    /// Creates a new `AzulIndex` for the given package type (JDK or JRE).
    pub(crate) fn new(client: Client, package_type: &str) -> Self {
        let package_type = package_type.trim().to_lowercase();
        let package_type = match package_type.as_str() {
            "jdk" | "jre" => package_type,
            _ => "jdk".to_string(), // default to JDK
        };

        Self { client, package_type }
    }

    // Build the query URL to search for packages (pages start at 1).
    fn packages_query_url(&self, spec: &VersionSpec, platform: Platform, page: u32) -> anyhow::Result<Url> {
        let mut url = Url::parse(API_URL)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("os", Self::os(platform.os))
                .append_pair("arch", Self::arch(platform.arch))
                .append_pair("archive_type", Self::archive_type(platform.os))
                .append_pair("java_package_type", &self.package_type)
                .append_pair("javafx_bundled", "false")
                .append_pair("crac_supported", "false")
                .append_pair("release_status", "ga")
                .append_pair("availability_types", "CA")
                .append_pair("page", &page.to_string())
                .append_pair("page_size", &PAGE_SIZE.to_string());
            match spec {
                // the latest package per major version, we pick the highest major ourselves
                VersionSpec::Latest => query.append_pair("latest", "true"),
                VersionSpec::Prefix(prefix) => query.append_pair("java_version", &prefix.to_string()),
            };
        }

        Ok(url)
    }

    // Build the query URL to get the package details.
    fn packages_uuid_query_url(uuid: &str) -> anyhow::Result<Url> {
        let url = Url::parse(API_URL)?;
        let url = url.join(uuid)?;

        Ok(url)
    }

    // Query the API and return the JSON response.
    fn get_json(&self, url: Url) -> anyhow::Result<Value> {
        trace!(%url);
        let response = self
            .client
            .get(url) //
            .header(reqwest::header::ACCEPT, "application/json") //
            .send()?
            .error_for_status()?;
        let bytes = response.bytes()?;
        let mut de = serde_json::Deserializer::from_slice(&bytes);
        let response: Value = Deserialize::deserialize(&mut de)?;
        trace!("response = {response:#?}");

        Ok(response)
    }

    // Returns the operating system as named by the API.
    fn os(os: Os) -> &'static str {
        match os {
            Os::Linux => "linux",
            Os::Darwin => "macos",
            Os::Windows => "windows",
        }
    }

    // Returns the architecture as named by the API.
    fn arch(arch: Arch) -> &'static str {
        match arch {
            Arch::X86_64 => "x64",
            Arch::Arm64 => "aarch64",
        }
    }

    // Returns the archive type to be used on the given operating system.
    fn archive_type(os: Os) -> &'static str {
        match os {
            Os::Windows => "zip",
            _ => "tar.gz",
        }
    }
}

impl ReleaseIndex for AzulIndex {
    fn releases(&self, spec: &VersionSpec, platform: Platform) -> anyhow::Result<Vec<Release>> {
        let packages = collect_pages(|page| {
            let url = self.packages_query_url(spec, platform, page)?;

            // check structure of response
            match self.get_json(url)? {
                Value::Array(packages) => Ok(packages),
                _ => Err(anyhow!("response has not the expected structure")),
            }
        })?;

        packages.iter().filter_map(|package| parse_package(package).transpose()).collect()
    }

    fn checksum(&self, release: &Release) -> anyhow::Result<String> {
        let Some(ref uuid) = release.id else {
            return Err(anyhow!("no package uuid for {}", release.url));
        };
        let url = Self::packages_uuid_query_url(uuid)?;
        let response = self.get_json(url)?;

        // checksum
        let Some(checksum) = response["sha256_hash"].as_str() else {
            return Err(anyhow!("field 'sha256_hash' not present in response"));
        };

        Ok(checksum.to_string())
    }
}

// Collects the packages of all pages until a page comes back short.
fn collect_pages(mut query_page: impl FnMut(u32) -> anyhow::Result<Vec<Value>>) -> anyhow::Result<Vec<Value>> {
    let mut packages = Vec::new();
    for page in 1..=MAX_PAGES {
        let mut batch = query_page(page)?;
        let last = batch.len() < PAGE_SIZE;
        packages.append(&mut batch);
        if last {
            return Ok(packages);
        }
    }

    warn!(pages = MAX_PAGES, "more packages available than requested");
    Ok(packages)
}

// Parses a single package of the packages response. Returns `None` for packages that must be skipped.
fn parse_package(package: &Value) -> anyhow::Result<Option<Release>> {
    // name

    let Some(name) = package["name"].as_str() else {
        return Err(anyhow!("field 'name' not present in response"));
    };
    // CRaC builds are not a general purpose runtime
    if name.to_lowercase().contains("-crac-") {
        trace!(name, "skipping CRaC package");
        return Ok(None);
    }

    // url

    let Some(url) = package["download_url"].as_str() else {
        return Err(anyhow!("field 'download_url' not present in response"));
    };

    // version

    let Some(version) = package["java_version"].as_array() else {
        return Err(anyhow!("field 'java_version' not present in response"));
    };
    let components: Option<Vec<u64>> = version.iter().map(Value::as_u64).collect();
    let Some(components) = components.filter(|components| !components.is_empty()) else {
        return Err(anyhow!("field 'java_version' is malformed"));
    };

    // uuid

    let Some(uuid) = package["package_uuid"].as_str() else {
        return Err(anyhow!("field 'package_uuid' not present in response"));
    };

    Ok(Some(Release {
        version: ReleaseVersion::new(components),
        stable: true, // only GA releases are requested
        url: url.to_string(),
        file_name: name.to_string(),
        checksum: None,
        id: Some(uuid.to_string()),
    }))
}
