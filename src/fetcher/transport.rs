//! Transport.
//!
//! This module contains the code to stream the content of a URL into a [Write].

use super::FetchError;
use reqwest::Url;
use reqwest::blocking::Client;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use tracing::trace;

/// Trait for transports that can download an artifact.
pub(crate) trait Transport: fmt::Debug {
    /// Streams the content of the given URL into the given [Write] and returns the number of bytes written.
    fn download(&self, url: &str, dest: &mut dyn Write) -> Result<u64, FetchError>;
}

/// [`Transport`] implementation for `http(s)://` and `file://` URLs.
#[derive(Debug)]
pub(crate) struct DefaultTransport {
    client: Client,
}

impl DefaultTransport {
    /// Creates a new `DefaultTransport` on top of the given HTTP client.
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    // Downloads via HTTP(S).
    fn download_http(&self, url: &str, dest: &mut dyn Write) -> Result<u64, FetchError> {
        let network = |err: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            reason: err.to_string(),
        };

        let mut response = self
            .client
            .get(url) //
            .header(reqwest::header::ACCEPT, "application/octet-stream") //
            .send()
            .map_err(network)?;

        let status = response.status();
        trace!(%status);
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Network {
                url: url.to_string(),
                reason: format!("server responded with {status}"),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.copy_to(dest).map_err(network)
    }

    // Copies a local file.
    fn download_file(url: &Url, dest: &mut dyn Write) -> Result<u64, FetchError> {
        let source = |reason: String| FetchError::Source {
            url: url.to_string(),
            reason,
        };

        let path = url.to_file_path().map_err(|()| source("not a local path".to_string()))?;
        let mut file = File::open(&path).map_err(|err| source(err.to_string()))?;
        let bytes = io::copy(&mut file, dest)?;

        Ok(bytes)
    }
}

impl Transport for DefaultTransport {
    fn download(&self, url: &str, dest: &mut dyn Write) -> Result<u64, FetchError> {
        let parsed = Url::parse(url).map_err(|err| FetchError::Source {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => self.download_http(url, dest),
            "file" => Self::download_file(&parsed, dest),
            scheme => Err(FetchError::Source {
                url: url.to_string(),
                reason: format!("unsupported scheme '{scheme}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use test_log::test;

    fn transport() -> DefaultTransport {
        DefaultTransport::new(crate::http::client(Duration::from_secs(1)).unwrap())
    }

    #[test]
    fn file_url() {
        let tempdir = tempdir().unwrap();
        let file = tempdir.path().join("artifact.bin");
        std::fs::write(&file, b"payload").unwrap();
        let url = Url::from_file_path(&file).unwrap();

        let mut dest = Vec::new();
        let bytes = transport().download(url.as_str(), &mut dest).unwrap();
        assert_eq!(bytes, 7);
        assert_eq!(dest, b"payload");
    }

    #[test]
    fn missing_file_is_not_retryable() {
        let tempdir = tempdir().unwrap();
        let url = Url::from_file_path(tempdir.path().join("missing.bin")).unwrap();
        let err = transport().download(url.as_str(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, FetchError::Source { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unsupported_scheme() {
        let err = transport().download("ftp://example.org/jdk.tar.gz", &mut Vec::new()).unwrap_err();
        assert!(matches!(err, FetchError::Source { .. }));
    }
}
