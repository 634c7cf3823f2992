//! Fetcher.
//!
//! This module contains the code to download an artifact into the local cache.
//!
//! The cache is laid out as `<cache>/<platform>/<version>/<artifact-file>`. Every entry is guarded by an exclusive
//! advisory lock on `<cache>/<platform>/<version>.lock`, so concurrent invocations never race on the same download.
//! Only files whose checksum has been verified are ever visible under their final name.

mod transport;

pub(crate) use self::transport::{DefaultTransport, Transport};

use crate::cancel::CancelToken;
use crate::checksum::{self, ChecksumWrite};
use crate::resolver::ArtifactDescriptor;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

// Suffix for files that are still being downloaded.
#[doc(hidden)]
const PART_SUFFIX: &str = "part";

// Suffix for the lock file of a cache entry.
#[doc(hidden)]
const LOCK_SUFFIX: &str = "lock";

/// The error type for fetching an artifact.
#[derive(Debug, thiserror::Error)]
pub(crate) enum FetchError {
    /// A transient failure (connect, timeout, server error, broken stream).
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },
    /// The server refused the request.
    #[error("download of {url} failed with status {status}")]
    Http { url: String, status: u16 },
    /// The source cannot be read (unsupported scheme, missing local file, ...).
    #[error("cannot read {url}: {reason}")]
    Source { url: String, reason: String },
    /// The downloaded bytes do not match the published checksum.
    #[error("checksum mismatch (expected: {expected}, got: {actual})")]
    ChecksumMismatch { expected: String, actual: String },
    /// The artifact file name would escape the cache entry.
    #[error("invalid artifact file name '{0}'")]
    InvalidName(String),
    /// The user interrupted the download.
    #[error("download cancelled")]
    Cancelled,
    /// Local I/O failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FetchError {
    /// Whether the failed operation may succeed when retried.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// The policy to retry downloads that failed with a transient error.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RetryPolicy {
    /// The maximum number of attempts (including the first one).
    pub(crate) attempts: u32,
    /// The delay before the second attempt, doubled for each further attempt.
    pub(crate) base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay after the given (1-based) failed attempt.
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Downloads artifacts into the local cache.
#[derive(Debug)]
pub(crate) struct Fetcher {
    cache_dir: PathBuf,
    cancel: CancelToken,
    retry: RetryPolicy,
    transport: Box<dyn Transport>,
}

impl Fetcher {
    /// Creates a new `Fetcher` for the given cache directory.
    pub(crate) fn new(cache_dir: impl Into<PathBuf>, transport: Box<dyn Transport>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            cancel: CancelToken::default(),
            retry: RetryPolicy::default(),
            transport,
        }
    }

    /// The policy to retry failed downloads.
    pub(crate) fn retry(&mut self, retry: RetryPolicy) -> &mut Self {
        self.retry = retry;

        self
    }

    /// The token to observe for interrupts.
    pub(crate) fn cancel_token(&mut self, cancel: CancelToken) -> &mut Self {
        self.cancel = cancel;

        self
    }

    /// Returns the cache entry directory for the given artifact.
    pub(crate) fn entry_dir(&self, descriptor: &ArtifactDescriptor) -> PathBuf {
        self.cache_dir //
            .join(descriptor.platform.to_string())
            .join(descriptor.resolved_version.to_string())
    }

    /// Provides the artifact from the cache, downloading it first if necessary. Returns the path of the verified
    /// file.
    #[instrument(level = "trace", skip(self, descriptor), fields(version = %descriptor.resolved_version), err)]
    pub(crate) fn fetch(&self, descriptor: &ArtifactDescriptor) -> Result<PathBuf, FetchError> {
        let file_name = safe_file_name(&descriptor.file_name)?;
        let entry_dir = self.entry_dir(descriptor);
        let lock_path = lock_path(&entry_dir);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // serialize with other instances working on the same entry
        let lock_file = OpenOptions::new().create(true).truncate(false).read(true).write(true).open(&lock_path)?;
        trace!(lock = %lock_path.display(), "acquiring cache lock");
        lock_file.lock_exclusive()?;

        let result = self.fetch_locked(descriptor, &entry_dir, file_name);
        if result.is_err() {
            // leave no empty entry directory behind
            let _ = fs::remove_dir(&entry_dir);
        }

        if let Err(err) = FileExt::unlock(&lock_file) {
            warn!(?err, "failed to release cache lock");
        }

        result
    }

    // Provides the artifact while holding the lock of the cache entry.
    fn fetch_locked(&self, descriptor: &ArtifactDescriptor, entry_dir: &Path, file_name: &str) -> Result<PathBuf, FetchError> {
        let dest = entry_dir.join(file_name);

        // check if already downloaded
        if dest.exists() {
            let cached = checksum::checksum(&dest)?;
            if checksum::same(&cached, &descriptor.checksum) {
                debug!(file = %dest.display(), "using cached artifact");
                return Ok(dest);
            }
            warn!(file = %dest.display(), "discarding cached artifact with wrong checksum");
            fs::remove_file(&dest)?;
        }

        fs::create_dir_all(entry_dir)?;
        self.download_with_retry(descriptor, &dest)?;

        Ok(dest)
    }

    // Downloads the artifact, retrying transient failures.
    fn download_with_retry(&self, descriptor: &ArtifactDescriptor, dest: &Path) -> Result<(), FetchError> {
        let mut attempt = 1;
        loop {
            match self.download_once(descriptor, dest) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(attempt, delay = %humantime::format_duration(delay), %err, "download failed, retrying");
                    self.sleep(delay)?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    // Downloads the artifact once. The final file only appears once its checksum has been verified.
    fn download_once(&self, descriptor: &ArtifactDescriptor, dest: &Path) -> Result<(), FetchError> {
        let part = part_path(dest);
        match self.download_to(descriptor, &part) {
            Ok(()) => {
                fs::rename(&part, dest)?;
                Ok(())
            }
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(&part) {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        warn!(?remove_err, part = %part.display(), "failed to delete partial download");
                    }
                }
                Err(err)
            }
        }
    }

    // Downloads the artifact into the given file and verifies its checksum.
    fn download_to(&self, descriptor: &ArtifactDescriptor, part: &Path) -> Result<(), FetchError> {
        let url = &descriptor.download_url;
        debug!(%url, part = %part.display(), "downloading");
        let file = File::create(part)?;
        let mut checksum_write = ChecksumWrite::new(CancelWrite::new(BufWriter::new(file), &self.cancel));
        let result = self.transport.download(url, &mut checksum_write);
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let bytes_written = result?;
        trace!(bytes_written);

        let (checksum_calculated, write) = checksum_write.finish()?;
        trace!(checksum_calculated);
        let file = write.into_inner().into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;

        // verify checksum
        if !checksum::same(&descriptor.checksum, &checksum_calculated) {
            return Err(FetchError::ChecksumMismatch {
                expected: descriptor.checksum.clone(),
                actual: checksum_calculated,
            });
        }

        Ok(())
    }

    // Sleeps for the given duration, waking up early on interrupt.
    fn sleep(&self, duration: Duration) -> Result<(), FetchError> {
        const SLICE: Duration = Duration::from_millis(100);
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let slice = remaining.min(SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }

        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        Ok(())
    }
}

// Returns the path of the lock file for the given cache entry directory.
fn lock_path(entry_dir: &Path) -> PathBuf {
    let mut name = entry_dir.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(LOCK_SUFFIX);
    entry_dir.with_file_name(name)
}

// Returns the path of the partial download for the given destination.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PART_SUFFIX);
    dest.with_file_name(name)
}

// Ensures the given artifact file name is a single, normal path component.
fn safe_file_name(file_name: &str) -> Result<&str, FetchError> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(file_name),
        _ => Err(FetchError::InvalidName(file_name.to_string())),
    }
}

/// [Write] that fails as soon as the user interrupts the program.
struct CancelWrite<'a, W> {
    cancel: &'a CancelToken,
    write: W,
}

impl<'a, W: Write> CancelWrite<'a, W> {
    fn new(write: W, cancel: &'a CancelToken) -> Self {
        Self { cancel, write }
    }

    fn into_inner(self) -> W {
        self.write
    }
}

impl<W: Write> Write for CancelWrite<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("cancelled"));
        }
        self.write.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write.flush()
    }
}
