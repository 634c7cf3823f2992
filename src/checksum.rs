//! Checksum.
//!
//! This module contains code to create a checksum (SHA256) "on the fly" while writing data.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Result as IoResult, Write};
use std::path::Path;

// Calculates the checksum (SHA256) for the given file.
pub(crate) fn checksum(path: &Path) -> IoResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let hash = hasher.finalize();

    Ok(base16ct::lower::encode_string(&hash))
}

/// Whether two hex encoded checksums denote the same hash.
pub(crate) fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// The struct to create the checksum (SHA256) "on the fly".
pub(crate) struct ChecksumWrite<W> {
    hasher: Sha256,
    write: W,
}

impl<W: Write> ChecksumWrite<W> {
    /// Creates a new `ChecksumWrite` on top of the given [Write].
    pub(crate) fn new(write: W) -> Self {
        Self { hasher: Sha256::new(), write }
    }

    /// Returns the checksum and the inner [Write], consuming the `ChecksumWrite`.
    pub(crate) fn finish(mut self) -> IoResult<(String, W)> {
        self.flush()?;
        let hash = self.hasher.finalize();

        Ok((base16ct::lower::encode_string(&hash), self.write))
    }
}

impl<W: Write> Write for ChecksumWrite<W> {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        let n = self.write.write(buf)?;
        self.hasher.update(&buf[..n]);

        Ok(n)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.write.flush()
    }
}
