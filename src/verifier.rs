//! Verifier.
//!
//! This module contains the code to check an installation by running `java -version` in a child process. The child
//! gets the variables of the installation handed over directly, as the current process never sees the edited shell
//! profile.

use crate::installer::InstallTarget;
use crate::platform::Platform;
use crate::release::ReleaseVersion;
use regex::Regex;
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};
use wait_timeout::ChildExt;

// Patterns to find the version within the output of `java -version`, most specific first.
#[doc(hidden)]
const VERSION_PATTERNS: [&str; 3] = [
    // openjdk version "17.0.2" 2022-01-18 LTS
    r#"version\s+"([^"]+)""#,
    // openjdk 21.0.1 2023-10-17 LTS
    r"(?i)\b(?:openjdk|java)\s+(\d+(?:\.\d+)*(?:[_+\-][\w.+\-]*)?)",
    // anything that looks like a dotted version
    r"\b(\d+(?:\.\d+)+(?:_\d+)?)\b",
];

/// The error type for verifying an installation.
#[derive(Debug, thiserror::Error)]
pub(crate) enum VerifyError {
    /// The java executable could not be run to completion.
    #[error("failed to run {exe}: {reason}")]
    Subprocess { exe: String, reason: String },
}

/// The outcome of running the installed java executable.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct VerificationResult {
    /// Whether the detected version matches the expected one.
    pub(crate) success: bool,
    /// The version reported by the executable, if it could be parsed.
    pub(crate) detected_version: Option<String>,
    /// Everything the executable printed (stderr, then stdout).
    pub(crate) raw_output: String,
}

/// Runs installed java executables.
#[derive(Debug)]
pub(crate) struct Verifier {
    platform: Platform,
    timeout: Duration,
}

impl Verifier {
    /// Creates a new `Verifier` with a timeout of 30 seconds.
    pub(crate) fn new(platform: Platform) -> Self {
        Self {
            platform,
            timeout: Duration::from_secs(30),
        }
    }

    /// The time the executable gets to answer.
    pub(crate) fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;

        self
    }

    /// Runs `java -version` of the given installation and compares the reported version with the expected one.
    ///
    /// A version that cannot be parsed or does not match is reported with `success == false`. Only an executable
    /// that cannot be run (missing, not executable, killed, too slow) is an error.
    #[instrument(level = "trace", skip(self, target), fields(root = %target.root_directory().display()), err)]
    pub(crate) fn verify(&self, target: &InstallTarget, expected: &ReleaseVersion) -> Result<VerificationResult, VerifyError> {
        let exe = target.java_exe(self.platform);
        let subprocess = |reason: String| VerifyError::Subprocess {
            exe: exe.display().to_string(),
            reason,
        };

        let mut cmd = Command::new(&exe);
        cmd.arg("-version") //
            .envs(target.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        trace!(?cmd);

        let mut child = cmd.spawn().map_err(|err| subprocess(err.to_string()))?;

        // drain both pipes while waiting, a chatty child must not block on a full pipe
        let stderr = child.stderr.take().map(drain);
        let stdout = child.stdout.take().map(drain);

        let Some(status) = child.wait_timeout(self.timeout).map_err(|err| subprocess(err.to_string()))? else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(subprocess(format!("no answer within {}", humantime::format_duration(self.timeout))));
        };

        let stderr = collect(stderr).map_err(|err| subprocess(err.to_string()))?;
        let stdout = collect(stdout).map_err(|err| subprocess(err.to_string()))?;
        let raw_output = format!("{stderr}{stdout}");
        trace!(%status, raw_output);

        if status.code().is_none() {
            return Err(subprocess(format!("terminated abnormally ({status})")));
        }
        if !status.success() {
            warn!(%status, "java exited with failure");
        }

        let detected = detect_version(&stderr).or_else(|| detect_version(&stdout));
        let success = status.success() && detected.as_ref().is_some_and(|(_, version)| version.starts_with(expected));
        debug!(success, detected = ?detected.as_ref().map(|(raw, _)| raw), %expected);

        Ok(VerificationResult {
            success,
            detected_version: detected.map(|(_, version)| version.to_string()),
            raw_output,
        })
    }
}

// Reads the given pipe to its end on a separate thread.
fn drain(pipe: impl Read + Send + 'static) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || io::read_to_string(pipe))
}

// Waits for the given reader thread and returns what it read.
fn collect(reader: Option<JoinHandle<io::Result<String>>>) -> io::Result<String> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };

    reader.join().map_err(|_| io::Error::other("output reader panicked"))?
}

// Finds the version within the given output. Returns the raw match together with its normalised version.
fn detect_version(output: &str) -> Option<(String, ReleaseVersion)> {
    for pattern in VERSION_PATTERNS {
        let Ok(regex) = Regex::new(pattern) else {
            continue;
        };
        for captures in regex.captures_iter(output) {
            let raw = &captures[1];
            if let Some(version) = normalise(raw) {
                return Some((raw.to_string(), version));
            }
        }
    }

    None
}

// Normalises the given raw version: build suffixes (`+8`, `-ea`) are dropped and the legacy scheme (`1.8.0_392`)
// is mapped to the current one (`8.0.392`).
fn normalise(raw: &str) -> Option<ReleaseVersion> {
    let raw = raw.trim();
    let raw = raw.split(['+', '-']).next()?;
    let (main, update) = match raw.split_once('_') {
        Some((main, update)) => (main, Some(update)),
        None => (raw, None),
    };

    let mut components = main.split('.').map(|component| component.parse::<u64>().ok()).collect::<Option<Vec<u64>>>()?;
    if components.len() >= 2 && components[0] == 1 {
        components.remove(0);
        if let Some(update) = update.and_then(|update| update.parse::<u64>().ok()) {
            components.truncate(2);
            components.push(update);
        }
    }

    Some(ReleaseVersion::new(components))
}
