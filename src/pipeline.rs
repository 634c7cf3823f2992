//! Pipeline.
//!
//! This module contains the state machine wiring the resolver, the fetcher, the installer and the verifier together:
//!
//! ```text
//! Idle -> Resolving -> Fetching -> Installing -> Verifying -> Done
//!                                                          \-> Failed
//! ```
//!
//! Every transition is logged together with the time spent in the stage that just finished. A failure during or
//! after installing rolls back every change the installer made.

use crate::cancel::CancelToken;
use crate::colors::*;
use crate::fetcher::{FetchError, Fetcher};
use crate::installer::{InstallError, InstallReceipt, InstallTarget, Installer, RollbackOutcome};
use crate::meta::Metadata;
use crate::platform::Platform;
use crate::release::ReleaseVersion;
use crate::resolver::{self, ArtifactDescriptor, ReleaseIndex, ResolveError};
use crate::vars::{self, VarError};
use crate::verifier::{VerificationResult, Verifier, VerifyError};
use anyhow::anyhow;
use std::fmt;
use std::path::{self, Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Exit code used in case of success.
pub(crate) const EXIT_OK: i32 = 0;

/// Exit code used in case of errors outside the pipeline (configuration, etc.).
pub(crate) const EXIT_NOK: i32 = 1;

/// Exit code used in case the version could not be resolved.
pub(crate) const EXIT_RESOLVE: i32 = 10;

/// Exit code used in case the package could not be downloaded.
pub(crate) const EXIT_FETCH: i32 = 11;

/// Exit code used in case the package could not be installed.
pub(crate) const EXIT_INSTALL: i32 = 12;

/// Exit code used in case the installation could not be verified.
pub(crate) const EXIT_VERIFY: i32 = 13;

/// Exit code used in case the user interrupted the program.
pub(crate) const EXIT_INTERRUPTED: i32 = 130;

/// The stages of the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Stage {
    Idle,
    Resolving,
    Fetching,
    Installing,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::Installing => "installing",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(stage)
    }
}

/// The error type for running the pipeline.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PipelineError {
    /// The version could not be resolved.
    #[error("failed to resolve version")]
    Resolve(#[source] ResolveError),
    /// The installation directory could not be derived.
    #[error("failed to expand installation directory '{template}'")]
    Directory {
        template: String,
        #[source]
        source: VarError,
    },
    /// The package could not be downloaded.
    #[error("failed to download package")]
    Fetch(#[source] FetchError),
    /// The package could not be installed.
    #[error("failed to install package")]
    Install(#[source] InstallError),
    /// The installed java could not be run.
    #[error("failed to verify installation")]
    Verify(#[source] VerifyError),
    /// The installed java does not report the expected version.
    #[error("installed java reports {} instead of {expected}", detected.as_deref().unwrap_or("no version"))]
    Mismatch { expected: ReleaseVersion, detected: Option<String> },
    /// The version of an existing installation is unknown.
    #[error("failed to determine installed version of {}", root.display())]
    UnknownVersion {
        root: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    /// The user interrupted the program.
    #[error("interrupted")]
    Cancelled,
}

impl PipelineError {
    /// Returns the exit code for this error.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Resolve(_) => EXIT_RESOLVE,
            Self::Fetch(FetchError::Cancelled) | Self::Install(InstallError::Cancelled) | Self::Cancelled => EXIT_INTERRUPTED,
            Self::Fetch(_) => EXIT_FETCH,
            Self::Directory { .. } | Self::Install(_) => EXIT_INSTALL,
            Self::Verify(_) | Self::Mismatch { .. } | Self::UnknownVersion { .. } => EXIT_VERIFY,
        }
    }
}

/// A failed run of the pipeline.
#[derive(Debug)]
pub(crate) struct Failure {
    /// The stage the pipeline failed in.
    pub(crate) stage: Stage,
    /// The cause.
    pub(crate) error: PipelineError,
    /// The outcome of undoing the changes made so far.
    pub(crate) rollback: RollbackOutcome,
    /// Whether the user interrupted the program.
    pub(crate) interrupted: bool,
}

impl Failure {
    /// Returns the exit code for this failure. A failed rollback never changes the exit code.
    pub(crate) fn exit_code(&self) -> i32 {
        if self.interrupted {
            return EXIT_INTERRUPTED;
        }

        self.error.exit_code()
    }
}

/// What to install.
#[derive(Debug)]
pub(crate) struct InstallRequest {
    /// The version specifier.
    pub(crate) spec: String,
    /// The template of the installation directory.
    pub(crate) directory: String,
    /// The name of the variable pointing at the installation.
    pub(crate) anchor: String,
    /// Whether to stop after resolving.
    pub(crate) dry_run: bool,
}

/// The result of a successful install run.
#[derive(Debug)]
pub(crate) enum InstallOutcome {
    /// The version has been resolved, nothing has been changed.
    DryRun { descriptor: ArtifactDescriptor, root: PathBuf },
    /// The package has been installed and verified.
    Installed {
        descriptor: ArtifactDescriptor,
        target: InstallTarget,
        verification: VerificationResult,
        profile_backup: Option<PathBuf>,
    },
}

/// The state machine of a single run.
#[derive(Debug)]
struct Machine<'a> {
    cancel: &'a CancelToken,
    quiet: bool,
    stage: Stage,
    stage_start: Instant,
    start: Instant,
}

impl<'a> Machine<'a> {
    fn new(cancel: &'a CancelToken, quiet: bool) -> Self {
        let now = Instant::now();
        Self {
            cancel,
            quiet,
            stage: Stage::Idle,
            stage_start: now,
            start: now,
        }
    }

    // Moves on to the given stage unless the user interrupted the program.
    fn advance(&mut self, next: Stage) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.transition(next);

        Ok(())
    }

    // Moves on to the given stage.
    fn transition(&mut self, next: Stage) {
        let elapsed = format_elapsed(self.stage_start.elapsed());
        info!(from = %self.stage, to = %next, %elapsed, "transition");
        self.stage = next;
        self.stage_start = Instant::now();
    }

    // Prints a status line.
    fn status(&self, line: impl fmt::Display) {
        if !self.quiet {
            println!("{line}");
        }
    }

    // Ends the run in the given final stage.
    fn finish(&mut self, stage: Stage) {
        self.transition(stage);
        debug!(total = %format_elapsed(self.start.elapsed()), "finished");
    }
}

// Formats a duration with millisecond precision.
fn format_elapsed(elapsed: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(elapsed.as_millis().try_into().unwrap_or(u64::MAX)))
}

/// The pipeline with its components.
#[derive(Debug)]
pub(crate) struct Pipeline {
    cancel: CancelToken,
    fetcher: Fetcher,
    index: Option<Box<dyn ReleaseIndex>>,
    installer: Installer,
    platform: Platform,
    quiet: bool,
    verifier: Verifier,
}

impl Pipeline {
    /// Creates a new `Pipeline` out of the given components.
    pub(crate) fn new(platform: Platform, fetcher: Fetcher, installer: Installer, verifier: Verifier) -> Self {
        Self {
            cancel: CancelToken::default(),
            fetcher,
            index: None,
            installer,
            platform,
            quiet: false,
            verifier,
        }
    }

    /// The index to resolve versions with.
    pub(crate) fn index(&mut self, index: Box<dyn ReleaseIndex>) -> &mut Self {
        self.index = Some(index);

        self
    }

    /// The token to observe for interrupts. It is handed to the fetcher and the installer as well.
    pub(crate) fn cancel_token(&mut self, cancel: CancelToken) -> &mut Self {
        self.fetcher.cancel_token(cancel.clone());
        self.installer.cancel_token(cancel.clone());
        self.cancel = cancel;

        self
    }

    /// Whether to suppress the status lines.
    pub(crate) fn quiet(&mut self, quiet: bool) -> &mut Self {
        self.quiet = quiet;

        self
    }

    /// Resolves, downloads, installs and verifies the requested version.
    #[instrument(level = "trace", skip(self))]
    pub(crate) fn install(&self, request: &InstallRequest) -> Result<InstallOutcome, Failure> {
        let mut machine = Machine::new(&self.cancel, self.quiet);
        let mut receipt = None;

        match self.run_install(request, &mut machine, &mut receipt) {
            Ok(outcome) => {
                if let Some(receipt) = receipt {
                    receipt.commit();
                }
                machine.finish(Stage::Done);
                Ok(outcome)
            }
            Err(error) => Err(self.fail(&mut machine, error, receipt)),
        }
    }

    // Runs the install stages. The receipt is handed out before anything gets installed, so the caller is able to
    // roll back whatever has been done so far.
    fn run_install(&self, request: &InstallRequest, machine: &mut Machine<'_>, receipt: &mut Option<InstallReceipt>) -> Result<InstallOutcome, PipelineError> {
        // resolve
        machine.advance(Stage::Resolving)?;
        machine.status(format!("Resolving {} for {}", INFO_COLOR.paint(&request.spec), self.platform));
        let Some(index) = self.index.as_deref() else {
            return Err(PipelineError::Resolve(ResolveError::Index(anyhow!("no release index available"))));
        };
        let descriptor = resolver::resolve(index, &request.spec, self.platform).map_err(PipelineError::Resolve)?;
        let root = vars::expand_directory(&request.directory, &descriptor.resolved_version, self.platform).map_err(|source| PipelineError::Directory {
            template: request.directory.clone(),
            source,
        })?;
        machine.status(format!("Resolved {} [{}]", INFO_COLOR.paint(descriptor.resolved_version.to_string()), descriptor.download_url));

        if request.dry_run {
            let not = ATTENTION_COLOR.paint("NOT");
            machine.status(format!("dry-run: {not} installing at {}", paint_path(&root)));
            return Ok(InstallOutcome::DryRun { descriptor, root });
        }

        // fetch
        machine.advance(Stage::Fetching)?;
        let local_path = self.fetcher.fetch(&descriptor).map_err(PipelineError::Fetch)?;
        machine.status(format!("Fetched {}", paint_path(&local_path)));

        // install
        machine.advance(Stage::Installing)?;
        let receipt = receipt.insert(InstallReceipt::new(InstallTarget::new(&root, &request.anchor)));
        self.installer.install(&local_path, &descriptor, receipt).map_err(PipelineError::Install)?;
        machine.status(format!(
            "Installed at {} [{}]",
            paint_path(&root),
            paint_path(self.installer.profile())
        ));

        // verify
        machine.advance(Stage::Verifying)?;
        let verification = self.check(receipt.target(), &descriptor.resolved_version)?;
        machine.status(format!("Verified {}", INFO_COLOR.paint(verification.detected_version.as_deref().unwrap_or_default())));

        // a late interrupt still undoes everything
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        Ok(InstallOutcome::Installed {
            descriptor,
            target: receipt.target().clone(),
            profile_backup: receipt.profile_backup().map(Path::to_path_buf),
            verification,
        })
    }

    /// Verifies an existing installation against the given version or, if none is given, the installed one.
    #[instrument(level = "trace", skip(self))]
    pub(crate) fn verify(&self, dir: &Path, expected: Option<&ReleaseVersion>, anchor: &str) -> Result<VerificationResult, Failure> {
        let mut machine = Machine::new(&self.cancel, self.quiet);

        let result = machine.advance(Stage::Verifying).and_then(|()| {
            let root = path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
            let expected = match expected {
                Some(expected) => expected.clone(),
                None => Metadata::load_from(&root)
                    .map_err(|source| PipelineError::UnknownVersion { root: root.clone(), source })?
                    .version,
            };
            machine.status(format!("Verifying {} [{}]", paint_path(&root), INFO_COLOR.paint(expected.to_string())));
            self.check(&InstallTarget::new(&root, anchor), &expected)
        });

        match result {
            Ok(verification) => {
                machine.status(format!("Verified {}", INFO_COLOR.paint(verification.detected_version.as_deref().unwrap_or_default())));
                machine.finish(Stage::Done);
                Ok(verification)
            }
            Err(error) => Err(self.fail(&mut machine, error, None)),
        }
    }

    // Runs the verifier and turns a mismatch into an error.
    fn check(&self, target: &InstallTarget, expected: &ReleaseVersion) -> Result<VerificationResult, PipelineError> {
        let verification = self.verifier.verify(target, expected).map_err(PipelineError::Verify)?;
        if !verification.success {
            debug!(raw_output = verification.raw_output);
            return Err(PipelineError::Mismatch {
                expected: expected.clone(),
                detected: verification.detected_version,
            });
        }

        Ok(verification)
    }

    // Rolls back the given receipt and ends the run as failed.
    fn fail(&self, machine: &mut Machine<'_>, error: PipelineError, receipt: Option<InstallReceipt>) -> Failure {
        let stage = machine.stage;
        warn!(%stage, %error, "pipeline failed");
        let rollback = match receipt {
            Some(receipt) if !receipt.is_empty() => receipt.rollback(),
            _ => RollbackOutcome::NotNeeded,
        };
        if rollback != RollbackOutcome::NotNeeded {
            info!(%rollback, "rolled back");
        }
        machine.finish(Stage::Failed);

        Failure {
            stage,
            error,
            rollback,
            interrupted: self.cancel.is_cancelled(),
        }
    }
}
