//! Installer.
//!
//! This module contains the code to materialise a downloaded java package at its installation directory and to wire
//! it into the shell profile.
//!
//! The package is unpacked into a temporary sibling of the installation directory and only renamed into place once
//! it looks like a java installation, so the installation directory never holds a half unpacked tree. Every change is
//! recorded in an [InstallReceipt] which is able to undo it again.

mod archive;
mod profile;

use self::archive::ArchiveKind;
use self::profile::{ProfileBlock, ProfileChange};

#[cfg(test)]
pub(crate) use self::profile::{backup_path, begin_marker};

use crate::cancel::CancelToken;
use crate::meta::Metadata;
use crate::platform::Platform;
use crate::resolver::ArtifactDescriptor;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, trace, warn};

// Prefix of the temporary directory the package is unpacked to.
#[doc(hidden)]
const STAGING_PREFIX: &str = ".java-bootstrap-";

// Suffix of the directory an existing installation is moved to while it gets replaced.
#[doc(hidden)]
const PREVIOUS_SUFFIX: &str = "previous";

/// The error type for installing a java package.
#[derive(Debug, thiserror::Error)]
pub(crate) enum InstallError {
    /// A file or directory is not writable.
    #[error("permission denied for {}", path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The package is neither a `.tar.gz`/`.tgz` nor a `.zip`.
    #[error("unsupported archive format of {}", .0.display())]
    UnsupportedArchive(PathBuf),
    /// The unpacked package does not contain a java executable.
    #[error("package for {} does not contain a java executable", .0.display())]
    InvalidLayout(PathBuf),
    /// The name of the anchor variable is not a valid shell variable name.
    #[error("invalid variable name '{0}'")]
    InvalidAnchor(String),
    /// The managed block within the shell profile cannot be updated.
    #[error("cannot update profile {}: {reason}", path.display())]
    Profile { path: PathBuf, reason: String },
    /// The package cannot be unpacked.
    #[error("corrupt archive: {0}")]
    Archive(String),
    /// The installation metadata cannot be written.
    #[error("failed to write installation metadata")]
    Metadata(#[source] anyhow::Error),
    /// The user interrupted the installation.
    #[error("installation cancelled")]
    Cancelled,
    /// Local I/O failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Returns a function mapping an I/O error on the given path into an [InstallError].
pub(super) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> InstallError + '_ {
    move |err| match err.kind() {
        io::ErrorKind::PermissionDenied => InstallError::Permission {
            path: path.to_path_buf(),
            source: err,
        },
        _ => InstallError::Io(err),
    }
}

/// Where a java package gets installed and how it is announced to the shell.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct InstallTarget {
    root_directory: PathBuf,
    env_anchor_name: String,
    path_entry: PathBuf,
}

impl InstallTarget {
    /// Creates a new `InstallTarget`. The path entry is the `bin` directory below the given root.
    pub(crate) fn new(root_directory: impl Into<PathBuf>, env_anchor_name: impl Into<String>) -> Self {
        let root_directory = root_directory.into();
        let path_entry = root_directory.join("bin");

        Self {
            root_directory,
            env_anchor_name: env_anchor_name.into(),
            path_entry,
        }
    }

    pub(crate) fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub(crate) fn env_anchor_name(&self) -> &str {
        &self.env_anchor_name
    }

    pub(crate) fn path_entry(&self) -> &Path {
        &self.path_entry
    }

    /// Returns the path of the java executable of this installation.
    pub(crate) fn java_exe(&self, platform: Platform) -> PathBuf {
        self.path_entry.join(platform.java_exe())
    }

    /// Returns the variables a process needs to see this installation without re-reading the shell profile: the
    /// anchor variable and `PATH` with the path entry in front.
    pub(crate) fn environment(&self) -> Vec<(OsString, OsString)> {
        let current = env::var_os("PATH").unwrap_or_default();
        let paths = std::iter::once(self.path_entry.clone()) //
            .chain(env::split_paths(&current).filter(|path| path != &self.path_entry));
        let path = match env::join_paths(paths) {
            Ok(path) => path,
            Err(err) => {
                warn!(?err, "cannot extend PATH");
                self.path_entry.clone().into_os_string()
            }
        };

        vec![
            (OsString::from(&self.env_anchor_name), self.root_directory.clone().into_os_string()),
            (OsString::from("PATH"), path),
        ]
    }
}

/// The outcome of undoing an installation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum RollbackOutcome {
    /// Nothing had been changed.
    NotNeeded,
    /// Every change has been undone.
    Succeeded,
    /// Some changes could not be undone.
    Partial,
    /// No change could be undone.
    Failed,
}

impl std::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let outcome = match self {
            Self::NotNeeded => "not needed",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        };
        f.write_str(outcome)
    }
}

/// Record of the changes an installation made.
#[derive(Debug)]
pub(crate) struct InstallReceipt {
    target: InstallTarget,
    created_root: bool,
    previous_root: Option<PathBuf>,
    profile_change: Option<ProfileChange>,
}

impl InstallReceipt {
    /// Creates an empty `InstallReceipt` for the given target.
    pub(crate) fn new(target: InstallTarget) -> Self {
        Self {
            target,
            created_root: false,
            previous_root: None,
            profile_change: None,
        }
    }

    pub(crate) fn target(&self) -> &InstallTarget {
        &self.target
    }

    /// Returns the saved copy of the shell profile, if the profile has been changed.
    pub(crate) fn profile_backup(&self) -> Option<&Path> {
        self.profile_change.as_ref().and_then(ProfileChange::backup)
    }

    /// Whether the installation changed anything at all.
    pub(crate) fn is_empty(&self) -> bool {
        !self.created_root && self.previous_root.is_none() && self.profile_change.is_none()
    }

    /// Accepts the installation and drops the replaced installation (if any).
    #[instrument(level = "trace", skip(self))]
    pub(crate) fn commit(self) {
        if let Some(previous) = self.previous_root {
            trace!(previous = %previous.display(), "removing replaced installation");
            if let Err(err) = fs::remove_dir_all(&previous) {
                warn!(?err, previous = %previous.display(), "failed to remove replaced installation");
            }
        }
    }

    /// Undoes every recorded change: restores the shell profile, removes the installation directory and puts a
    /// replaced installation back.
    #[instrument(level = "trace", skip(self), ret)]
    pub(crate) fn rollback(self) -> RollbackOutcome {
        let mut attempted = 0;
        let mut failed = 0;

        if let Some(change) = &self.profile_change {
            attempted += 1;
            if let Err(err) = change.restore() {
                warn!(?err, "failed to restore profile");
                failed += 1;
            }
        }

        let root = self.target.root_directory();
        if self.created_root {
            attempted += 1;
            debug!(root = %root.display(), "removing installation");
            if let Err(err) = fs::remove_dir_all(root) {
                warn!(?err, root = %root.display(), "failed to remove installation");
                failed += 1;
            }
        }

        if let Some(previous) = &self.previous_root {
            attempted += 1;
            debug!(previous = %previous.display(), "restoring replaced installation");
            if let Err(err) = fs::rename(previous, root) {
                warn!(?err, previous = %previous.display(), "failed to restore replaced installation");
                failed += 1;
            }
        }

        match (attempted, failed) {
            (0, _) => RollbackOutcome::NotNeeded,
            (_, 0) => RollbackOutcome::Succeeded,
            (a, f) if a == f => RollbackOutcome::Failed,
            _ => RollbackOutcome::Partial,
        }
    }
}

/// Installs java packages and wires them into a shell profile.
#[derive(Debug)]
pub(crate) struct Installer {
    cancel: CancelToken,
    platform: Platform,
    profile: PathBuf,
}

impl Installer {
    /// Creates a new `Installer` editing the given shell profile.
    pub(crate) fn new(profile: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            cancel: CancelToken::default(),
            platform,
            profile: profile.into(),
        }
    }

    /// The token to observe for interrupts.
    pub(crate) fn cancel_token(&mut self, cancel: CancelToken) -> &mut Self {
        self.cancel = cancel;

        self
    }

    pub(crate) fn profile(&self) -> &Path {
        &self.profile
    }

    /// Installs the given package at the target of the given receipt and updates the shell profile. Every change is
    /// recorded in the receipt, also when an error is returned.
    #[instrument(level = "trace", skip(self, descriptor, receipt), fields(root = %receipt.target.root_directory.display()), err)]
    pub(crate) fn install(&self, local_path: &Path, descriptor: &ArtifactDescriptor, receipt: &mut InstallReceipt) -> Result<(), InstallError> {
        let kind = ArchiveKind::detect(local_path).ok_or_else(|| InstallError::UnsupportedArchive(local_path.to_path_buf()))?;
        let target = receipt.target.clone();
        let block = ProfileBlock::new(target.env_anchor_name(), target.root_directory(), target.path_entry())?;

        if self.is_installed(&target, descriptor) {
            debug!(root = %target.root_directory().display(), "package already installed");
        } else {
            self.replace_root(local_path, kind, &target, descriptor, receipt)?;
        }

        self.check_cancelled()?;
        receipt.profile_change = profile::apply(&self.profile, &block)?;

        Ok(())
    }

    // Whether the target already holds exactly the given package.
    fn is_installed(&self, target: &InstallTarget, descriptor: &ArtifactDescriptor) -> bool {
        let Ok(metadata) = Metadata::load_from(target.root_directory()) else {
            return false;
        };

        crate::checksum::same(&metadata.checksum, &descriptor.checksum)
            && metadata.version == descriptor.resolved_version
            && target.java_exe(self.platform).is_file()
    }

    // Unpacks the package next to the target and swaps it into place.
    fn replace_root(
        &self,
        local_path: &Path,
        kind: ArchiveKind,
        target: &InstallTarget,
        descriptor: &ArtifactDescriptor,
        receipt: &mut InstallReceipt,
    ) -> Result<(), InstallError> {
        let root = target.root_directory();
        let parent = match root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(io_error(parent))?;

        // unpack into a sibling, so the final rename stays on the same file system
        let staging = tempfile::Builder::new() //
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(io_error(parent))?;
        trace!(staging = %staging.path().display());
        archive::unpack(local_path, kind, staging.path(), &self.cancel)?;
        self.check_cancelled()?;

        if !staging.path().join("bin").join(self.platform.java_exe()).is_file() {
            return Err(InstallError::InvalidLayout(local_path.to_path_buf()));
        }
        let metadata = Metadata::new(descriptor.resolved_version.clone(), &descriptor.checksum, &descriptor.download_url);
        metadata.save_to(staging.path()).map_err(InstallError::Metadata)?;

        // temporary directories are private, installations are not
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staging.path(), fs::Permissions::from_mode(0o755)).map_err(io_error(staging.path()))?;
        }

        // move an existing installation aside
        if root.exists() {
            let previous = previous_path(root);
            if previous.exists() {
                fs::remove_dir_all(&previous).map_err(io_error(&previous))?;
            }
            debug!(previous = %previous.display(), "moving existing installation aside");
            fs::rename(root, &previous).map_err(io_error(root))?;
            receipt.previous_root = Some(previous);
        }

        let staged = staging.keep();
        if let Err(err) = fs::rename(&staged, root) {
            if let Err(remove_err) = fs::remove_dir_all(&staged) {
                warn!(?remove_err, staged = %staged.display(), "failed to remove unpacked package");
            }
            return Err(io_error(root)(err));
        }
        receipt.created_root = true;
        debug!(root = %root.display(), "installed package");

        Ok(())
    }

    // Fails if the user interrupted the program.
    fn check_cancelled(&self) -> Result<(), InstallError> {
        if self.cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        Ok(())
    }
}

// Returns the path an existing installation is moved to while it gets replaced.
fn previous_path(root: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(root.file_name().unwrap_or_default());
    name.push(".");
    name.push(PREVIOUS_SUFFIX);
    root.with_file_name(name)
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::platform::{Arch, Os};
    use crate::testing::{build_fake_jdk, build_tar_gz};
    use tempfile::tempdir;
    use test_log::test;

    const PLATFORM: Platform = Platform::new(Os::Linux, Arch::X86_64);

    fn descriptor(version: &str, checksum: &str) -> ArtifactDescriptor {
        ArtifactDescriptor {
            requested_version: version.to_string(),
            resolved_version: version.parse().unwrap(),
            download_url: format!("https://example.org/jdk-{version}.tar.gz"),
            checksum: checksum.to_string(),
            file_name: format!("jdk-{version}.tar.gz"),
            platform: PLATFORM,
        }
    }

    #[test]
    fn io_error_maps_permission_denied() {
        let err = io_error(Path::new("/opt"))(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, InstallError::Permission { ref path, .. } if path == Path::new("/opt")));
        let err = io_error(Path::new("/opt"))(io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, InstallError::Io(_)));
    }

    #[test]
    fn target_paths() {
        let target = InstallTarget::new("/opt/java-17.0.2", "TOOL_HOME");
        assert_eq!(target.path_entry(), Path::new("/opt/java-17.0.2/bin"));
        assert_eq!(target.java_exe(PLATFORM), Path::new("/opt/java-17.0.2/bin/java"));
        assert_eq!(target.env_anchor_name(), "TOOL_HOME");
    }

    #[test]
    fn environment_prepends_path_entry_once() {
        let target = InstallTarget::new("/opt/java-17.0.2", "TOOL_HOME");
        let environment = target.environment();
        assert_eq!(environment[0], (OsString::from("TOOL_HOME"), OsString::from("/opt/java-17.0.2")));
        let path = &environment[1].1;
        let paths: Vec<PathBuf> = env::split_paths(path).collect();
        assert_eq!(paths[0], Path::new("/opt/java-17.0.2/bin"));
        assert_eq!(paths.iter().filter(|p| *p == Path::new("/opt/java-17.0.2/bin")).count(), 1);
    }

    #[test]
    fn previous_path_is_hidden_sibling() {
        assert_eq!(previous_path(Path::new("/opt/java-17")), Path::new("/opt/.java-17.previous"));
    }

    #[test]
    fn install_and_rollback() {
        let tempdir = tempdir().unwrap();
        let pkg = tempdir.path().join("jdk-17.0.2.tar.gz");
        build_fake_jdk(&pkg, "17.0.2", "JAVA_HOME");
        let profile = tempdir.path().join(".bashrc");
        fs::write(&profile, "export EDITOR=vi\n").unwrap();
        let root = tempdir.path().join("tools").join("java-17.0.2");

        let installer = Installer::new(&profile, PLATFORM);
        let mut receipt = InstallReceipt::new(InstallTarget::new(&root, "TOOL_HOME"));
        installer.install(&pkg, &descriptor("17.0.2", "abc"), &mut receipt).unwrap();

        assert!(root.join("bin").join("java").is_file());
        assert!(root.join("release").is_file());
        assert_eq!(Metadata::load_from(&root).unwrap().checksum, "abc");
        let content = fs::read_to_string(&profile).unwrap();
        assert!(content.contains(&format!("export TOOL_HOME=\"{}\"", root.display())));
        assert_eq!(receipt.profile_backup(), Some(backup_path(&profile).as_path()));

        // no left-overs of the staging directory
        let siblings: Vec<_> = fs::read_dir(root.parent().unwrap()).unwrap().collect();
        assert_eq!(siblings.len(), 1);

        assert_eq!(receipt.rollback(), RollbackOutcome::Succeeded);
        assert!(!root.exists());
        assert_eq!(fs::read_to_string(&profile).unwrap(), "export EDITOR=vi\n");
    }

    #[test]
    fn reinstall_is_idempotent() {
        let tempdir = tempdir().unwrap();
        let pkg = tempdir.path().join("jdk-17.0.2.tar.gz");
        build_fake_jdk(&pkg, "17.0.2", "JAVA_HOME");
        let profile = tempdir.path().join(".zshrc");
        let root = tempdir.path().join("java-17.0.2");
        let installer = Installer::new(&profile, PLATFORM);

        let mut receipt = InstallReceipt::new(InstallTarget::new(&root, "JAVA_HOME"));
        installer.install(&pkg, &descriptor("17.0.2", "abc"), &mut receipt).unwrap();
        receipt.commit();
        let profile_once = fs::read(&profile).unwrap();
        let meta_once = fs::read(Metadata::path_in(&root)).unwrap();

        let mut receipt = InstallReceipt::new(InstallTarget::new(&root, "JAVA_HOME"));
        installer.install(&pkg, &descriptor("17.0.2", "abc"), &mut receipt).unwrap();
        assert!(receipt.is_empty());
        assert_eq!(receipt.rollback(), RollbackOutcome::NotNeeded);
        assert_eq!(fs::read(&profile).unwrap(), profile_once);
        assert_eq!(fs::read(Metadata::path_in(&root)).unwrap(), meta_once);
    }

    #[test]
    fn replaced_installation_is_restored_on_rollback() {
        let tempdir = tempdir().unwrap();
        let profile = tempdir.path().join(".profile");
        let root = tempdir.path().join("java-17");
        let installer = Installer::new(&profile, PLATFORM);

        let old_pkg = tempdir.path().join("jdk-17.0.1.tar.gz");
        build_fake_jdk(&old_pkg, "17.0.1", "JAVA_HOME");
        let mut receipt = InstallReceipt::new(InstallTarget::new(&root, "JAVA_HOME"));
        installer.install(&old_pkg, &descriptor("17.0.1", "old"), &mut receipt).unwrap();
        receipt.commit();

        let new_pkg = tempdir.path().join("jdk-17.0.2.tar.gz");
        build_fake_jdk(&new_pkg, "17.0.2", "JAVA_HOME");
        let mut receipt = InstallReceipt::new(InstallTarget::new(&root, "JAVA_HOME"));
        installer.install(&new_pkg, &descriptor("17.0.2", "new"), &mut receipt).unwrap();
        assert_eq!(Metadata::load_from(&root).unwrap().checksum, "new");
        assert!(previous_path(&root).exists());

        assert_eq!(receipt.rollback(), RollbackOutcome::Succeeded);
        assert_eq!(Metadata::load_from(&root).unwrap().checksum, "old");
        assert!(!previous_path(&root).exists());
    }

    #[test]
    fn commit_drops_replaced_installation() {
        let tempdir = tempdir().unwrap();
        let profile = tempdir.path().join(".profile");
        let root = tempdir.path().join("java-17");
        let installer = Installer::new(&profile, PLATFORM);

        for (version, checksum) in [("17.0.1", "old"), ("17.0.2", "new")] {
            let pkg = tempdir.path().join(format!("jdk-{version}.tar.gz"));
            build_fake_jdk(&pkg, version, "JAVA_HOME");
            let mut receipt = InstallReceipt::new(InstallTarget::new(&root, "JAVA_HOME"));
            installer.install(&pkg, &descriptor(version, checksum), &mut receipt).unwrap();
            receipt.commit();
        }

        assert_eq!(Metadata::load_from(&root).unwrap().checksum, "new");
        assert!(!previous_path(&root).exists());
    }

    #[test]
    fn unsupported_archive() {
        let tempdir = tempdir().unwrap();
        let pkg = tempdir.path().join("jdk-17.0.2.msi");
        fs::write(&pkg, b"msi").unwrap();
        let installer = Installer::new(tempdir.path().join(".profile"), PLATFORM);
        let mut receipt = InstallReceipt::new(InstallTarget::new(tempdir.path().join("java"), "JAVA_HOME"));

        let err = installer.install(&pkg, &descriptor("17.0.2", "abc"), &mut receipt).unwrap_err();
        assert!(matches!(err, InstallError::UnsupportedArchive(_)));
        assert!(receipt.is_empty());
        assert!(!tempdir.path().join("java").exists());
        assert!(!tempdir.path().join(".profile").exists());
    }

    #[test]
    fn package_without_java_is_rejected() {
        let tempdir = tempdir().unwrap();
        let pkg = tempdir.path().join("docs.tar.gz");
        build_tar_gz(&pkg, "docs", &[("index.html", 0o644, "<html/>")]);
        let installer = Installer::new(tempdir.path().join(".profile"), PLATFORM);
        let root = tempdir.path().join("tools").join("java");
        let mut receipt = InstallReceipt::new(InstallTarget::new(&root, "JAVA_HOME"));

        let err = installer.install(&pkg, &descriptor("17.0.2", "abc"), &mut receipt).unwrap_err();
        assert!(matches!(err, InstallError::InvalidLayout(_)));
        assert!(receipt.is_empty());
        assert_eq!(fs::read_dir(tempdir.path().join("tools")).unwrap().count(), 0);
    }

    #[test]
    fn invalid_anchor_changes_nothing() {
        let tempdir = tempdir().unwrap();
        let pkg = tempdir.path().join("jdk-17.0.2.tar.gz");
        build_fake_jdk(&pkg, "17.0.2", "JAVA_HOME");
        let installer = Installer::new(tempdir.path().join(".profile"), PLATFORM);
        let root = tempdir.path().join("java");
        let mut receipt = InstallReceipt::new(InstallTarget::new(&root, "TOOL-HOME"));

        let err = installer.install(&pkg, &descriptor("17.0.2", "abc"), &mut receipt).unwrap_err();
        assert!(matches!(err, InstallError::InvalidAnchor(_)));
        assert!(!root.exists());
    }

    #[test]
    fn cancelled_before_profile_edit() {
        let tempdir = tempdir().unwrap();
        let pkg = tempdir.path().join("jdk-17.0.2.tar.gz");
        build_fake_jdk(&pkg, "17.0.2", "JAVA_HOME");
        let profile = tempdir.path().join(".profile");
        let cancel = CancelToken::default();
        cancel.cancel();
        let mut installer = Installer::new(&profile, PLATFORM);
        installer.cancel_token(cancel);
        let root = tempdir.path().join("java");
        let mut receipt = InstallReceipt::new(InstallTarget::new(&root, "JAVA_HOME"));

        let err = installer.install(&pkg, &descriptor("17.0.2", "abc"), &mut receipt).unwrap_err();
        assert!(matches!(err, InstallError::Cancelled));
        assert_eq!(receipt.rollback(), RollbackOutcome::NotNeeded);
        assert!(!root.exists());
        assert!(!profile.exists());
    }
}
