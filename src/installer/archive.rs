//! Archive.
//!
//! This module contains the code to unpack a java package. The single top-level directory every package carries is
//! stripped, so the content of `zulu17.32.13-ca-jdk17.0.2-linux_x64/` ends up directly in the destination.

use super::{InstallError, io_error};
use crate::cancel::CancelToken;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{instrument, trace, warn};

/// Enumeration of supported archive formats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ArchiveKind {
    /// gzip compressed tar
    TarGz,
    /// zip
    Zip,
}

impl ArchiveKind {
    /// Detects the archive format from the file name.
    pub(crate) fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Unpacks the given package into the given (existing) directory.
#[instrument(level = "trace", skip(cancel), err)]
pub(crate) fn unpack(pkg: &Path, kind: ArchiveKind, dest: &Path, cancel: &CancelToken) -> Result<(), InstallError> {
    let pkg_file = File::open(pkg).map_err(io_error(pkg))?;
    match kind {
        ArchiveKind::TarGz => unpack_tar_gz(pkg_file, dest, cancel),
        ArchiveKind::Zip => unpack_zip(pkg_file, dest, cancel),
    }
}

// Returns the destination for the given entry name without its first component. Returns `None` for entries that
// are to be skipped.
fn strip_first_component(name: &Path, is_dir: bool) -> Option<PathBuf> {
    // skip elements without at least two components
    let mut components = name.components();
    if name.components().count() <= 1 {
        if !is_dir {
            warn!(name = %name.display(), "skipping unusual name");
        }
        return None;
    }

    // remove the first component
    components.next();
    Some(components.as_path().to_path_buf())
}

// Returns whether the given entry name consists of plain components only.
fn is_plain(name: &Path) -> bool {
    name.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

// Returns whether the given path, once its existing part is resolved, lies within the given (canonical) root. Only
// the nearest existing ancestor is resolved, anything below it is yet to be created.
fn resolves_within(root: &Path, path: &Path) -> bool {
    path.ancestors()
        .find(|ancestor| ancestor.symlink_metadata().is_ok())
        .and_then(|ancestor| fs::canonicalize(ancestor).ok())
        .is_some_and(|ancestor| ancestor.starts_with(root))
}

// Returns whether a symlink at the given (relative) location pointing to the given target stays within the
// destination.
fn link_stays_within(link: &Path, target: &Path) -> bool {
    let mut depth = link.components().count().saturating_sub(1);
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => depth -= 1,
            _ => return false,
        }
    }

    true
}

// Unpacks a gzip compressed tar.
fn unpack_tar_gz(pkg_file: File, dest: &Path, cancel: &CancelToken) -> Result<(), InstallError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let archive_err = |err: io::Error| InstallError::Archive(err.to_string());
    let root = fs::canonicalize(dest).map_err(io_error(dest))?;

    let mut archive = Archive::new(GzDecoder::new(pkg_file));
    for entry in archive.entries().map_err(archive_err)? {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        let mut entry = entry.map_err(archive_err)?;

        // skip entry with dangerous name
        let Ok(name) = entry.path().map(Cow::into_owned) else {
            let path_bytes = &entry.path_bytes();
            let name = String::from_utf8_lossy(path_bytes);
            warn!(name = %name, "skipping dangerous name");
            continue;
        };
        if !is_plain(&name) {
            warn!(name = %name.display(), "skipping dangerous name");
            continue;
        }

        let entry_type = entry.header().entry_type();
        let is_dir = entry_type.is_dir();
        let Some(relative) = strip_first_component(&name, is_dir) else {
            continue;
        };

        let name = dest.join(&relative);
        trace!("unpacking {name:?}");

        // never write through a link leading out of the destination
        if !resolves_within(&root, name.parent().unwrap_or(dest)) {
            warn!(name = %name.display(), "skipping entry outside of destination");
            continue;
        }

        if is_dir {
            fs::create_dir_all(&name).map_err(io_error(&name))?;
            continue;
        }
        if let Some(p) = name.parent() {
            fs::create_dir_all(p).map_err(io_error(p))?;
        }

        if entry_type.is_symlink() {
            let target = entry.link_name().map_err(archive_err)?.map(Cow::into_owned);
            if !target.as_deref().is_some_and(|target| link_stays_within(&relative, target)) {
                warn!(name = %name.display(), ?target, "skipping link leading out of destination");
                continue;
            }
        } else if entry_type.is_hard_link() {
            // hard links name their source relative to the archive root
            let link = entry.link_name().map_err(archive_err)?.map(Cow::into_owned);
            let source = link
                .filter(|link| is_plain(link))
                .and_then(|link| strip_first_component(&link, false))
                .map(|link| dest.join(link))
                .filter(|source| resolves_within(&root, source));
            let Some(source) = source else {
                warn!(name = %name.display(), "skipping link leading out of destination");
                continue;
            };
            fs::hard_link(&source, &name).map_err(io_error(&name))?;
            continue;
        }

        entry.unpack(&name).map_err(io_error(&name))?;
    }

    Ok(())
}

// Unpacks a zip.
fn unpack_zip(pkg_file: File, dest: &Path, cancel: &CancelToken) -> Result<(), InstallError> {
    let archive_err = |err: zip::result::ZipError| InstallError::Archive(err.to_string());

    let mut zip = zip::ZipArchive::new(pkg_file).map_err(archive_err)?;
    for i in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        let mut file = zip.by_index(i).map_err(archive_err)?;
        let Some(name) = file.enclosed_name() else {
            warn!(name = file.name(), "skipping dangerous name");
            continue;
        };

        let is_dir = file.is_dir();
        let Some(name) = strip_first_component(&name, is_dir) else {
            continue;
        };

        let name = dest.join(name);
        trace!("unpacking {name:?}");

        if is_dir {
            fs::create_dir_all(&name).map_err(io_error(&name))?;
        } else {
            if let Some(p) = name.parent() {
                fs::create_dir_all(p).map_err(io_error(p))?;
            }
            let mut outfile = File::create(&name).map_err(io_error(&name))?;
            io::copy(&mut file, &mut outfile).map_err(io_error(&name))?;

            // keep executables executable
            #[cfg(unix)]
            if let Some(mode) = file.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&name, fs::Permissions::from_mode(mode & 0o777)).map_err(io_error(&name))?;
            }
        }
    }

    Ok(())
}
