//! Shell profile.
//!
//! This module contains the managed block within a shell profile and the code to edit the profile safely.
//!
//! ```sh
//! # BEGIN java-bootstrap managed block
//! export JAVA_HOME="/home/user/.tools/java-17.0.2"
//! case ":${PATH}:" in
//!   *":/home/user/.tools/java-17.0.2/bin:"*) ;;
//!   *) export PATH="/home/user/.tools/java-17.0.2/bin:${PATH}" ;;
//! esac
//! # END java-bootstrap managed block
//! ```

use super::{InstallError, io_error};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, trace, warn};

/// The name of the tool as written into the markers.
pub(crate) const TOOL_NAME: &str = "java-bootstrap";

/// Returns the start marker of the managed block.
pub(crate) fn begin_marker() -> String {
    format!("# BEGIN {TOOL_NAME} managed block")
}

/// Returns the end marker of the managed block.
pub(crate) fn end_marker() -> String {
    format!("# END {TOOL_NAME} managed block")
}

/// The block of a shell profile owned by this tool.
#[derive(Debug, PartialEq)]
pub(crate) struct ProfileBlock {
    body: Vec<String>,
}

impl ProfileBlock {
    /// Creates the block exporting the given anchor variable and prepending the given path entry to `PATH`.
    pub(crate) fn new(anchor: &str, root: &Path, path_entry: &Path) -> Result<Self, InstallError> {
        if !is_valid_var_name(anchor) {
            return Err(InstallError::InvalidAnchor(anchor.to_string()));
        }

        let root = quote(root);
        let path_entry = quote(path_entry);
        let body = vec![
            format!("export {anchor}=\"{root}\""),
            "case \":${PATH}:\" in".to_string(),
            format!("  *\":{path_entry}:\"*) ;;"),
            format!("  *) export PATH=\"{path_entry}:${{PATH}}\" ;;"),
            "esac".to_string(),
        ];

        Ok(Self { body })
    }

    /// Renders the block including its markers.
    pub(crate) fn render(&self) -> String {
        let mut block = begin_marker();
        block.push('\n');
        for line in &self.body {
            block.push_str(line);
            block.push('\n');
        }
        block.push_str(&end_marker());
        block.push('\n');

        block
    }

    /// Returns the given profile content with this block in place of an existing one, or appended.
    pub(crate) fn apply_to(&self, content: &str) -> Result<String, String> {
        let begin = begin_marker();
        let end = end_marker();
        let mut result = String::with_capacity(content.len() + 256);
        let mut replaced = false;
        let mut inside = false;

        for line in content.split_inclusive('\n') {
            let marker = line.trim();
            if inside {
                if marker == end {
                    inside = false;
                } else if marker == begin {
                    return Err("nested start marker".to_string());
                }
                continue;
            }
            if marker == begin {
                inside = true;
                // collapse duplicates into the first block
                if !replaced {
                    result.push_str(&self.render());
                    replaced = true;
                }
                continue;
            }
            if marker == end {
                return Err("end marker without start marker".to_string());
            }
            result.push_str(line);
        }

        if inside {
            return Err("start marker without end marker".to_string());
        }

        if !replaced {
            if !result.is_empty() {
                if !result.ends_with('\n') {
                    result.push('\n');
                }
                result.push('\n');
            }
            result.push_str(&self.render());
        }

        Ok(result)
    }
}

// Whether the given name is a valid shell variable name.
fn is_valid_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_ascii_alphabetic() || first == '_') && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// Escapes the given path to be used within double quotes.
fn quote(path: &Path) -> String {
    path.display() //
        .to_string()
        .replace('\\', "\\\\")
        .replace('$', "\\$")
        .replace('`', "\\`")
        .replace('"', "\\\"")
}

/// What the profile looked like before it was edited.
#[derive(Debug)]
pub(crate) struct ProfileChange {
    path: PathBuf,
    original: Option<Vec<u8>>,
    backup: Option<PathBuf>,
}

impl ProfileChange {
    /// Returns the path of the saved copy of the original profile, if there was one.
    pub(crate) fn backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Restores the profile to its original content (or removes it, if it did not exist).
    #[instrument(level = "trace", skip(self), fields(profile = %self.path.display()), err)]
    pub(crate) fn restore(&self) -> io::Result<()> {
        let Some(ref original) = self.original else {
            debug!("removing created profile");
            return match fs::remove_file(&self.path) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                result => result,
            };
        };

        let mut file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&self.path)?;
        file.lock_exclusive()?;
        let result = overwrite(&mut file, original);
        if let Err(err) = FileExt::unlock(&file) {
            warn!(?err, "failed to release profile lock");
        }

        result
    }

    // Undoes the change through the given handle, which holds the profile lock already. A profile that did not exist
    // before is removed again.
    fn revert_locked(&self, file: &mut File) -> io::Result<()> {
        match self.original {
            Some(ref original) => overwrite(file, original),
            None => fs::remove_file(&self.path),
        }
    }
}

/// Returns the path the original profile is saved to before it gets edited.
pub(crate) fn backup_path(profile: &Path) -> PathBuf {
    let mut name = profile.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(TOOL_NAME);
    name.push(".bak");
    profile.with_file_name(name)
}

/// Writes the given block into the given profile. Returns `None` if the profile already contained exactly this
/// block.
///
/// The profile is locked exclusively for the whole read-modify-write cycle and the original content is saved next to
/// it before it gets rewritten.
#[instrument(level = "trace", skip(block), err)]
pub(crate) fn apply(profile: &Path, block: &ProfileBlock) -> Result<Option<ProfileChange>, InstallError> {
    if let Some(parent) = profile.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let existed = profile.exists();
    let mut file = OpenOptions::new() //
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(profile)
        .map_err(io_error(profile))?;
    trace!("acquiring profile lock");
    file.lock_exclusive().map_err(io_error(profile))?;

    let result = apply_locked(profile, &mut file, existed, block);
    if let Err(err) = FileExt::unlock(&file) {
        warn!(?err, "failed to release profile lock");
    }

    result
}

// Writes the given block into the given (already locked) profile.
fn apply_locked(profile: &Path, file: &mut File, existed: bool, block: &ProfileBlock) -> Result<Option<ProfileChange>, InstallError> {
    let mut original = Vec::new();
    file.read_to_end(&mut original).map_err(io_error(profile))?;
    let content = String::from_utf8(original.clone()).map_err(|_| InstallError::Profile {
        path: profile.to_path_buf(),
        reason: "not valid UTF-8".to_string(),
    })?;

    let updated = block.apply_to(&content).map_err(|reason| InstallError::Profile {
        path: profile.to_path_buf(),
        reason,
    })?;
    if updated == content && existed {
        debug!(profile = %profile.display(), "profile already up to date");
        return Ok(None);
    }

    // save the original before touching anything
    let backup = if existed {
        let backup = backup_path(profile);
        fs::write(&backup, &original).map_err(io_error(&backup))?;
        debug!(backup = %backup.display(), "saved profile");
        Some(backup)
    } else {
        None
    };
    let change = ProfileChange {
        path: profile.to_path_buf(),
        original: existed.then_some(original),
        backup,
    };

    if let Err(err) = overwrite(file, updated.as_bytes()) {
        // the lock is still held, so revert through the same handle
        if let Err(restore_err) = change.revert_locked(file) {
            warn!(?restore_err, "failed to restore profile");
        }
        return Err(io_error(profile)(err));
    }

    Ok(Some(change))
}

// Replaces the whole content of the given file.
fn overwrite(file: &mut File, content: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {

    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;
    use test_log::test;

    fn block() -> ProfileBlock {
        ProfileBlock::new("JAVA_HOME", Path::new("/opt/java-17.0.2"), Path::new("/opt/java-17.0.2/bin")).unwrap()
    }

    #[test]
    fn render() {
        let expected = "\
# BEGIN java-bootstrap managed block
export JAVA_HOME=\"/opt/java-17.0.2\"
case \":${PATH}:\" in
  *\":/opt/java-17.0.2/bin:\"*) ;;
  *) export PATH=\"/opt/java-17.0.2/bin:${PATH}\" ;;
esac
# END java-bootstrap managed block
";
        assert_eq!(block().render(), expected);
    }

    #[test]
    fn quotes_special_characters() {
        let block = ProfileBlock::new("TOOL_HOME", Path::new("/opt/$x \"y\""), Path::new("/opt/$x \"y\"/bin")).unwrap();
        assert!(block.render().contains("export TOOL_HOME=\"/opt/\\$x \\\"y\\\"\""));
    }

    #[test]
    fn invalid_anchor() {
        for anchor in ["", "1ABC", "JAVA-HOME", "A B", "X;rm"] {
            let err = ProfileBlock::new(anchor, Path::new("/opt"), Path::new("/opt/bin")).unwrap_err();
            assert!(matches!(err, InstallError::InvalidAnchor(_)), "{anchor}");
        }
    }

    #[test]
    fn append_to_empty() {
        assert_eq!(block().apply_to("").unwrap(), block().render());
    }

    #[test]
    fn append_keeps_content_and_separates() {
        let updated = block().apply_to("alias ll='ls -l'").unwrap();
        assert!(updated.starts_with("alias ll='ls -l'\n\n# BEGIN"));
    }

    #[test]
    fn replace_in_place() {
        let old = ProfileBlock::new("JAVA_HOME", Path::new("/opt/java-11"), Path::new("/opt/java-11/bin")).unwrap();
        let content = format!("before\n{}after\n", old.render());
        let updated = block().apply_to(&content).unwrap();
        assert_eq!(updated, format!("before\n{}after\n", block().render()));
    }

    #[test]
    fn apply_is_idempotent() {
        let once = block().apply_to("export EDITOR=vi\n").unwrap();
        let twice = block().apply_to(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.matches(&begin_marker()).count(), 1);
    }

    #[test]
    fn duplicates_are_collapsed() {
        let content = format!("a\n{0}b\n{0}c\n", block().render());
        let updated = block().apply_to(&content).unwrap();
        assert_eq!(updated, format!("a\n{}b\nc\n", block().render()));
    }

    #[test]
    fn malformed_blocks() {
        assert!(block().apply_to(&format!("{}\nexport X=1\n", begin_marker())).is_err());
        assert!(block().apply_to(&format!("export X=1\n{}\n", end_marker())).is_err());
    }

    #[test]
    fn apply_and_restore_existing_profile() {
        let tempdir = tempdir().unwrap();
        let profile = tempdir.path().join(".bashrc");
        fs::write(&profile, "export EDITOR=vi\n").unwrap();

        let change = apply(&profile, &block()).unwrap().unwrap();
        let content = fs::read_to_string(&profile).unwrap();
        assert!(content.starts_with("export EDITOR=vi\n\n# BEGIN java-bootstrap managed block\n"));
        assert_eq!(change.backup(), Some(backup_path(&profile).as_path()));
        assert_eq!(fs::read_to_string(backup_path(&profile)).unwrap(), "export EDITOR=vi\n");

        change.restore().unwrap();
        assert_eq!(fs::read_to_string(&profile).unwrap(), "export EDITOR=vi\n");
    }

    #[test]
    fn apply_unchanged_profile_writes_nothing() {
        let tempdir = tempdir().unwrap();
        let profile = tempdir.path().join(".zshrc");
        fs::write(&profile, block().render()).unwrap();

        assert!(apply(&profile, &block()).unwrap().is_none());
        assert!(!backup_path(&profile).exists());
    }

    #[test]
    fn apply_and_restore_missing_profile() {
        let tempdir = tempdir().unwrap();
        let profile = tempdir.path().join("nested").join(".profile");

        let change = apply(&profile, &block()).unwrap().unwrap();
        assert_eq!(fs::read_to_string(&profile).unwrap(), block().render());
        assert!(change.backup().is_none());

        change.restore().unwrap();
        assert!(!profile.exists());
    }

    #[test]
    fn backup_path_next_to_profile() {
        assert_eq!(backup_path(Path::new("/home/u/.bashrc")), Path::new("/home/u/.bashrc.java-bootstrap.bak"));
    }

    #[test]
    fn apply_waits_for_profile_lock() {
        let tempdir = tempdir().unwrap();
        let profile = tempdir.path().join(".bashrc");
        fs::write(&profile, "export EDITOR=vi\n").unwrap();

        // another editor holds the lock and appends a line before releasing it
        let mut holder = OpenOptions::new().append(true).open(&profile).unwrap();
        holder.lock_exclusive().unwrap();

        let worker = {
            let profile = profile.clone();
            thread::spawn(move || apply(&profile, &block()))
        };
        thread::sleep(Duration::from_millis(300));
        assert!(!worker.is_finished());

        holder.write_all(b"export PAGER=less\n").unwrap();
        FileExt::unlock(&holder).unwrap();

        let change = worker.join().unwrap().unwrap();
        assert!(change.is_some());
        let content = fs::read_to_string(&profile).unwrap();
        assert!(content.starts_with("export EDITOR=vi\nexport PAGER=less\n\n# BEGIN"), "{content}");
        assert_eq!(content.matches(&begin_marker()).count(), 1);
    }

    #[test]
    fn failed_write_removes_created_profile() {
        let tempdir = tempdir().unwrap();
        let profile = tempdir.path().join(".profile");
        fs::write(&profile, "").unwrap();

        // a read-only handle lets the write fail
        let mut file = File::open(&profile).unwrap();
        let err = apply_locked(&profile, &mut file, false, &block()).unwrap_err();
        assert!(matches!(err, InstallError::Io(_)), "{err:?}");
        assert!(!profile.exists());
        assert!(!backup_path(&profile).exists());
    }
}
