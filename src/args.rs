//! Arguments.
//!
//! This module contains the definition for the available command-line parameter.

use crate::release::ReleaseVersion;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(author, about)]
pub(crate) struct Args {
    /// Sets a custom config file
    #[clap(short, long, value_name = "file", global = true)]
    pub(crate) config: Option<PathBuf>,
    /// Sets the cache directory for downloaded packages
    #[clap(long, value_name = "dir", env = "JAVA_BOOTSTRAP_CACHE", global = true)]
    pub(crate) cache: Option<PathBuf>,
    /// Sets the shell profile to edit
    #[clap(long, value_name = "file", env = "JAVA_BOOTSTRAP_PROFILE", global = true)]
    pub(crate) profile: Option<PathBuf>,
    /// Suppress unnecessary information
    #[clap(short = 'q', long, action, global = true)]
    pub(crate) quiet: bool,
    /// Change level of verbosity (apply multiple times to increase level)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    /// Print version information
    #[clap(short = 'V', long, action)]
    pub(crate) version: bool,
    #[clap(subcommand)]
    pub(crate) command: Option<Command>,
}

/// The available commands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Resolve, download, install and verify a java runtime
    Install(InstallArgs),
    /// Verify an existing installation
    Verify(VerifyArgs),
}

#[derive(Debug, clap::Args)]
pub(crate) struct InstallArgs {
    /// The version to install (`latest`, `17`, `11.0.2`, ...)
    #[clap(long, value_name = "spec")]
    pub(crate) version: Option<String>,
    /// The installation directory (may contain `${version}`, `${major}`, `${os}`, `${arch}` and `${env.NAME}`)
    #[clap(short, long, value_name = "path")]
    pub(crate) dir: Option<String>,
    /// Only resolve the version, change nothing
    #[clap(short = 'n', long, action)]
    pub(crate) dry_run: bool,
    /// Use a local release index instead of the vendor API
    #[clap(long, value_name = "file")]
    pub(crate) index: Option<PathBuf>,
    /// The variable to point at the installation
    #[clap(long, value_name = "NAME")]
    pub(crate) anchor: Option<String>,
    /// The package type
    #[clap(long = "package-type", value_name = "type", value_parser = ["jdk", "jre"])]
    pub(crate) package_type: Option<String>,
}

#[derive(Debug, clap::Args)]
pub(crate) struct VerifyArgs {
    /// The installation directory
    #[clap(short, long, value_name = "path")]
    pub(crate) dir: PathBuf,
    /// The expected version (defaults to the installed one)
    #[clap(long, value_name = "version")]
    pub(crate) expect: Option<ReleaseVersion>,
    /// The variable to point at the installation
    #[clap(long, value_name = "NAME")]
    pub(crate) anchor: Option<String>,
}

#[cfg(test)]
mod tests {

    use super::*;
    use test_log::test;

    #[test]
    fn no_args() {
        let args = Args::try_parse_from(["program"]).unwrap();
        assert_eq!(args.config, None);
        assert!(args.command.is_none());
    }

    #[test]
    fn config_without_file() {
        let args = Args::try_parse_from(["program", "--config"]);
        assert!(args.is_err());
    }

    #[test]
    fn config_with_file() {
        let args = Args::try_parse_from(["program", "--config", "file"]).unwrap();
        assert_eq!(args.config, Some("file".into()));
    }

    #[test]
    fn install() {
        let args = Args::try_parse_from(["program", "-vv", "install", "--version", "17", "--dir", "/opt/java", "--dry-run", "--anchor", "TOOL_HOME"]).unwrap();
        assert_eq!(args.verbose, 2);
        let Some(Command::Install(install)) = args.command else {
            panic!("not an install command");
        };
        assert_eq!(install.version.as_deref(), Some("17"));
        assert_eq!(install.dir.as_deref(), Some("/opt/java"));
        assert!(install.dry_run);
        assert_eq!(install.anchor.as_deref(), Some("TOOL_HOME"));
    }

    #[test]
    fn global_flags_after_command() {
        let args = Args::try_parse_from(["program", "install", "--version", "latest", "-q", "--profile", "/tmp/profile"]).unwrap();
        assert!(args.quiet);
        assert_eq!(args.profile, Some("/tmp/profile".into()));
    }

    #[test]
    fn package_type_is_checked() {
        assert!(Args::try_parse_from(["program", "install", "--package-type", "jre"]).is_ok());
        assert!(Args::try_parse_from(["program", "install", "--package-type", "sdk"]).is_err());
    }

    #[test]
    fn verify() {
        let args = Args::try_parse_from(["program", "verify", "--dir", "/opt/java", "--expect", "17.0.2"]).unwrap();
        let Some(Command::Verify(verify)) = args.command else {
            panic!("not a verify command");
        };
        assert_eq!(verify.dir, PathBuf::from("/opt/java"));
        assert_eq!(verify.expect, Some("17.0.2".parse().unwrap()));
    }

    #[test]
    fn verify_requires_dir() {
        assert!(Args::try_parse_from(["program", "verify"]).is_err());
        assert!(Args::try_parse_from(["program", "verify", "--dir", "/opt", "--expect", "x.y"]).is_err());
    }
}
