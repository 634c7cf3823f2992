mod args;
mod cancel;
mod checksum;
mod colors;
mod config;
mod fetcher;
mod http;
mod installer;
mod meta;
mod pipeline;
mod platform;
mod release;
mod resolver;
#[cfg(test)]
mod testing;
mod vars;
mod verifier;
mod version;

use crate::args::{Args, Command, InstallArgs, VerifyArgs};
use crate::cancel::CancelToken;
use crate::colors::*;
use crate::config::*;
use crate::fetcher::{DefaultTransport, Fetcher, RetryPolicy};
use crate::installer::Installer;
use crate::pipeline::*;
use crate::platform::Platform;
use crate::resolver::{FileIndex, ReleaseIndex, ResolveError};
use crate::verifier::Verifier;
use crate::version::Version;
use clap::{CommandFactory, Parser};
use std::time::{Duration, Instant};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::{level_filters::*, *};
use tracing_subscriber::EnvFilter;

// Exit code used in case of invalid usage.
#[doc(hidden)]
const EXIT_USAGE: i32 = 2;

/// Main entry point for the application.
fn main() {
    // enable ansi support to use colorised/styled output
    #[cfg(windows)]
    let _ = nu_ansi_term::enable_ansi_support();

    // delegate
    let exit_code = match internal_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            eprintln!("{} {err:#}", ATTENTION_COLOR.paint("Failed!"));
            EXIT_NOK
        }
    };
    std::process::exit(exit_code);
}

// Internal main entry point for the application.
#[doc(hidden)]
fn internal_main() -> anyhow::Result<i32> {
    // remember start date/time
    let start = Instant::now();

    // parse arguments
    let args = Args::parse();

    // print some information
    if !args.quiet || args.version {
        print_info();
    }

    // stop here in case only the version was requested
    if args.version {
        return Ok(EXIT_OK);
    }

    // nothing to do without a command
    let Some(command) = &args.command else {
        Args::command().print_help()?;
        return Ok(EXIT_USAGE);
    };

    // init tracing
    init_tracing(&args);

    // print parsed arguments
    trace!("arguments: {args:#?}");

    // load config
    let config = match config_path(args.config.as_deref()) {
        Some(config_path) => {
            if !args.quiet {
                println!("Using configuration from {}.", paint_path(&config_path));
            }
            Config::load_from_file(&config_path)?
        }
        None => Config::default(),
    };
    debug!(?config);
    let settings = Settings::merge(&args, config)?;
    debug!(?settings);

    // observe Ctrl-C from here on
    let cancel = CancelToken::on_interrupt();

    // determine platform
    let platform = match Platform::current() {
        Ok(platform) => platform,
        Err(reason) => {
            eprintln!("{} {}", ATTENTION_COLOR.paint("Failed!"), error_chain(&ResolveError::Platform(reason)));
            return Ok(platform_exit_code(command));
        }
    };
    debug!(%platform);

    // assemble pipeline
    let client = http::client(settings.timeout)?;
    let mut fetcher = Fetcher::new(&settings.cache, Box::new(DefaultTransport::new(client.clone())));
    fetcher.retry(RetryPolicy {
        attempts: settings.retries,
        ..Default::default()
    });
    let installer = Installer::new(&settings.profile, platform);
    let mut verifier = Verifier::new(platform);
    verifier.timeout(settings.timeout);
    let mut pipeline = Pipeline::new(platform, fetcher, installer, verifier);
    pipeline.cancel_token(cancel).quiet(args.quiet);

    // run command
    let exit_code = match command {
        Command::Install(install) => {
            let Some(spec) = install.version.clone().or_else(|| settings.version.clone()) else {
                eprintln!("{} no version given (use --version or set 'version' in the configuration)", ATTENTION_COLOR.paint("Failed!"));
                return Ok(EXIT_USAGE);
            };
            match release_index(install, &settings, client) {
                Ok(index) => {
                    pipeline.index(index);
                }
                Err(err) => {
                    eprintln!("{} {err:#}", ATTENTION_COLOR.paint("Failed!"));
                    return Ok(EXIT_RESOLVE);
                }
            }
            run_install(&pipeline, install, &settings, spec)
        }
        Command::Verify(verify) => run_verify(&pipeline, verify, &settings),
    };

    // print some statistics
    if !args.quiet {
        let elapsed = start.elapsed();
        println!("Total time: {}", format_elapsed(elapsed));
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        println!("Finished at: {}", format_now(now));
    }

    Ok(exit_code)
}

// Returns the exit code for a platform that cannot be detected, which fails the first stage of the given command.
#[doc(hidden)]
fn platform_exit_code(command: &Command) -> i32 {
    match command {
        Command::Install(_) => EXIT_RESOLVE,
        Command::Verify(_) => EXIT_VERIFY,
    }
}

// Returns the release index to resolve versions with: a local index file, if given, or else the vendor API.
#[doc(hidden)]
#[cfg_attr(not(feature = "azul"), allow(unused_variables))]
fn release_index(install: &InstallArgs, settings: &Settings, client: reqwest::blocking::Client) -> anyhow::Result<Box<dyn ReleaseIndex>> {
    if let Some(index) = install.index.as_ref().or(settings.index.as_ref()) {
        debug!(index = %index.display(), "using local release index");
        return Ok(Box::new(FileIndex::load(index)?));
    }

    #[cfg(feature = "azul")]
    let index: anyhow::Result<Box<dyn ReleaseIndex>> = {
        let package_type = install.package_type.as_deref().unwrap_or(&settings.package_type);
        Ok(Box::new(resolver::AzulIndex::new(client, package_type)))
    };
    #[cfg(not(feature = "azul"))]
    let index = Err(anyhow::anyhow!("no release index given (use --index or set 'index' in the configuration)"));

    index
}

// Runs the install command and returns the exit code.
#[doc(hidden)]
fn run_install(pipeline: &Pipeline, install: &InstallArgs, settings: &Settings, spec: String) -> i32 {
    let request = InstallRequest {
        spec,
        directory: install.dir.clone().unwrap_or_else(|| settings.directory.clone()),
        anchor: install.anchor.clone().unwrap_or_else(|| settings.anchor.clone()),
        dry_run: install.dry_run,
    };

    match pipeline.install(&request) {
        Ok(InstallOutcome::DryRun { descriptor, root }) => {
            println!(
                "Would install {} at {}",
                INFO_COLOR.paint(descriptor.resolved_version.to_string()),
                paint_path(&root)
            );
            EXIT_OK
        }
        Ok(InstallOutcome::Installed {
            descriptor,
            target,
            verification,
            profile_backup,
        }) => {
            let detected = verification.detected_version.unwrap_or_else(|| descriptor.resolved_version.to_string());
            println!(
                "{} java {} at {}",
                SUCCESS_COLOR.paint("Installed"),
                INFO_COLOR.paint(detected),
                paint_path(target.root_directory())
            );
            if let Some(profile_backup) = profile_backup {
                println!("Previous profile saved as {}", paint_path(&profile_backup));
            }
            println!(
                "Run `. {}` or open a new shell to use it.",
                paint_path(&settings.profile)
            );
            EXIT_OK
        }
        Err(failure) => report(&failure),
    }
}

// Runs the verify command and returns the exit code.
#[doc(hidden)]
fn run_verify(pipeline: &Pipeline, verify: &VerifyArgs, settings: &Settings) -> i32 {
    let anchor = verify.anchor.as_deref().unwrap_or(&settings.anchor);
    match pipeline.verify(&verify.dir, verify.expect.as_ref(), anchor) {
        Ok(verification) => {
            let detected = verification.detected_version.unwrap_or_default();
            println!(
                "{} java {} at {}",
                SUCCESS_COLOR.paint("Verified"),
                INFO_COLOR.paint(detected),
                paint_path(&verify.dir)
            );
            EXIT_OK
        }
        Err(failure) => report(&failure),
    }
}

// Prints the given failure and returns its exit code.
#[doc(hidden)]
fn report(failure: &Failure) -> i32 {
    let failed = ATTENTION_COLOR.paint("Failed");
    eprintln!("{failed} while {}: {}", failure.stage, error_chain(&failure.error));
    eprintln!("Rollback: {}", failure.rollback);

    failure.exit_code()
}

// Renders the given error together with all of its causes.
#[doc(hidden)]
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }

    chain
}

// Formats the elapsed time with second precision.
#[doc(hidden)]
fn format_elapsed(elapsed: Duration) -> String {
    // null out everything below seconds
    let elapsed = Duration::from_secs(elapsed.as_secs());

    // format the remaining duration
    humantime::format_duration(elapsed).to_string()
}

// Formats the given date/time in the local offset (or UTC).
#[doc(hidden)]
fn format_now(now: OffsetDateTime) -> String {
    // define format
    const FORMAT: &[FormatItem<'_>] = format_description!("[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]");

    // local offset or UTC
    let offset = UtcOffset::current_local_offset();
    let offset = offset.unwrap_or(UtcOffset::UTC);
    trace!(?offset);

    // format
    let now = now.to_offset(offset);
    now.format(&FORMAT).unwrap_or(now.to_string())
}

// Prints some information (version, path of executable, etc.).
#[doc(hidden)]
fn print_info() {
    let version = Version::current();
    if let Ok(exe) = std::env::current_exe() {
        let exe = paint_path(&exe);
        println!("{version} [{exe}]");
    } else {
        println!("{version}");
    }
}

// Initialises the tracing framework based on given command line arguments.
#[doc(hidden)]
fn init_tracing(args: &Args) {
    let level_filter = match args.verbose {
        0 => LevelFilter::ERROR.into(),
        1 => LevelFilter::WARN.into(),
        2 => LevelFilter::INFO.into(),
        3 => LevelFilter::DEBUG.into(),
        _ => LevelFilter::TRACE.into(),
    };
    let env_filter = EnvFilter::from_default_env().add_directive(level_filter);
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(env_filter).init();
}
