//! Archive Backup - Main entry point
//!
//! One invocation performs one run and exits 0 on success, 1 otherwise.

use anyhow::{bail, Context, Result};
use archive_backup::{shutdown, utils, Orchestrator, Settings};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress, upload, prune, and take the weekly image if due (default)
    Run,
    /// Write a configuration file from the given flags
    Init {
        /// Where to write the configuration
        #[arg(short, long, default_value = "archive-backup.toml")]
        output: PathBuf,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Take the host image now, whatever the day
    Snapshot,
    /// Report whether the configuration, transport and compressor are usable
    Check,
}

/// Flags that override values from the configuration file
#[derive(clap::Args, Debug)]
struct Overrides {
    /// Directory to back up
    #[arg(short, long, global = true)]
    source: Option<PathBuf>,

    /// Destination, e.g. s3://bucket or s3://bucket/prefix
    #[arg(short, long, global = true)]
    destination: Option<String>,

    /// Delete remote archives older than this many days
    #[arg(short, long, global = true)]
    retention_days: Option<u32>,

    /// Skip the AWS SDK and use the AWS CLI
    #[arg(long, global = true)]
    cli_only: bool,

    /// Shorthand for --log-level debug
    #[arg(long, global = true)]
    debug: bool,

    /// Append log records to this file
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

impl Overrides {
    fn apply(self, settings: &mut Settings) {
        if let Some(source) = self.source {
            settings.backup.source_dir = source;
        }
        if let Some(destination) = self.destination {
            settings.backup.destination = destination;
        }
        if let Some(days) = self.retention_days {
            settings.backup.retention_days = days;
        }
        if self.cli_only {
            settings.transport.use_native_sdk = false;
        }
        if let Some(file) = self.log_file {
            settings.log.file = Some(file);
        }
        if let Some(level) = self.log_level {
            settings.log.level = level;
        }
        if self.debug {
            settings.log.level = "debug".to_string();
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let mut settings = if let Some(config_path) = &args.config {
        Settings::from_file(config_path)?
    } else {
        Settings::default()
    };
    args.overrides.apply(&mut settings);

    // Initialize logging
    utils::logger::init(&settings.log.level, settings.log.file.as_deref())?;

    tracing::info!("Starting archive-backup v{}", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let orchestrator = Orchestrator::new(settings);
            match shutdown::until_signal(orchestrator.run(), shutdown::wait_for_signal()).await {
                Ok(report) => Ok(exit_code(report.success())),
                Err(signal) => {
                    tracing::error!("Run aborted by {}", signal);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Init { output, force } => {
            init_config(&settings, &output, force)?;
            tracing::info!("Wrote configuration to {}", output.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Snapshot => {
            let orchestrator = Orchestrator::new(settings);
            match shutdown::until_signal(orchestrator.snapshot_now(), shutdown::wait_for_signal())
                .await
            {
                Ok(Ok(image_id)) => {
                    tracing::info!("Host image requested: {}", image_id);
                    Ok(ExitCode::SUCCESS)
                }
                Ok(Err(e)) => {
                    tracing::error!("Host image failed: {}", e);
                    Ok(ExitCode::FAILURE)
                }
                Err(signal) => {
                    tracing::error!("Snapshot aborted by {}", signal);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Check => {
            let check = Orchestrator::new(settings).check().await;
            match &check.config_error {
                None => tracing::info!("Configuration: ok"),
                Some(e) => tracing::error!("Configuration: {}", e),
            }
            match check.transport {
                Some(mode) => tracing::info!("Transport: {}", mode),
                None => tracing::error!("Transport: none usable"),
            }
            match &check.archiver_error {
                None => tracing::info!("Compressor: ok"),
                Some(e) => tracing::error!("Compressor: {}", e),
            }
            Ok(exit_code(check.ready()))
        }
    }
}

fn init_config(settings: &Settings, output: &std::path::Path, force: bool) -> Result<()> {
    if !settings.backup.source_dir.is_dir() {
        bail!(
            "source directory {} does not exist or is not a directory",
            settings.backup.source_dir.display()
        );
    }
    settings.validate()?;
    if output.exists() && !force {
        bail!("{} already exists (use --force to replace it)", output.display());
    }
    settings
        .write_to(output)
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}
