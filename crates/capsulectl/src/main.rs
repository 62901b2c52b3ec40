//! capsulectl - UEFI Capsule Update CLI
//!
//! Enumerates firmware from the ESRT, stages capsules on the EFI System
//! Partition for the next reboot, and reports the outcome of past attempts.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod completion;
mod error;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::Context;

/// Configuration file read when `--config` is not given, below `--root`.
const DEFAULT_CONFIG_PATH: &str = "etc/fwupd/uefi_capsule.yaml";

#[derive(Parser)]
#[command(name = "capsulectl")]
#[command(about = "UEFI Capsule Update CLI - stage firmware updates for the next reboot")]
#[command(version)]
#[command(long_about = "
capsulectl stages UEFI capsule updates on the EFI System Partition. The
platform firmware applies staged capsules on the next reboot; run
`capsulectl get-results` afterwards to see how the attempt went.

Use --json for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (YAML)
    #[arg(long, global = true, env = "CAPSULECTL_CONFIG")]
    config: Option<PathBuf>,

    /// Treat this directory as the host root (for testing)
    #[arg(long, global = true, env = "CAPSULECTL_ROOT", hide = true)]
    root: Option<PathBuf>,

    /// sysfs firmware directory override
    #[arg(long, global = true, env = "CAPSULECTL_SYSFS", hide = true)]
    sysfs: Option<PathBuf>,

    /// efivarfs directory override
    #[arg(long, global = true, env = "CAPSULECTL_EFIVARS", hide = true)]
    efivars: Option<PathBuf>,

    /// Mount table override
    #[arg(long, global = true, env = "CAPSULECTL_MOUNT_TABLE", hide = true)]
    mount_table: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List firmware devices found in the ESRT
    Devices {
        /// Show detailed device information
        #[arg(short, long)]
        detailed: bool,
    },

    /// Stage a firmware capsule to be applied on the next reboot
    Update {
        /// Device ID or firmware class GUID
        device: String,
        /// Firmware payload or complete capsule
        file: PathBuf,
        /// Override safety checks such as a low flash budget
        #[arg(short, long)]
        force: bool,
        /// Remaining flash cycles reported by the device vendor tooling
        #[arg(long)]
        flashes_left: Option<u32>,
    },

    /// Make one personality of a paired device updatable
    Unlock {
        /// Device ID or firmware class GUID
        device: String,
        /// Remaining flash cycles of the device
        #[arg(long, default_value_t = 0)]
        flashes_left: u32,
        /// Remaining flash cycles of its alternate
        #[arg(long, default_value_t = 0)]
        alternate_flashes_left: u32,
    },

    /// Show the outcome of the last update attempt
    GetResults {
        /// Device ID or firmware class GUID
        device: String,
    },

    /// Reset the stored status of the last update attempt
    ClearResults {
        /// Device ID or firmware class GUID
        device: String,
    },

    /// Print diagnostic metadata for problem reports
    Report,

    /// Show which splash image size fits a screen
    SelectSplash {
        /// Screen width in pixels
        #[arg(long)]
        width: u32,
        /// Screen height in pixels
        #[arg(long)]
        height: u32,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("capsulectl={log_level},uefi_capsule={log_level}").into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            ExitCode::from(error::exit_code(&e))
        }
    }
}

fn context(cli: &Cli) -> Result<Context> {
    let root = cli.root.clone().unwrap_or_else(|| PathBuf::from("/"));
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| root.join(DEFAULT_CONFIG_PATH));
    Context::new(
        cli.json,
        cli.root.as_deref(),
        cli.sysfs.as_deref(),
        cli.efivars.as_deref(),
        cli.mount_table.as_deref(),
        &config_path,
    )
}

fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Devices { detailed } => commands::device::list(&context(cli)?, *detailed),
        Commands::Update {
            device,
            file,
            force,
            flashes_left,
        } => commands::firmware::update(&context(cli)?, device, file, *force, *flashes_left),
        Commands::Unlock {
            device,
            flashes_left,
            alternate_flashes_left,
        } => commands::device::unlock(
            &context(cli)?,
            device,
            *flashes_left,
            *alternate_flashes_left,
        ),
        Commands::GetResults { device } => commands::firmware::get_results(&context(cli)?, device),
        Commands::ClearResults { device } => {
            commands::firmware::clear_results(&context(cli)?, device)
        }
        Commands::Report => commands::system::report(&context(cli)?),
        Commands::SelectSplash { width, height } => {
            commands::system::select_splash(*width, *height, cli.json)
        }
        Commands::Completion { shell } => {
            completion::generate_completion(*shell);
            Ok(())
        }
    }
}
