//! rtmp-relay: local RTMP relay provisioning for Android devices
//!
//! This is the main entry point for the rtmp-relay binary. It handles CLI
//! argument parsing, telemetry initialization and configuration loading, then
//! hands off to the command handler.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: Goes to syslog as JSON, one event per irreversible
//!   action (process terminated, forward installed, server started)
//! - **Debug logging**: `tracing` to stderr, verbosity from `-v`
//! - **Operator interaction**: prompts and the run summary on stdout

use anyhow::{Context, Result};
use clap::Parser;
use rtmp_relay::{cli::Cli, cli_handler, config::ConfigLoader, telemetry};
use tracing::{debug, warn};

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    init_tracing(cli.verbose)?;

    debug!("Parsed CLI arguments: {:?}", cli);

    // Syslog may be missing in containers; the audit trail is then dropped
    if let Err(e) = telemetry::init_logger() {
        warn!("Audit logging disabled: {}", e);
        telemetry::init_null_logger().context("Failed to initialize telemetry")?;
    }

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    debug!("Loaded configuration: {:?}", config);

    cli_handler::handle(&cli, &config)
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): Only warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
