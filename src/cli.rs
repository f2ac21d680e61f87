//! Command-line interface definitions for rtmp-relay.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Provision an RTMP relay path from a mobile device to this host.
///
/// rtmp-relay finds an attached device, frees the relay port, installs a
/// device-to-host reverse forward, starts the relay server and prints the
/// stream endpoint to publish to.
#[derive(Parser, Debug)]
#[command(name = "rtmp-relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to provision the relay).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to additional config file.
    ///
    /// Merged on top of system and user configs.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Relay port, used on both the device and the host.
    #[arg(
        short = 'p',
        long = "port",
        value_name = "PORT",
        global = true,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub port: Option<u16>,

    /// Device identifier to use instead of choosing.
    #[arg(short = 'd', long = "device", value_name = "SERIAL", global = true)]
    pub device: Option<String>,

    /// Relay server executable.
    #[arg(long = "server", value_name = "PATH")]
    pub server: Option<PathBuf>,

    /// Device-bridge executable (default: `adb` on PATH).
    #[arg(long = "bridge", value_name = "PATH", global = true)]
    pub bridge: Option<PathBuf>,

    /// Terminate unrelated processes holding the relay port.
    #[arg(long = "force")]
    pub force: bool,

    /// Ask before using the only attached device.
    #[arg(long = "no-auto-select")]
    pub no_auto_select: bool,

    /// Skip per-device model name queries.
    #[arg(long = "no-models", global = true)]
    pub no_models: bool,

    /// Do not launch the companion app on the device.
    #[arg(long = "no-launch")]
    pub no_launch: bool,

    /// Only forward the port; report any server already listening instead
    /// of starting one.
    #[arg(long = "no-start-server")]
    pub no_start_server: bool,

    /// Leave the server and forward running and exit once ready.
    #[arg(long = "detach")]
    pub detach: bool,

    /// Never prompt; choices that need an operator abort instead.
    #[arg(long = "headless")]
    pub headless: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for rtmp-relay.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// List attached devices with their connection kind and model.
    Devices,

    /// Show which process holds a port (default: the relay port).
    Port {
        /// Port to inspect.
        #[arg(value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
        target: Option<u16>,
    },

    /// Remove the reverse forward for the relay port from a device.
    ///
    /// Uses --device and --port; the device defaults to the only one attached.
    Unforward,
}
