//! rtmp-relay: local RTMP relay provisioning for Android devices
//!
//! This crate discovers an attached Android device, clears the host RTMP port of
//! stale or conflicting listeners, establishes a device-to-host reverse port
//! forward, starts the relay server and hands back a ready-to-use stream URL.
//!
//! # Architecture
//!
//! - **Process**: who owns a TCP port on this host, and how to terminate it
//! - **Device**: bridge-tool invocation, device discovery and selection
//! - **Port**: conflict resolution and reverse port forwarding
//! - **Server**: relay server spawn, readiness probing and supervision
//! - **Orchestrator**: the strictly sequential provisioning workflow
//! - **Config**: hierarchical TOML configuration
//! - **Telemetry**: structured syslog audit trail for irreversible actions
//!
//! Every port or ownership observation is an advisory snapshot. Components
//! re-query immediately before a state-changing action (terminate, forward,
//! spawn) instead of trusting an earlier check.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod console;
pub mod device;
pub mod orchestrator;
pub mod port;
pub mod process;
pub mod server;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;
