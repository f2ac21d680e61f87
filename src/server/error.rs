//! Error types for the relay server lifecycle.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from starting the relay server.
#[derive(Debug, Error)]
pub enum StartError {
    /// A server started by this manager is still running.
    #[error("Relay server already running (PID {pid})")]
    AlreadyRunning {
        /// PID of the running server.
        pid: u32,
    },

    /// The executable could not be spawned.
    #[error("Failed to start {}: {source}", path.display())]
    Spawn {
        /// Server executable.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server exited before accepting a connection.
    #[error("Relay server exited before becoming ready (exit code: {})", describe_code(.code))]
    ExitedEarly {
        /// Exit code, absent when killed by a signal.
        code: Option<i32>,
    },

    /// The server did not accept connections within the readiness window.
    ///
    /// The process is left running.
    #[error("Relay server (PID {pid}) not accepting connections after {waited:?}")]
    TimedOut {
        /// PID of the unverified server.
        pid: u32,
        /// How long readiness was polled.
        waited: Duration,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "killed by signal".to_string(), |c| c.to_string())
}

/// Errors from stopping the relay server.
#[derive(Debug, Error)]
pub enum StopError {
    /// SIGTERM could not be delivered.
    #[error("Failed to signal relay server (PID {pid}): {reason}")]
    Signal {
        /// PID of the server.
        pid: u32,
        /// OS error description.
        reason: String,
    },

    /// Waiting for or killing the child failed.
    #[error("Failed to reap relay server: {0}")]
    Wait(#[from] std::io::Error),
}
