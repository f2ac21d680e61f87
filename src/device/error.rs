//! Error types for device discovery, selection and app launch.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::model::Device;

/// Failure to run the bridge tool at all.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge executable could not be spawned.
    #[error("Failed to run {}: {source}", path.display())]
    Spawn {
        /// Bridge executable.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The bridge did not finish in time and was killed.
    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut {
        /// Command line that was run.
        command: String,
        /// The bound that elapsed.
        timeout: Duration,
    },
}

/// Errors from listing devices.
///
/// All variants are fatal for a run: without the bridge nothing else works.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The bridge tool is missing, hung, or unusable.
    #[error("Device bridge unavailable: {0}")]
    BridgeUnavailable(#[from] BridgeError),

    /// The bridge ran but reported failure.
    #[error("Device bridge command failed: {0}")]
    CommandFailed(String),

    /// `version` output did not contain a recognisable version.
    #[error("Could not determine device bridge version from: {0}")]
    UnknownVersion(String),
}

/// Errors from choosing a device.
#[derive(Debug, Clone, Error)]
pub enum SelectionError {
    /// No authorized device is attached.
    #[error("No usable device found ({unauthorized} unauthorized, {offline} offline)")]
    NoneAvailable {
        /// Devices awaiting the debugging authorization prompt.
        unauthorized: usize,
        /// Devices reported offline.
        offline: usize,
    },

    /// A choice between candidates is required and nobody can make it.
    #[error("{} devices are available; choose one with --device", candidates.len())]
    AmbiguousWithoutInteraction {
        /// The selectable devices.
        candidates: Vec<Device>,
    },

    /// The configured device is absent or not selectable.
    #[error("Requested device {id} is not attached or not authorized")]
    PreferredUnavailable {
        /// Requested identifier.
        id: String,
    },
}

/// Errors from launching the companion app on the device.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The component name is not `package/activity`.
    #[error("Invalid component name '{0}': expected package/activity")]
    InvalidComponent(String),

    /// The activity manager refused to start the component.
    #[error("Permission denied launching app: {0}")]
    PermissionDenied(String),

    /// The package or activity is not installed.
    #[error("App not found on device: {0}")]
    NotFound(String),

    /// Any other reported failure.
    #[error("App launch failed: {0}")]
    Failed(String),

    /// The bridge could not be run.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
