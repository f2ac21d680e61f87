//! Validated configuration.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;

/// Relay port when none is configured.
pub const DEFAULT_PORT: u16 = 1935;

/// Bridge executable looked up on PATH when none is configured.
pub const DEFAULT_BRIDGE: &str = "adb";

/// Minimum readiness poll interval.
const MIN_POLL: Duration = Duration::from_millis(10);

/// Timeouts and retry bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Bound for bridge commands.
    pub bridge_timeout: Duration,
    /// Bound for each model name query.
    pub model_timeout: Duration,
    /// SIGTERM to SIGKILL interval.
    pub termination_grace: Duration,
    /// Pause after terminating a port owner.
    pub port_release_delay: Duration,
    /// Conflict resolution attempts (at least 1).
    pub conflict_attempts: u32,
    /// Readiness window for the relay server.
    pub readiness_timeout: Duration,
    /// Interval between readiness probes.
    pub readiness_poll: Duration,
    /// Interval between liveness checks while supervising.
    pub supervise_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            bridge_timeout: Duration::from_millis(5000),
            model_timeout: Duration::from_millis(2000),
            termination_grace: Duration::from_millis(500),
            port_release_delay: Duration::from_millis(500),
            conflict_attempts: 3,
            readiness_timeout: Duration::from_millis(3000),
            readiness_poll: Duration::from_millis(250),
            supervise_interval: Duration::from_millis(2000),
        }
    }
}

/// Everything the provisioning workflow needs, checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Device-bridge executable.
    pub bridge: PathBuf,
    /// Relay server executable.
    pub server: PathBuf,
    /// Working directory for the relay server (its parent directory).
    pub server_dir: PathBuf,
    /// Executable name identifying a stale server.
    pub server_identity: String,
    /// Arguments for the relay server.
    pub server_args: Vec<String>,
    /// Desktop recording app named in the summary.
    pub companion_app: Option<PathBuf>,
    /// App component to launch on the device.
    pub package: Option<String>,
    /// Device to use without asking.
    pub preferred_device: Option<String>,
    /// Relay port.
    pub port: u16,
    /// Use the only selectable device without asking.
    pub auto_select_single_device: bool,
    /// Query model names during discovery.
    pub fetch_device_models: bool,
    /// Terminate unrelated processes holding the port.
    pub force_resolve_port_conflicts: bool,
    /// Launch the companion app once ready.
    pub launch_app: bool,
    /// Start the relay server, or stop after forwarding.
    pub auto_start_server: bool,
    /// Timeouts and retry bounds.
    pub timing: Timing,
}

impl Settings {
    /// Stream endpoint the device publishes to.
    pub fn stream_url(&self) -> String {
        format!("rtmp://127.0.0.1:{}/live", self.port)
    }
}

impl Config {
    /// Validate everything needed to provision the relay.
    ///
    /// Fails only on a path that is not an executable file, a port outside
    /// 1-65535, or a missing server path.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let bridge = self.resolve_bridge()?;
        let port = self.port()?;

        let server = self
            .paths
            .server
            .clone()
            .ok_or_else(|| ConfigError::MissingValue {
                field: "paths.server".to_string(),
                flag: "--server".to_string(),
            })?;
        ensure_executable("paths.server", &server)?;

        let server_dir = match server.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let server_identity = match &self.paths.server_identity {
            Some(identity) => identity.clone(),
            None => server
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "paths.server".to_string(),
                    message: format!("{} has no file name", server.display()),
                })?,
        };

        let options = &self.options;
        Ok(Settings {
            bridge,
            server_dir,
            server_identity,
            server,
            server_args: self.server.args.clone().unwrap_or_default(),
            companion_app: self.paths.companion_app.clone(),
            package: self.device.package.clone(),
            preferred_device: self.device.serial.clone(),
            port,
            auto_select_single_device: options.auto_select_single_device.unwrap_or(true),
            fetch_device_models: options.fetch_device_models.unwrap_or(true),
            force_resolve_port_conflicts: options.force_resolve_port_conflicts.unwrap_or(false),
            launch_app: options.launch_app.unwrap_or(true),
            auto_start_server: options.auto_start_server.unwrap_or(true),
            timing: self.timing(),
        })
    }

    /// The bridge executable: configured path, or `adb` on PATH.
    pub fn resolve_bridge(&self) -> Result<PathBuf, ConfigError> {
        match &self.paths.bridge {
            Some(path) => {
                ensure_executable("paths.bridge", path)?;
                Ok(path.clone())
            }
            None => {
                let found = which::which(DEFAULT_BRIDGE)
                    .map_err(|_| ConfigError::BridgeNotFound(DEFAULT_BRIDGE.to_string()))?;
                debug!("Using device bridge from PATH: {:?}", found);
                Ok(found)
            }
        }
    }

    /// The relay port, defaulting to 1935.
    pub fn port(&self) -> Result<u16, ConfigError> {
        match self.network.port {
            None => Ok(DEFAULT_PORT),
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "network.port".to_string(),
                    message: format!("{} is outside 1-65535", port),
                }),
        }
    }

    /// Timing with defaults filled in.
    pub fn timing(&self) -> Timing {
        let defaults = Timing::default();
        let t = &self.timing;
        let ms = |value: Option<u64>, default: Duration| value.map_or(default, Duration::from_millis);

        Timing {
            bridge_timeout: ms(t.bridge_timeout_ms, defaults.bridge_timeout),
            model_timeout: ms(t.model_timeout_ms, defaults.model_timeout),
            termination_grace: ms(t.termination_grace_ms, defaults.termination_grace),
            port_release_delay: ms(t.port_release_delay_ms, defaults.port_release_delay),
            conflict_attempts: t.conflict_attempts.unwrap_or(defaults.conflict_attempts).max(1),
            readiness_timeout: ms(t.readiness_timeout_ms, defaults.readiness_timeout),
            readiness_poll: ms(t.readiness_poll_ms, defaults.readiness_poll).max(MIN_POLL),
            supervise_interval: ms(t.supervise_interval_ms, defaults.supervise_interval)
                .max(MIN_POLL),
        }
    }
}

/// `path` must be a regular file with an execute bit set.
fn ensure_executable(field: &str, path: &Path) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        field: field.to_string(),
        message,
    };

    let metadata =
        fs::metadata(path).map_err(|e| invalid(format!("{}: {}", path.display(), e)))?;
    if !metadata.is_file() {
        return Err(invalid(format!("{} is not a file", path.display())));
    }
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(invalid(format!("{} is not executable", path.display())));
    }
    Ok(())
}
