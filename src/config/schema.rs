//! Configuration schema definitions.
//!
//! Every scalar is an `Option` so that a source which does not mention a
//! value leaves the earlier source's value in place.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Executable and app locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Device preferences.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Relay port.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Relay server invocation.
    #[serde(default)]
    pub server: ServerConfig,

    /// Policy flags.
    #[serde(default)]
    pub options: OptionsConfig,

    /// Timeouts and retry bounds.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    /// Merge another config into this one. Values set in `other` win.
    pub fn merge(&mut self, other: Config) {
        self.paths.merge(other.paths);
        self.device.merge(other.device);
        self.network.merge(other.network);
        self.server.merge(other.server);
        self.options.merge(other.options);
        self.timing.merge(other.timing);
    }
}

fn override_with<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

/// `[paths]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PathsConfig {
    /// Device-bridge executable.
    #[serde(default)]
    pub bridge: Option<PathBuf>,

    /// Relay server executable.
    #[serde(default)]
    pub server: Option<PathBuf>,

    /// Executable name that identifies a stale server on the relay port.
    /// Defaults to the server's file name.
    #[serde(default)]
    pub server_identity: Option<String>,

    /// Desktop recording app mentioned in the summary.
    #[serde(default)]
    pub companion_app: Option<PathBuf>,
}

impl PathsConfig {
    fn merge(&mut self, other: PathsConfig) {
        override_with(&mut self.bridge, other.bridge);
        override_with(&mut self.server, other.server);
        override_with(&mut self.server_identity, other.server_identity);
        override_with(&mut self.companion_app, other.companion_app);
    }
}

/// `[device]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// App component to launch on the device (`package/activity`).
    #[serde(default)]
    pub package: Option<String>,

    /// Device identifier to use without asking.
    #[serde(default)]
    pub serial: Option<String>,
}

impl DeviceConfig {
    fn merge(&mut self, other: DeviceConfig) {
        override_with(&mut self.package, other.package);
        override_with(&mut self.serial, other.serial);
    }
}

/// `[network]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Relay port. Wider than `u16` so out-of-range values reach validation.
    #[serde(default)]
    pub port: Option<u32>,
}

impl NetworkConfig {
    fn merge(&mut self, other: NetworkConfig) {
        override_with(&mut self.port, other.port);
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Arguments passed to the relay server. Replaced, not appended, on merge.
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

impl ServerConfig {
    fn merge(&mut self, other: ServerConfig) {
        override_with(&mut self.args, other.args);
    }
}

/// `[options]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct OptionsConfig {
    /// Use the only selectable device without asking (default true).
    #[serde(default)]
    pub auto_select_single_device: Option<bool>,

    /// Query model names during discovery (default true).
    #[serde(default)]
    pub fetch_device_models: Option<bool>,

    /// Terminate unrelated processes holding the relay port (default false).
    #[serde(default)]
    pub force_resolve_port_conflicts: Option<bool>,

    /// Launch the companion app once ready (default true).
    #[serde(default)]
    pub launch_app: Option<bool>,

    /// Start the relay server after forwarding (default true). When off the
    /// run ends once the forward is in place.
    #[serde(default)]
    pub auto_start_server: Option<bool>,
}

impl OptionsConfig {
    fn merge(&mut self, other: OptionsConfig) {
        override_with(&mut self.auto_select_single_device, other.auto_select_single_device);
        override_with(&mut self.fetch_device_models, other.fetch_device_models);
        override_with(
            &mut self.force_resolve_port_conflicts,
            other.force_resolve_port_conflicts,
        );
        override_with(&mut self.launch_app, other.launch_app);
        override_with(&mut self.auto_start_server, other.auto_start_server);
    }
}

/// `[timing]` section. Durations are milliseconds.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimingConfig {
    /// Bound for bridge commands.
    #[serde(default)]
    pub bridge_timeout_ms: Option<u64>,

    /// Bound for each model name query.
    #[serde(default)]
    pub model_timeout_ms: Option<u64>,

    /// SIGTERM to SIGKILL interval.
    #[serde(default)]
    pub termination_grace_ms: Option<u64>,

    /// Pause after terminating a port owner.
    #[serde(default)]
    pub port_release_delay_ms: Option<u64>,

    /// Conflict resolution attempts.
    #[serde(default)]
    pub conflict_attempts: Option<u32>,

    /// Readiness window for the relay server.
    #[serde(default)]
    pub readiness_timeout_ms: Option<u64>,

    /// Interval between readiness probes.
    #[serde(default)]
    pub readiness_poll_ms: Option<u64>,

    /// Interval between liveness checks while supervising.
    #[serde(default)]
    pub supervise_interval_ms: Option<u64>,
}

impl TimingConfig {
    fn merge(&mut self, other: TimingConfig) {
        override_with(&mut self.bridge_timeout_ms, other.bridge_timeout_ms);
        override_with(&mut self.model_timeout_ms, other.model_timeout_ms);
        override_with(&mut self.termination_grace_ms, other.termination_grace_ms);
        override_with(&mut self.port_release_delay_ms, other.port_release_delay_ms);
        override_with(&mut self.conflict_attempts, other.conflict_attempts);
        override_with(&mut self.readiness_timeout_ms, other.readiness_timeout_ms);
        override_with(&mut self.readiness_poll_ms, other.readiness_poll_ms);
        override_with(&mut self.supervise_interval_ms, other.supervise_interval_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [paths]
            bridge = "/opt/platform-tools/adb"
            server = "/opt/mona/MonaServer"
            companion_app = "/usr/bin/obs"

            [device]
            package = "com.example.cam/.MainActivity"
            serial = "ABCD1234"

            [network]
            port = 1936

            [server]
            args = ["--log", "warn"]

            [options]
            force_resolve_port_conflicts = true
            auto_start_server = false

            [timing]
            conflict_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.network.port, Some(1936));
        assert_eq!(config.device.serial.as_deref(), Some("ABCD1234"));
        assert_eq!(config.options.force_resolve_port_conflicts, Some(true));
        assert_eq!(config.options.launch_app, None);
        assert_eq!(config.options.auto_start_server, Some(false));
        assert_eq!(config.timing.conflict_attempts, Some(5));
        assert_eq!(config.server.args, Some(vec!["--log".to_string(), "warn".to_string()]));
    }

    #[test]
    fn test_empty_config_parses() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_merge_overrides_only_set_values() {
        let mut base: Config = toml::from_str(
            r#"
            [network]
            port = 1935
            [device]
            serial = "A"
            [server]
            args = ["-a"]
            "#,
        )
        .unwrap();
        let overlay: Config = toml::from_str(
            r#"
            [device]
            serial = "B"
            [server]
            args = []
            "#,
        )
        .unwrap();

        base.merge(overlay);

        assert_eq!(base.network.port, Some(1935));
        assert_eq!(base.device.serial.as_deref(), Some("B"));
        assert_eq!(base.server.args, Some(Vec::new()));
    }
}
