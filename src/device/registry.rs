//! Device discovery and selection.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::bridge::DeviceBridge;
use super::error::{DiscoveryError, SelectionError};
use super::model::{parse_devices_output, AuthState, Device};

/// Discovery tunables.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Query each authorized device for its model name.
    pub fetch_models: bool,
    /// Bound for `version` and `devices`.
    pub command_timeout: Duration,
    /// Bound for each model query.
    pub model_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            fetch_models: true,
            command_timeout: Duration::from_secs(5),
            model_timeout: Duration::from_secs(2),
        }
    }
}

/// Lists attached devices. Holds no state between calls.
pub struct DeviceRegistry<B> {
    bridge: Arc<B>,
    settings: RegistrySettings,
}

impl<B: DeviceBridge> DeviceRegistry<B> {
    /// Create a registry over `bridge`.
    pub fn new(bridge: Arc<B>, settings: RegistrySettings) -> Self {
        Self { bridge, settings }
    }

    /// Report the bridge tool version, proving the tool is usable.
    pub async fn bridge_version(&self) -> Result<String, DiscoveryError> {
        let output = self
            .bridge
            .run(&["version"], self.settings.command_timeout)
            .await?;
        if !output.success {
            return Err(DiscoveryError::CommandFailed(output.combined()));
        }

        parse_bridge_version(&output.stdout)
            .ok_or_else(|| DiscoveryError::UnknownVersion(output.combined()))
    }

    /// Take a fresh snapshot of attached devices.
    ///
    /// An empty list is not an error.
    pub async fn discover(&self) -> Result<Vec<Device>, DiscoveryError> {
        let output = self
            .bridge
            .run(&["devices", "-l"], self.settings.command_timeout)
            .await?;
        if !output.success {
            return Err(DiscoveryError::CommandFailed(output.combined()));
        }

        let parsed = parse_devices_output(&output.stdout);
        let mut devices = Vec::with_capacity(parsed.len());
        for device in parsed {
            let fetched = if self.settings.fetch_models && device.is_selectable() {
                self.fetch_model(&device).await
            } else {
                None
            };
            let model = fetched.or_else(|| device.detail_model());
            devices.push(device.with_model(model));
        }

        debug!("Discovered {} device(s)", devices.len());
        Ok(devices)
    }

    /// Best-effort model name lookup. Every failure yields `None`.
    pub async fn fetch_model(&self, device: &Device) -> Option<String> {
        if let Some(model) = self.getprop(device.id(), "ro.product.model").await {
            return Some(model);
        }

        self.getprop(device.id(), "ro.product.manufacturer")
            .await
            .map(|manufacturer| format!("{} (Model N/A)", manufacturer))
    }

    async fn getprop(&self, device_id: &str, property: &str) -> Option<String> {
        let result = self
            .bridge
            .run(
                &["-s", device_id, "shell", "getprop", property],
                self.settings.model_timeout,
            )
            .await;

        match result {
            Ok(output) if output.success => {
                let value = output.stdout.trim();
                (!value.is_empty()).then(|| value.to_string())
            }
            Ok(output) => {
                debug!("getprop {} on {} failed: {}", property, device_id, output.combined());
                None
            }
            Err(e) => {
                debug!("getprop {} on {} failed: {}", property, device_id, e);
                None
            }
        }
    }
}

/// Extract `x.y.z` following the word `Version` in `version` output.
fn parse_bridge_version(output: &str) -> Option<String> {
    let tokens: Vec<&str> = output.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| {
        if pair[0] != "Version" {
            return None;
        }
        let numeric: String = pair[1]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let parts: Vec<&str> = numeric.split('.').take(3).collect();
        (parts.len() == 3 && parts.iter().all(|p| !p.is_empty())).then(|| parts.join("."))
    })
}

/// How a device should be chosen.
#[derive(Debug, Clone, Default)]
pub struct SelectionPreference {
    /// Pick the only selectable device without asking.
    pub auto_select_single: bool,
    /// Pick this identifier, and nothing else.
    pub preferred: Option<String>,
}

/// Filter and validate a discovery snapshot down to one device.
///
/// Interactive choice is the caller's job: when a choice is needed this
/// returns [`SelectionError::AmbiguousWithoutInteraction`] carrying the
/// candidates.
pub fn select(devices: &[Device], preference: &SelectionPreference) -> Result<Device, SelectionError> {
    if let Some(id) = &preference.preferred {
        return devices
            .iter()
            .find(|d| d.id() == id && d.is_selectable())
            .cloned()
            .ok_or_else(|| SelectionError::PreferredUnavailable { id: id.clone() });
    }

    let mut candidates: Vec<Device> = devices.iter().filter(|d| d.is_selectable()).cloned().collect();

    if candidates.is_empty() {
        return Err(SelectionError::NoneAvailable {
            unauthorized: count_state(devices, AuthState::Unauthorized),
            offline: count_state(devices, AuthState::Offline),
        });
    }

    if candidates.len() == 1 && preference.auto_select_single {
        let only = candidates.remove(0);
        info!("Auto-selected only device: {}", only);
        return Ok(only);
    }

    Err(SelectionError::AmbiguousWithoutInteraction { candidates })
}

fn count_state(devices: &[Device], state: AuthState) -> usize {
    devices.iter().filter(|d| d.state() == state).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BridgeError, BridgeOutput, ConnectionKind};
    use crate::testing::ScriptedBridge;

    const LISTING: &str = "List of devices attached\n\
                           ABCD1234 device usb:1-1 model:Pixel_7\n\
                           192.168.1.5:5555 device\n\
                           UNAUTHORIZED_ID unauthorized\n";

    fn registry(bridge: ScriptedBridge, fetch_models: bool) -> (Arc<ScriptedBridge>, DeviceRegistry<ScriptedBridge>) {
        let bridge = Arc::new(bridge);
        let settings = RegistrySettings {
            fetch_models,
            ..RegistrySettings::default()
        };
        (bridge.clone(), DeviceRegistry::new(bridge, settings))
    }

    fn devices(lines: &[(&str, AuthState)]) -> Vec<Device> {
        lines.iter().map(|(id, state)| Device::new(*id, *state)).collect()
    }

    #[test]
    fn test_parse_bridge_version() {
        let output = "Android Debug Bridge version 1.0.41\nVersion 34.0.5-10900879\nInstalled as /usr/bin/adb\n";
        assert_eq!(parse_bridge_version(output).as_deref(), Some("34.0.5"));
        assert_eq!(parse_bridge_version("Android Debug Bridge version 1.0.41"), None);
        assert_eq!(parse_bridge_version("Version 34.0"), None);
    }

    #[tokio::test]
    async fn test_bridge_version_unknown() {
        let (_, registry) = registry(ScriptedBridge::new(|_| Ok(BridgeOutput::ok("hello"))), false);
        assert!(matches!(
            registry.bridge_version().await,
            Err(DiscoveryError::UnknownVersion(_))
        ));
    }

    #[tokio::test]
    async fn test_discover_without_models() {
        let (bridge, registry) = registry(ScriptedBridge::new(|_| Ok(BridgeOutput::ok(LISTING))), false);

        let found = registry.discover().await.unwrap();

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].model(), Some("Pixel 7"));
        assert_eq!(found[1].connection(), ConnectionKind::Wifi);
        assert!(found[1].model().is_none());
        assert_eq!(bridge.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_discover_fetches_models_for_authorized_only() {
        let (bridge, registry) = registry(
            ScriptedBridge::new(|args| match args {
                ["devices", "-l"] => Ok(BridgeOutput::ok(LISTING)),
                ["-s", "ABCD1234", "shell", "getprop", "ro.product.model"] => {
                    Ok(BridgeOutput::ok("Pixel 7 Pro\n"))
                }
                ["-s", _, "shell", "getprop", "ro.product.model"] => Ok(BridgeOutput::ok("")),
                ["-s", _, "shell", "getprop", "ro.product.manufacturer"] => {
                    Ok(BridgeOutput::ok("samsung\n"))
                }
                _ => Ok(BridgeOutput::failed(1, "unexpected")),
            }),
            true,
        );

        let found = registry.discover().await.unwrap();

        assert_eq!(found[0].model(), Some("Pixel 7 Pro"));
        assert_eq!(found[1].model(), Some("samsung (Model N/A)"));
        assert!(found[2].model().is_none());
        assert!(bridge.calls().iter().all(|call| !call.contains(&"UNAUTHORIZED_ID".to_string())));
    }

    #[tokio::test]
    async fn test_fetch_model_failure_is_none() {
        let (_, registry) = registry(
            ScriptedBridge::new(|_| {
                Err(BridgeError::TimedOut {
                    command: "getprop".to_string(),
                    timeout: Duration::from_secs(2),
                })
            }),
            true,
        );
        let device = Device::new("ABCD1234", AuthState::Authorized);
        assert_eq!(registry.fetch_model(&device).await, None);
    }

    #[tokio::test]
    async fn test_discover_bridge_failure() {
        let (_, registry) = registry(
            ScriptedBridge::new(|_| Ok(BridgeOutput::failed(1, "cannot connect to daemon"))),
            false,
        );
        assert!(matches!(
            registry.discover().await,
            Err(DiscoveryError::CommandFailed(_))
        ));
    }

    #[test]
    fn test_select_single_authorized() {
        let snapshot = devices(&[
            ("ABCD1234", AuthState::Unauthorized),
            ("192.168.1.5:5555", AuthState::Authorized),
        ]);
        let preference = SelectionPreference {
            auto_select_single: true,
            preferred: None,
        };

        let chosen = select(&snapshot, &preference).unwrap();
        assert_eq!(chosen.id(), "192.168.1.5:5555");
    }

    #[test]
    fn test_select_single_without_auto_needs_choice() {
        let snapshot = devices(&[("ABCD1234", AuthState::Authorized)]);
        let err = select(&snapshot, &SelectionPreference::default()).unwrap_err();
        assert!(matches!(
            err,
            SelectionError::AmbiguousWithoutInteraction { ref candidates } if candidates.len() == 1
        ));
    }

    #[test]
    fn test_select_multiple_is_ambiguous() {
        let snapshot = devices(&[
            ("ABCD1234", AuthState::Authorized),
            ("emulator-5554", AuthState::Authorized),
        ]);
        let preference = SelectionPreference {
            auto_select_single: true,
            preferred: None,
        };
        assert!(matches!(
            select(&snapshot, &preference),
            Err(SelectionError::AmbiguousWithoutInteraction { .. })
        ));
    }

    #[test]
    fn test_select_none_available() {
        let snapshot = devices(&[
            ("A", AuthState::Unauthorized),
            ("B", AuthState::Offline),
            ("C", AuthState::Offline),
        ]);
        match select(&snapshot, &SelectionPreference::default()) {
            Err(SelectionError::NoneAvailable {
                unauthorized,
                offline,
            }) => {
                assert_eq!(unauthorized, 1);
                assert_eq!(offline, 2);
            }
            other => panic!("Expected NoneAvailable, got {:?}", other),
        }
        assert!(matches!(
            select(&[], &SelectionPreference::default()),
            Err(SelectionError::NoneAvailable { .. })
        ));
    }

    #[test]
    fn test_select_preferred() {
        let snapshot = devices(&[
            ("ABCD1234", AuthState::Authorized),
            ("emulator-5554", AuthState::Authorized),
            ("OFFLINE1", AuthState::Offline),
        ]);

        let preference = SelectionPreference {
            auto_select_single: false,
            preferred: Some("emulator-5554".to_string()),
        };
        assert_eq!(select(&snapshot, &preference).unwrap().id(), "emulator-5554");

        let preference = SelectionPreference {
            auto_select_single: true,
            preferred: Some("OFFLINE1".to_string()),
        };
        assert!(matches!(
            select(&snapshot, &preference),
            Err(SelectionError::PreferredUnavailable { ref id }) if id == "OFFLINE1"
        ));
    }
}
