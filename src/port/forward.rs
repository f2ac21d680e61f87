//! Device-to-host reverse port forwarding.
//!
//! A reverse rule makes `tcp:<device_port>` on the device connect to
//! `tcp:<host_port>` on the host. The bridge keys rules by device port, so
//! at most one rule per (device, device port) exists once stale rules are
//! removed first.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::ForwardError;
use crate::device::{BridgeOutput, DeviceBridge};
use crate::telemetry::{self, AuditEvent};

/// An installed reverse forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
    /// Device the rule lives on.
    pub device_id: String,
    /// Port on the device.
    pub device_port: u16,
    /// Port on the host.
    pub host_port: u16,
}

/// Installs, verifies and removes reverse forwards.
pub struct PortForwardManager<B> {
    bridge: Arc<B>,
    timeout: Duration,
}

impl<B: DeviceBridge> PortForwardManager<B> {
    /// Create a manager whose bridge calls are bounded by `timeout`.
    pub fn new(bridge: Arc<B>, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    /// Install `device_port -> host_port` on `device_id`.
    ///
    /// Any existing rule for the same device port is removed first, and the
    /// result is read back from the device before being reported.
    pub async fn establish(
        &self,
        device_id: &str,
        device_port: u16,
        host_port: u16,
    ) -> Result<ForwardRule, ForwardError> {
        self.ensure_present(device_id).await?;

        if self.remove(device_id, device_port).await? {
            debug!("Removed stale reverse rule for tcp:{} on {}", device_port, device_id);
        }

        let device_spec = format!("tcp:{}", device_port);
        let host_spec = format!("tcp:{}", host_port);
        let output = self
            .run(device_id, &["reverse", &device_spec, &host_spec])
            .await?;
        if !output.success || output.reports_error() {
            return Err(failure(device_id, &output));
        }

        let rules = self.list(device_id).await?;
        let matching: Vec<&ForwardRule> = rules
            .iter()
            .filter(|rule| rule.device_port == device_port)
            .collect();

        match matching.as_slice() {
            [rule] if rule.host_port == host_port => {}
            _ => {
                return Err(ForwardError::CommandFailed(format!(
                    "expected one rule {} -> {} on {}, found {}",
                    device_spec,
                    host_spec,
                    device_id,
                    matching.len()
                )));
            }
        }

        info!("Forwarding {} on {} to host {}", device_spec, device_id, host_spec);
        telemetry::audit().log(AuditEvent::ForwardEstablished {
            device_id: device_id.to_string(),
            device_port,
            host_port,
        });

        Ok(ForwardRule {
            device_id: device_id.to_string(),
            device_port,
            host_port,
        })
    }

    /// Remove the rule for `device_port`. Returns whether one existed.
    pub async fn remove(&self, device_id: &str, device_port: u16) -> Result<bool, ForwardError> {
        let device_spec = format!("tcp:{}", device_port);
        let output = self
            .run(device_id, &["reverse", "--remove", &device_spec])
            .await?;

        if output.success && !output.reports_error() {
            telemetry::audit().log(AuditEvent::ForwardRemoved {
                device_id: device_id.to_string(),
                device_port,
            });
            return Ok(true);
        }

        let text = output.combined().to_ascii_lowercase();
        if text.contains("listener") && text.contains("not found") {
            return Ok(false);
        }
        if device_missing(&text) {
            return Err(ForwardError::DeviceUnavailable {
                device_id: device_id.to_string(),
            });
        }

        warn!(
            "Could not remove reverse rule {} on {}: {}",
            device_spec,
            device_id,
            output.combined()
        );
        Ok(false)
    }

    /// Read the device's reverse rule table.
    pub async fn list(&self, device_id: &str) -> Result<Vec<ForwardRule>, ForwardError> {
        let output = self.run(device_id, &["reverse", "--list"]).await?;
        if !output.success {
            return Err(failure(device_id, &output));
        }
        Ok(parse_reverse_list(device_id, &output.stdout))
    }

    async fn ensure_present(&self, device_id: &str) -> Result<(), ForwardError> {
        let output = self.run(device_id, &["get-state"]).await?;
        if output.success && output.stdout.trim() == "device" {
            return Ok(());
        }
        debug!("get-state for {}: {}", device_id, output.combined());
        Err(ForwardError::DeviceUnavailable {
            device_id: device_id.to_string(),
        })
    }

    async fn run(&self, device_id: &str, args: &[&str]) -> Result<BridgeOutput, ForwardError> {
        let mut full = vec!["-s", device_id];
        full.extend_from_slice(args);
        self.bridge
            .run(&full, self.timeout)
            .await
            .map_err(|e| ForwardError::CommandFailed(e.to_string()))
    }
}

fn failure(device_id: &str, output: &BridgeOutput) -> ForwardError {
    let detail = output.combined();
    if device_missing(&detail.to_ascii_lowercase()) {
        ForwardError::DeviceUnavailable {
            device_id: device_id.to_string(),
        }
    } else {
        ForwardError::CommandFailed(detail)
    }
}

/// Bridge messages meaning the device is gone.
fn device_missing(lower: &str) -> bool {
    (lower.contains("device") && lower.contains("not found"))
        || lower.contains("device offline")
        || lower.contains("no devices")
}

/// Parse `reverse --list` output.
///
/// Lines look like `UsbFfs tcp:1935 tcp:1935`; the first `tcp:` token is the
/// device side. Non-TCP rules (`localabstract:` etc.) are skipped.
pub fn parse_reverse_list(device_id: &str, output: &str) -> Vec<ForwardRule> {
    output
        .lines()
        .filter_map(|line| {
            let mut ports = line
                .split_whitespace()
                .filter_map(|token| token.strip_prefix("tcp:"))
                .map(str::parse::<u16>);
            match (ports.next(), ports.next()) {
                (Some(Ok(device_port)), Some(Ok(host_port))) => Some(ForwardRule {
                    device_id: device_id.to_string(),
                    device_port,
                    host_port,
                }),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBridge;
    use std::sync::Mutex;

    const DEVICE: &str = "ABCD1234";

    /// Bridge emulating a device's reverse table. Appends without replacing,
    /// so duplicate rules would be visible.
    fn device_table(present: bool) -> (Arc<Mutex<Vec<(u16, u16)>>>, ScriptedBridge) {
        let table = Arc::new(Mutex::new(Vec::new()));
        let state = table.clone();
        let bridge = ScriptedBridge::new(move |args| {
            let mut rules = state.lock().unwrap();
            let port = |spec: &str| spec.trim_start_matches("tcp:").parse::<u16>().unwrap();
            Ok(match args {
                [_, _, "get-state"] if present => BridgeOutput::ok("device\n"),
                [_, id, ..] if !present => {
                    BridgeOutput::failed(1, format!("adb: error: device '{}' not found", id))
                }
                [_, _, "reverse", "--list"] => BridgeOutput::ok(
                    rules
                        .iter()
                        .map(|(d, h)| format!("UsbFfs tcp:{} tcp:{}\n", d, h))
                        .collect::<String>(),
                ),
                [_, _, "reverse", "--remove", spec] => {
                    let before = rules.len();
                    let device_port = port(*spec);
                    rules.retain(|(d, _)| *d != device_port);
                    if rules.len() == before {
                        BridgeOutput::failed(1, format!("adb: error: listener '{}' not found", spec))
                    } else {
                        BridgeOutput::ok("")
                    }
                }
                [_, _, "reverse", device, host] => {
                    rules.push((port(*device), port(*host)));
                    BridgeOutput::ok("")
                }
                _ => BridgeOutput::failed(1, "unexpected command"),
            })
        });
        (table, bridge)
    }

    fn manager(bridge: ScriptedBridge) -> (Arc<ScriptedBridge>, PortForwardManager<ScriptedBridge>) {
        let bridge = Arc::new(bridge);
        (bridge.clone(), PortForwardManager::new(bridge, Duration::from_secs(5)))
    }

    #[test]
    fn test_parse_reverse_list() {
        let output = "UsbFfs tcp:1935 tcp:1935\n\
                      (reverse) tcp:8080 tcp:9090\n\
                      UsbFfs localabstract:foo tcp:5000\n";
        let rules = parse_reverse_list(DEVICE, output);

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].device_port, 8080);
        assert_eq!(rules[1].host_port, 9090);
        assert_eq!(rules[0].device_id, DEVICE);
    }

    #[tokio::test]
    async fn test_establish_twice_leaves_one_rule() {
        let (table, bridge) = device_table(true);
        let (_, manager) = manager(bridge);

        let first = manager.establish(DEVICE, 1935, 1935).await.unwrap();
        let second = manager.establish(DEVICE, 1935, 1935).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(*table.lock().unwrap(), vec![(1935, 1935)]);
    }

    #[tokio::test]
    async fn test_establish_removes_stale_rule_first() {
        let (table, bridge) = device_table(true);
        table.lock().unwrap().push((1935, 2000));
        let (bridge, manager) = manager(bridge);

        manager.establish(DEVICE, 1935, 1935).await.unwrap();

        assert_eq!(*table.lock().unwrap(), vec![(1935, 1935)]);
        assert_eq!(bridge.count(&["-s", DEVICE, "reverse", "--remove"]), 1);
    }

    #[tokio::test]
    async fn test_establish_missing_device() {
        let (_, bridge) = device_table(false);
        let (bridge, manager) = manager(bridge);

        let err = manager.establish(DEVICE, 1935, 1935).await.unwrap_err();

        assert!(matches!(err, ForwardError::DeviceUnavailable { .. }));
        assert_eq!(bridge.count(&["-s", DEVICE, "reverse"]), 0);
    }

    #[tokio::test]
    async fn test_error_output_with_zero_exit_is_failure() {
        let bridge = ScriptedBridge::new(|args| {
            Ok(match args {
                [_, _, "get-state"] => BridgeOutput::ok("device"),
                [_, _, "reverse", "--remove", _] => BridgeOutput::ok(""),
                [_, _, "reverse", _, _] => BridgeOutput::ok("error: cannot bind listener: Address already in use"),
                _ => BridgeOutput::ok(""),
            })
        });
        let (_, manager) = manager(bridge);

        let err = manager.establish(DEVICE, 1935, 1935).await.unwrap_err();
        assert!(matches!(err, ForwardError::CommandFailed(ref detail) if detail.contains("cannot bind")));
    }

    #[tokio::test]
    async fn test_unverified_rule_is_failure() {
        let bridge = ScriptedBridge::new(|args| {
            Ok(match args {
                [_, _, "get-state"] => BridgeOutput::ok("device"),
                [_, _, "reverse", "--list"] => BridgeOutput::ok(""),
                _ => BridgeOutput::ok(""),
            })
        });
        let (_, manager) = manager(bridge);

        assert!(matches!(
            manager.establish(DEVICE, 1935, 1935).await,
            Err(ForwardError::CommandFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_reports_absence() {
        let (table, bridge) = device_table(true);
        table.lock().unwrap().push((1935, 1935));
        let (_, manager) = manager(bridge);

        assert!(manager.remove(DEVICE, 1935).await.unwrap());
        assert!(!manager.remove(DEVICE, 1935).await.unwrap());
    }
}
