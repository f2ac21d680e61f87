//! Companion app launch on the selected device.

use std::time::Duration;

use tracing::info;

use super::bridge::DeviceBridge;
use super::error::LaunchError;

/// Start `component` (`package/activity`) on `device_id` via the activity
/// manager.
///
/// `am start` exits zero on most failures, so the printed output decides.
pub async fn launch_app<B: DeviceBridge>(
    bridge: &B,
    device_id: &str,
    component: &str,
    timeout: Duration,
) -> Result<(), LaunchError> {
    let valid = component
        .split_once('/')
        .is_some_and(|(package, activity)| !package.is_empty() && !activity.is_empty());
    if !valid {
        return Err(LaunchError::InvalidComponent(component.to_string()));
    }

    let output = bridge
        .run(&["-s", device_id, "shell", "am", "start", "-n", component], timeout)
        .await?;

    if output.success && !output.reports_error() {
        info!("Launched {} on {}", component, device_id);
        return Ok(());
    }

    let detail = output.combined();
    let lower = detail.to_ascii_lowercase();
    if lower.contains("permission denial") || lower.contains("securityexception") {
        Err(LaunchError::PermissionDenied(detail))
    } else if lower.contains("does not exist")
        || lower.contains("not found")
        || lower.contains("unable to resolve")
    {
        Err(LaunchError::NotFound(detail))
    } else {
        Err(LaunchError::Failed(detail))
    }
}
