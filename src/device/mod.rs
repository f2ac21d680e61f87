//! Device discovery through the device-bridge tool.
//!
//! Parsing and classification are pure functions in [`model`]; everything
//! that talks to the bridge goes through the [`DeviceBridge`] trait so the
//! registry can be exercised without a real `adb`.

pub mod bridge;
pub mod error;
pub mod launch;
pub mod model;
pub mod registry;

pub use bridge::{AdbBridge, BridgeOutput, DeviceBridge};
pub use error::{BridgeError, DiscoveryError, LaunchError, SelectionError};
pub use launch::launch_app;
pub use model::{classify, parse_device_line, parse_devices_output, AuthState, ConnectionKind, Device};
pub use registry::{select, DeviceRegistry, RegistrySettings, SelectionPreference};
