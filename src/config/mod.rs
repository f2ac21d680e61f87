//! Configuration system for rtmp-relay.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults
//! 2. System config: `/etc/rtmp-relay/config.toml`
//! 3. User config: `~/.config/rtmp-relay/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Every value is optional in the files; later sources override earlier ones.
//! [`Config::validate`] then turns the merged result into [`Settings`], the
//! only form components are constructed from.
//!
//! ```toml
//! [paths]
//! server = "/opt/mona/MonaServer"
//!
//! [device]
//! package = "com.example.cam/.MainActivity"
//!
//! [network]
//! port = 1935
//!
//! [options]
//! force_resolve_port_conflicts = false
//! ```

mod error;
mod loader;
mod schema;
mod settings;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    Config, DeviceConfig, NetworkConfig, OptionsConfig, PathsConfig, ServerConfig, TimingConfig,
};
pub use settings::{Settings, Timing, DEFAULT_BRIDGE, DEFAULT_PORT};
