//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a TOML configuration file.
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// A configuration value is invalid.
    #[error("Invalid config value for {field}: {message}")]
    InvalidValue {
        /// The field name that has an invalid value.
        field: String,
        /// Description of why the value is invalid.
        message: String,
    },

    /// A required value is not set anywhere.
    #[error("Missing config value {field} (set it in a config file or with {flag})")]
    MissingValue {
        /// The field name.
        field: String,
        /// CLI flag that can supply it.
        flag: String,
    },

    /// No bridge path configured and none found on PATH.
    #[error("Device bridge '{0}' not found on PATH (set paths.bridge or --bridge)")]
    BridgeNotFound(String),
}
