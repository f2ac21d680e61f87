//! Error types for port conflict resolution and forwarding.

use thiserror::Error;

use crate::process::ProcessInfo;

/// Errors from freeing the target port.
#[derive(Debug, Clone, Error)]
pub enum ConflictError {
    /// An unrelated process holds the port and forced resolution is off.
    ///
    /// Recoverable: the operator may approve terminating `owner`.
    #[error("Port {port} is in use by {owner}; not terminating an unrelated process")]
    PolicyDenied {
        /// Contested port.
        port: u16,
        /// The process holding it.
        owner: ProcessInfo,
    },

    /// The port is held but its owner cannot be identified (usually another
    /// user's process).
    #[error("Port {port} is in use by a process that cannot be inspected")]
    OwnerUnknown {
        /// Contested port.
        port: u16,
    },

    /// The port was still held after every attempt.
    #[error("Port {port} still in use after {attempts} attempt(s){}", owner_suffix(.owner))]
    Unresolvable {
        /// Contested port.
        port: u16,
        /// Attempts made.
        attempts: u32,
        /// Last identified owner.
        owner: Option<ProcessInfo>,
    },
}

fn owner_suffix(owner: &Option<ProcessInfo>) -> String {
    owner
        .as_ref()
        .map(|o| format!(" (held by {})", o))
        .unwrap_or_default()
}

impl ConflictError {
    /// The process the operator could act on, when one was identified.
    pub fn owner(&self) -> Option<&ProcessInfo> {
        match self {
            Self::PolicyDenied { owner, .. } => Some(owner),
            Self::Unresolvable { owner, .. } => owner.as_ref(),
            Self::OwnerUnknown { .. } => None,
        }
    }
}

/// Errors from installing a reverse forward.
#[derive(Debug, Clone, Error)]
pub enum ForwardError {
    /// The device went away after selection.
    #[error("Device {device_id} is no longer available")]
    DeviceUnavailable {
        /// Bridge identifier.
        device_id: String,
    },

    /// The bridge reported a failure.
    #[error("Port forward failed: {0}")]
    CommandFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> ProcessInfo {
        ProcessInfo {
            pid: 4242,
            name: "nginx".to_string(),
            exe: None,
            cmdline: Vec::new(),
        }
    }

    #[test]
    fn test_policy_denied_names_owner() {
        let err = ConflictError::PolicyDenied {
            port: 1935,
            owner: owner(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1935"));
        assert!(msg.contains("nginx (PID 4242)"));
        assert_eq!(err.owner().map(|o| o.pid), Some(4242));
    }

    #[test]
    fn test_unresolvable_message() {
        let err = ConflictError::Unresolvable {
            port: 1935,
            attempts: 3,
            owner: None,
        };
        assert_eq!(err.to_string(), "Port 1935 still in use after 3 attempt(s)");

        let err = ConflictError::Unresolvable {
            port: 1935,
            attempts: 3,
            owner: Some(owner()),
        };
        assert!(err.to_string().ends_with("(held by nginx (PID 4242))"));
    }
}
