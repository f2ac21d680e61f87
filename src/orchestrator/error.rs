//! Workflow error taxonomy.

use thiserror::Error;

use super::state::Stage;
use crate::device::{DiscoveryError, SelectionError};
use crate::port::{ConflictError, ForwardError};
use crate::server::{StartError, StopError};

/// A stage failure, preserved as the reason a run aborted.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The bridge tool is unusable.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// No device could be chosen.
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// The relay port could not be freed.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The reverse forward could not be installed.
    #[error(transparent)]
    Forward(#[from] ForwardError),

    /// The relay server did not become ready.
    #[error(transparent)]
    Start(#[from] StartError),

    /// A stage was entered out of order.
    #[error("Invalid workflow transition {from} -> {to}")]
    InvalidTransition {
        /// Current stage.
        from: Stage,
        /// Requested stage.
        to: Stage,
    },
}

impl WorkflowError {
    /// Whether the operator can fix this by choosing differently or
    /// reconfiguring (as opposed to an environment failure).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Selection(_) | Self::Conflict(_))
    }
}

/// Errors from releasing what a run provisioned.
#[derive(Debug, Error)]
pub enum TeardownError {
    /// The relay server could not be stopped.
    #[error(transparent)]
    Stop(#[from] StopError),

    /// The reverse forward could not be removed.
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let selection: WorkflowError = SelectionError::NoneAvailable {
            unauthorized: 0,
            offline: 0,
        }
        .into();
        assert!(selection.is_recoverable());

        let start: WorkflowError = StartError::ExitedEarly { code: Some(1) }.into();
        assert!(!start.is_recoverable());

        let discovery: WorkflowError = DiscoveryError::CommandFailed("x".to_string()).into();
        assert!(!discovery.is_recoverable());
    }

    #[test]
    fn test_messages_pass_through() {
        let err: WorkflowError = ForwardError::DeviceUnavailable {
            device_id: "ABCD1234".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Device ABCD1234 is no longer available");
    }
}
