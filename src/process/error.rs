//! Error types for process termination.

use thiserror::Error;

/// Errors from [`ProcessInspector::terminate`](super::ProcessInspector::terminate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminateError {
    /// The process no longer exists. Callers treat this as success.
    #[error("Process {0} not found (already exited)")]
    NotFound(u32),

    /// The process exists but could not be signalled.
    #[error("Not permitted to terminate process {pid}: {reason}")]
    PermissionDenied {
        /// Target PID.
        pid: u32,
        /// Underlying reason reported by the OS.
        reason: String,
    },
}
