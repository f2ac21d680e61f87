//! Host process inspection.
//!
//! Answers two questions for the rest of the crate:
//! - which local process (if any) is listening on a TCP port
//! - how to terminate a process by PID, escalating from SIGTERM to SIGKILL
//!
//! Ownership is resolved by reading `/proc/net/tcp{,6}` for listening socket
//! inodes and then scanning `/proc/<pid>/fd` for the process holding them.
//! Scanning other users' file descriptors needs privileges we usually lack, so
//! a listener whose owner cannot be resolved is reported as
//! [`PortOwner::Unknown`] rather than as free.

pub mod error;
pub mod inspector;
pub mod procfs;

pub use error::TerminateError;
pub use inspector::{PortOwner, ProcessInfo, ProcessInspector};
pub use procfs::{SystemInspector, DEFAULT_TERMINATION_GRACE};
