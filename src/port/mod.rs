//! Port ownership and device-to-host forwarding.
//!
//! Both halves treat what they observe as a snapshot: the resolver re-queries
//! the owner before and after every termination, and the forward manager
//! re-reads the device's rule table after every change.

pub mod error;
pub mod forward;
pub mod resolver;

pub use error::{ConflictError, ForwardError};
pub use forward::{parse_reverse_list, ForwardRule, PortForwardManager};
pub use resolver::{Classification, PortBinding, PortConflictResolver, ResolverSettings};
