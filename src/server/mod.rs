//! Relay server process lifecycle.
//!
//! ```text
//! NotStarted ──start──▶ Starting ──probe ok──▶ Ready ──stop──▶ Stopped
//!                          │                     │
//!                          ├─exited/timed out──▶ Failed ◀──crash──┘
//! ```
//!
//! Ready is only ever entered after [`probe::accepts_connections`] succeeds.

pub mod error;
pub mod lifecycle;
pub mod probe;

pub use error::{StartError, StopError};
pub use lifecycle::{LivenessStatus, ServerLifecycleManager, ServerProcess, ServerSettings, ServerState};
