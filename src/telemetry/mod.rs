//! Audit logging for rtmp-relay.
//!
//! Actions with effects outside this process (terminating a port owner,
//! installing a reverse forward on a device, spawning the relay server) are
//! recorded as structured events in syslog under the `RTMP_RELAY` tag.
//!
//! # Architecture
//!
//! - **Audit logging** (syslog): what the tool did to the system
//! - **Debug logging** (tracing): development logs go to stderr via `tracing`
//!
//! # Usage
//!
//! ```ignore
//! use rtmp_relay::telemetry::{self, AuditEvent};
//!
//! telemetry::init_logger()?;
//!
//! telemetry::audit().log(AuditEvent::ForwardEstablished {
//!     device_id: "ABCD1234".to_string(),
//!     device_port: 1935,
//!     host_port: 1935,
//! });
//! ```
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"process_terminated","port":1935,"pid":4242,"process":"MonaServer","operator_approved":false}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, RunOutcome};
pub use self::syslog::{audit, init_logger, init_null_logger, AuditLogger, SYSLOG_TAG};
