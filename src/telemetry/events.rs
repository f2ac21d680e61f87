//! Audit event types for structured logging.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Audit events for the provisioning workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A provisioning run started.
    RunStart {
        /// Identifier shared by every event of this run.
        run_id: Uuid,
        /// Username of the operator.
        user: String,
        /// Process ID of the orchestrator.
        pid: u32,
    },

    /// A provisioning run ended.
    RunEnd {
        /// Identifier of the run.
        run_id: Uuid,
        /// How the run ended.
        outcome: RunOutcome,
        /// Wall-clock duration of the run in seconds.
        duration_sec: u64,
    },

    /// A device was chosen as the forwarding target.
    DeviceSelected {
        /// Bridge identifier of the device.
        device_id: String,
        /// Connection kind (USB, Wi-Fi, Emulator).
        connection: String,
    },

    /// The target port was found to be held by another process.
    PortConflict {
        /// Contested port.
        port: u16,
        /// PID of the owner.
        pid: u32,
        /// Executable name of the owner.
        process: String,
        /// Whether the owner was recognised as a stale relay server.
        stale_server: bool,
    },

    /// A port owner was terminated.
    ProcessTerminated {
        /// Port that was freed.
        port: u16,
        /// PID of the terminated process.
        pid: u32,
        /// Executable name of the terminated process.
        process: String,
        /// Whether the operator approved terminating an unrelated process.
        operator_approved: bool,
    },

    /// A reverse forward was installed on a device.
    ForwardEstablished {
        /// Bridge identifier of the device.
        device_id: String,
        /// Port on the device.
        device_port: u16,
        /// Port on the host.
        host_port: u16,
    },

    /// A reverse forward was removed from a device.
    ForwardRemoved {
        /// Bridge identifier of the device.
        device_id: String,
        /// Port on the device.
        device_port: u16,
    },

    /// The relay server accepted a probe connection.
    ServerReady {
        /// PID of the server.
        pid: u32,
        /// Port it listens on.
        port: u16,
    },

    /// The relay server failed to start or crashed.
    ServerFailed {
        /// Port it was meant to listen on.
        port: u16,
        /// Human-readable reason.
        reason: String,
    },

    /// The relay server was stopped on request.
    ServerStopped {
        /// PID of the server.
        pid: u32,
    },
}

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The relay path was provisioned and then released.
    Completed,
    /// The relay path was provisioned and left running.
    Detached,
    /// A stage failed.
    Aborted,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
