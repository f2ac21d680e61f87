//! Syslog integration for audit logging.

use std::sync::{Mutex, OnceLock};

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "RTMP_RELAY";

/// Global audit logger instance.
static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Returned by [`audit`] before initialization.
static NULL_LOGGER: AuditLogger = AuditLogger { writer: None };

/// Audit logger that writes structured JSON events to syslog.
///
/// Uses interior mutability (Mutex) to allow logging from shared references,
/// which is necessary since the logger is stored in a global OnceLock.
pub struct AuditLogger {
    /// None indicates a null logger.
    writer: Option<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>>,
}

impl AuditLogger {
    /// Create a new audit logger connected to the local syslog socket.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer =
            syslog::unix(formatter).map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log an audit event to syslog.
    ///
    /// The event is serialized to JSON with an ISO8601 timestamp.
    /// If this is a null logger, the event is only traced.
    pub fn log(&self, event: AuditEvent) {
        let timestamped = event.with_timestamp();

        let json = match serde_json::to_string(&timestamped) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        let Some(ref writer) = self.writer else {
            debug!("Audit (null logger): {}", json);
            return;
        };

        match writer.lock() {
            Ok(mut writer) => {
                if let Err(e) = writer.info(&json) {
                    error!("Failed to write to syslog: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to acquire syslog writer lock: {}", e);
            }
        }
        debug!("Logged audit event: {}", json);
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}

/// Initialize the global audit logger against syslog.
///
/// Returns an error if syslog connection fails or if already initialized.
pub fn init_logger() -> Result<(), TelemetryError> {
    let logger = AuditLogger::new()?;

    AUDIT_LOGGER
        .set(logger)
        .map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Install a null global logger.
pub fn init_null_logger() -> Result<(), TelemetryError> {
    AUDIT_LOGGER
        .set(AuditLogger::new_null())
        .map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Get a reference to the global audit logger.
///
/// Before initialization this is a null logger, so library code and tests
/// can log unconditionally.
pub fn audit() -> &'static AuditLogger {
    AUDIT_LOGGER.get().unwrap_or(&NULL_LOGGER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RunOutcome;

    #[test]
    fn test_syslog_tag() {
        assert_eq!(SYSLOG_TAG, "RTMP_RELAY");
    }

    #[test]
    fn test_null_logger_discards() {
        let logger = AuditLogger::new_null();
        assert!(logger.is_null());

        logger.log(AuditEvent::RunEnd {
            run_id: uuid::Uuid::nil(),
            outcome: RunOutcome::Completed,
            duration_sec: 1,
        });
    }

    #[test]
    fn test_audit_before_init_is_usable() {
        audit().log(AuditEvent::ServerStopped { pid: 1 });
    }

    #[test]
    #[ignore = "Requires running syslog daemon"]
    fn test_logger_creation() {
        let logger = AuditLogger::new();
        assert!(logger.is_ok());
    }
}
