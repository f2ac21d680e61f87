//! Spawning, readiness polling and supervision of the relay server.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::error::{StartError, StopError};
use super::probe::accepts_connections;
use crate::telemetry::{self, AuditEvent};

/// Lifecycle state of the managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No start attempted.
    NotStarted,
    /// Spawned, readiness not yet confirmed.
    Starting,
    /// Accepted a probe connection.
    Ready,
    /// Exited early, timed out, or crashed after Ready.
    Failed,
    /// Shut down on request.
    Stopped,
}

/// Result of a non-blocking liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    /// Still running.
    Alive,
    /// Exited with the given code (absent when killed by a signal).
    Exited {
        /// Exit code.
        code: Option<i32>,
    },
    /// No process is being managed.
    NotRunning,
}

/// Snapshot of the spawned server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProcess {
    /// Process ID.
    pub pid: u32,
    /// Executable that was spawned.
    pub executable: PathBuf,
    /// Spawn time.
    pub started_at: DateTime<Utc>,
    /// Last time a liveness check saw it running.
    pub last_seen_alive: DateTime<Utc>,
    /// Set only after a probe connection succeeded.
    pub ready: bool,
}

/// Lifecycle tunables.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port the server is expected to listen on.
    pub port: u16,
    /// Extra arguments passed to the server executable.
    pub args: Vec<String>,
    /// Total readiness window.
    pub readiness_timeout: Duration,
    /// Interval between readiness checks.
    pub poll_interval: Duration,
    /// SIGTERM to SIGKILL interval on stop.
    pub stop_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 1935,
            args: Vec::new(),
            readiness_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
            stop_grace: Duration::from_millis(500),
        }
    }
}

/// Sole owner of the relay server process.
pub struct ServerLifecycleManager {
    settings: ServerSettings,
    state: ServerState,
    child: Option<Child>,
    process: Option<ServerProcess>,
}

impl ServerLifecycleManager {
    /// Create a manager in `NotStarted`.
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            settings,
            state: ServerState::NotStarted,
            child: None,
            process: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The managed process, if one was spawned.
    pub fn process(&self) -> Option<&ServerProcess> {
        self.process.as_ref()
    }

    /// Address probed for readiness.
    pub fn probe_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.settings.port))
    }

    fn transition(&mut self, next: ServerState) {
        debug!("Relay server: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Spawn the server in `working_dir` and wait until it accepts
    /// connections.
    ///
    /// On `TimedOut` the process is left running; call [`stop`](Self::stop)
    /// to get rid of it.
    pub async fn start(&mut self, executable: &Path, working_dir: &Path) -> Result<ServerProcess, StartError> {
        if let Some(child) = &self.child
            && let Some(pid) = child.id()
        {
            return Err(StartError::AlreadyRunning { pid });
        }

        info!("Starting relay server {}", executable.display());
        let child = Command::new(executable)
            .args(&self.settings.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| {
                self.state = ServerState::Failed;
                StartError::Spawn {
                    path: executable.to_path_buf(),
                    source,
                }
            })?;

        let pid = child.id().unwrap_or_default();
        let now = Utc::now();
        self.child = Some(child);
        self.process = Some(ServerProcess {
            pid,
            executable: executable.to_path_buf(),
            started_at: now,
            last_seen_alive: now,
            ready: false,
        });
        self.transition(ServerState::Starting);

        match self.await_ready(pid).await {
            Ok(process) => {
                self.transition(ServerState::Ready);
                telemetry::audit().log(AuditEvent::ServerReady {
                    pid,
                    port: self.settings.port,
                });
                info!("Relay server ready on port {} (PID {})", self.settings.port, pid);
                Ok(process)
            }
            Err(e) => {
                self.transition(ServerState::Failed);
                telemetry::audit().log(AuditEvent::ServerFailed {
                    port: self.settings.port,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn await_ready(&mut self, pid: u32) -> Result<ServerProcess, StartError> {
        let addr = self.probe_addr();
        let started = Instant::now();

        loop {
            sleep(self.settings.poll_interval).await;

            if let Some(exited) = self.reap_exited() {
                return Err(exited);
            }

            if accepts_connections(addr, self.settings.poll_interval).await {
                // The listener may belong to someone else if the child died
                // while the probe was connecting.
                if let Some(exited) = self.reap_exited() {
                    return Err(exited);
                }
                let process = self.process.as_mut().ok_or(StartError::ExitedEarly { code: None })?;
                process.ready = true;
                process.last_seen_alive = Utc::now();
                return Ok(process.clone());
            }

            if started.elapsed() >= self.settings.readiness_timeout {
                return Err(StartError::TimedOut {
                    pid,
                    waited: started.elapsed(),
                });
            }
            debug!("Relay server not accepting connections on {} yet", addr);
        }
    }

    /// Drop the child handle and report `ExitedEarly` if it has exited.
    fn reap_exited(&mut self) -> Option<StartError> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                Some(StartError::ExitedEarly {
                    code: status.code(),
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Could not poll relay server status: {}", e);
                None
            }
        }
    }

    /// Non-blocking liveness check.
    ///
    /// A process found dead after Ready moves the state to `Failed`.
    pub fn supervise(&mut self) -> LivenessStatus {
        let Some(child) = self.child.as_mut() else {
            return LivenessStatus::NotRunning;
        };

        match child.try_wait() {
            Ok(None) => {
                if let Some(process) = self.process.as_mut() {
                    process.last_seen_alive = Utc::now();
                }
                LivenessStatus::Alive
            }
            Ok(Some(status)) => {
                self.child = None;
                let code = status.code();
                if self.state == ServerState::Ready {
                    warn!("Relay server exited unexpectedly ({})", status);
                    self.transition(ServerState::Failed);
                    telemetry::audit().log(AuditEvent::ServerFailed {
                        port: self.settings.port,
                        reason: format!("exited: {}", status),
                    });
                }
                LivenessStatus::Exited { code }
            }
            Err(e) => {
                warn!("Could not poll relay server status: {}", e);
                LivenessStatus::Alive
            }
        }
    }

    /// Stop the server: SIGTERM, then SIGKILL after the grace interval.
    pub async fn stop(&mut self) -> Result<(), StopError> {
        let Some(mut child) = self.child.take() else {
            if self.state == ServerState::Ready {
                self.transition(ServerState::Stopped);
            }
            return Ok(());
        };

        if let Some(pid) = child.id() {
            let target = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            match kill(target, Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => {
                    self.child = Some(child);
                    return Err(StopError::Signal {
                        pid,
                        reason: e.to_string(),
                    });
                }
            }

            if tokio::time::timeout(self.settings.stop_grace, child.wait())
                .await
                .is_err()
            {
                warn!("Relay server (PID {}) ignored SIGTERM, killing", pid);
                child.kill().await?;
            }

            telemetry::audit().log(AuditEvent::ServerStopped { pid });
            info!("Relay server (PID {}) stopped", pid);
        } else {
            child.wait().await?;
        }

        self.transition(ServerState::Stopped);
        Ok(())
    }

    /// Stop managing the server without terminating it.
    pub fn detach(&mut self) -> Option<ServerProcess> {
        self.child = None;
        self.process.clone()
    }
}
