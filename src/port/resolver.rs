//! Port conflict resolution.
//!
//! # Policy
//!
//! | Owner                               | Action                          |
//! |-------------------------------------|---------------------------------|
//! | nobody                              | none                            |
//! | the relay server (stale instance)   | terminate, wait, re-check       |
//! | anything else, forced resolution on | terminate, wait, re-check       |
//! | anything else, forced resolution off| `PolicyDenied`, no termination  |
//! | unidentifiable                      | `OwnerUnknown`, no termination  |
//!
//! The detect/terminate/wait cycle runs a bounded number of times.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::error::ConflictError;
use crate::process::{PortOwner, ProcessInfo, ProcessInspector, TerminateError};
use crate::telemetry::{self, AuditEvent};

/// Who holds a port, relative to the managed relay server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Nothing listens on the port.
    Free,
    /// A stale instance of the relay server.
    OwnedBySelf,
    /// An unrelated process.
    OwnedByOther,
}

impl Classification {
    /// Classify a known owner against the server's executable identity.
    pub fn of(owner: &ProcessInfo, server_identity: &str) -> Self {
        if owner.matches_identity(server_identity) {
            Self::OwnedBySelf
        } else {
            Self::OwnedByOther
        }
    }
}

/// A classified observation of one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    /// The port.
    pub port: u16,
    /// Current owner, if any.
    pub owner: Option<ProcessInfo>,
    /// Classification of `owner`.
    pub classification: Classification,
    /// Processes terminated to reach this state.
    pub released: Vec<ProcessInfo>,
}

impl PortBinding {
    /// Classify a raw ownership snapshot. `Unknown` owners yield `None`.
    pub fn observed(port: u16, owner: PortOwner, server_identity: &str) -> Option<Self> {
        match owner {
            PortOwner::Free => Some(Self::free(port, Vec::new())),
            PortOwner::Process(info) => Some(Self {
                port,
                classification: Classification::of(&info, server_identity),
                owner: Some(info),
                released: Vec::new(),
            }),
            PortOwner::Unknown => None,
        }
    }

    fn free(port: u16, released: Vec<ProcessInfo>) -> Self {
        Self {
            port,
            owner: None,
            classification: Classification::Free,
            released,
        }
    }

    /// True when nothing holds the port.
    pub fn is_free(&self) -> bool {
        self.classification == Classification::Free
    }
}

/// Resolver tunables.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Detect/terminate/wait cycles before giving up.
    pub attempts: u32,
    /// Pause after a termination before re-checking.
    pub release_delay: Duration,
    /// Terminate unrelated owners too.
    pub force_foreign: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            release_delay: Duration::from_millis(500),
            force_foreign: false,
        }
    }
}

/// Which unrelated owners may be terminated in one resolution.
#[derive(Debug, Clone, Copy)]
enum ForcePolicy {
    Configured,
    ApprovedPid(u32),
}

/// Frees the relay port, terminating owners only when policy allows.
pub struct PortConflictResolver<P> {
    inspector: Arc<P>,
    settings: ResolverSettings,
}

impl<P: ProcessInspector> PortConflictResolver<P> {
    /// Create a resolver over `inspector`.
    pub fn new(inspector: Arc<P>, settings: ResolverSettings) -> Self {
        Self { inspector, settings }
    }

    /// Make `port` free, terminating stale server instances (and unrelated
    /// owners when forced resolution is configured).
    pub async fn resolve(&self, port: u16, server_identity: &str) -> Result<PortBinding, ConflictError> {
        self.resolve_with(port, server_identity, ForcePolicy::Configured)
            .await
    }

    /// Like [`resolve`](Self::resolve), additionally allowed to terminate
    /// the unrelated process `pid` that the operator approved.
    pub async fn resolve_approved(
        &self,
        port: u16,
        server_identity: &str,
        pid: u32,
    ) -> Result<PortBinding, ConflictError> {
        self.resolve_with(port, server_identity, ForcePolicy::ApprovedPid(pid))
            .await
    }

    /// Who holds `port` right now, without touching it.
    pub async fn observe(&self, port: u16) -> PortOwner {
        self.inspector.find_owner(port).await
    }

    fn may_terminate(&self, policy: ForcePolicy, owner: &ProcessInfo, classification: Classification) -> bool {
        match classification {
            Classification::Free => false,
            Classification::OwnedBySelf => true,
            Classification::OwnedByOther => match policy {
                ForcePolicy::Configured => self.settings.force_foreign,
                ForcePolicy::ApprovedPid(pid) => self.settings.force_foreign || pid == owner.pid,
            },
        }
    }

    async fn resolve_with(
        &self,
        port: u16,
        server_identity: &str,
        policy: ForcePolicy,
    ) -> Result<PortBinding, ConflictError> {
        let attempts = self.settings.attempts.max(1);
        let mut released = Vec::new();
        let mut last_owner = None;

        for attempt in 1..=attempts {
            let owner = match self.inspector.find_owner(port).await {
                PortOwner::Free => {
                    debug!("Port {} is free", port);
                    return Ok(PortBinding::free(port, released));
                }
                PortOwner::Unknown => return Err(ConflictError::OwnerUnknown { port }),
                PortOwner::Process(owner) => owner,
            };

            let classification = Classification::of(&owner, server_identity);
            telemetry::audit().log(AuditEvent::PortConflict {
                port,
                pid: owner.pid,
                process: owner.name.clone(),
                stale_server: classification == Classification::OwnedBySelf,
            });

            if !self.may_terminate(policy, &owner, classification) {
                return Err(ConflictError::PolicyDenied { port, owner });
            }

            info!(
                "Port {} held by {} ({:?}), terminating (attempt {}/{})",
                port, owner, classification, attempt, attempts
            );
            match self.inspector.terminate(owner.pid).await {
                Ok(()) => {
                    telemetry::audit().log(AuditEvent::ProcessTerminated {
                        port,
                        pid: owner.pid,
                        process: owner.name.clone(),
                        operator_approved: matches!(policy, ForcePolicy::ApprovedPid(_)),
                    });
                    released.push(owner.clone());
                }
                Err(TerminateError::NotFound(pid)) => {
                    debug!("PID {} exited before it could be terminated", pid);
                }
                Err(e) => warn!("{}", e),
            }
            last_owner = Some(owner);

            sleep(self.settings.release_delay).await;
        }

        match self.inspector.find_owner(port).await {
            PortOwner::Free => Ok(PortBinding::free(port, released)),
            PortOwner::Process(owner) => Err(ConflictError::Unresolvable {
                port,
                attempts,
                owner: Some(owner),
            }),
            PortOwner::Unknown => Err(ConflictError::Unresolvable {
                port,
                attempts,
                owner: last_owner,
            }),
        }
    }
}
