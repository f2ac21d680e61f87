//! End-to-end provisioning workflow.
//!
//! ```text
//! Discovering → Selecting → ResolvingPort → Forwarding → StartingServer → Ready
//!      ▲                                        │
//!      └──────────── device vanished ───────────┘        any failure → Aborted
//! ```
//!
//! Stages run strictly one after another. Retry policy lives here and only
//! here:
//!
//! - a policy-denied port conflict is put to the operator, and approval
//!   re-runs resolution for that one process;
//! - a failed forward command is retried once;
//! - a device that vanished before forwarding sends the run back to
//!   discovery once.
//!
//! The port is resolved again right before the server starts, because
//! anything may have bound it since the first check. With server start
//! turned off the run goes from `Forwarding` straight to `Ready` and only
//! records who is listening on the port.

mod error;
mod hooks;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use error::{TeardownError, WorkflowError};
pub use hooks::{HeadlessHooks, OperatorHooks};
pub use state::{Stage, StageRecord, WorkflowState};

use crate::config::Settings;
use crate::device::{
    self, Device, DeviceBridge, DeviceRegistry, RegistrySettings, SelectionError, SelectionPreference,
};
use crate::port::{
    ConflictError, ForwardError, ForwardRule, PortBinding, PortConflictResolver, PortForwardManager,
    ResolverSettings,
};
use crate::process::{PortOwner, ProcessInspector};
use crate::server::{LivenessStatus, ServerLifecycleManager, ServerSettings};
use crate::telemetry::{self, AuditEvent, RunOutcome};

/// Times a vanished device may send the run back to discovery.
const MAX_REDISCOVERIES: u32 = 1;

/// What the workflow provisions.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Relay port, on both device and host.
    pub port: u16,
    /// Executable name identifying a stale server.
    pub server_identity: String,
    /// Relay server executable.
    pub server: PathBuf,
    /// Relay server working directory.
    pub server_dir: PathBuf,
    /// Device selection rules.
    pub selection: SelectionPreference,
    /// Start the relay server after forwarding.
    pub start_server: bool,
}

/// Sequences discovery, port resolution, forwarding and server start.
pub struct Workflow<B, P, H> {
    registry: DeviceRegistry<B>,
    resolver: PortConflictResolver<P>,
    forwarder: PortForwardManager<B>,
    server: ServerLifecycleManager,
    hooks: H,
    config: WorkflowConfig,
}

impl<B, P, H> Workflow<B, P, H>
where
    B: DeviceBridge,
    P: ProcessInspector,
    H: OperatorHooks,
{
    /// Assemble a workflow from its components.
    pub fn new(
        registry: DeviceRegistry<B>,
        resolver: PortConflictResolver<P>,
        forwarder: PortForwardManager<B>,
        server: ServerLifecycleManager,
        hooks: H,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            registry,
            resolver,
            forwarder,
            server,
            hooks,
            config,
        }
    }

    /// Build every component from validated settings.
    pub fn from_settings(settings: &Settings, bridge: Arc<B>, inspector: Arc<P>, hooks: H) -> Self {
        let timing = &settings.timing;

        let registry = DeviceRegistry::new(
            bridge.clone(),
            RegistrySettings {
                fetch_models: settings.fetch_device_models,
                command_timeout: timing.bridge_timeout,
                model_timeout: timing.model_timeout,
            },
        );
        let resolver = PortConflictResolver::new(
            inspector,
            ResolverSettings {
                attempts: timing.conflict_attempts,
                release_delay: timing.port_release_delay,
                force_foreign: settings.force_resolve_port_conflicts,
            },
        );
        let forwarder = PortForwardManager::new(bridge, timing.bridge_timeout);
        let server = ServerLifecycleManager::new(ServerSettings {
            port: settings.port,
            args: settings.server_args.clone(),
            readiness_timeout: timing.readiness_timeout,
            poll_interval: timing.readiness_poll,
            stop_grace: timing.termination_grace,
        });

        Self::new(
            registry,
            resolver,
            forwarder,
            server,
            hooks,
            WorkflowConfig {
                port: settings.port,
                server_identity: settings.server_identity.clone(),
                server: settings.server.clone(),
                server_dir: settings.server_dir.clone(),
                selection: SelectionPreference {
                    auto_select_single: settings.auto_select_single_device,
                    preferred: settings.preferred_device.clone(),
                },
                start_server: settings.auto_start_server,
            },
        )
    }

    /// Run once from `Discovering` to `Ready` or `Aborted`.
    pub async fn run(&mut self) -> WorkflowState {
        let mut state = WorkflowState::new();
        telemetry::audit().log(AuditEvent::RunStart {
            run_id: state.run_id(),
            user: whoami(),
            pid: std::process::id(),
        });
        self.hooks.stage_changed(Stage::Discovering);

        if let Err(e) = self.drive(&mut state).await {
            let stage = state.stage();
            self.hooks.report_failure(stage, &e);
            state.abort(e);
            self.hooks.stage_changed(Stage::Aborted);
            record_run_end(&state, RunOutcome::Aborted);
        }

        state
    }

    async fn drive(&mut self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let version = self.registry.bridge_version().await?;
        debug!("Device bridge version {}", version);
        state.bridge_version = Some(version);

        let mut rediscoveries = 0;
        loop {
            let devices = self.registry.discover().await?;
            self.hooks.devices_discovered(&devices);

            self.enter(state, Stage::Selecting)?;
            let device = self.select(&devices)?;
            telemetry::audit().log(AuditEvent::DeviceSelected {
                device_id: device.id().to_string(),
                connection: device.connection().to_string(),
            });
            info!("Using device {}", device);
            state.device = Some(device.clone());

            self.enter(state, Stage::ResolvingPort)?;
            state.binding = Some(self.resolve_port().await?);

            self.enter(state, Stage::Forwarding)?;
            match self.forward(device.id()).await {
                Ok(rule) => {
                    state.forward = Some(rule);
                    break;
                }
                Err(ForwardError::DeviceUnavailable { device_id })
                    if rediscoveries < MAX_REDISCOVERIES =>
                {
                    rediscoveries += 1;
                    warn!("Device {} disappeared, rediscovering", device_id);
                    state.device = None;
                    self.enter(state, Stage::Discovering)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !self.config.start_server {
            let listener = self.resolver.observe(self.config.port).await;
            match &listener {
                PortOwner::Free => info!(
                    "Server start disabled; nothing listens on port {}",
                    self.config.port
                ),
                PortOwner::Process(owner) => info!(
                    "Server start disabled; port {} held by {}",
                    self.config.port, owner
                ),
                PortOwner::Unknown => warn!(
                    "Server start disabled; port {} is in use by an unknown process",
                    self.config.port
                ),
            }
            state.listener = Some(listener);
            self.enter(state, Stage::Ready)?;
            return Ok(());
        }

        self.enter(state, Stage::StartingServer)?;
        state.binding = Some(self.resolve_port().await?);
        let process = self
            .server
            .start(&self.config.server, &self.config.server_dir)
            .await?;
        state.server = Some(process);

        self.enter(state, Stage::Ready)?;
        Ok(())
    }

    fn enter(&self, state: &mut WorkflowState, stage: Stage) -> Result<(), WorkflowError> {
        state.advance(stage)?;
        self.hooks.stage_changed(stage);
        Ok(())
    }

    fn select(&self, devices: &[Device]) -> Result<Device, WorkflowError> {
        match device::select(devices, &self.config.selection) {
            Err(SelectionError::AmbiguousWithoutInteraction { candidates }) => {
                match self.hooks.choose_device(&candidates) {
                    Some(index) if index < candidates.len() => Ok(candidates[index].clone()),
                    _ => Err(SelectionError::AmbiguousWithoutInteraction { candidates }.into()),
                }
            }
            other => Ok(other?),
        }
    }

    async fn resolve_port(&self) -> Result<PortBinding, WorkflowError> {
        let port = self.config.port;
        let identity = self.config.server_identity.as_str();

        match self.resolver.resolve(port, identity).await {
            Err(ConflictError::PolicyDenied { port, owner }) => {
                if !self.hooks.approve_termination(port, &owner) {
                    return Err(ConflictError::PolicyDenied { port, owner }.into());
                }
                info!("Operator approved terminating {}", owner);
                Ok(self
                    .resolver
                    .resolve_approved(port, identity, owner.pid)
                    .await?)
            }
            other => Ok(other?),
        }
    }

    async fn forward(&self, device_id: &str) -> Result<ForwardRule, ForwardError> {
        let port = self.config.port;
        match self.forwarder.establish(device_id, port, port).await {
            Err(ForwardError::CommandFailed(detail)) => {
                warn!("Port forward failed ({}), retrying once", detail);
                self.forwarder.establish(device_id, port, port).await
            }
            other => other,
        }
    }

    /// Non-blocking liveness check of the started server.
    pub fn supervise(&mut self) -> LivenessStatus {
        self.server.supervise()
    }

    /// Stop the server and remove the forward installed by `state`. Also
    /// cleans up after an aborted run.
    ///
    /// Both are attempted even if the first fails; the first error is
    /// returned.
    pub async fn teardown(&mut self, state: &WorkflowState) -> Result<(), TeardownError> {
        let stopped = self.server.stop().await;

        let removed = match &state.forward {
            Some(rule) => self
                .forwarder
                .remove(&rule.device_id, rule.device_port)
                .await
                .map(|_| ()),
            None => Ok(()),
        };

        if state.is_ready() {
            record_run_end(state, RunOutcome::Completed);
        }
        stopped?;
        removed?;
        Ok(())
    }

    /// Leave the server and forward running.
    pub fn detach(&mut self, state: &WorkflowState) {
        self.server.detach();
        record_run_end(state, RunOutcome::Detached);
    }

    /// Operator hooks.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }
}

fn record_run_end(state: &WorkflowState, outcome: RunOutcome) {
    let elapsed = chrono::Utc::now() - state.started_at();
    telemetry::audit().log(AuditEvent::RunEnd {
        run_id: state.run_id(),
        outcome,
        duration_sec: u64::try_from(elapsed.num_seconds()).unwrap_or_default(),
    });
}

/// Get the current username for audit logging.
fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
