//! Per-run workflow ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::WorkflowError;
use crate::device::Device;
use crate::port::{ForwardRule, PortBinding};
use crate::process::PortOwner;
use crate::server::ServerProcess;

/// Provisioning stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Listing devices.
    Discovering,
    /// Choosing one device.
    Selecting,
    /// Freeing the relay port.
    ResolvingPort,
    /// Installing the reverse forward.
    Forwarding,
    /// Starting the relay server.
    StartingServer,
    /// Relay path provisioned.
    Ready,
    /// A stage failed.
    Aborted,
}

impl Stage {
    /// No further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Aborted)
    }

    /// Allowed edges: the linear chain, Forwarding back to Discovering when
    /// the device vanished, Forwarding straight to Ready when the server is
    /// left to the operator, and any non-terminal stage to Aborted.
    pub fn can_transition_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (from, Aborted) => !from.is_terminal(),
            (Discovering, Selecting)
            | (Selecting, ResolvingPort)
            | (ResolvingPort, Forwarding)
            | (Forwarding, StartingServer)
            | (Forwarding, Discovering)
            | (Forwarding, Ready)
            | (StartingServer, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovering => "discovering devices",
            Self::Selecting => "selecting device",
            Self::ResolvingPort => "resolving port",
            Self::Forwarding => "forwarding port",
            Self::StartingServer => "starting server",
            Self::Ready => "ready",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// One entry in the stage history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    /// Stage entered.
    pub stage: Stage,
    /// When.
    pub entered_at: DateTime<Utc>,
}

/// Stage history and artifacts of a single run.
#[derive(Debug)]
pub struct WorkflowState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    history: Vec<StageRecord>,
    error: Option<WorkflowError>,
    /// Device-bridge version reported at the start of the run.
    pub bridge_version: Option<String>,
    /// Selected device.
    pub device: Option<Device>,
    /// Last port observation.
    pub binding: Option<PortBinding>,
    /// Installed forward.
    pub forward: Option<ForwardRule>,
    /// Started server.
    pub server: Option<ServerProcess>,
    /// Relay port owner seen after forwarding when the server is not
    /// started by this run.
    pub listener: Option<PortOwner>,
}

impl WorkflowState {
    /// A fresh run at `Discovering`.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            history: vec![StageRecord {
                stage: Stage::Discovering,
                entered_at: now,
            }],
            error: None,
            bridge_version: None,
            device: None,
            binding: None,
            forward: None,
            server: None,
            listener: None,
        }
    }

    /// Run identifier shared with audit events.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// When the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.history
            .last()
            .map_or(Stage::Discovering, |record| record.stage)
    }

    /// Every stage entered, in order.
    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    /// The error that aborted the run.
    pub fn error(&self) -> Option<&WorkflowError> {
        self.error.as_ref()
    }

    /// True once the relay path is provisioned.
    pub fn is_ready(&self) -> bool {
        self.stage() == Stage::Ready
    }

    /// Move to `next` if the edge is allowed.
    pub fn advance(&mut self, next: Stage) -> Result<(), WorkflowError> {
        let from = self.stage();
        if !from.can_transition_to(next) || next == Stage::Aborted {
            return Err(WorkflowError::InvalidTransition { from, to: next });
        }
        self.history.push(StageRecord {
            stage: next,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    /// Move to `Aborted` with `error` attached. The stage that failed stays
    /// the last entry before `Aborted` in the history.
    pub fn abort(&mut self, error: WorkflowError) {
        if self.stage().is_terminal() {
            return;
        }
        self.history.push(StageRecord {
            stage: Stage::Aborted,
            entered_at: Utc::now(),
        });
        self.error = Some(error);
    }

    /// The stage that was active when the run aborted.
    pub fn failed_stage(&self) -> Option<Stage> {
        if self.stage() != Stage::Aborted {
            return None;
        }
        self.history
            .iter()
            .rev()
            .nth(1)
            .map(|record| record.stage)
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}
