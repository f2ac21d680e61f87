//! Operator interaction points.
//!
//! The workflow never reads input or renders output itself; it calls these
//! hooks and acts on their answers.

use tracing::{error, info, warn};

use super::error::WorkflowError;
use super::state::Stage;
use crate::device::Device;
use crate::process::ProcessInfo;

/// Callbacks into whatever is driving the workflow.
pub trait OperatorHooks {
    /// A discovery snapshot was taken.
    fn devices_discovered(&self, _devices: &[Device]) {}

    /// Pick one of `candidates` by index, or `None` to give up.
    fn choose_device(&self, candidates: &[Device]) -> Option<usize>;

    /// May `owner`, an unrelated process holding `port`, be terminated?
    fn approve_termination(&self, port: u16, owner: &ProcessInfo) -> bool;

    /// A new stage was entered.
    fn stage_changed(&self, _stage: Stage) {}

    /// `stage` failed with `error` and the run is aborting.
    fn report_failure(&self, stage: Stage, error: &WorkflowError);
}

/// Non-interactive hooks: every choice is declined.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessHooks;

impl OperatorHooks for HeadlessHooks {
    fn choose_device(&self, candidates: &[Device]) -> Option<usize> {
        warn!(
            "{} devices available and no operator to choose; use --device",
            candidates.len()
        );
        None
    }

    fn approve_termination(&self, port: u16, owner: &ProcessInfo) -> bool {
        warn!(
            "Not terminating {} on port {} without an operator; use --force",
            owner, port
        );
        false
    }

    fn stage_changed(&self, stage: Stage) {
        info!("Stage: {}", stage);
    }

    fn report_failure(&self, stage: Stage, err: &WorkflowError) {
        error!("Failed while {}: {}", stage, err);
    }
}
