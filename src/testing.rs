//! In-crate fakes for the bridge and process seams.

use std::sync::Mutex;
use std::time::Duration;

use crate::device::{BridgeError, BridgeOutput, DeviceBridge};
use crate::process::{PortOwner, ProcessInfo, ProcessInspector, TerminateError};

type Handler = Box<dyn Fn(&[&str]) -> Result<BridgeOutput, BridgeError> + Send + Sync>;

/// Bridge answering from a closure and recording every call.
pub struct ScriptedBridge {
    handler: Handler,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedBridge {
    pub fn new(
        handler: impl Fn(&[&str]) -> Result<BridgeOutput, BridgeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose arguments start with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.len() >= prefix.len() && call.iter().zip(prefix).all(|(a, b)| a == b))
            .count()
    }
}

impl DeviceBridge for ScriptedBridge {
    async fn run(&self, args: &[&str], _timeout: Duration) -> Result<BridgeOutput, BridgeError> {
        self.calls
            .lock()
            .unwrap()
            .push(args.iter().map(|a| a.to_string()).collect());
        (self.handler)(args)
    }
}

/// Inspector with a settable owner that records terminations.
pub struct FakeInspector {
    owner: Mutex<PortOwner>,
    releases_on_terminate: bool,
    terminate_error: Mutex<Option<TerminateError>>,
    terminations: Mutex<Vec<u32>>,
}

impl FakeInspector {
    pub fn free() -> Self {
        Self::owned_by(PortOwner::Free, true)
    }

    pub fn owned_by(owner: PortOwner, releases_on_terminate: bool) -> Self {
        Self {
            owner: Mutex::new(owner),
            releases_on_terminate,
            terminate_error: Mutex::new(None),
            terminations: Mutex::new(Vec::new()),
        }
    }

    pub fn process(pid: u32, name: &str) -> PortOwner {
        PortOwner::Process(ProcessInfo {
            pid,
            name: name.to_string(),
            exe: None,
            cmdline: Vec::new(),
        })
    }

    pub fn set_owner(&self, owner: PortOwner) {
        *self.owner.lock().unwrap() = owner;
    }

    /// Make every later `terminate` call report `error`. The owner is still
    /// released first if the inspector was built to release.
    pub fn fail_terminations_with(&self, error: TerminateError) {
        *self.terminate_error.lock().unwrap() = Some(error);
    }

    pub fn terminations(&self) -> Vec<u32> {
        self.terminations.lock().unwrap().clone()
    }
}

impl ProcessInspector for FakeInspector {
    async fn find_owner(&self, _port: u16) -> PortOwner {
        self.owner.lock().unwrap().clone()
    }

    async fn terminate(&self, pid: u32) -> Result<(), TerminateError> {
        self.terminations.lock().unwrap().push(pid);
        if self.releases_on_terminate {
            *self.owner.lock().unwrap() = PortOwner::Free;
        }
        match self.terminate_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
