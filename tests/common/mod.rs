//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Mutex;
use std::time::Duration;

use rtmp_relay::device::{BridgeError, BridgeOutput, DeviceBridge};
use rtmp_relay::process::{PortOwner, ProcessInfo, ProcessInspector, TerminateError};

pub const VERSION: &str = "Android Debug Bridge version 1.0.41\nVersion 35.0.1-11580240\n";

/// An emulated `adb` with a fixed device listing and a per-device reverse
/// table.
pub struct FakeAdb {
    listing: String,
    rules: Mutex<Vec<(String, u16, u16)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeAdb {
    pub fn new(listing: &str) -> Self {
        Self {
            listing: listing.to_string(),
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn rules(&self) -> Vec<(String, u16, u16)> {
        self.rules.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn attached(&self, id: &str) -> bool {
        self.listing.lines().any(|line| {
            let mut tokens = line.split_whitespace();
            tokens.next() == Some(id) && tokens.next() == Some("device")
        })
    }

    fn handle(&self, args: &[&str]) -> BridgeOutput {
        let port = |spec: &str| spec.trim_start_matches("tcp:").parse::<u16>().unwrap();
        match args {
            ["version"] => BridgeOutput::ok(VERSION),
            ["devices", "-l"] => BridgeOutput::ok(self.listing.clone()),
            ["-s", id, ..] if !self.attached(id) => {
                BridgeOutput::failed(1, format!("adb: error: device '{}' not found", id))
            }
            ["-s", _, "get-state"] => BridgeOutput::ok("device\n"),
            ["-s", _, "shell", "getprop", "ro.product.model"] => BridgeOutput::ok("Pixel 8\n"),
            ["-s", _, "shell", "am", "start", "-n", component] => {
                BridgeOutput::ok(format!("Starting: Intent {{ cmp={} }}\n", component))
            }
            ["-s", id, "reverse", "--list"] => {
                let rules = self.rules.lock().unwrap();
                BridgeOutput::ok(
                    rules
                        .iter()
                        .filter(|(d, _, _)| d.as_str() == *id)
                        .map(|(_, dp, hp)| format!("UsbFfs tcp:{} tcp:{}\n", dp, hp))
                        .collect::<String>(),
                )
            }
            ["-s", id, "reverse", "--remove", spec] => {
                let mut rules = self.rules.lock().unwrap();
                let before = rules.len();
                let device_port = port(*spec);
                rules.retain(|(d, dp, _)| !(d.as_str() == *id && *dp == device_port));
                if rules.len() == before {
                    BridgeOutput::failed(1, format!("adb: error: listener '{}' not found", spec))
                } else {
                    BridgeOutput::ok("")
                }
            }
            ["-s", id, "reverse", device, host] => {
                self.rules
                    .lock()
                    .unwrap()
                    .push((id.to_string(), port(*device), port(*host)));
                BridgeOutput::ok("")
            }
            _ => BridgeOutput::failed(1, "adb: unknown command"),
        }
    }
}

impl DeviceBridge for FakeAdb {
    async fn run(&self, args: &[&str], _timeout: Duration) -> Result<BridgeOutput, BridgeError> {
        self.calls.lock().unwrap().push(args.join(" "));
        Ok(self.handle(args))
    }
}

/// A port owner that goes away when terminated, unless it is stubborn.
pub struct FakeOwner {
    owner: Mutex<PortOwner>,
    stubborn: bool,
    terminate_error: Option<TerminateError>,
    terminated: Mutex<Vec<u32>>,
}

impl FakeOwner {
    pub fn free() -> Self {
        Self::new(PortOwner::Free, false)
    }

    pub fn process(pid: u32, name: &str, stubborn: bool) -> Self {
        Self::new(
            PortOwner::Process(ProcessInfo {
                pid,
                name: name.to_string(),
                exe: None,
                cmdline: Vec::new(),
            }),
            stubborn,
        )
    }

    pub fn new(owner: PortOwner, stubborn: bool) -> Self {
        Self {
            owner: Mutex::new(owner),
            stubborn,
            terminate_error: None,
            terminated: Mutex::new(Vec::new()),
        }
    }

    /// Report `error` from every `terminate` call.
    pub fn failing_with(mut self, error: TerminateError) -> Self {
        self.terminate_error = Some(error);
        self
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

impl ProcessInspector for FakeOwner {
    async fn find_owner(&self, _port: u16) -> PortOwner {
        self.owner.lock().unwrap().clone()
    }

    async fn terminate(&self, pid: u32) -> Result<(), TerminateError> {
        self.terminated.lock().unwrap().push(pid);
        if !self.stubborn {
            *self.owner.lock().unwrap() = PortOwner::Free;
        }
        match &self.terminate_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// A listener the readiness probe can connect to, and its port.
pub fn held_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}
