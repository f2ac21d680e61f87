//! Interactive operator surface: stdin prompts and the run summary.

use std::fmt::Write as _;
use std::io::{self, BufRead, Write};

use tracing::{debug, warn};

use crate::config::Settings;
use crate::device::{Device, LaunchError};
use crate::orchestrator::{OperatorHooks, Stage, WorkflowError, WorkflowState};
use crate::port::Classification;
use crate::process::{PortOwner, ProcessInfo};

const CHAIN: [Stage; 6] = [
    Stage::Discovering,
    Stage::Selecting,
    Stage::ResolvingPort,
    Stage::Forwarding,
    Stage::StartingServer,
    Stage::Ready,
];

/// Hooks that prompt on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleHooks;

impl ConsoleHooks {
    fn prompt(&self, question: &str) -> Option<String> {
        print!("{}", question);
        io::stdout().flush().ok()?;

        let mut input = String::new();
        match io::stdin().lock().read_line(&mut input) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(input.trim().to_string()),
        }
    }
}

impl OperatorHooks for ConsoleHooks {
    fn choose_device(&self, candidates: &[Device]) -> Option<usize> {
        println!("\n\x1b[1;36m━━━ Select a device ━━━\x1b[0m");
        for (i, device) in candidates.iter().enumerate() {
            println!("  \x1b[32m{}\x1b[0m. {}", i + 1, device);
        }
        println!("  \x1b[1m[q]\x1b[0m Quit");

        let answer = self.prompt("\n> ")?;
        parse_choice(&answer, candidates.len())
    }

    fn approve_termination(&self, port: u16, owner: &ProcessInfo) -> bool {
        println!(
            "\n\x1b[1;33mPort {} is in use by {}\x1b[0m, which is not a relay server.",
            port, owner
        );
        if let Some(exe) = &owner.exe {
            println!("  Executable: {}", exe.display());
        }
        self.prompt("Terminate it? [y/N] ")
            .is_some_and(|answer| is_yes(&answer))
    }

    fn stage_changed(&self, stage: Stage) {
        debug!("Stage: {}", stage);
        if !stage.is_terminal() {
            println!("\x1b[2m… {}\x1b[0m", stage);
        }
    }

    fn report_failure(&self, stage: Stage, error: &WorkflowError) {
        eprintln!("\x1b[31mFailed while {}:\x1b[0m {}", stage, error);
    }
}

/// 1-based menu answer to an index; anything else means no choice.
pub fn parse_choice(answer: &str, count: usize) -> Option<usize> {
    let number: usize = answer.trim().parse().ok()?;
    (1..=count).contains(&number).then(|| number - 1)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Outcome of the post-ready app launch.
#[derive(Debug)]
pub enum LaunchStatus {
    /// Disabled or no component configured.
    Skipped,
    /// Started on the device.
    Launched(String),
    /// The launch was attempted and failed.
    Failed(LaunchError),
}

/// Put `text` on the desktop clipboard.
///
/// Best effort: any failure is logged and yields `None`. On X11 the text is
/// only served while the returned handle is alive.
pub fn copy_to_clipboard(text: &str) -> Option<arboard::Clipboard> {
    let copied = arboard::Clipboard::new().and_then(|mut clipboard| {
        clipboard.set_text(text)?;
        Ok(clipboard)
    });
    match copied {
        Ok(clipboard) => {
            debug!("Copied {} to the clipboard", text);
            Some(clipboard)
        }
        Err(e) => {
            warn!("Could not copy stream URL to the clipboard: {}", e);
            None
        }
    }
}

fn listener_line(listener: &PortOwner, settings: &Settings) -> (&'static str, String) {
    let port = settings.port;
    match listener {
        PortOwner::Free => (
            "\x1b[33m!\x1b[0m",
            format!("not started, nothing listening on port {}", port),
        ),
        PortOwner::Process(owner) => match Classification::of(owner, &settings.server_identity) {
            Classification::OwnedBySelf => (
                "\x1b[32m✓\x1b[0m",
                format!("not started, {} already listening", owner),
            ),
            _ => (
                "\x1b[33m!\x1b[0m",
                format!("not started, port {} held by {}", port, owner),
            ),
        },
        PortOwner::Unknown => (
            "\x1b[33m!\x1b[0m",
            format!("not started, port {} held by an unknown process", port),
        ),
    }
}

fn stage_line(state: &WorkflowState, settings: &Settings, stage: Stage) -> (&'static str, String) {
    let entered = state.history().iter().any(|r| r.stage == stage);
    if state.failed_stage() == Some(stage) {
        let reason = state.error().map(ToString::to_string).unwrap_or_default();
        return ("\x1b[31m✗\x1b[0m", reason);
    }
    if stage == Stage::StartingServer
        && let Some(listener) = &state.listener
    {
        return listener_line(listener, settings);
    }
    if !entered {
        return ("\x1b[2m-\x1b[0m", String::new());
    }

    let detail = match stage {
        Stage::Discovering => state
            .bridge_version
            .as_ref()
            .map(|v| format!("bridge {}", v))
            .unwrap_or_default(),
        Stage::Selecting => state.device.as_ref().map(ToString::to_string).unwrap_or_default(),
        Stage::ResolvingPort => match &state.binding {
            Some(binding) if binding.released.is_empty() => format!("port {} free", binding.port),
            Some(binding) => {
                let names: Vec<String> = binding.released.iter().map(ToString::to_string).collect();
                format!("port {} freed from {}", binding.port, names.join(", "))
            }
            None => String::new(),
        },
        Stage::Forwarding => state
            .forward
            .as_ref()
            .map(|rule| format!("device tcp:{} -> host tcp:{}", rule.device_port, rule.host_port))
            .unwrap_or_default(),
        Stage::StartingServer => state
            .server
            .as_ref()
            .map(|server| format!("PID {}", server.pid))
            .unwrap_or_default(),
        Stage::Ready | Stage::Aborted => String::new(),
    };
    ("\x1b[32m✓\x1b[0m", detail)
}

/// Render the end-of-run summary. `copied` tells whether the stream URL
/// made it to the clipboard.
pub fn render_summary(
    state: &WorkflowState,
    settings: &Settings,
    launch: &LaunchStatus,
    copied: bool,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n\x1b[1;36m━━━ RTMP relay ━━━\x1b[0m");
    for stage in CHAIN {
        let (mark, detail) = stage_line(state, settings, stage);
        let _ = writeln!(out, "  {} {:<20} {}", mark, stage.to_string(), detail);
    }

    if !state.is_ready() {
        if let Some(error) = state.error()
            && error.is_recoverable()
        {
            let _ = writeln!(out, "\nAdjust the device or port settings and run again.");
        }
        return out;
    }

    match launch {
        LaunchStatus::Skipped => {}
        LaunchStatus::Launched(component) => {
            let _ = writeln!(out, "  \x1b[32m✓\x1b[0m {:<20} {}", "launching app", component);
        }
        LaunchStatus::Failed(error) => {
            let _ = writeln!(out, "  \x1b[33m!\x1b[0m {:<20} {}", "launching app", error);
        }
    }

    let clipboard = if copied {
        "(copied to clipboard)"
    } else {
        "(not copied to clipboard)"
    };
    let _ = writeln!(
        out,
        "\n  Stream URL: \x1b[1m{}\x1b[0m \x1b[2m{}\x1b[0m",
        settings.stream_url(),
        clipboard
    );

    let mut steps = Vec::new();
    if matches!(state.listener, Some(PortOwner::Free)) {
        steps.push(format!(
            "Start {} so it listens on port {}",
            settings.server_identity, settings.port
        ));
    }
    if let Some(app) = &settings.companion_app {
        steps.push(format!("Open {} to watch or record the stream", app.display()));
    }
    steps.push("Start publishing from the device to the stream URL".to_string());
    if state.server.is_some() {
        steps.push("Press Ctrl-C here to stop the relay and remove the forward".to_string());
    } else {
        steps.push("Run `rtmp-relay unforward` to remove the forward when done".to_string());
    }

    let _ = writeln!(out, "\n\x1b[1mNext steps\x1b[0m");
    for (i, step) in steps.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, step);
    }
    out
}
