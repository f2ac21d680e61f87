//! Port ownership contract shared by the real inspector and test fakes.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::error::TerminateError;

/// A local process identified as a port owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    /// Process ID.
    pub pid: u32,
    /// Executable name (file name of the executable when readable).
    pub name: String,
    /// Full executable path, when `/proc/<pid>/exe` is readable.
    pub exe: Option<PathBuf>,
    /// Command-line arguments, including argv0. Empty when unreadable.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cmdline: Vec<String>,
}

impl ProcessInfo {
    /// Whether this process is an instance of the executable named by `identity`.
    ///
    /// `identity` may be a bare executable name or a path. Comparison is on the
    /// file name, ignoring ASCII case and a trailing `.exe`. Command-line
    /// arguments are checked too, so a server run through an interpreter or a
    /// wrapper script is still recognised.
    pub fn matches_identity(&self, identity: &str) -> bool {
        let wanted = normalize_executable_name(identity);
        if wanted.is_empty() {
            return false;
        }

        if normalize_executable_name(&self.name) == wanted {
            return true;
        }

        let exe_matches = self
            .exe
            .as_deref()
            .and_then(Path::to_str)
            .is_some_and(|exe| normalize_executable_name(exe) == wanted);

        exe_matches
            || self
                .cmdline
                .iter()
                .filter(|arg| !arg.starts_with('-'))
                .any(|arg| normalize_executable_name(arg) == wanted)
    }
}

impl std::fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (PID {})", self.name, self.pid)
    }
}

/// Reduce an executable name or path to a comparable identity.
fn normalize_executable_name(raw: &str) -> String {
    let file_name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim()
        .to_ascii_lowercase();

    match file_name.strip_suffix(".exe") {
        Some(stripped) => stripped.to_string(),
        None => file_name,
    }
}

/// Result of a port ownership query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortOwner {
    /// Nothing is listening on the port.
    Free,
    /// The port is held by this process.
    Process(ProcessInfo),
    /// Something is listening but its owner could not be resolved
    /// (typically a permission failure). Never to be read as free.
    Unknown,
}

/// Queries and acts on local processes.
///
/// Every answer is a snapshot: an external process may grab or release the
/// port right after the query returns.
pub trait ProcessInspector {
    /// Return the process listening on TCP `port`.
    fn find_owner(&self, port: u16) -> impl Future<Output = PortOwner> + Send;

    /// Terminate `pid`, escalating from a graceful to a forced signal after a
    /// short grace interval. Irreversible.
    fn terminate(&self, pid: u32) -> impl Future<Output = Result<(), TerminateError>> + Send;
}
