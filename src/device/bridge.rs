//! Subprocess seam for the device-bridge tool.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, trace};

use super::error::BridgeError;

/// Captured result of one bridge invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeOutput {
    /// Exit status was zero.
    pub success: bool,
    /// Exit code, absent when killed by a signal.
    pub code: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl BridgeOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout and stderr joined and trimmed, for error details.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout.trim(), self.stderr.trim())
            .trim()
            .to_string()
    }

    /// The tool printed an error even if it exited zero.
    ///
    /// `adb reverse` and `am start` both do this. Only diagnostic lines count:
    /// a line starting with `error:` (optionally after a `tool:` prefix, as in
    /// `adb: error: ...`), `am`'s `Error type N` lines, and Java exception
    /// headers such as `java.lang.SecurityException: ...`.
    pub fn reports_error(&self) -> bool {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .any(is_error_line)
    }
}

fn is_error_line(line: &str) -> bool {
    let line = line.trim_start().to_ascii_lowercase();
    let message = match line.split_once(": ") {
        Some((tool, rest)) if !tool.contains(' ') && !tool.starts_with("error") => rest,
        _ => line.as_str(),
    };

    message.starts_with("error:")
        || message.starts_with("error type ")
        || line
            .split_whitespace()
            .next()
            .is_some_and(|head| head.ends_with("exception:"))
}

/// Something that can run device-bridge subcommands.
pub trait DeviceBridge {
    /// Run the bridge with `args`, bounded by `timeout`.
    ///
    /// A non-zero exit is a successful call with `success == false`; only
    /// failure to run or finish the tool is an error.
    fn run(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> impl Future<Output = Result<BridgeOutput, BridgeError>> + Send;
}

/// The real `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    path: PathBuf,
}

impl AdbBridge {
    /// Use the bridge executable at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the executable.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceBridge for AdbBridge {
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<BridgeOutput, BridgeError> {
        let command = format!("{} {}", self.path.display(), args.join(" "));
        debug!("Running: {}", command);

        let output = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(BridgeError::Spawn {
                    path: self.path.clone(),
                    source,
                });
            }
            Err(_) => return Err(BridgeError::TimedOut { command, timeout }),
        };

        let result = BridgeOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!("{} -> {:?}", command, result);
        Ok(result)
    }
}
