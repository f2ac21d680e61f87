//! `/proc`-backed process inspector.
//!
//! # Ownership Lookup
//!
//! 1. Read `/proc/net/tcp` and `/proc/net/tcp6` and collect the inodes of
//!    sockets in LISTEN state on the requested port. Both tables are scanned:
//!    servers binding `::` only show up in `tcp6`.
//! 2. Walk `/proc/<pid>/fd/*` looking for a `socket:[<inode>]` link.
//!
//! Step 2 hits `EACCES` for processes owned by other users. If the listener is
//! present but no readable fd table holds it, the owner is
//! [`PortOwner::Unknown`].
//!
//! When the TCP tables themselves are unreadable we fall back to a bind probe,
//! which can only distinguish "free" from "held by someone".

use std::collections::HashSet;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use super::error::TerminateError;
use super::inspector::{PortOwner, ProcessInfo, ProcessInspector};

/// Default interval between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// How often liveness is re-checked while waiting for a process to exit.
const LIVENESS_POLL: Duration = Duration::from_millis(25);

/// `st` column value for LISTEN in `/proc/net/tcp`.
const TCP_LISTEN: u8 = 0x0A;

/// A listening socket parsed from `/proc/net/tcp{,6}`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListeningSocket {
    port: u16,
    local_addr: IpAddr,
    inode: u64,
}

/// Outcome of scanning fd tables for a socket inode.
enum OwnerScan {
    Found(u32),
    Denied,
    Missing,
}

/// Process inspector backed by the Linux `/proc` filesystem and POSIX signals.
#[derive(Debug, Clone)]
pub struct SystemInspector {
    proc_root: PathBuf,
    grace: Duration,
}

impl SystemInspector {
    /// Create an inspector reading the real `/proc`.
    ///
    /// `grace` is how long a SIGTERM'd process gets before SIGKILL.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self::with_proc_root("/proc", grace)
    }

    /// Create an inspector reading an alternative proc tree (for testing).
    #[must_use]
    pub fn with_proc_root(proc_root: impl Into<PathBuf>, grace: Duration) -> Self {
        Self {
            proc_root: proc_root.into(),
            grace,
        }
    }

    /// Inodes of sockets listening on `port`, over both address families.
    fn listening_inodes(&self, port: u16) -> io::Result<HashSet<u64>> {
        let mut inodes = HashSet::new();
        let mut tables_read = 0;

        for (table, is_ipv6) in [("tcp", false), ("tcp6", true)] {
            let path = self.proc_root.join("net").join(table);
            match fs::read_to_string(&path) {
                Ok(content) => {
                    tables_read += 1;
                    inodes.extend(
                        parse_proc_net_tcp(&content, is_ipv6)
                            .into_iter()
                            .filter(|socket| socket.port == port)
                            .map(|socket| {
                                trace!(
                                    "Listener on {}:{} (inode {})",
                                    socket.local_addr, socket.port, socket.inode
                                );
                                socket.inode
                            }),
                    );
                }
                Err(e) => trace!("Could not read {:?}: {}", path, e),
            }
        }

        if tables_read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no readable TCP socket tables",
            ));
        }

        Ok(inodes)
    }

    /// Find the PID holding any of `inodes` open.
    fn find_socket_owner(&self, inodes: &HashSet<u64>) -> OwnerScan {
        let entries = match fs::read_dir(&self.proc_root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {:?}: {}", self.proc_root, e);
                return OwnerScan::Denied;
            }
        };

        let mut denied = false;
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };

            let fds = match fs::read_dir(entry.path().join("fd")) {
                Ok(fds) => fds,
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    denied = true;
                    continue;
                }
                // Process exited mid-scan
                Err(_) => continue,
            };

            for fd in fds.flatten() {
                if let Ok(target) = fs::read_link(fd.path())
                    && let Some(inode) = socket_inode(&target)
                    && inodes.contains(&inode)
                {
                    return OwnerScan::Found(pid);
                }
            }
        }

        if denied {
            OwnerScan::Denied
        } else {
            OwnerScan::Missing
        }
    }

    /// Describe `pid` from its proc entries.
    fn process_info(&self, pid: u32) -> ProcessInfo {
        let dir = self.proc_root.join(pid.to_string());

        let exe = fs::read_link(dir.join("exe")).ok().map(strip_deleted_suffix);
        let cmdline = read_cmdline(&dir);
        let name = exe
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .or_else(|| cmdline_program(&cmdline))
            .or_else(|| {
                fs::read_to_string(dir.join("comm"))
                    .ok()
                    .map(|comm| comm.trim().to_string())
                    .filter(|comm| !comm.is_empty())
            })
            .unwrap_or_else(|| format!("pid-{}", pid));

        ProcessInfo {
            pid,
            name,
            exe,
            cmdline,
        }
    }

    /// Whether `pid` still exists. Zombies count as exited.
    fn is_alive(&self, pid: u32, target: Pid) -> bool {
        let stat_path = self.proc_root.join(pid.to_string()).join("stat");
        if let Ok(stat) = fs::read_to_string(stat_path)
            && let Some(after_comm) = stat.rsplit_once(')').map(|(_, rest)| rest)
            && after_comm.trim_start().starts_with('Z')
        {
            return false;
        }

        match kill(target, None) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(_) => true,
        }
    }

    /// Poll until `pid` exits or the grace interval elapses.
    async fn wait_for_exit(&self, pid: u32, target: Pid) -> bool {
        let deadline = Instant::now() + self.grace;
        loop {
            if !self.is_alive(pid, target) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(LIVENESS_POLL).await;
        }
    }
}

impl Default for SystemInspector {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATION_GRACE)
    }
}

impl ProcessInspector for SystemInspector {
    async fn find_owner(&self, port: u16) -> PortOwner {
        let inodes = match self.listening_inodes(port) {
            Ok(inodes) => inodes,
            Err(e) => {
                debug!("TCP tables unavailable ({}), using bind probe", e);
                return bind_probe(port);
            }
        };

        if inodes.is_empty() {
            return PortOwner::Free;
        }

        match self.find_socket_owner(&inodes) {
            OwnerScan::Found(pid) => PortOwner::Process(self.process_info(pid)),
            OwnerScan::Denied => {
                debug!("Port {} is held by a process we may not inspect", port);
                PortOwner::Unknown
            }
            OwnerScan::Missing => {
                debug!("Port {} has a listener with no visible owner", port);
                PortOwner::Unknown
            }
        }
    }

    async fn terminate(&self, pid: u32) -> Result<(), TerminateError> {
        let target = checked_pid(pid)?;

        send_signal(pid, target, Signal::SIGTERM)?;
        debug!("Sent SIGTERM to PID {}", pid);

        if self.wait_for_exit(pid, target).await {
            return Ok(());
        }

        warn!(
            "PID {} still running {:?} after SIGTERM, sending SIGKILL",
            pid, self.grace
        );
        match send_signal(pid, target, Signal::SIGKILL) {
            Ok(()) | Err(TerminateError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        if !self.wait_for_exit(pid, target).await {
            warn!("PID {} still present after SIGKILL", pid);
        }
        Ok(())
    }
}

/// Reject PIDs that must never be signalled.
///
/// `kill(0, ..)` targets our whole process group.
fn checked_pid(pid: u32) -> Result<Pid, TerminateError> {
    if pid == 0 || pid == std::process::id() {
        return Err(TerminateError::PermissionDenied {
            pid,
            reason: "refusing to signal own process or process group".to_string(),
        });
    }

    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| TerminateError::PermissionDenied {
            pid,
            reason: "PID out of range".to_string(),
        })
}

fn send_signal(pid: u32, target: Pid, signal: Signal) -> Result<(), TerminateError> {
    kill(target, signal).map_err(|errno| match errno {
        Errno::ESRCH => TerminateError::NotFound(pid),
        other => TerminateError::PermissionDenied {
            pid,
            reason: other.to_string(),
        },
    })
}

/// Is anything bound to `port`? Used only when the TCP tables are unreadable.
fn bind_probe(port: u16) -> PortOwner {
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(_) => PortOwner::Free,
        Err(e) => {
            trace!("Bind probe on port {} failed: {}", port, e);
            PortOwner::Unknown
        }
    }
}

/// Parse the inode out of an fd link target such as `socket:[12345]`.
fn socket_inode(target: &Path) -> Option<u64> {
    target
        .to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

fn strip_deleted_suffix(path: PathBuf) -> PathBuf {
    match path.to_str().and_then(|p| p.strip_suffix(" (deleted)")) {
        Some(stripped) => PathBuf::from(stripped),
        None => path,
    }
}

/// File name of argv[0] from `/proc/<pid>/cmdline`.
fn cmdline_program(cmdline: &[String]) -> Option<String> {
    let name = cmdline.first()?.rsplit('/').next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// NUL-separated `/proc/<pid>/cmdline`. Empty for kernel threads and on
/// permission errors.
fn read_cmdline(proc_dir: &Path) -> Vec<String> {
    let Ok(raw) = fs::read(proc_dir.join("cmdline")) else {
        return Vec::new();
    };
    raw.split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

/// Parse `/proc/net/tcp` or `/proc/net/tcp6` content, keeping LISTEN sockets.
///
/// Format (each line after header):
/// ```text
///    sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
///    0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12345 ...
/// ```
///
/// Malformed lines are skipped.
fn parse_proc_net_tcp(content: &str, is_ipv6: bool) -> Vec<ListeningSocket> {
    let mut sockets = Vec::new();

    for line in content.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 {
            continue;
        }

        if u8::from_str_radix(parts[3], 16).ok() != Some(TCP_LISTEN) {
            continue;
        }

        let parsed = if is_ipv6 {
            parse_hex_addr_v6(parts[1]).map(|(addr, port)| (IpAddr::V6(addr), port))
        } else {
            parse_hex_addr_v4(parts[1]).map(|(addr, port)| (IpAddr::V4(addr), port))
        };
        let Some((local_addr, port)) = parsed else {
            trace!("Skipping malformed socket line: {}", line);
            continue;
        };

        let Ok(inode) = parts[9].parse::<u64>() else {
            continue;
        };
        if inode == 0 {
            continue;
        }

        sockets.push(ListeningSocket {
            port,
            local_addr,
            inode,
        });
    }

    sockets
}

/// Parse hex-encoded IPv4 address:port (e.g., "0100007F:1F90" = 127.0.0.1:8080).
///
/// The address is stored in host byte order; the port in network byte order.
fn parse_hex_addr_v4(s: &str) -> Option<(Ipv4Addr, u16)> {
    let (addr_hex, port_hex) = s.split_once(':')?;
    let addr = u32::from_str_radix(addr_hex, 16).ok()?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    Some((Ipv4Addr::from(addr.swap_bytes()), port))
}

/// Parse hex-encoded IPv6 address:port.
///
/// The address is 32 hex chars stored as 4 little-endian 32-bit words.
fn parse_hex_addr_v6(s: &str) -> Option<(Ipv6Addr, u16)> {
    let (addr_hex, port_hex) = s.split_once(':')?;
    if addr_hex.len() != 32 {
        return None;
    }

    let mut octets = [0u8; 16];
    for i in 0..4 {
        let word = u32::from_str_radix(&addr_hex[i * 8..(i + 1) * 8], 16).ok()?;
        octets[i * 4..(i + 1) * 4].copy_from_slice(&word.swap_bytes().to_be_bytes());
    }

    let port = u16::from_str_radix(port_hex, 16).ok()?;
    Some((Ipv6Addr::from(octets), port))
}
