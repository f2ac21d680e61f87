//! Device records and the pure parsing rules behind them.
//!
//! Bridge output looks like:
//!
//! ```text
//! List of devices attached
//! ABCD1234               device usb:1-1 product:panther model:Pixel_7 device:panther transport_id:1
//! 192.168.1.5:5555       device product:x model:SM_G991B transport_id:2
//! emulator-5554          offline transport_id:3
//! adb-XYZ._adb-tls-connect._tcp unauthorized transport_id:4
//! ```

use std::fmt;

/// How a device is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Cable.
    Usb,
    /// Network debugging (`host:port` or wireless pairing identifier).
    Wifi,
    /// A local emulator instance.
    Emulator,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => write!(f, "USB"),
            Self::Wifi => write!(f, "Wi-Fi"),
            Self::Emulator => write!(f, "Emulator"),
        }
    }
}

/// Debugging authorization reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthState {
    /// Ready for commands.
    Authorized,
    /// The on-device authorization prompt has not been accepted.
    Unauthorized,
    /// Known to the bridge but not responding.
    Offline,
}

impl AuthState {
    /// Map a bridge state token. Unrecognised tokens yield `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "device" => Some(Self::Authorized),
            "unauthorized" => Some(Self::Unauthorized),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorized => write!(f, "authorized"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// One attached device, as seen in a single discovery snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    id: String,
    connection: ConnectionKind,
    state: AuthState,
    model: Option<String>,
    details: Vec<(String, String)>,
}

impl Device {
    /// Build a device, classifying the connection from its identifier.
    pub fn new(id: impl Into<String>, state: AuthState) -> Self {
        let id = id.into();
        Self {
            connection: classify(&id),
            id,
            state,
            model: None,
            details: Vec::new(),
        }
    }

    /// Attach a model name.
    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Bridge identifier (serial, `host:port`, ...).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connection kind.
    pub fn connection(&self) -> ConnectionKind {
        self.connection
    }

    /// Authorization state.
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Human-readable model name, if known.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// A `key:value` field from `devices -l` output.
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The `model:` detail field with underscores turned into spaces.
    pub fn detail_model(&self) -> Option<String> {
        self.detail("model").map(|m| m.replace('_', " "))
    }

    /// Only authorized devices may be selected.
    pub fn is_selectable(&self) -> bool {
        self.state == AuthState::Authorized
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.connection)?;
        if let Some(model) = &self.model {
            write!(f, " {}", model)?;
        }
        if self.state != AuthState::Authorized {
            write!(f, " ({})", self.state)?;
        }
        Ok(())
    }
}

/// Classify a device identifier.
///
/// Network identifiers are checked first, so `emulator-host:5555` is Wi-Fi.
pub fn classify(id: &str) -> ConnectionKind {
    if id.contains("_adb-tls-connect") || is_host_port(id) {
        ConnectionKind::Wifi
    } else if id.to_ascii_lowercase().contains("emulator") {
        ConnectionKind::Emulator
    } else {
        ConnectionKind::Usb
    }
}

/// `host:port` where port is a valid TCP port and host looks like an
/// address or hostname (`[..]` accepted for IPv6).
fn is_host_port(id: &str) -> bool {
    let Some((host, port)) = id.rsplit_once(':') else {
        return false;
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return false;
    }

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
}

/// Parse one line of `devices -l` output.
///
/// Returns `None` for the header, daemon status lines (`* daemon started`),
/// blank lines, and lines whose state token is not recognised.
pub fn parse_device_line(line: &str) -> Option<Device> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('*') || line.starts_with("List of devices") {
        return None;
    }

    let mut tokens = line.split_whitespace();
    let id = tokens.next()?;
    let state = AuthState::from_token(tokens.next()?)?;

    let mut device = Device::new(id, state);
    device.details = tokens
        .filter_map(|token| token.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Some(device)
}

/// Parse full `devices -l` output, preserving order.
pub fn parse_devices_output(output: &str) -> Vec<Device> {
    output.lines().filter_map(parse_device_line).collect()
}
