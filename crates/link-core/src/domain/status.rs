//! Device and client status state spaces.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::messages::tokens;

/// Operational state of a device as reported by its server.
///
/// `Unknown` is the state of a device nobody has reported on yet; it is
/// never sent on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    Down,
    Up,
    Connecting,
    Disconnecting,
    #[default]
    Unknown,
}

impl DeviceStatus {
    /// Parses a wire state token, ignoring ASCII case.
    ///
    /// Returns `None` for anything that is not one of the four reportable
    /// states, including `"Unknown"`.
    pub fn from_wire(token: &str) -> Option<Self> {
        [
            (tokens::STATE_UP, DeviceStatus::Up),
            (tokens::STATE_DOWN, DeviceStatus::Down),
            (tokens::STATE_CONNECTING, DeviceStatus::Connecting),
            (tokens::STATE_DISCONNECTING, DeviceStatus::Disconnecting),
        ]
        .into_iter()
        .find(|(wire, _)| wire.eq_ignore_ascii_case(token))
        .map(|(_, status)| status)
    }

    /// Human label shown to the user.
    pub fn label(self) -> &'static str {
        match self {
            DeviceStatus::Down => "Down",
            DeviceStatus::Up => "Up",
            DeviceStatus::Connecting => "Connecting",
            DeviceStatus::Disconnecting => "Disconnecting",
            DeviceStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// This client's own relationship to a device, as the server sees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientStatus {
    Disconnected,
    Connected,
    /// Not yet asked, or the server could not be reached.
    #[default]
    Unknown,
}

impl ClientStatus {
    /// Status for a device given whether it appears in the server's list.
    pub fn from_membership(connected: bool) -> Self {
        if connected {
            ClientStatus::Connected
        } else {
            ClientStatus::Disconnected
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ClientStatus::Disconnected => "Disconnected",
            ClientStatus::Connected => "Connected",
            ClientStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
