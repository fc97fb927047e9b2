//! All link protocol message types.
//!
//! Three message families share one datagram format:
//!
//! ```text
//! BROADCAST INIT | QUIT | STATUS <entries>        server -> multicast group
//! CLIENT PING | DEVICES | STATUS [name] | CLIENT_STATUS
//!        | UP <name> | DOWN <name> | FORCE_DOWN <name>   client -> server
//! SERVER DEVICES <listings> | STATUS <entries> | CLIENT_STATUS <names>
//!                                                 server -> client
//! ```
//!
//! Status entries and device listings are one per line
//! (`name<TAB>...<LF>`).  The `Display` impls below produce exactly the text
//! that goes on the wire; [`crate::protocol::codec`] turns it into bytes.

use std::fmt;
use std::net::Ipv4Addr;

use crate::domain::status::DeviceStatus;
use crate::protocol::codec::ProtocolError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Largest datagram either side will send or accept, in bytes.
pub const MAX_DATAGRAM_SIZE: usize = 400;

/// Multicast group servers broadcast on unless configured otherwise.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 42);

/// UDP port of the multicast group.
pub const DEFAULT_MULTICAST_PORT: u16 = 6789;

/// Literal tokens of the protocol.
pub mod tokens {
    pub const BROADCAST: &str = "BROADCAST";
    pub const CLIENT: &str = "CLIENT";
    pub const SERVER: &str = "SERVER";

    pub const INIT: &str = "INIT";
    pub const QUIT: &str = "QUIT";
    pub const STATUS: &str = "STATUS";
    pub const PING: &str = "PING";
    pub const DEVICES: &str = "DEVICES";
    pub const CLIENT_STATUS: &str = "CLIENT_STATUS";
    pub const UP: &str = "UP";
    pub const DOWN: &str = "DOWN";
    pub const FORCE_DOWN: &str = "FORCE_DOWN";

    pub const STATE_UP: &str = "UP";
    pub const STATE_DOWN: &str = "DOWN";
    pub const STATE_CONNECTING: &str = "CONNECTING";
    pub const STATE_DISCONNECTING: &str = "DISCONNECTING";
}

// ── Client requests ───────────────────────────────────────────────────────────

/// A request sent by the client to one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Keep-alive; the server answers nothing.
    Ping,
    /// Ask for the device list (`SERVER DEVICES` reply).
    Devices,
    /// Ask for device status, optionally for a single device.
    Status(Option<String>),
    /// Ask which devices this client is connected to.
    ClientStatus,
    /// Connect this client to a device.
    Up(String),
    /// Disconnect this client from a device.
    Down(String),
    /// Bring a device down regardless of other users.
    ForceDown(String),
}

impl ClientRequest {
    /// Returns the response kind the server sends back, if any.
    pub fn expected_response(&self) -> Option<ResponseKind> {
        match self {
            ClientRequest::Devices => Some(ResponseKind::Devices),
            ClientRequest::Status(_) => Some(ResponseKind::Status),
            ClientRequest::ClientStatus => Some(ResponseKind::ClientStatus),
            ClientRequest::Ping
            | ClientRequest::Up(_)
            | ClientRequest::Down(_)
            | ClientRequest::ForceDown(_) => None,
        }
    }

    /// Device name carried by the request, if any.
    pub fn device_name(&self) -> Option<&str> {
        match self {
            ClientRequest::Status(name) => name.as_deref(),
            ClientRequest::Up(name) | ClientRequest::Down(name) | ClientRequest::ForceDown(name) => {
                Some(name)
            }
            ClientRequest::Ping | ClientRequest::Devices | ClientRequest::ClientStatus => None,
        }
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use tokens::*;
        match self {
            ClientRequest::Ping => write!(f, "{CLIENT} {PING}"),
            ClientRequest::Devices => write!(f, "{CLIENT} {DEVICES}"),
            ClientRequest::Status(None) => write!(f, "{CLIENT} {STATUS}"),
            ClientRequest::Status(Some(name)) => write!(f, "{CLIENT} {STATUS} {name}"),
            ClientRequest::ClientStatus => write!(f, "{CLIENT} {CLIENT_STATUS}"),
            ClientRequest::Up(name) => write!(f, "{CLIENT} {UP} {name}"),
            ClientRequest::Down(name) => write!(f, "{CLIENT} {DOWN} {name}"),
            ClientRequest::ForceDown(name) => write!(f, "{CLIENT} {FORCE_DOWN} {name}"),
        }
    }
}

// ── Device reports ────────────────────────────────────────────────────────────

/// A server's statement about one device's operational state.
///
/// Only the four states a server can actually report exist here; the
/// client-side `Unknown` is not representable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceReport {
    Down,
    /// The device is up; the server adds how long and for how many users.
    Up {
        connect_seconds: u64,
        users: u32,
    },
    Connecting,
    Disconnecting,
}

impl DeviceReport {
    /// The status this report moves a device to.
    pub fn status(&self) -> DeviceStatus {
        match self {
            DeviceReport::Down => DeviceStatus::Down,
            DeviceReport::Up { .. } => DeviceStatus::Up,
            DeviceReport::Connecting => DeviceStatus::Connecting,
            DeviceReport::Disconnecting => DeviceStatus::Disconnecting,
        }
    }
}

impl fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use tokens::*;
        match self {
            DeviceReport::Up {
                connect_seconds,
                users,
            } => write!(f, "{STATE_UP} {connect_seconds} {users}"),
            DeviceReport::Down => f.write_str(STATE_DOWN),
            DeviceReport::Connecting => f.write_str(STATE_CONNECTING),
            DeviceReport::Disconnecting => f.write_str(STATE_DISCONNECTING),
        }
    }
}

/// One `name STATE` entry from a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub name: String,
    pub report: DeviceReport,
}

/// An entry the codec could not accept, kept so the receiver can report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    /// Device name, when the entry got far enough to have one.
    pub name: Option<String>,
    pub error: ProtocolError,
}

/// The body of a `BROADCAST STATUS` or `SERVER STATUS` message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
    /// Entries dropped during parsing.  Never encoded.
    pub rejected: Vec<RejectedEntry>,
}

impl StatusReport {
    pub fn new(entries: Vec<StatusEntry>) -> Self {
        Self {
            entries,
            rejected: Vec::new(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}\t{}", entry.name, entry.report)?;
        }
        Ok(())
    }
}

// ── Broadcasts ────────────────────────────────────────────────────────────────

/// A message a server sends to the multicast group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Broadcast {
    /// The server (re)started; its device list may have changed.
    Init,
    /// The server is shutting down.
    Quit,
    /// Periodic status of every device the server controls.
    Status(StatusReport),
}

impl fmt::Display for Broadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use tokens::*;
        match self {
            Broadcast::Init => write!(f, "{BROADCAST} {INIT}"),
            Broadcast::Quit => write!(f, "{BROADCAST} {QUIT}"),
            Broadcast::Status(report) => write!(f, "{BROADCAST} {STATUS} {report}"),
        }
    }
}

// ── Server responses ──────────────────────────────────────────────────────────

/// Which reply a request is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Devices,
    Status,
    ClientStatus,
}

impl ResponseKind {
    /// The sub-type token following the `SERVER` prefix.
    pub fn token(self) -> &'static str {
        match self {
            ResponseKind::Devices => tokens::DEVICES,
            ResponseKind::Status => tokens::STATUS,
            ResponseKind::ClientStatus => tokens::CLIENT_STATUS,
        }
    }
}

/// A device name and its human description, as listed by `SERVER DEVICES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    pub name: String,
    pub description: String,
}

impl DeviceListing {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A unicast reply from a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerResponse {
    Devices(Vec<DeviceListing>),
    Status(StatusReport),
    /// Names of the devices this client is connected to.
    ClientStatus(Vec<String>),
}

impl ServerResponse {
    pub fn kind(&self) -> ResponseKind {
        match self {
            ServerResponse::Devices(_) => ResponseKind::Devices,
            ServerResponse::Status(_) => ResponseKind::Status,
            ServerResponse::ClientStatus(_) => ResponseKind::ClientStatus,
        }
    }
}

impl fmt::Display for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use tokens::*;
        match self {
            ServerResponse::Devices(listings) => {
                write!(f, "{SERVER} {DEVICES} ")?;
                for listing in listings {
                    writeln!(f, "{}\t{}", listing.name, listing.description)?;
                }
                Ok(())
            }
            ServerResponse::Status(report) => write!(f, "{SERVER} {STATUS} {report}"),
            ServerResponse::ClientStatus(names) => {
                write!(f, "{SERVER} {CLIENT_STATUS} {}", names.join("\t"))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
