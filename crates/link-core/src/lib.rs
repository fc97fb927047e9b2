//! # link-core
//!
//! Shared library for the link control client containing the text wire
//! protocol, its codec, and the status types reported for remote devices.
//!
//! It has zero dependencies on OS APIs, UI frameworks, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! A link *server* is a process that controls a handful of *devices* (dial-up
//! modems, typically) and announces itself on a multicast group.  The client
//! listens on that group, asks each server it hears for its device list, and
//! lets the user bring devices up or down.
//!
//! This crate is the shared foundation.  It defines:
//!
//! - **`protocol`** – How text travels over the network.  Every datagram is a
//!   whitespace-delimited line of tokens starting with a family prefix
//!   (`BROADCAST`, `CLIENT` or `SERVER`), at most 400 single-byte characters.
//!
//! - **`domain`** – The status vocabulary: what a server says about a device
//!   ([`DeviceStatus`]) and what it says about this client's relationship to a
//!   device ([`ClientStatus`]).

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `link_core::DeviceStatus` instead of `link_core::domain::status::DeviceStatus`.
pub use domain::status::{ClientStatus, DeviceStatus};
pub use domain::timespan::format_connect_time;
pub use protocol::codec::{
    decode_broadcast, decode_request, decode_response, decode_text, encode_broadcast,
    encode_request, encode_response, encode_text, parse_response, ProtocolError,
};
pub use protocol::messages::{
    Broadcast, ClientRequest, DeviceListing, DeviceReport, RejectedEntry, ResponseKind,
    ServerResponse, StatusEntry, StatusReport, DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT,
    MAX_DATAGRAM_SIZE,
};
