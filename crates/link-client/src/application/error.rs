//! Errors reported by registries and entity operations.

use std::net::SocketAddr;

use link_core::ProtocolError;
use thiserror::Error;

use crate::application::messenger::TransportError;

#[derive(Debug, Error)]
pub enum LinkError {
    /// No server is registered at this address.
    #[error("no server at {0}")]
    NoSuchServer(SocketAddr),

    /// The device registry has no device by this name.
    #[error("no device named {0:?}")]
    NoSuchDevice(String),

    /// A server is already registered at this address.
    #[error("a server at {0} is already registered")]
    ServerExists(SocketAddr),

    /// A device by this name (ignoring case) is already registered.
    #[error("a device named {0:?} is already registered")]
    DeviceExists(String),

    /// A status report named a state outside the known set.
    #[error("invalid status {status:?} for device {device:?}")]
    InvalidStatus { device: String, status: String },

    /// The server did not answer, or could not be written to.
    #[error("server {addr} unreachable: {source}")]
    Unreachable {
        addr: SocketAddr,
        #[source]
        source: TransportError,
    },

    /// A message from the server could not be understood.
    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),
}

impl LinkError {
    /// `true` when the retry budget ran out waiting for a reply.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LinkError::Unreachable {
                source: TransportError::Timeout { .. },
                ..
            }
        )
    }
}
