//! The seam between entities and the network.
//!
//! Entities never open sockets.  They hand a [`ClientRequest`] to a
//! [`Messenger`] together with the server's address; the infrastructure
//! implementation opens a short-lived transport channel for each call, and
//! unit tests substitute scripted doubles.

use std::net::SocketAddr;

use async_trait::async_trait;
use link_core::{ClientRequest, ProtocolError};
use thiserror::Error;

/// Failures of a single request/response exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No local socket could be opened towards the remote.
    #[error("failed to open a channel to {remote}: {source}")]
    Bind {
        remote: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The datagram could not be handed to the OS.
    #[error("failed to send to {remote}: {source}")]
    Send {
        remote: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The request cannot be expressed on the wire.
    #[error("cannot encode request: {0}")]
    Encode(#[from] ProtocolError),

    /// Every receive attempt timed out.
    #[error("no response from {remote} after {attempts} attempts")]
    Timeout { remote: SocketAddr, attempts: u32 },
}

/// Sends client requests to link servers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Sends `request` without waiting for anything back.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the datagram could not be sent.  Never
    /// retried.
    async fn send(&self, to: SocketAddr, request: &ClientRequest) -> Result<(), TransportError>;

    /// Sends `request` and returns the decoded text of the reply.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] when no reply arrives within the
    /// channel's retry budget.
    async fn request(
        &self,
        to: SocketAddr,
        request: &ClientRequest,
    ) -> Result<String, TransportError>;
}
