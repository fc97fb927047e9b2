//! Multicast server discovery.
//!
//! Link servers announce themselves on a multicast group (default
//! `239.255.42.42:6789`).  The client joins the group and runs one receive
//! loop that turns every broadcast into a registry update:
//!
//! | Broadcast          | Known sender                  | Unknown sender                   |
//! |--------------------|-------------------------------|----------------------------------|
//! | `BROADCAST INIT`   | reload its device list        | fetch device list, register it   |
//! | `BROADCAST STATUS` | apply the per-device reports  | register it, then apply          |
//! | `BROADCAST QUIT`   | remove it with its devices    | ignore                           |
//!
//! A sender that cannot be reached while its device list is fetched is never
//! registered.  A known server that fails to answer after `INIT` is removed.
//! Undecodable datagrams are logged and dropped, though one from a known
//! server still counts as hearing from it.  Nothing a sender puts on the wire
//! can stop the loop, and shutdown interrupts a datagram still being handled.
//!
//! # How multicast works (for beginners)
//!
//! A multicast group is an IP address in `224.0.0.0/4`.  Joining the group
//! asks the OS (and, via IGMP, the switches) to deliver datagrams sent to
//! that address to this socket.  The sender's source address on each
//! datagram is the server's own unicast address, which is where the client
//! sends its requests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use link_core::{decode_broadcast, Broadcast, StatusReport, MAX_DATAGRAM_SIZE};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::application::{LinkError, Messenger, Server, ServerRegistry};
use crate::infrastructure::shutdown::Shutdown;

/// Error type for setting up the multicast listener.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The multicast group could not be joined.
    #[error("failed to join multicast group {group}: {source}")]
    JoinFailed {
        group: Ipv4Addr,
        #[source]
        source: std::io::Error,
    },
}

/// What one datagram did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// Not a valid broadcast; nothing changed.
    Discarded,
    /// An unknown sender could not be reached; nothing changed.
    Unreachable,
    /// A new server was registered.
    Admitted,
    /// A known server's device list was reloaded.
    Reinitialised,
    /// The sender's server was removed.
    Removed,
    /// A status report was applied; `anomalies` entries were not.
    StatusApplied { anomalies: usize },
    /// Valid, but nothing to do (e.g. `QUIT` from a stranger).
    Ignored,
}

/// Binds `port` on all interfaces and joins `group`.
///
/// # Errors
///
/// Returns [`DiscoveryError`] if the port is taken or the group cannot be
/// joined.
pub async fn bind_multicast(group: Ipv4Addr, port: u16) -> Result<UdpSocket, DiscoveryError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    socket
        .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
        .map_err(|source| DiscoveryError::JoinFailed { group, source })?;
    info!("listening for link servers on {group}:{port}");
    Ok(socket)
}

/// Receives server broadcasts and applies them to the registry.
pub struct DiscoveryListener {
    socket: UdpSocket,
    registry: Arc<ServerRegistry>,
    messenger: Arc<dyn Messenger>,
}

impl DiscoveryListener {
    /// Wraps an already bound socket, usually from [`bind_multicast`].
    pub fn new(socket: UdpSocket, registry: Arc<ServerRegistry>, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            socket,
            registry,
            messenger,
        }
    }

    /// Receives until `shutdown` fires, then drops (closes) the socket.
    ///
    /// Shutdown also abandons a datagram whose handling is still waiting on
    /// a server, e.g. while a new server's device list is fetched.
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = tokio::select! {
                _ = shutdown.wait() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("discovery recv error: {e}");
                        continue;
                    }
                },
            };
            tokio::select! {
                _ = shutdown.wait() => break,
                outcome = self.handle_datagram(&buf[..len], from) => {
                    debug!("broadcast from {from}: {outcome:?}");
                }
            }
        }
        info!("discovery listener stopped");
    }

    /// Applies one datagram received from `from`.
    pub async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) -> DatagramOutcome {
        let broadcast = match decode_broadcast(bytes) {
            Ok(broadcast) => broadcast,
            Err(e) => {
                warn!("discarding datagram from {from}: {e}");
                if let Some(server) = self.registry.find(from) {
                    server.mark_heard();
                }
                return DatagramOutcome::Discarded;
            }
        };

        match broadcast {
            Broadcast::Quit => self.forget(from),
            Broadcast::Init => match self.registry.find(from) {
                Some(server) => {
                    server.mark_heard();
                    self.reinit(&server).await
                }
                None => match self.admit(from).await {
                    Some(_) => DatagramOutcome::Admitted,
                    None => DatagramOutcome::Unreachable,
                },
            },
            Broadcast::Status(report) => {
                let server = match self.registry.find(from) {
                    Some(server) => server,
                    None => match self.admit(from).await {
                        Some(server) => server,
                        None => return DatagramOutcome::Unreachable,
                    },
                };
                server.mark_heard();
                self.apply_status(&server, &report)
            }
        }
    }

    /// Fetches the device list of a stranger and registers it.
    async fn admit(&self, from: SocketAddr) -> Option<Arc<Server>> {
        let server = match Server::connect(from, self.messenger.as_ref()).await {
            Ok(server) => Arc::new(server),
            Err(e) => {
                info!("ignoring broadcast from {from}: {e}");
                return None;
            }
        };

        match self.registry.add(Arc::clone(&server)) {
            Ok(()) => {
                info!("discovered server {from}");
                Some(server)
            }
            Err(e) => {
                // Only this loop registers servers, so the lookup that just
                // missed cannot have been overtaken.
                debug_assert!(
                    !matches!(e, LinkError::ServerExists(_)),
                    "registry changed under discovery: {e}"
                );
                error!("registering {from}: {e}");
                self.registry.find(from)
            }
        }
    }

    async fn reinit(&self, server: &Server) -> DatagramOutcome {
        match server.reinit(self.messenger.as_ref()).await {
            Ok(_) => DatagramOutcome::Reinitialised,
            Err(e) => {
                warn!("server {} restarted but did not answer: {e}", server.addr());
                self.forget(server.addr())
            }
        }
    }

    fn forget(&self, addr: SocketAddr) -> DatagramOutcome {
        match self.registry.remove(addr) {
            Ok(_) => {
                info!("forgetting server {addr}");
                DatagramOutcome::Removed
            }
            Err(LinkError::NoSuchServer(_)) => {
                debug!("server {addr} already gone");
                DatagramOutcome::Ignored
            }
            Err(e) => {
                error!("removing server {addr}: {e}");
                DatagramOutcome::Ignored
            }
        }
    }

    fn apply_status(&self, server: &Server, report: &StatusReport) -> DatagramOutcome {
        let anomalies = server.apply_status(report);
        for anomaly in &anomalies {
            warn!("status from {}: {anomaly}", server.addr());
        }
        DatagramOutcome::StatusApplied {
            anomalies: anomalies.len(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
