//! Point-to-point request/response over UDP with exponential backoff.
//!
//! A [`TransportChannel`] is bound to one remote address for its whole life.
//! [`TransportChannel::receive`] waits for one datagram; each time the wait
//! times out the timeout doubles, until the retry budget is spent:
//!
//! ```text
//! timeout = 1000 ms, retries = 3
//!   attempt 1: wait 1000 ms ─ timeout ─┐
//!   attempt 2: wait 2000 ms ─ timeout ─┤
//!   attempt 3: wait 4000 ms ─ timeout ─┴─► TransportError::Timeout
//! ```
//!
//! However `receive` ends, the channel's configured timeout is restored, so
//! the next call starts from the same value.
//!
//! # Why a connected UDP socket? (for beginners)
//!
//! Calling `connect` on a UDP socket does not send anything.  It just tells
//! the kernel to drop datagrams from any other address, so a stray packet
//! from another host can never be mistaken for this server's reply.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use link_core::{decode_text, encode_request, ClientRequest, MAX_DATAGRAM_SIZE};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::application::messenger::{Messenger, TransportError};

/// Default wait for the first receive attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default number of receive attempts.
pub const DEFAULT_RETRIES: u32 = 3;

/// Timeout and retry settings shared by every channel a messenger opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }
}

/// A UDP conversation with a single remote.
#[derive(Debug)]
pub struct TransportChannel {
    socket: UdpSocket,
    remote: SocketAddr,
    timeout: Duration,
    retries: u32,
}

impl TransportChannel {
    /// Opens an ephemeral local socket connected to `remote`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the socket cannot be created.
    pub async fn open(remote: SocketAddr, config: TransportConfig) -> Result<Self, TransportError> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TransportError::Bind { remote, source })?;
        socket
            .connect(remote)
            .await
            .map_err(|source| TransportError::Bind { remote, source })?;

        Ok(Self {
            socket,
            remote,
            timeout: config.timeout,
            retries: config.retries,
        })
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
    }

    /// Sends one request.  Never retried.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] if the request cannot be put on the
    /// wire, or [`TransportError::Send`] on a socket error.
    pub async fn send(&self, request: &ClientRequest) -> Result<(), TransportError> {
        let bytes = encode_request(request)?;
        self.send_bytes(&bytes).await
    }

    /// Sends raw bytes.  Never retried.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] on a socket error.
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        trace!("-> {} {} bytes", self.remote, bytes.len());
        self.socket
            .send(bytes)
            .await
            .map(|_| ())
            .map_err(|source| TransportError::Send {
                remote: self.remote,
                source,
            })
    }

    /// Waits for one datagram and returns it as text.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] once every attempt has timed out.
    /// A socket error on receive (for example an ICMP "port unreachable"
    /// reported back on a connected socket) counts as a failed attempt.
    pub async fn receive(&mut self) -> Result<String, TransportError> {
        let mut guard = TimeoutGuard::new(self);
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut attempt = 0;

        while attempt < guard.channel.retries {
            attempt += 1;
            let wait = guard.channel.timeout;
            match tokio::time::timeout(wait, guard.channel.socket.recv(&mut buf)).await {
                Ok(Ok(len)) => {
                    trace!("<- {} {len} bytes", guard.channel.remote);
                    return Ok(decode_text(&buf[..len]));
                }
                Ok(Err(e)) => debug!(
                    "receive from {} failed on attempt {attempt}: {e}",
                    guard.channel.remote
                ),
                Err(_) => debug!(
                    "no reply from {} within {wait:?} (attempt {attempt})",
                    guard.channel.remote
                ),
            }
            guard.channel.timeout = wait.saturating_mul(2);
        }

        Err(TransportError::Timeout {
            remote: guard.channel.remote,
            attempts: attempt,
        })
    }

    /// [`send`](Self::send) followed by [`receive`](Self::receive).
    ///
    /// # Errors
    ///
    /// Any error from either step.
    pub async fn send_with_response(&mut self, request: &ClientRequest) -> Result<String, TransportError> {
        self.send(request).await?;
        self.receive().await
    }
}

/// Puts a channel's timeout back the way it was when the guard was made.
struct TimeoutGuard<'a> {
    channel: &'a mut TransportChannel,
    original: Duration,
}

impl<'a> TimeoutGuard<'a> {
    fn new(channel: &'a mut TransportChannel) -> Self {
        let original = channel.timeout;
        Self { channel, original }
    }
}

impl Drop for TimeoutGuard<'_> {
    fn drop(&mut self) {
        self.channel.timeout = self.original;
    }
}

// ── Messenger implementation ──────────────────────────────────────────────────

/// [`Messenger`] that opens a fresh [`TransportChannel`] per call.
#[derive(Debug, Clone, Default)]
pub struct UdpMessenger {
    config: TransportConfig,
}

impl UdpMessenger {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> TransportConfig {
        self.config
    }
}

#[async_trait]
impl Messenger for UdpMessenger {
    async fn send(&self, to: SocketAddr, request: &ClientRequest) -> Result<(), TransportError> {
        TransportChannel::open(to, self.config)
            .await?
            .send(request)
            .await
    }

    async fn request(&self, to: SocketAddr, request: &ClientRequest) -> Result<String, TransportError> {
        TransportChannel::open(to, self.config)
            .await?
            .send_with_response(request)
            .await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    async fn silent_peer() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    fn config(timeout_ms: u64, retries: u32) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_millis(timeout_ms),
            retries,
        }
    }

    #[test]
    fn test_default_config_matches_protocol_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(1000));
        assert_eq!(config.retries, 3);
    }

    #[tokio::test]
    async fn test_receive_backs_off_then_restores_timeout() {
        // Arrange
        let peer = silent_peer().await;
        let mut channel = TransportChannel::open(peer.local_addr().unwrap(), config(100, 3))
            .await
            .unwrap();

        // Act
        let started = Instant::now();
        let result = channel.send_with_response(&ClientRequest::Devices).await;
        let elapsed = started.elapsed();

        // Assert
        assert!(matches!(
            result,
            Err(TransportError::Timeout { attempts: 3, .. })
        ));
        assert!(elapsed >= Duration::from_millis(700), "took {elapsed:?}");
        assert_eq!(channel.timeout(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_restored_timeout_governs_next_receive() {
        // Arrange: exhaust once, then wait once more with a single attempt
        let peer = silent_peer().await;
        let mut channel = TransportChannel::open(peer.local_addr().unwrap(), config(100, 2))
            .await
            .unwrap();
        let _ = channel.receive().await;
        channel.set_retries(1);

        // Act
        let started = Instant::now();
        let _ = channel.receive().await;
        let elapsed = started.elapsed();

        // Assert: one 100 ms wait, not the doubled 200 ms
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_zero_retries_fails_without_waiting() {
        let peer = silent_peer().await;
        let mut channel = TransportChannel::open(peer.local_addr().unwrap(), config(1000, 0))
            .await
            .unwrap();

        let result = channel.receive().await;

        assert!(matches!(
            result,
            Err(TransportError::Timeout { attempts: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_send_with_response_returns_reply_text() {
        // Arrange: a peer that answers one DEVICES request
        let peer = silent_peer().await;
        let peer_addr = peer.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            let (len, from) = peer.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"CLIENT DEVICES");
            peer.send_to(b"SERVER DEVICES modem0\tModem A\n\0\0", from)
                .await
                .unwrap();
        });
        let messenger = UdpMessenger::new(config(500, 3));

        // Act
        let reply = messenger
            .request(peer_addr, &ClientRequest::Devices)
            .await
            .unwrap();

        // Assert
        assert_eq!(reply, "SERVER DEVICES modem0\tModem A");
    }

    #[tokio::test]
    async fn test_send_rejects_unencodable_request() {
        let peer = silent_peer().await;
        let channel = TransportChannel::open(peer.local_addr().unwrap(), TransportConfig::default())
            .await
            .unwrap();

        let result = channel.send(&ClientRequest::Up("modem 0".into())).await;

        assert!(matches!(result, Err(TransportError::Encode(_))));
    }
}
