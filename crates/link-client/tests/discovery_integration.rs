//! End-to-end tests over loopback UDP.
//!
//! # Purpose
//!
//! These tests run the real discovery listener, liveness monitor and UDP
//! messenger against a small fake link server.  The fake server owns one
//! socket: it sends "broadcasts" from it straight to the client's listener
//! socket, and answers the client's requests on it.  That matters because a
//! server is identified by the address its broadcasts come from, and the
//! client sends its requests back to that same address.
//!
//! ```text
//! FakeServer socket ── BROADCAST ... ──► listener socket (LinkControl)
//!        ▲                                     │
//!        └──── CLIENT DEVICES / PING / ... ◄───┘ UdpMessenger
//! ```
//!
//! No multicast group is joined, so the tests work without a multicast
//! route.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use link_client::application::{LinkError, ServerRegistry};
use link_client::infrastructure::network::liveness::LivenessConfig;
use link_client::infrastructure::network::transport::{TransportConfig, UdpMessenger};
use link_client::infrastructure::ui_bridge::LinkControl;
use link_core::{
    decode_request, encode_broadcast, encode_response, Broadcast, ClientRequest, ClientStatus,
    DeviceListing, DeviceStatus, ServerResponse, MAX_DATAGRAM_SIZE,
};
use tokio::net::UdpSocket;

// ── Fake link server ──────────────────────────────────────────────────────────

struct FakeServer {
    socket: Arc<UdpSocket>,
    requests: Arc<Mutex<Vec<ClientRequest>>>,
}

impl FakeServer {
    /// Starts answering requests for two modems; nobody is connected.
    async fn start() -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let responder = Arc::clone(&socket);
        let log = Arc::clone(&requests);
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            while let Ok((len, from)) = responder.recv_from(&mut buf).await {
                let Ok(request) = decode_request(&buf[..len]) else {
                    continue;
                };
                log.lock().unwrap().push(request.clone());
                let reply = match request {
                    ClientRequest::Devices => ServerResponse::Devices(vec![
                        DeviceListing::new("modem0", "Modem A"),
                        DeviceListing::new("modem1", "Modem B"),
                    ]),
                    ClientRequest::ClientStatus => ServerResponse::ClientStatus(Vec::new()),
                    _ => continue,
                };
                let bytes = encode_response(&reply).unwrap();
                let _ = responder.send_to(&bytes, from).await;
            }
        });

        Self { socket, requests }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    async fn broadcast(&self, to: SocketAddr, text: &[u8]) {
        self.socket.send_to(text, to).await.unwrap();
    }

    fn saw(&self, request: &ClientRequest) -> bool {
        self.requests.lock().unwrap().contains(request)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn start_client(liveness: LivenessConfig) -> (LinkControl, SocketAddr) {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let listen_addr = listener.local_addr().unwrap();
    let messenger = UdpMessenger::new(TransportConfig {
        timeout: Duration::from_millis(200),
        retries: 3,
    });
    let control = LinkControl::spawn(
        Arc::new(ServerRegistry::new()),
        Arc::new(messenger),
        listener,
        liveness,
    );
    (control, listen_addr)
}

/// Polls `condition` until it holds or two seconds pass.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_init_broadcast_admits_server_with_its_devices() {
    // Arrange
    let fake = FakeServer::start().await;
    let (control, listen_addr) = start_client(LivenessConfig::default()).await;

    // Act
    fake.broadcast(listen_addr, &encode_broadcast(&Broadcast::Init).unwrap())
        .await;

    // Assert
    assert!(eventually(|| control.registry().contains(fake.addr())).await);
    let devices = control.devices(fake.addr()).unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].name, "modem0");
    assert_eq!(devices[1].description, "Modem B");
    assert!(fake.saw(&ClientRequest::ClientStatus));

    control.shutdown().await;
}

#[tokio::test]
async fn test_status_broadcast_updates_device_and_notifies_once() {
    // Arrange: admitted server, a listener on modem0
    let fake = FakeServer::start().await;
    let (control, listen_addr) = start_client(LivenessConfig::default()).await;
    fake.broadcast(listen_addr, b"BROADCAST INIT").await;
    assert!(eventually(|| control.registry().contains(fake.addr())).await);

    let server = control.registry().get(fake.addr()).unwrap();
    let modem0 = server.devices().get("modem0").unwrap();
    assert_eq!(modem0.status(), DeviceStatus::Unknown);
    assert_eq!(modem0.client_status(), ClientStatus::Disconnected);
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    modem0.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Act
    fake.broadcast(listen_addr, b"BROADCAST STATUS modem0 Up 120 3")
        .await;

    // Assert
    assert!(eventually(|| modem0.status() == DeviceStatus::Up).await);
    assert_eq!(modem0.connect_seconds(), 120);
    assert_eq!(modem0.users(), 3);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    control.shutdown().await;
}

#[tokio::test]
async fn test_quit_broadcast_forgets_server() {
    // Arrange
    let fake = FakeServer::start().await;
    let (control, listen_addr) = start_client(LivenessConfig::default()).await;
    fake.broadcast(listen_addr, b"BROADCAST INIT").await;
    assert!(eventually(|| control.registry().contains(fake.addr())).await);

    // Act
    fake.broadcast(listen_addr, b"BROADCAST QUIT").await;

    // Assert
    assert!(eventually(|| control.registry().is_empty()).await);
    assert!(matches!(
        control.registry().get(fake.addr()),
        Err(LinkError::NoSuchServer(_))
    ));
    assert!(matches!(
        control.devices(fake.addr()),
        Err(LinkError::NoSuchServer(_))
    ));

    control.shutdown().await;
}

#[tokio::test]
async fn test_silent_server_is_pinged_then_evicted() {
    // Arrange: short thresholds so the whole cycle fits in the test
    let liveness = LivenessConfig::with_thresholds(Duration::from_millis(50), Duration::from_millis(400));
    let fake = FakeServer::start().await;
    let (control, listen_addr) = start_client(liveness).await;
    fake.broadcast(listen_addr, b"BROADCAST INIT").await;
    assert!(eventually(|| control.registry().contains(fake.addr())).await);

    // Act: stay silent

    // Assert
    assert!(eventually(|| fake.saw(&ClientRequest::Ping)).await);
    assert!(eventually(|| control.registry().is_empty()).await);

    control.shutdown().await;
}
