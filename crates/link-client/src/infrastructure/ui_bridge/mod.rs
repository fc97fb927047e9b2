//! GUI bridge: the one object a user interface needs to drive the client.
//!
//! [`LinkControl`] owns the server registry, the messenger and the two
//! background loops (discovery and liveness).  A GUI reads snapshot DTOs from
//! it, subscribes to the registry or to individual devices for change
//! notifications, and issues connect/disconnect commands through it.
//!
//! # Data Transfer Objects (DTOs)
//!
//! The entities hold locks and listener lists and cannot be handed to a UI
//! thread as-is.  [`ServerDto`] and [`DeviceDto`] are plain copies of what a
//! view shows, derived with `Serialize`/`Deserialize` so they can cross a
//! process or language boundary as JSON.
//!
//! # Unreachable servers
//!
//! When a command finds a server unreachable, the server is dropped from the
//! registry straight away rather than waiting for the staleness sweep; the
//! error is still returned to the caller.  A server that is merely slow
//! reappears with its next broadcast.

use std::net::SocketAddr;
use std::sync::Arc;

use link_core::{format_connect_time, ClientStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::{DeviceSnapshot, LinkError, Messenger, Server, ServerRegistry};
use crate::infrastructure::network::discovery::{bind_multicast, DiscoveryError, DiscoveryListener};
use crate::infrastructure::network::liveness::{LivenessConfig, LivenessConfigError, LivenessMonitor};
use crate::infrastructure::network::transport::UdpMessenger;
use crate::infrastructure::shutdown::{self, ShutdownTrigger};
use crate::infrastructure::storage::config::AppConfig;

/// Why [`LinkControl::start`] could not bring the client up.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid liveness settings: {0}")]
    Liveness(#[from] LivenessConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// One known server, as a list view shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDto {
    pub address: String,
    pub device_count: usize,
    /// The last keep-alive to this server failed.
    pub suspect: bool,
    pub seconds_since_heard: u64,
}

impl From<&Server> for ServerDto {
    fn from(server: &Server) -> Self {
        Self {
            address: server.addr().to_string(),
            device_count: server.devices().len(),
            suspect: server.is_suspect(),
            seconds_since_heard: server.last_heard_from().elapsed().as_secs(),
        }
    }
}

/// One device on a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDto {
    pub name: String,
    pub description: String,
    pub status: String,
    pub client_status: String,
    pub connect_seconds: u64,
    /// `connect_seconds` in words, e.g. `"2 Minutes, 0 Seconds."`.
    pub connect_time: String,
    pub users: u32,
    /// Increases with every change; a view keeps the highest it has seen.
    pub revision: u64,
}

impl From<&DeviceSnapshot> for DeviceDto {
    fn from(s: &DeviceSnapshot) -> Self {
        Self {
            name: s.name.clone(),
            description: s.description.clone(),
            status: s.status.label().to_string(),
            client_status: s.client_status.label().to_string(),
            connect_seconds: s.connect_seconds,
            connect_time: format_connect_time(s.connect_seconds),
            users: s.users,
            revision: s.revision,
        }
    }
}

// ── LinkControl ───────────────────────────────────────────────────────────────

/// Handle to a running link client.
pub struct LinkControl {
    registry: Arc<ServerRegistry>,
    messenger: Arc<dyn Messenger>,
    trigger: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl LinkControl {
    /// A handle over an existing registry with no background loops.
    pub fn new(registry: Arc<ServerRegistry>, messenger: Arc<dyn Messenger>) -> Self {
        let (trigger, _) = shutdown::channel();
        Self {
            registry,
            messenger,
            trigger,
            tasks: Vec::new(),
        }
    }

    /// Starts discovery on `socket` and the liveness sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        registry: Arc<ServerRegistry>,
        messenger: Arc<dyn Messenger>,
        socket: UdpSocket,
        liveness: LivenessConfig,
    ) -> Self {
        let (trigger, shutdown) = shutdown::channel();

        let listener = DiscoveryListener::new(socket, Arc::clone(&registry), Arc::clone(&messenger));
        let monitor = LivenessMonitor::new(Arc::clone(&registry), Arc::clone(&messenger), liveness);
        let tasks = vec![
            tokio::spawn(listener.run(shutdown.clone())),
            tokio::spawn(monitor.run(shutdown)),
        ];

        Self {
            registry,
            messenger,
            trigger,
            tasks,
        }
    }

    /// Joins the configured multicast group and starts both loops.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::Liveness`] for unusable liveness timings and
    /// [`StartError::Discovery`] if the multicast socket cannot be set up.
    pub async fn start(config: &AppConfig) -> Result<Self, StartError> {
        let liveness = config.liveness()?;
        liveness.validate()?;
        let socket = bind_multicast(
            config.discovery.multicast_group,
            config.discovery.multicast_port,
        )
        .await?;

        Ok(Self::spawn(
            Arc::new(ServerRegistry::new()),
            Arc::new(UdpMessenger::new(config.transport())),
            socket,
            liveness,
        ))
    }

    /// The live registry, for subscribing to server and device changes.
    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn servers(&self) -> Vec<ServerDto> {
        self.registry
            .servers()
            .iter()
            .map(|server| ServerDto::from(server.as_ref()))
            .collect()
    }

    /// # Errors
    ///
    /// Returns [`LinkError::NoSuchServer`] if `addr` is not known.
    pub fn server(&self, addr: SocketAddr) -> Result<ServerDto, LinkError> {
        self.registry
            .get(addr)
            .map(|server| ServerDto::from(server.as_ref()))
    }

    /// # Errors
    ///
    /// Returns [`LinkError::NoSuchServer`] if `addr` is not known.
    pub fn devices(&self, addr: SocketAddr) -> Result<Vec<DeviceDto>, LinkError> {
        let server = self.registry.get(addr)?;
        Ok(server
            .devices()
            .devices()
            .iter()
            .map(|device| DeviceDto::from(&device.snapshot()))
            .collect())
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Connects this client to `device` and returns the refreshed status.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NoSuchServer`], [`LinkError::NoSuchDevice`], or
    /// the error from the status refresh.
    pub async fn connect(&self, addr: SocketAddr, device: &str) -> Result<ClientStatus, LinkError> {
        let server = self.registry.get(addr)?;
        let result = server.connect_device(self.messenger.as_ref(), device).await;
        self.forget_if_unreachable(addr, result)
    }

    /// Disconnects this client from `device`.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn disconnect(&self, addr: SocketAddr, device: &str) -> Result<ClientStatus, LinkError> {
        let server = self.registry.get(addr)?;
        let result = server.disconnect_device(self.messenger.as_ref(), device).await;
        self.forget_if_unreachable(addr, result)
    }

    /// Brings `device` down for every user.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn force_disconnect(&self, addr: SocketAddr, device: &str) -> Result<ClientStatus, LinkError> {
        let server = self.registry.get(addr)?;
        let result = server.force_disconnect(self.messenger.as_ref(), device).await;
        self.forget_if_unreachable(addr, result)
    }

    /// Asks the server again whether this client is connected to `device`.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn refresh(&self, addr: SocketAddr, device: &str) -> Result<ClientStatus, LinkError> {
        let server = self.registry.get(addr)?;
        let result = server
            .refresh_client_status(self.messenger.as_ref(), device)
            .await;
        self.forget_if_unreachable(addr, result)
    }

    /// Stops both loops and waits for them to finish.
    pub async fn shutdown(self) {
        self.trigger.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("background task ended abnormally: {e}");
            }
        }
        info!("link client stopped");
    }

    fn forget_if_unreachable<T>(&self, addr: SocketAddr, result: Result<T, LinkError>) -> Result<T, LinkError> {
        if let Err(e @ LinkError::Unreachable { .. }) = &result {
            warn!("dropping server {addr}: {e}");
            if let Err(e) = self.registry.remove(addr) {
                info!("server {addr} already gone: {e}");
            }
        }
        result
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use link_core::{ClientRequest, DeviceListing, DeviceReport, DeviceStatus, ServerResponse};

    use crate::application::messenger::TransportError;

    /// A pretend server: records every request and keeps a connected set.
    #[derive(Default)]
    struct ScriptedMessenger {
        sent: Mutex<Vec<ClientRequest>>,
        connected: Mutex<Vec<String>>,
        unreachable: AtomicBool,
    }

    impl ScriptedMessenger {
        fn sent(&self) -> Vec<ClientRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Messenger for ScriptedMessenger {
        async fn send(&self, to: SocketAddr, request: &ClientRequest) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(TransportError::Timeout { remote: to, attempts: 3 });
            }
            let mut connected = self.connected.lock().unwrap();
            match request {
                ClientRequest::Up(name) => connected.push(name.clone()),
                ClientRequest::Down(name) | ClientRequest::ForceDown(name) => {
                    connected.retain(|n| n != name)
                }
                _ => {}
            }
            Ok(())
        }

        async fn request(&self, to: SocketAddr, request: &ClientRequest) -> Result<String, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(TransportError::Timeout { remote: to, attempts: 3 });
            }
            let response = match request {
                ClientRequest::Devices => ServerResponse::Devices(vec![
                    DeviceListing::new("modem0", "Modem A"),
                    DeviceListing::new("modem1", "Modem B"),
                ]),
                _ => ServerResponse::ClientStatus(self.connected.lock().unwrap().clone()),
            };
            Ok(response.to_string())
        }
    }

    fn addr() -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 30], 6789))
    }

    async fn control_with_server() -> (LinkControl, Arc<ScriptedMessenger>) {
        let messenger = Arc::new(ScriptedMessenger::default());
        let registry = Arc::new(ServerRegistry::new());
        let server = Server::connect(addr(), messenger.as_ref()).await.unwrap();
        registry.add(Arc::new(server)).unwrap();
        let control = LinkControl::new(registry, messenger.clone());
        (control, messenger)
    }

    // ── DTOs ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_device_dto_serialises_with_readable_connect_time() {
        // Arrange
        let snapshot = DeviceSnapshot {
            name: "modem0".into(),
            description: "Modem A".into(),
            status: DeviceStatus::Up,
            client_status: ClientStatus::Connected,
            connect_seconds: 120,
            users: 3,
            revision: 4,
        };

        // Act
        let json = serde_json::to_value(DeviceDto::from(&snapshot)).unwrap();

        // Assert
        assert_eq!(json["status"], "Up");
        assert_eq!(json["client_status"], "Connected");
        assert_eq!(json["connect_time"], "2 Minutes, 0 Seconds.");
        assert_eq!(json["users"], 3);
        assert_eq!(json["revision"], 4);
    }

    #[tokio::test]
    async fn test_server_dto_lists_device_count() {
        let (control, _) = control_with_server().await;

        let servers = control.servers();

        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].address, "192.0.2.30:6789");
        assert_eq!(servers[0].device_count, 2);
        assert!(!servers[0].suspect);
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_devices_reflect_applied_status() {
        // Arrange
        let (control, _) = control_with_server().await;
        let server = control.registry().get(addr()).unwrap();
        server
            .devices()
            .get("modem1")
            .unwrap()
            .apply_report(&DeviceReport::Connecting);

        // Act
        let devices = control.devices(addr()).unwrap();

        // Assert
        assert_eq!(devices[0].status, "Unknown");
        assert_eq!(devices[0].client_status, "Disconnected");
        assert_eq!(devices[1].status, "Connecting");
    }

    #[tokio::test]
    async fn test_unknown_server_is_reported() {
        let (control, _) = control_with_server().await;
        let stranger = SocketAddr::from(([192, 0, 2, 31], 6789));

        assert!(matches!(control.devices(stranger), Err(LinkError::NoSuchServer(_))));
        assert!(matches!(control.server(stranger), Err(LinkError::NoSuchServer(_))));
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_connect_sends_up_and_refreshes() {
        // Arrange
        let (control, messenger) = control_with_server().await;

        // Act
        let status = control.connect(addr(), "MODEM0").await.unwrap();

        // Assert: the device's own spelling goes on the wire
        assert_eq!(status, ClientStatus::Connected);
        assert!(messenger.sent().contains(&ClientRequest::Up("modem0".into())));
        assert_eq!(control.devices(addr()).unwrap()[0].client_status, "Connected");
    }

    #[tokio::test]
    async fn test_disconnect_after_connect_reports_disconnected() {
        let (control, _) = control_with_server().await;
        control.connect(addr(), "modem1").await.unwrap();

        let status = control.disconnect(addr(), "modem1").await.unwrap();

        assert_eq!(status, ClientStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_dropped() {
        // Arrange
        let (control, messenger) = control_with_server().await;
        messenger.unreachable.store(true, Ordering::SeqCst);

        // Act
        let result = control.force_disconnect(addr(), "modem0").await;

        // Assert
        assert!(matches!(result, Err(LinkError::Unreachable { .. })));
        assert!(control.servers().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_device_keeps_server() {
        let (control, _) = control_with_server().await;

        let result = control.refresh(addr(), "modem9").await;

        assert!(matches!(result, Err(LinkError::NoSuchDevice(_))));
        assert_eq!(control.servers().len(), 1);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_shutdown_stops_background_loops() {
        // Arrange
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let control = LinkControl::spawn(
            Arc::new(ServerRegistry::new()),
            Arc::new(ScriptedMessenger::default()),
            socket,
            LivenessConfig::default(),
        );

        // Act / Assert
        tokio::time::timeout(Duration::from_secs(2), control.shutdown())
            .await
            .expect("both loops must stop");
    }

    #[tokio::test]
    async fn test_start_rejects_unusable_liveness_settings() {
        // Arrange
        let mut config = AppConfig::default();
        config.liveness.server_broadcast_interval_secs = u64::MAX / 2;

        // Act
        let result = LinkControl::start(&config).await;

        // Assert
        assert!(matches!(result, Err(StartError::Liveness(_))));
    }
}
