//! One link server and the conversations the client has with it.
//!
//! A server is identified by the address its broadcasts come from; requests
//! go back to that same address.  It owns its [`DeviceRegistry`] outright:
//! removing the server from the [`ServerRegistry`] drops every device with
//! it.
//!
//! [`ServerRegistry`]: crate::application::registry::ServerRegistry

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use link_core::protocol::messages::tokens;
use link_core::{
    parse_response, ClientRequest, ClientStatus, DeviceListing, ProtocolError, ResponseKind,
    ServerResponse, StatusReport,
};
use tracing::{debug, info, warn};

use crate::application::error::LinkError;
use crate::application::messenger::Messenger;
use crate::application::registry::DeviceRegistry;

#[derive(Debug, Clone, Copy)]
struct Contact {
    last_heard_from: Instant,
    last_talked_to: Instant,
    suspect: bool,
}

/// A link server this client has heard from.
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
    contact: Mutex<Contact>,
    devices: DeviceRegistry,
}

impl Server {
    /// Creates a server with no devices, heard from and talked to just now.
    pub fn new(addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            addr,
            contact: Mutex::new(Contact {
                last_heard_from: now,
                last_talked_to: now,
                suspect: false,
            }),
            devices: DeviceRegistry::new(),
        }
    }

    /// Creates a server and loads its device list.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unreachable`] or [`LinkError::Malformed`] if the
    /// device list cannot be fetched; no server is produced then.
    pub async fn connect(addr: SocketAddr, messenger: &dyn Messenger) -> Result<Self, LinkError> {
        let server = Self::new(addr);
        server.reinit(messenger).await?;
        Ok(server)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    // ── Contact bookkeeping ───────────────────────────────────────────────────

    pub fn last_heard_from(&self) -> Instant {
        self.contact().last_heard_from
    }

    pub fn last_talked_to(&self) -> Instant {
        self.contact().last_talked_to
    }

    /// Records a broadcast from this server; clears the suspect flag.
    pub fn mark_heard(&self) {
        self.mark_heard_at(Instant::now());
    }

    pub fn mark_heard_at(&self, at: Instant) {
        let mut contact = self.contact();
        contact.last_heard_from = at;
        contact.suspect = false;
    }

    pub fn mark_talked_at(&self, at: Instant) {
        self.contact().last_talked_to = at;
    }

    /// Flags the server after a failed keep-alive.
    pub fn mark_suspect(&self) {
        self.contact().suspect = true;
    }

    pub fn is_suspect(&self) -> bool {
        self.contact().suspect
    }

    // ── Conversations ─────────────────────────────────────────────────────────

    /// Fetches the device list, replaces the registry contents with it, then
    /// synchronises every device's client status.
    ///
    /// A failed client-status sync is logged and leaves those statuses
    /// `Unknown`; it does not fail the reload.  Returns the device count.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unreachable`] or [`LinkError::Malformed`] if the
    /// device list cannot be fetched.  The registry is untouched then.
    pub async fn reinit(&self, messenger: &dyn Messenger) -> Result<usize, LinkError> {
        let listings = self.fetch_devices(messenger).await?;
        let count = self.devices.reload(&listings);
        info!("server {} lists {count} device(s)", self.addr);

        if let Err(e) = self.sync_client_status(messenger).await {
            warn!("could not read client status from {}: {e}", self.addr);
        }
        Ok(count)
    }

    /// Asks for the device list without touching the registry.
    ///
    /// # Errors
    ///
    /// Same as [`Server::reinit`].
    pub async fn fetch_devices(
        &self,
        messenger: &dyn Messenger,
    ) -> Result<Vec<DeviceListing>, LinkError> {
        match self
            .query(messenger, ClientRequest::Devices, ResponseKind::Devices)
            .await?
        {
            ServerResponse::Devices(listings) => Ok(listings),
            other => Err(mismatch(&other)),
        }
    }

    /// Updates every device's client status from one `CLIENT_STATUS` reply.
    ///
    /// # Errors
    ///
    /// On any failure every device is set to [`ClientStatus::Unknown`] and
    /// the error is returned.
    pub async fn sync_client_status(&self, messenger: &dyn Messenger) -> Result<(), LinkError> {
        let devices = self.devices.devices();
        match self.connected_names(messenger).await {
            Ok(names) => {
                for device in devices {
                    let connected = names.iter().any(|n| device.is_named(n));
                    device.set_client_status(ClientStatus::from_membership(connected));
                }
                Ok(())
            }
            Err(e) => {
                for device in devices {
                    device.set_client_status(ClientStatus::Unknown);
                }
                Err(e)
            }
        }
    }

    /// Asks the server whether this client is connected to `name` and records
    /// the answer on the device.
    ///
    /// # Errors
    ///
    /// - [`LinkError::NoSuchDevice`] if this server has no such device.
    /// - [`LinkError::Unreachable`] / [`LinkError::Malformed`] if the server
    ///   does not give a usable answer; the device is set to
    ///   [`ClientStatus::Unknown`] first.
    pub async fn refresh_client_status(
        &self,
        messenger: &dyn Messenger,
        name: &str,
    ) -> Result<ClientStatus, LinkError> {
        let device = self.devices.get(name)?;
        match self.connected_names(messenger).await {
            Ok(names) => {
                let status = ClientStatus::from_membership(names.iter().any(|n| device.is_named(n)));
                device.set_client_status(status);
                Ok(status)
            }
            Err(e) => {
                device.set_client_status(ClientStatus::Unknown);
                Err(e)
            }
        }
    }

    /// Asks the server to connect this client to `name`, then reports what
    /// the server says the client status is afterwards.
    ///
    /// # Errors
    ///
    /// See [`Server::refresh_client_status`].  A failure to send the request
    /// itself is only logged.
    pub async fn connect_device(
        &self,
        messenger: &dyn Messenger,
        name: &str,
    ) -> Result<ClientStatus, LinkError> {
        self.command_then_refresh(messenger, name, ClientRequest::Up)
            .await
    }

    /// Asks the server to disconnect this client from `name`.
    ///
    /// # Errors
    ///
    /// See [`Server::connect_device`].
    pub async fn disconnect_device(
        &self,
        messenger: &dyn Messenger,
        name: &str,
    ) -> Result<ClientStatus, LinkError> {
        self.command_then_refresh(messenger, name, ClientRequest::Down)
            .await
    }

    /// Asks the server to bring `name` down for every user.
    ///
    /// # Errors
    ///
    /// See [`Server::connect_device`].
    pub async fn force_disconnect(
        &self,
        messenger: &dyn Messenger,
        name: &str,
    ) -> Result<ClientStatus, LinkError> {
        self.command_then_refresh(messenger, name, ClientRequest::ForceDown)
            .await
    }

    /// Sends a keep-alive so the server does not forget this client.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unreachable`] if the ping could not be sent.
    pub async fn ping(&self, messenger: &dyn Messenger) -> Result<(), LinkError> {
        self.send(messenger, &ClientRequest::Ping).await
    }

    /// Applies a status report to the named devices.
    ///
    /// Entries the codec rejected and entries naming unknown devices are
    /// returned as errors; every other entry is applied.
    pub fn apply_status(&self, report: &StatusReport) -> Vec<LinkError> {
        let mut anomalies: Vec<LinkError> = report
            .rejected
            .iter()
            .map(|rejected| match &rejected.error {
                ProtocolError::InvalidStatus(status) => LinkError::InvalidStatus {
                    device: rejected.name.clone().unwrap_or_default(),
                    status: status.clone(),
                },
                other => LinkError::Malformed(other.clone()),
            })
            .collect();

        for entry in &report.entries {
            match self.devices.get(&entry.name) {
                Ok(device) => device.apply_report(&entry.report),
                Err(e) => anomalies.push(e),
            }
        }
        anomalies
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn command_then_refresh(
        &self,
        messenger: &dyn Messenger,
        name: &str,
        build: fn(String) -> ClientRequest,
    ) -> Result<ClientStatus, LinkError> {
        let device = self.devices.get(name)?;
        let request = build(device.name().to_string());
        if let Err(e) = self.send(messenger, &request).await {
            warn!("{request} to {} failed: {e}", self.addr);
        }
        self.refresh_client_status(messenger, device.name()).await
    }

    async fn connected_names(&self, messenger: &dyn Messenger) -> Result<Vec<String>, LinkError> {
        match self
            .query(messenger, ClientRequest::ClientStatus, ResponseKind::ClientStatus)
            .await?
        {
            ServerResponse::ClientStatus(names) => Ok(names),
            other => Err(mismatch(&other)),
        }
    }

    /// Only a request that actually left this host counts as talking to
    /// the server.
    async fn send(&self, messenger: &dyn Messenger, request: &ClientRequest) -> Result<(), LinkError> {
        messenger
            .send(self.addr, request)
            .await
            .map_err(|source| LinkError::Unreachable {
                addr: self.addr,
                source,
            })?;
        self.mark_talked_at(Instant::now());
        Ok(())
    }

    async fn query(
        &self,
        messenger: &dyn Messenger,
        request: ClientRequest,
        expected: ResponseKind,
    ) -> Result<ServerResponse, LinkError> {
        let text = messenger
            .request(self.addr, &request)
            .await
            .map_err(|source| LinkError::Unreachable {
                addr: self.addr,
                source,
            })?;
        self.mark_talked_at(Instant::now());
        debug!("{} answered {request}: {text:?}", self.addr);

        parse_response(&text, expected).map_err(|e| {
            warn!("discarding reply from {} to {request}: {e}", self.addr);
            LinkError::Malformed(e)
        })
    }

    fn contact(&self) -> MutexGuard<'_, Contact> {
        self.contact.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn mismatch(response: &ServerResponse) -> LinkError {
    LinkError::Malformed(ProtocolError::UnexpectedKind {
        family: tokens::SERVER,
        found: response.kind().token().to_string(),
    })
}
