//! Server and device registries.
//!
//! Both registries are shared between the discovery listener, the liveness
//! monitor and GUI commands, so every method takes `&self` and locks
//! internally.  A mutation and its change event are ordered: the event is
//! fired after the lock is released, so a listener that enumerates the
//! registry sees the committed state.
//!
//! # Races between tasks
//!
//! The discovery listener (on `BROADCAST QUIT`) and the liveness monitor (on
//! staleness) may both try to remove the same server.  The loser gets
//! [`LinkError::NoSuchServer`]; callers on those paths treat it as a no-op.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use link_core::DeviceListing;
use tracing::warn;

use crate::application::device::Device;
use crate::application::error::LinkError;
use crate::application::notify::{Listeners, SubscriptionId};
use crate::application::server::Server;

/// A committed change to a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent<K> {
    Added(K),
    Removed(K),
    /// Every entry was removed.
    Cleared,
    /// The whole contents were replaced in one step.
    Reloaded,
}

// ── ServerRegistry ────────────────────────────────────────────────────────────

/// All link servers currently known, keyed by the address they broadcast from.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: RwLock<BTreeMap<SocketAddr, Arc<Server>>>,
    listeners: Listeners<RegistryEvent<SocketAddr>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `server`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::ServerExists`] if its address is already taken;
    /// the registry is left unchanged.
    pub fn add(&self, server: Arc<Server>) -> Result<(), LinkError> {
        let addr = server.addr();
        {
            let mut servers = self.write();
            if servers.contains_key(&addr) {
                return Err(LinkError::ServerExists(addr));
            }
            servers.insert(addr, server);
        }
        self.listeners.notify(&RegistryEvent::Added(addr));
        Ok(())
    }

    /// Removes and returns the server at `addr`, together with its devices.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NoSuchServer`] if nothing is registered there; no
    /// event is fired in that case.
    pub fn remove(&self, addr: SocketAddr) -> Result<Arc<Server>, LinkError> {
        let removed = self
            .write()
            .remove(&addr)
            .ok_or(LinkError::NoSuchServer(addr))?;
        self.listeners.notify(&RegistryEvent::Removed(addr));
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns [`LinkError::NoSuchServer`] if nothing is registered at `addr`.
    pub fn get(&self, addr: SocketAddr) -> Result<Arc<Server>, LinkError> {
        self.find(addr).ok_or(LinkError::NoSuchServer(addr))
    }

    pub fn find(&self, addr: SocketAddr) -> Option<Arc<Server>> {
        self.read().get(&addr).cloned()
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.read().contains_key(&addr)
    }

    /// Snapshot of every server, ordered by address.
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.read().values().cloned().collect()
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Forgets every server.  Fires [`RegistryEvent::Cleared`] only if there
    /// was something to forget.
    pub fn clear(&self) {
        let had_entries = {
            let mut servers = self.write();
            let had_entries = !servers.is_empty();
            servers.clear();
            had_entries
        };
        if had_entries {
            self.listeners.notify(&RegistryEvent::Cleared);
        }
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&RegistryEvent<SocketAddr>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<SocketAddr, Arc<Server>>> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<SocketAddr, Arc<Server>>> {
        self.servers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── DeviceRegistry ────────────────────────────────────────────────────────────

/// The devices of one server, in the order the server listed them.
///
/// Names are unique ignoring ASCII case.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<Arc<Device>>>,
    listeners: Listeners<RegistryEvent<String>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`LinkError::DeviceExists`] if a device with the same name is
    /// already registered.
    pub fn add(&self, device: Arc<Device>) -> Result<(), LinkError> {
        let name = device.name().to_string();
        {
            let mut devices = self.write();
            if devices.iter().any(|d| d.is_named(&name)) {
                return Err(LinkError::DeviceExists(name));
            }
            devices.push(device);
        }
        self.listeners.notify(&RegistryEvent::Added(name));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`LinkError::NoSuchDevice`] if no device has this name; no
    /// event is fired in that case.
    pub fn remove(&self, name: &str) -> Result<Arc<Device>, LinkError> {
        let removed = {
            let mut devices = self.write();
            let index = devices
                .iter()
                .position(|d| d.is_named(name))
                .ok_or_else(|| LinkError::NoSuchDevice(name.to_string()))?;
            devices.remove(index)
        };
        self.listeners
            .notify(&RegistryEvent::Removed(removed.name().to_string()));
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns [`LinkError::NoSuchDevice`] if no device has this name.
    pub fn get(&self, name: &str) -> Result<Arc<Device>, LinkError> {
        self.find(name)
            .ok_or_else(|| LinkError::NoSuchDevice(name.to_string()))
    }

    pub fn find(&self, name: &str) -> Option<Arc<Device>> {
        self.read().iter().find(|d| d.is_named(name)).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|d| d.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        let had_entries = {
            let mut devices = self.write();
            let had_entries = !devices.is_empty();
            devices.clear();
            had_entries
        };
        if had_entries {
            self.listeners.notify(&RegistryEvent::Cleared);
        }
    }

    /// Replaces the contents with fresh devices built from `listings`.
    ///
    /// Readers see either the old list or the new one, never a half-built
    /// list.  A name listed twice keeps its first entry.  Returns the number
    /// of devices now registered.
    pub fn reload(&self, listings: &[DeviceListing]) -> usize {
        let mut fresh: Vec<Arc<Device>> = Vec::with_capacity(listings.len());
        for listing in listings {
            if fresh.iter().any(|d| d.is_named(&listing.name)) {
                warn!("device {:?} listed twice, keeping the first", listing.name);
                continue;
            }
            fresh.push(Arc::new(Device::new(
                listing.name.clone(),
                listing.description.clone(),
            )));
        }

        let count = fresh.len();
        *self.write() = fresh;
        self.listeners.notify(&RegistryEvent::Reloaded);
        count
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&RegistryEvent<String>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Device>>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Device>>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
