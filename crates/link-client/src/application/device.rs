//! One device controlled by a link server.
//!
//! # State machines (for beginners)
//!
//! A device carries two independent statuses:
//!
//! ```text
//! device status   Unknown ──STATUS broadcast──► Down | Up | Connecting | Disconnecting
//!                 (only the server's reports move it; nothing is inferred locally)
//!
//! client status   Unknown ──CLIENT_STATUS reply──► Connected | Disconnected
//!                    ▲                                        │
//!                    └────────── server unreachable ──────────┘
//! ```
//!
//! Connected time and user count travel only with an `UP` report and are
//! applied in the same critical section as the status change.  Other reports
//! leave them untouched.
//!
//! # Notification order
//!
//! Listeners run after the lock is released, so two updates racing on
//! different threads may deliver their snapshots out of order.  Every update
//! bumps [`DeviceSnapshot::revision`] under the lock; a listener that keeps
//! the highest revision it has seen never goes back to an older state.

use std::sync::{Mutex, MutexGuard, PoisonError};

use link_core::{ClientStatus, DeviceReport, DeviceStatus};

use crate::application::notify::{Listeners, SubscriptionId};

/// Point-in-time copy of a device's fields, passed to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub name: String,
    pub description: String,
    pub status: DeviceStatus,
    pub client_status: ClientStatus,
    pub connect_seconds: u64,
    pub users: u32,
    /// Number of updates applied to the device when this copy was taken.
    pub revision: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct DeviceState {
    status: DeviceStatus,
    client_status: ClientStatus,
    connect_seconds: u64,
    users: u32,
    revision: u64,
}

/// A device as this client currently knows it.
///
/// Name and description are fixed at creation; everything else sits behind
/// one mutex so readers always see a consistent combination.
#[derive(Debug)]
pub struct Device {
    name: String,
    description: String,
    state: Mutex<DeviceState>,
    listeners: Listeners<DeviceSnapshot>,
}

impl Device {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            state: Mutex::new(DeviceState::default()),
            listeners: Listeners::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Device names compare without regard to ASCII case.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn status(&self) -> DeviceStatus {
        self.lock().status
    }

    pub fn client_status(&self) -> ClientStatus {
        self.lock().client_status
    }

    /// Seconds the device has been up, as of the last `UP` report.
    pub fn connect_seconds(&self) -> u64 {
        self.lock().connect_seconds
    }

    /// Users sharing the device, as of the last `UP` report.
    pub fn users(&self) -> u32 {
        self.lock().users
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let state = *self.lock();
        self.snapshot_of(state)
    }

    /// Applies a server's report about this device and notifies listeners.
    pub fn apply_report(&self, report: &DeviceReport) {
        let state = {
            let mut state = self.lock();
            state.status = report.status();
            if let DeviceReport::Up {
                connect_seconds,
                users,
            } = *report
            {
                state.connect_seconds = connect_seconds;
                state.users = users;
            }
            state.revision += 1;
            *state
        };
        self.listeners.notify(&self.snapshot_of(state));
    }

    /// Records this client's relationship to the device and notifies listeners.
    pub fn set_client_status(&self, client_status: ClientStatus) {
        let state = {
            let mut state = self.lock();
            state.client_status = client_status;
            state.revision += 1;
            *state
        };
        self.listeners.notify(&self.snapshot_of(state));
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&DeviceSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn snapshot_of(&self, state: DeviceState) -> DeviceSnapshot {
        DeviceSnapshot {
            name: self.name.clone(),
            description: self.description.clone(),
            status: state.status,
            client_status: state.client_status,
            connect_seconds: state.connect_seconds,
            users: state.users,
            revision: state.revision,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn up(connect_seconds: u64, users: u32) -> DeviceReport {
        DeviceReport::Up {
            connect_seconds,
            users,
        }
    }

    #[test]
    fn test_new_device_is_unknown_with_zero_counters() {
        let device = Device::new("modem0", "Modem A");

        let snapshot = device.snapshot();

        assert_eq!(snapshot.status, DeviceStatus::Unknown);
        assert_eq!(snapshot.client_status, ClientStatus::Unknown);
        assert_eq!(snapshot.connect_seconds, 0);
        assert_eq!(snapshot.users, 0);
        assert_eq!(snapshot.description, "Modem A");
    }

    #[test]
    fn test_up_report_sets_status_and_counters_together() {
        let device = Device::new("modem0", "Modem A");

        device.apply_report(&up(120, 3));

        assert_eq!(device.status(), DeviceStatus::Up);
        assert_eq!(device.connect_seconds(), 120);
        assert_eq!(device.users(), 3);
    }

    #[test]
    fn test_non_up_report_leaves_counters_untouched() {
        // Arrange
        let device = Device::new("modem0", "Modem A");
        device.apply_report(&up(300, 2));

        // Act
        device.apply_report(&DeviceReport::Disconnecting);

        // Assert
        assert_eq!(device.status(), DeviceStatus::Disconnecting);
        assert_eq!(device.connect_seconds(), 300);
        assert_eq!(device.users(), 2);
    }

    #[test]
    fn test_listener_sees_committed_state() {
        let device = Arc::new(Device::new("modem0", "Modem A"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reader = Arc::clone(&device);
        device.subscribe(move |snapshot| {
            // Reading the device from inside the callback must not deadlock.
            assert_eq!(reader.status(), snapshot.status);
            sink.lock().unwrap().push(snapshot.clone());
        });

        device.apply_report(&up(5, 1));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, DeviceStatus::Up);
        assert_eq!(seen[0].users, 1);
    }

    #[test]
    fn test_set_client_status_notifies() {
        let device = Device::new("modem0", "Modem A");
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let id = device.subscribe(move |_| *counter.lock().unwrap() += 1);

        device.set_client_status(ClientStatus::Connected);
        assert!(device.unsubscribe(id));
        device.set_client_status(ClientStatus::Disconnected);

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(device.client_status(), ClientStatus::Disconnected);
    }

    #[test]
    fn test_every_update_bumps_revision() {
        // Arrange
        let device = Device::new("modem0", "Modem A");
        let revisions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&revisions);
        device.subscribe(move |snapshot| sink.lock().unwrap().push(snapshot.revision));

        // Act
        device.apply_report(&up(5, 1));
        device.set_client_status(ClientStatus::Connected);
        device.apply_report(&DeviceReport::Down);

        // Assert
        assert_eq!(*revisions.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(device.snapshot().revision, 3);
    }

    #[test]
    fn test_concurrent_updates_get_distinct_revisions() {
        // Arrange: a listener that keeps only the newest snapshot
        let device = Arc::new(Device::new("modem0", "Modem A"));
        let latest: Arc<Mutex<Option<DeviceSnapshot>>> = Arc::new(Mutex::new(None));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (keep, log) = (Arc::clone(&latest), Arc::clone(&seen));
        device.subscribe(move |snapshot| {
            log.lock().unwrap().push(snapshot.revision);
            let mut latest = keep.lock().unwrap();
            if latest.as_ref().map_or(true, |old| old.revision < snapshot.revision) {
                *latest = Some(snapshot.clone());
            }
        });

        // Act
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let device = Arc::clone(&device);
                std::thread::spawn(move || {
                    for n in 0..25 {
                        device.apply_report(&up(i * 100 + n, 1));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        // Assert: the newest-kept snapshot is the device's final state
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (1..=100).collect::<Vec<u64>>());
        assert_eq!(latest.lock().unwrap().clone(), Some(device.snapshot()));
    }

    #[test]
    fn test_is_named_ignores_case() {
        let device = Device::new("Modem0", "");
        assert!(device.is_named("modem0"));
        assert!(device.is_named("MODEM0"));
        assert!(!device.is_named("modem1"));
    }
}
