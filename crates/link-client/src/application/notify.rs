//! Change notification: a list of callbacks that can be added and removed.
//!
//! # Rules
//!
//! - Listeners run synchronously on the thread that made the change.
//! - They run *after* the mutation is committed and after every entity lock
//!   has been released, so a listener may read (or even mutate) the entity
//!   that notified it without deadlocking.
//! - A listener added or removed while a notification is in flight takes
//!   effect from the next notification.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle returned by [`Listeners::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// The subscribers of one registry or entity.
pub struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Registers `callback` and returns the handle that removes it again.
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Callback<E> = Arc::new(callback);
        self.lock().push((id, callback));
        id
    }

    /// Removes a listener.  Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Calls every listener with `event`.
    pub fn notify(&self, event: &E) {
        // Snapshot so callbacks run without the list locked.
        let callbacks: Vec<Callback<E>> = self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Callback<E>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("count", &self.len()).finish()
    }
}
