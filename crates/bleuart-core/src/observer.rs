//! Observer registry
//!
//! Observers are held by [`Weak`] reference only. Registering returns an
//! [`ObserverHandle`] the caller uses to unregister; an observer whose last
//! strong reference is dropped is skipped and pruned on the next delivery.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::channel::UartEvent;
use crate::errors::UartError;
use crate::types::{DeviceAddress, LinkRole};

// ----------------------------------------------------------------------------
// Observer Trait
// ----------------------------------------------------------------------------

/// Callbacks raised by the engine
///
/// Every method has an empty default so observers implement only what they use.
/// Callbacks run on whichever thread delivered the triggering transport event
/// and may call back into the engine.
pub trait UartObserver: Send + Sync {
    /// A link is ready to carry data
    fn on_connected(&self, _address: DeviceAddress, _role: LinkRole) {}

    /// A connection attempt or its setup failed
    fn on_connect_failed(&self, _error: &UartError) {}

    /// A ready link went away
    fn on_disconnected(&self, _address: DeviceAddress, _role: LinkRole) {}

    /// Data arrived from a peer
    fn on_receive(&self, _address: DeviceAddress, _data: &[u8]) {}

    /// A peer this side should connect to was discovered
    fn on_device_found(&self, _address: DeviceAddress) {}

    /// Device Information for a client link finished reading
    fn on_device_info_available(&self, _address: DeviceAddress) {}

    /// A failure that did not concern connection setup
    fn on_error(&self, _error: &UartError) {}
}

/// Token identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Registrations {
    next_id: u64,
    entries: Vec<(ObserverHandle, Weak<dyn UartObserver>)>,
}

/// Non-owning set of observers shared by both roles
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<Registrations>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer without taking ownership of it
    pub fn register<O: UartObserver + 'static>(&self, observer: &Arc<O>) -> ObserverHandle {
        let weak: Weak<dyn UartObserver> = Arc::downgrade(observer) as Weak<dyn UartObserver>;
        self.register_weak(weak)
    }

    pub fn register_weak(&self, observer: Weak<dyn UartObserver>) -> ObserverHandle {
        let mut inner = self.inner.lock();
        let handle = ObserverHandle(inner.next_id);
        inner.next_id += 1;
        inner.entries.push((handle, observer));
        handle
    }

    /// Remove a registration; returns false when the handle was unknown
    pub fn unregister(&self, handle: ObserverHandle) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|(h, _)| *h != handle);
        inner.entries.len() != before
    }

    /// Number of registrations whose observer is still alive
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every live observer
    ///
    /// The registry lock is released before any callback runs, so observers may
    /// register or unregister from inside a callback. An observer unregistered
    /// by an earlier callback of the same event is skipped.
    pub fn dispatch(&self, event: &UartEvent) {
        let snapshot: Vec<(ObserverHandle, Weak<dyn UartObserver>)> = {
            let mut inner = self.inner.lock();
            inner.entries.retain(|(_, weak)| weak.strong_count() > 0);
            inner.entries.clone()
        };

        trace!("Dispatching {:?} to {} observers", event, snapshot.len());
        for (handle, weak) in snapshot {
            if !self.is_registered(handle) {
                continue;
            }
            if let Some(observer) = weak.upgrade() {
                deliver(observer.as_ref(), event);
            }
        }
    }

    fn is_registered(&self, handle: ObserverHandle) -> bool {
        self.inner.lock().entries.iter().any(|(h, _)| *h == handle)
    }

    pub fn dispatch_all(&self, events: &[UartEvent]) {
        for event in events {
            self.dispatch(event);
        }
    }
}

fn deliver(observer: &dyn UartObserver, event: &UartEvent) {
    match event {
        UartEvent::Connected { address, role } => observer.on_connected(*address, *role),
        UartEvent::ConnectFailed { error } => observer.on_connect_failed(error),
        UartEvent::Disconnected { address, role } => observer.on_disconnected(*address, *role),
        UartEvent::Received { address, data } => observer.on_receive(*address, data),
        UartEvent::DeviceFound { address } => observer.on_device_found(*address),
        UartEvent::DeviceInfoAvailable { address } => observer.on_device_info_available(*address),
        UartEvent::Error { error } => observer.on_error(error),
    }
}
