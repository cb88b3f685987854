//! Hotplug notification
//!
//! The notifier keeps the set of attached listeners and delivers connect and
//! disconnect events to them. Delivery is serialized, so every listener sees
//! events in the order they were dispatched. Each listener sits in its own
//! slot with an `active` flag and an in-call lock: detaching clears the flag
//! and then waits out any call already running, which means a detached
//! listener is never invoked after `detach` returns.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};

use crate::types::{Device, HotplugEvent, HotplugEventKind};

/// Receiver of device connect/disconnect notifications.
///
/// Callbacks run on the hotplug watch thread. A panicking listener is logged
/// and does not affect delivery to other listeners.
pub trait HotplugListener: Send + Sync {
    fn device_connected(&self, device: &Device);

    fn device_disconnected(&self, device: &Device);
}

struct ListenerSlot {
    listener: Arc<dyn HotplugListener>,
    active: AtomicBool,
    in_call: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Identity of a listener is the address of its shared allocation.
fn same_listener(a: &Arc<dyn HotplugListener>, b: &Arc<dyn HotplugListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Thread-safe observer set for hotplug events.
pub struct HotplugNotifier {
    slots: RwLock<Vec<Arc<ListenerSlot>>>,
    dispatch_lock: Mutex<()>,
    dispatching_thread: Mutex<Option<ThreadId>>,
}

impl HotplugNotifier {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            dispatch_lock: Mutex::new(()),
            dispatching_thread: Mutex::new(None),
        }
    }

    /// Attach a listener. Attaching the same `Arc` twice is a no-op.
    pub fn attach(&self, listener: Arc<dyn HotplugListener>) {
        let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
        if slots.iter().any(|slot| same_listener(&slot.listener, &listener)) {
            log::debug!("Hotplug listener already attached");
            return;
        }
        slots.push(Arc::new(ListenerSlot {
            listener,
            active: AtomicBool::new(true),
            in_call: Mutex::new(()),
        }));
        log::debug!("Hotplug listener attached ({} total)", slots.len());
    }

    /// Detach a listener. Unknown listeners are ignored.
    ///
    /// When called from a thread other than the one delivering events, this
    /// blocks until a call to `listener` that is already running returns.
    pub fn detach(&self, listener: &Arc<dyn HotplugListener>) {
        let removed = {
            let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
            let position = slots
                .iter()
                .position(|slot| same_listener(&slot.listener, listener));
            position.map(|index| slots.remove(index))
        };

        let Some(slot) = removed else {
            return;
        };
        slot.active.store(false, Ordering::SeqCst);

        let on_dispatch_thread = *lock(&self.dispatching_thread) == Some(thread::current().id());
        if !on_dispatch_thread {
            // Barrier: wait for an in-flight callback to finish.
            drop(lock(&slot.in_call));
        }
        log::debug!("Hotplug listener detached");
    }

    pub fn listener_count(&self) -> usize {
        self.slots.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Deliver `event` to every attached listener.
    pub fn dispatch(&self, event: &HotplugEvent) {
        let _serial = lock(&self.dispatch_lock);
        *lock(&self.dispatching_thread) = Some(thread::current().id());

        let snapshot: Vec<Arc<ListenerSlot>> = self
            .slots
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        log::debug!(
            "Dispatching {:?} for {} to {} listener(s)",
            event.kind,
            event.device,
            snapshot.len()
        );

        for slot in snapshot {
            let _call = lock(&slot.in_call);
            if !slot.active.load(Ordering::SeqCst) {
                continue;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| match event.kind {
                HotplugEventKind::Connected => slot.listener.device_connected(&event.device),
                HotplugEventKind::Disconnected => slot.listener.device_disconnected(&event.device),
            }));
            if result.is_err() {
                log::error!(
                    "Hotplug listener panicked while handling {:?} for {}",
                    event.kind,
                    event.device
                );
            }
        }

        *lock(&self.dispatching_thread) = None;
    }
}

impl Default for HotplugNotifier {
    fn default() -> Self {
        Self::new()
    }
}
