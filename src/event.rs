//! Device events and the listener fan-out
//!
//! Every registered listener owns a queue drained by its own thread, so
//! firing an event never waits on listener code. A listener sees events in
//! the order they were fired; a panicking listener loses only the event it
//! panicked on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use hidwatch_transport::DeviceDescriptor;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

/// Broadcast channel capacity for event subscribers
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something that happened to a HID device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidEvent {
    /// The device appeared in an enumeration
    Attached(DeviceDescriptor),
    /// The device disappeared from an enumeration
    Detached(DeviceDescriptor),
    /// A scan or device operation failed; carries the device when known
    Failure(Option<DeviceDescriptor>),
    /// An automatic read returned an input report
    DataReceived {
        device: DeviceDescriptor,
        data: Vec<u8>,
    },
}

impl HidEvent {
    /// The device involved, if any
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        match self {
            HidEvent::Attached(device) | HidEvent::Detached(device) => Some(device),
            HidEvent::Failure(device) => device.as_ref(),
            HidEvent::DataReceived { device, .. } => Some(device),
        }
    }
}

/// Receives [`HidEvent`]s on a dedicated dispatch thread
pub trait HidServicesListener: Send + Sync {
    fn on_event(&self, event: &HidEvent);
}

impl<F> HidServicesListener for F
where
    F: Fn(&HidEvent) + Send + Sync,
{
    fn on_event(&self, event: &HidEvent) {
        self(event)
    }
}

struct ListenerEntry {
    listener: Arc<dyn HidServicesListener>,
    queue: mpsc::UnboundedSender<HidEvent>,
}

fn same_listener(a: &Arc<dyn HidServicesListener>, b: &Arc<dyn HidServicesListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Registered listeners plus a broadcast channel for subscribers
pub struct ListenerList {
    entries: Mutex<Vec<ListenerEntry>>,
    broadcast_tx: broadcast::Sender<HidEvent>,
}

impl Default for ListenerList {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerList {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(Vec::new()),
            broadcast_tx,
        }
    }

    /// Register a listener. Returns `false` if it was already registered.
    pub fn add(&self, listener: Arc<dyn HidServicesListener>) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| same_listener(&e.listener, &listener)) {
            return false;
        }

        let (queue, rx) = mpsc::unbounded_channel();
        let worker_listener = Arc::clone(&listener);
        let spawned = thread::Builder::new()
            .name("hidwatch-event-worker".into())
            .spawn(move || run_listener_loop(worker_listener, rx));
        if let Err(e) = spawned {
            error!("Failed to spawn listener thread: {}", e);
            return false;
        }

        entries.push(ListenerEntry { listener, queue });
        debug!("Listener added ({} registered)", entries.len());
        true
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    ///
    /// Events already queued for it are still delivered.
    pub fn remove(&self, listener: &Arc<dyn HidServicesListener>) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| !same_listener(&e.listener, listener));
        before != entries.len()
    }

    /// Unregister every listener
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to every fired event through a broadcast channel
    pub fn subscribe(&self) -> broadcast::Receiver<HidEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Queue an event for every listener and subscriber without waiting
    pub fn fire(&self, event: HidEvent) {
        let entries = self.entries.lock();
        for entry in entries.iter() {
            // A closed queue means the worker thread is gone
            let _ = entry.queue.send(event.clone());
        }
        drop(entries);
        // Ignore "no receivers"
        let _ = self.broadcast_tx.send(event);
    }

    pub fn fire_attached(&self, device: DeviceDescriptor) {
        self.fire(HidEvent::Attached(device));
    }

    pub fn fire_detached(&self, device: DeviceDescriptor) {
        self.fire(HidEvent::Detached(device));
    }

    pub fn fire_failure(&self, device: Option<DeviceDescriptor>) {
        self.fire(HidEvent::Failure(device));
    }

    pub fn fire_data_received(&self, device: DeviceDescriptor, data: Vec<u8>) {
        self.fire(HidEvent::DataReceived { device, data });
    }
}

/// Deliver queued events to one listener until its queue is dropped
fn run_listener_loop(
    listener: Arc<dyn HidServicesListener>,
    mut rx: mpsc::UnboundedReceiver<HidEvent>,
) {
    while let Some(event) = rx.blocking_recv() {
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
        if delivered.is_err() {
            warn!("Listener panicked while handling {:?}", event);
        }
    }
    debug!("Listener worker exiting");
}
