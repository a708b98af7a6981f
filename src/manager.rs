//! Device manager: owns the registry and drives scans
//!
//! Every reconciliation holds the registry lock from enumeration through
//! event dispatch, so a manual scan waits for a background one and events
//! leave in scan order.

use std::sync::{Arc, Weak};
use std::time::Duration;

use hidwatch_transport::{DeviceDescriptor, HidBackend};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::ScanMode;
use crate::device::{DeviceHandle, DeviceObserver, HandleOptions};
use crate::error::HidError;
use crate::event::ListenerList;
use crate::registry::{self, DeviceMap};
use crate::scanner::{ScanScheduler, Scanner};

pub(crate) struct DeviceManager {
    backend: Arc<dyn HidBackend>,
    registry: Mutex<DeviceMap>,
    listeners: ListenerList,
    scheduler: ScanScheduler,
    options: HandleOptions,
    me: Weak<DeviceManager>,
}

impl DeviceManager {
    pub(crate) fn new(
        backend: Arc<dyn HidBackend>,
        mode: ScanMode,
        options: HandleOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<DeviceManager>| {
            let target: Weak<dyn Scanner> = me.clone();
            Self {
                backend,
                registry: Mutex::new(DeviceMap::new()),
                listeners: ListenerList::new(),
                scheduler: ScanScheduler::new(mode, target),
                options,
                me: me.clone(),
            }
        })
    }

    pub(crate) fn backend(&self) -> &Arc<dyn HidBackend> {
        &self.backend
    }

    pub(crate) fn listeners(&self) -> &ListenerList {
        &self.listeners
    }

    pub(crate) fn scan_mode(&self) -> ScanMode {
        self.scheduler.mode()
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.scheduler.is_scanning()
    }

    /// Scan once, then start the background loop for the configured mode
    pub(crate) fn start(&self) -> Result<(), HidError> {
        if !self.scheduler.mark_started() {
            return Ok(());
        }
        info!("Starting device scanning ({:?})", self.scheduler.mode());
        self.scan()?;
        self.scheduler.spawn_loop();
        Ok(())
    }

    /// As [`DeviceManager::start`] with a replacement scan interval
    pub(crate) fn start_with_interval(&self, interval: Duration) -> Result<(), HidError> {
        self.scheduler.set_interval(interval);
        self.start()
    }

    /// Stop scanning and close every open handle in the registry
    pub(crate) fn stop(&self) {
        self.scheduler.stop();
        let handles: Vec<Arc<DeviceHandle>> = self.registry.lock().values().cloned().collect();
        for handle in handles.iter().filter(|h| h.is_open()) {
            handle.close();
        }
    }

    /// Enumerate all devices and reconcile the registry
    ///
    /// An enumeration failure leaves the registry as it was, stops the
    /// scheduler and fires a `Failure` event.
    pub(crate) fn scan(&self) -> Result<(), HidError> {
        let mut devices = self.registry.lock();

        let current = match self.backend.enumerate(0, 0) {
            Ok(current) => current,
            Err(e) => {
                drop(devices);
                error!("Enumeration failed, scanning stopped: {}", e);
                self.scheduler.stop();
                self.listeners.fire_failure(None);
                return Err(HidError::Enumeration(e));
            }
        };

        let result = registry::reconcile(&devices, current, |d| self.make_handle(d));
        *devices = result.next;

        for descriptor in result.attached {
            debug!(
                "Attached {:04X}:{:04X} at {}",
                descriptor.vendor_id, descriptor.product_id, descriptor.path
            );
            self.listeners.fire_attached(descriptor);
        }
        for handle in &result.detached {
            debug!("Detached {}", handle.path());
            self.listeners.fire_detached(handle.descriptor().clone());
        }
        drop(devices);

        Ok(())
    }

    pub(crate) fn attached_devices(&self) -> Vec<DeviceDescriptor> {
        self.registry
            .lock()
            .values()
            .map(|h| h.descriptor().clone())
            .collect()
    }

    pub(crate) fn find(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
    ) -> Option<Arc<DeviceHandle>> {
        self.registry
            .lock()
            .values()
            .find(|h| h.is_vid_pid_serial_match(vendor_id, product_id, serial_number))
            .cloned()
    }

    pub(crate) fn find_by_path(&self, path: &str) -> Option<Arc<DeviceHandle>> {
        self.registry.lock().get(path).cloned()
    }

    fn make_handle(&self, descriptor: DeviceDescriptor) -> DeviceHandle {
        let observer: Weak<dyn DeviceObserver> = self.me.clone();
        DeviceHandle::with_observer(
            descriptor,
            Arc::clone(&self.backend),
            Some(observer),
            self.options.clone(),
        )
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

impl Scanner for DeviceManager {
    fn scan_once(&self) -> bool {
        self.scan().is_ok()
    }
}

impl DeviceObserver for DeviceManager {
    fn after_device_write(&self) {
        self.scheduler.after_write();
    }

    fn after_data_read(&self, device: &DeviceDescriptor, data: &[u8]) {
        self.listeners
            .fire_data_received(device.clone(), data.to_vec());
    }

    fn device_failure(&self, device: &DeviceDescriptor) {
        self.listeners.fire_failure(Some(device.clone()));
    }
}
