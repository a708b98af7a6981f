//! Device session facade
//!
//! [`HidServices`] is the application entry point: it initialises the
//! native library, runs the scan scheduler and hands out device handles.
//!
//! `HidServices::with_config` runs over the system hidapi library; any
//! other [`HidBackend`] plugs in through [`HidServices::with_backend`]:
//!
//! ```
//! use std::sync::Arc;
//! use hidwatch::{DeviceDescriptor, HidEvent, HidServices, HidServicesConfig, HidServicesListener};
//! use hidwatch_transport::mock::MockBackend;
//!
//! # fn main() -> Result<(), hidwatch::HidError> {
//! let backend = MockBackend::new();
//! backend.attach(DeviceDescriptor::new("/dev/hidraw0", 0x3151, 0x4015));
//!
//! let config = HidServicesConfig::default().with_auto_start(false);
//! let services = HidServices::with_backend(Arc::new(backend), config)?;
//! let listener: Arc<dyn HidServicesListener> = Arc::new(|event: &HidEvent| {
//!     println!("{event:?}");
//! });
//! services.add_listener(listener);
//! services.start()?;
//!
//! if let Some(device) = services.get_device(0x3151, 0x4015, None) {
//!     device.write(&[0x8f], 64, 0x00, true)?;
//! }
//! services.shutdown();
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hidwatch_transport::{DeviceDescriptor, HidBackend};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{HidServicesConfig, ScanMode};
use crate::device::{DeviceHandle, HandleOptions};
use crate::error::HidError;
use crate::event::{HidEvent, HidServicesListener};
use crate::manager::DeviceManager;

/// A HID session over one native backend
pub struct HidServices {
    config: HidServicesConfig,
    manager: Arc<DeviceManager>,
    shut_down: AtomicBool,
}

impl HidServices {
    /// Open a session on the hidapi backend with default configuration
    #[cfg(feature = "hidapi")]
    pub fn new() -> Result<Self, HidError> {
        Self::with_config(HidServicesConfig::default())
    }

    /// Open a session on the hidapi backend
    #[cfg(feature = "hidapi")]
    pub fn with_config(config: HidServicesConfig) -> Result<Self, HidError> {
        Self::with_backend(Arc::new(hidwatch_transport::HidApiBackend::new()), config)
    }

    /// Open a session on an arbitrary backend
    ///
    /// Validates `config`, initialises the backend and, with `auto_start`,
    /// performs the first scan before returning.
    pub fn with_backend(
        backend: Arc<dyn HidBackend>,
        config: HidServicesConfig,
    ) -> Result<Self, HidError> {
        config.validate()?;
        let mode = config.resolve_scan_mode()?;
        let options = HandleOptions {
            report_len: config.report_len,
            data_read_interval: config.data_read_interval()?,
            log_traffic: config.log_traffic,
        };

        backend.init().map_err(HidError::NativeInit)?;
        info!("HID services initialised ({:?})", mode);

        let services = Self {
            manager: DeviceManager::new(backend, mode, options),
            config,
            shut_down: AtomicBool::new(false),
        };
        if services.config.auto_start {
            services.start()?;
        }
        Ok(services)
    }

    pub fn config(&self) -> &HidServicesConfig {
        &self.config
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.manager.scan_mode()
    }

    pub fn backend(&self) -> &Arc<dyn HidBackend> {
        self.manager.backend()
    }

    pub fn is_scanning(&self) -> bool {
        self.manager.is_scanning()
    }

    /// Scan once and start background scanning. No-op while scanning.
    pub fn start(&self) -> Result<(), HidError> {
        self.manager.start()
    }

    /// As [`HidServices::start`], replacing the configured scan interval
    ///
    /// The replacement only applies when scanning is stopped and the mode
    /// scans in the background.
    pub fn start_with_interval(&self, interval: Duration) -> Result<(), HidError> {
        self.manager.start_with_interval(interval)
    }

    /// Stop scanning and close every open device handle
    ///
    /// Listeners stay registered and [`HidServices::scan`] keeps working.
    pub fn stop(&self) {
        self.manager.stop();
    }

    /// Stop, drop all listeners and release the native library
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.stop();
        self.manager.listeners().clear();
        if let Err(e) = self.manager.backend().exit() {
            warn!("Failed to release HID library: {}", e);
        }
        info!("HID services shut down");
    }

    /// Run one reconciliation now, independent of the scheduler state
    pub fn scan(&self) -> Result<(), HidError> {
        self.manager.scan()
    }

    /// Descriptors of every device seen by the most recent scan
    pub fn attached_devices(&self) -> Vec<DeviceDescriptor> {
        self.manager.attached_devices()
    }

    /// Find an attached device and open it
    ///
    /// 0 and `None` act as wildcards. The handle is returned even if opening
    /// failed; check [`DeviceHandle::is_open`].
    pub fn get_device(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
    ) -> Option<Arc<DeviceHandle>> {
        let handle = self.manager.find(vendor_id, product_id, serial_number)?;
        handle.open();
        Some(handle)
    }

    /// Open the attached device at `path`
    ///
    /// Picks one interface of a composite device where a VID/PID lookup
    /// would only ever return the first.
    pub fn get_device_by_path(&self, path: &str) -> Option<Arc<DeviceHandle>> {
        let handle = self.manager.find_by_path(path)?;
        handle.open();
        Some(handle)
    }

    /// Register a listener. Returns `false` if it was already registered.
    pub fn add_listener(&self, listener: Arc<dyn HidServicesListener>) -> bool {
        self.manager.listeners().add(listener)
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn HidServicesListener>) -> bool {
        self.manager.listeners().remove(listener)
    }

    /// Receive every event through a broadcast channel
    pub fn subscribe(&self) -> broadcast::Receiver<HidEvent> {
        self.manager.listeners().subscribe()
    }
}

impl Drop for HidServices {
    fn drop(&mut self) {
        if self.config.auto_shutdown {
            self.shutdown();
        }
    }
}
