//! hidapi-backed native layer
//!
//! Libusb vs hidraw selection on Linux is a build-time choice made through
//! the hidapi crate's own cargo features.

use std::ffi::CString;

use hidapi::{DeviceInfo, HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::types::DeviceDescriptor;
use crate::{HidBackend, NativeDevice};

/// [`HidBackend`] over the system hidapi library
pub struct HidApiBackend {
    api: Mutex<Option<HidApi>>,
}

impl Default for HidApiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HidApiBackend {
    /// Create an uninitialised backend; call [`HidBackend::init`] before use
    pub fn new() -> Self {
        Self {
            api: Mutex::new(None),
        }
    }

    fn descriptor(info: &DeviceInfo) -> DeviceDescriptor {
        DeviceDescriptor {
            path: info.path().to_string_lossy().to_string(),
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            serial_number: info.serial_number().map(|s| s.to_string()),
            release_number: info.release_number(),
            manufacturer: info.manufacturer_string().map(|s| s.to_string()),
            product: info.product_string().map(|s| s.to_string()),
            usage_page: info.usage_page(),
            usage: info.usage(),
            interface_number: info.interface_number(),
        }
    }
}

impl HidBackend for HidApiBackend {
    fn init(&self) -> Result<(), TransportError> {
        let mut api = self.api.lock();
        if api.is_none() {
            let instance = HidApi::new().map_err(|e| TransportError::InitFailed(e.to_string()))?;
            info!("hidapi initialised");
            *api = Some(instance);
        }
        Ok(())
    }

    fn exit(&self) -> Result<(), TransportError> {
        if self.api.lock().take().is_some() {
            info!("hidapi released");
        }
        Ok(())
    }

    fn enumerate(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let mut guard = self.api.lock();
        let api = guard.as_mut().ok_or(TransportError::NotInitialised)?;

        api.reset_devices()?;
        api.add_devices(vendor_id, product_id)?;

        let devices: Vec<DeviceDescriptor> = api.device_list().map(Self::descriptor).collect();
        debug!(
            "Enumerated {} devices (filter {:04X}:{:04X})",
            devices.len(),
            vendor_id,
            product_id
        );
        Ok(devices)
    }

    fn open_path(&self, path: &str) -> Result<Box<dyn NativeDevice>, TransportError> {
        let guard = self.api.lock();
        let api = guard.as_ref().ok_or(TransportError::NotInitialised)?;
        let c_path = CString::new(path)
            .map_err(|_| TransportError::Internal(format!("path contains NUL: {path:?}")))?;

        let device = api.open_path(&c_path)?;
        debug!("Opened {}", path);
        Ok(Box::new(HidApiDevice::new(device)))
    }

    fn open_by_ids(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
    ) -> Result<Box<dyn NativeDevice>, TransportError> {
        let guard = self.api.lock();
        let api = guard.as_ref().ok_or(TransportError::NotInitialised)?;

        let device = match serial_number {
            Some(serial) => api.open_serial(vendor_id, product_id, serial)?,
            None => api.open(vendor_id, product_id)?,
        };
        debug!("Opened {:04X}:{:04X}", vendor_id, product_id);
        Ok(Box::new(HidApiDevice::new(device)))
    }
}

/// One hidapi device handle
///
/// hidapi reports failures as errors rather than negative counts, so the
/// message of the latest failure is kept for `last_error_message`.
struct HidApiDevice {
    device: HidDevice,
    last_error: Option<String>,
}

impl HidApiDevice {
    fn new(device: HidDevice) -> Self {
        Self {
            device,
            last_error: None,
        }
    }

    fn track<T>(&mut self, result: hidapi::HidResult<T>) -> Result<T, TransportError> {
        result.map_err(|e| {
            let err = TransportError::from(e);
            self.last_error = Some(err.to_string());
            err
        })
    }
}

impl NativeDevice for HidApiDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let result = self.device.read(buf);
        self.track(result)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError> {
        let result = self.device.read_timeout(buf, timeout_ms);
        self.track(result)
    }

    fn write(&mut self, report: &[u8]) -> Result<usize, TransportError> {
        let result = self.device.write(report);
        self.track(result)
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let result = self.device.get_feature_report(buf);
        self.track(result)
    }

    fn send_feature_report(&mut self, report: &[u8]) -> Result<usize, TransportError> {
        let result = self.device.send_feature_report(report);
        self.track(result).map(|()| report.len())
    }

    fn set_non_blocking(&mut self, non_blocking: bool) -> Result<(), TransportError> {
        let result = self.device.set_blocking_mode(!non_blocking);
        self.track(result)
    }

    fn indexed_string(&mut self, index: i32) -> Result<Option<String>, TransportError> {
        let result = self.device.get_indexed_string(index);
        self.track(result)
    }

    fn last_error_message(&self) -> Option<String> {
        self.last_error.clone()
    }
}
