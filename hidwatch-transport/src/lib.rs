//! Native HID boundary for hidwatch
//!
//! This crate is the narrow primitive interface the device lifecycle
//! manager consumes:
//!
//! - [`HidBackend`] - library lifecycle, enumeration and opening devices
//! - [`NativeDevice`] - report transfer on one opened device
//! - [`protocol`] - report framing and wide-string decoding
//! - [`HidApiBackend`] - the hidapi-backed implementation (feature `hidapi`)
//! - [`mock`] - an in-memory backend for tests (feature `mock`)

pub mod error;
pub mod protocol;
pub mod types;

#[cfg(feature = "hidapi")]
mod hidapi_backend;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::TransportError;
pub use types::{widen_id, DeviceDescriptor, DeviceIdentity, RawDeviceInfo};

#[cfg(feature = "hidapi")]
pub use hidapi_backend::HidApiBackend;

/// One opened device at the native layer
///
/// All transfer buffers include the report ID at index 0. Results follow
/// hidapi conventions: the byte count on success, `Ok(0)` when a read timed
/// out or no report was pending in non-blocking mode.
pub trait NativeDevice: Send {
    /// Read one input report, blocking until one arrives
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Read one input report, waiting at most `timeout_ms` milliseconds
    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError>;

    /// Write an output report
    fn write(&mut self, report: &[u8]) -> Result<usize, TransportError>;

    /// Read a feature report
    ///
    /// `buf[0]` carries the requested report ID on entry. The returned count
    /// includes that byte.
    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Send a feature report, returning the number of bytes written
    fn send_feature_report(&mut self, report: &[u8]) -> Result<usize, TransportError>;

    /// Switch between blocking and non-blocking reads
    fn set_non_blocking(&mut self, non_blocking: bool) -> Result<(), TransportError>;

    /// Fetch a string descriptor by index
    fn indexed_string(&mut self, index: i32) -> Result<Option<String>, TransportError>;

    /// The most recent error reported by the native layer for this device
    fn last_error_message(&self) -> Option<String>;
}

/// The native HID library
///
/// `init` and `exit` are called once per session. Enumeration filters use
/// 0 as a wildcard.
pub trait HidBackend: Send + Sync {
    /// Initialise the library
    fn init(&self) -> Result<(), TransportError>;

    /// Release the library
    fn exit(&self) -> Result<(), TransportError>;

    /// List attached devices matching the vendor/product filter
    fn enumerate(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Open a device by its path
    fn open_path(&self, path: &str) -> Result<Box<dyn NativeDevice>, TransportError>;

    /// Open the first device matching vendor/product and optional serial
    fn open_by_ids(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
    ) -> Result<Box<dyn NativeDevice>, TransportError>;

    /// Close an opened device
    fn close(&self, device: Box<dyn NativeDevice>) {
        drop(device);
    }
}
