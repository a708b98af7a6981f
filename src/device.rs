//! Device handle: one enumerated device and, once opened, its native handle
//!
//! Handles are created unopened by the registry when a device is first
//! seen. Only an explicit [`DeviceHandle::open`] acquires native resources,
//! and re-enumeration never touches the open/closed state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use hidwatch_transport::protocol::{self, Direction, DEFAULT_REPORT_LEN};
use hidwatch_transport::{DeviceDescriptor, HidBackend, NativeDevice, TransportError};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::HidError;
use crate::worker::{CancelToken, Worker};

/// Minimum wait between automatic reads that found no data
const MIN_READ_INTERVAL: Duration = Duration::from_millis(1);

/// Longest single native read; the I/O lock is released between slices
const READ_SLICE: Duration = Duration::from_millis(100);

/// Receives notifications from device handles owned by a session
pub(crate) trait DeviceObserver: Send + Sync {
    /// A write completed successfully
    fn after_device_write(&self);
    /// An automatic read returned an input report
    fn after_data_read(&self, device: &DeviceDescriptor, data: &[u8]);
    /// An automatic read failed
    fn device_failure(&self, device: &DeviceDescriptor);
}

/// Per-handle I/O settings taken from the session configuration
#[derive(Debug, Clone)]
pub(crate) struct HandleOptions {
    pub(crate) report_len: usize,
    pub(crate) data_read_interval: Option<Duration>,
    pub(crate) log_traffic: bool,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            report_len: DEFAULT_REPORT_LEN,
            data_read_interval: None,
            log_traffic: false,
        }
    }
}

type NativeSlot = Arc<Mutex<Option<Box<dyn NativeDevice>>>>;

/// An enumerated HID device that can be opened for report I/O
///
/// Every I/O operation fails with [`HidError::NotOpen`] while the handle is
/// closed. Calls on one handle are serialised internally, but interleaving
/// reads and writes from several threads is still the caller's concern.
///
/// The open flag lives outside the I/O lock, so `is_open` and `close` never
/// wait behind a native call for longer than one read slice.
pub struct DeviceHandle {
    descriptor: DeviceDescriptor,
    backend: Arc<dyn HidBackend>,
    native: NativeSlot,
    open: AtomicBool,
    last_error: Mutex<Option<String>>,
    reader: Mutex<Option<Worker>>,
    observer: Option<Weak<dyn DeviceObserver>>,
    options: HandleOptions,
}

impl DeviceHandle {
    /// Create an unopened handle that is not attached to any session
    pub fn new(descriptor: DeviceDescriptor, backend: Arc<dyn HidBackend>) -> Self {
        Self::with_observer(descriptor, backend, None, HandleOptions::default())
    }

    pub(crate) fn with_observer(
        descriptor: DeviceDescriptor,
        backend: Arc<dyn HidBackend>,
        observer: Option<Weak<dyn DeviceObserver>>,
        options: HandleOptions,
    ) -> Self {
        Self {
            descriptor,
            backend,
            native: Arc::new(Mutex::new(None)),
            open: AtomicBool::new(false),
            last_error: Mutex::new(None),
            reader: Mutex::new(None),
            observer,
            options,
        }
    }

    /// The enumeration snapshot this handle was created from
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn path(&self) -> &str {
        &self.descriptor.path
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// See [`DeviceDescriptor::is_vid_pid_serial_match`]
    pub fn is_vid_pid_serial_match(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
    ) -> bool {
        self.descriptor
            .is_vid_pid_serial_match(vendor_id, product_id, serial_number)
    }

    /// Open the device by path. Returns `true` if the handle is open.
    ///
    /// Opening an already open handle does nothing.
    pub fn open(&self) -> bool {
        let mut slot = self.native.lock();
        if slot.is_some() {
            return true;
        }

        match self.backend.open_path(&self.descriptor.path) {
            Ok(device) => {
                *slot = Some(device);
                self.open.store(true, Ordering::Release);
                drop(slot);
                info!(
                    "Opened {:04X}:{:04X} at {}",
                    self.descriptor.vendor_id, self.descriptor.product_id, self.descriptor.path
                );
                self.start_reader();
                true
            }
            Err(e) => {
                warn!("Failed to open {}: {}", self.descriptor.path, e);
                false
            }
        }
    }

    /// Release the native handle. Closing a closed handle does nothing.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        let reader = self.reader.lock().take();
        if let Some(worker) = reader {
            worker.stop();
        }

        let device = self.native.lock().take();
        self.last_error.lock().take();
        if let Some(device) = device {
            self.backend.close(device);
            debug!("Closed {}", self.descriptor.path);
        }
    }

    /// Switch the native handle between blocking and non-blocking reads
    pub fn set_non_blocking(&self, non_blocking: bool) -> Result<(), HidError> {
        self.with_native(|device| device.set_non_blocking(non_blocking))
    }

    /// Read one input report
    ///
    /// Waits up to `timeout`, or indefinitely with `None`. An empty result
    /// means no report arrived in time. The buffer has room for the report
    /// ID on top of `report_len` payload bytes.
    pub fn read(&self, timeout: Option<Duration>) -> Result<Vec<u8>, HidError> {
        let mut buf = vec![0u8; self.options.report_len + 1];
        let len = self.read_into(&mut buf, timeout)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Read one input report into `buf`, returning the number of bytes read
    ///
    /// Long waits are split into timed native reads of at most 100 ms.
    /// Closing the handle ends the wait with [`HidError::NotOpen`].
    pub fn read_into(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, HidError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let slice = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(READ_SLICE),
                None => READ_SLICE,
            };
            let len = self.with_native(|device| device.read_timeout(buf, timeout_ms(slice)))?;
            if len > 0 {
                self.log_traffic(Direction::In, &buf[..len]);
                return Ok(len);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(0);
            }
        }
    }

    /// Write an output report
    ///
    /// At most `packet_len` payload bytes are sent after the report ID;
    /// with `pad` the report is zero-filled to `packet_len + 1` bytes.
    /// Returns the number of bytes the native layer wrote.
    pub fn write(
        &self,
        payload: &[u8],
        packet_len: usize,
        report_id: u8,
        pad: bool,
    ) -> Result<usize, HidError> {
        let report = protocol::build_output_report(payload, report_id, packet_len, pad);
        self.log_traffic(Direction::Out, &report);
        let written = self.with_native(|device| device.write(&report))?;

        if let Some(observer) = self.observer.as_ref().and_then(Weak::upgrade) {
            observer.after_device_write();
        }
        Ok(written)
    }

    /// Read a feature report, returning its payload without the report ID
    pub fn get_feature_report(&self, report_id: u8) -> Result<Vec<u8>, HidError> {
        let mut buf = vec![0u8; self.options.report_len + 1];
        buf[0] = report_id;
        let len = self.with_native(|device| device.get_feature_report(&mut buf))?;
        self.log_traffic(Direction::In, &buf[..len.min(buf.len())]);
        Ok(protocol::feature_report_payload(&buf, len))
    }

    /// Send a feature report, returning the number of bytes written
    /// (payload plus the report ID byte)
    pub fn send_feature_report(&self, payload: &[u8], report_id: u8) -> Result<usize, HidError> {
        let report = protocol::build_feature_report(payload, report_id);
        self.log_traffic(Direction::Out, &report);
        self.with_native(|device| device.send_feature_report(&report))
    }

    /// Fetch a string descriptor by index
    pub fn indexed_string(&self, index: i32) -> Result<Option<String>, HidError> {
        self.with_native(|device| device.indexed_string(index))
    }

    /// The native layer's last error for this device, if open
    pub fn last_error_message(&self) -> Option<String> {
        if !self.is_open() {
            return None;
        }
        self.last_error.lock().clone()
    }

    /// Run `op` against the open native handle, mapping failures to
    /// [`HidError::Io`] with the native layer's last error message
    fn with_native<T>(
        &self,
        op: impl FnOnce(&mut dyn NativeDevice) -> Result<T, TransportError>,
    ) -> Result<T, HidError> {
        if !self.is_open() {
            return Err(HidError::NotOpen);
        }
        let mut slot = self.native.lock();
        let device = slot.as_mut().ok_or(HidError::NotOpen)?;
        op(device.as_mut()).map_err(|e| {
            let message = device.last_error_message().unwrap_or_else(|| e.to_string());
            *self.last_error.lock() = Some(message.clone());
            HidError::Io { message }
        })
    }

    fn log_traffic(&self, direction: Direction, buf: &[u8]) {
        if self.options.log_traffic && !buf.is_empty() {
            trace!("{}", protocol::format_traffic(direction, buf));
        }
    }

    /// Start the automatic reader if this handle belongs to a session that
    /// asked for one
    fn start_reader(&self) {
        let (Some(interval), Some(observer)) =
            (self.options.data_read_interval, self.observer.clone())
        else {
            return;
        };

        let mut reader = self.reader.lock();
        if reader.as_ref().is_some_and(Worker::is_running) {
            return;
        }

        let native = Arc::clone(&self.native);
        let descriptor = self.descriptor.clone();
        let report_len = self.options.report_len;
        let spawned = Worker::spawn("hidwatch-data-reader", move |token| {
            run_data_read_loop(native, descriptor, observer, report_len, interval, token)
        });
        match spawned {
            Ok(worker) => *reader = Some(worker),
            Err(e) => warn!("Failed to spawn reader for {}: {}", self.descriptor.path, e),
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("descriptor", &self.descriptor)
            .field("open", &self.is_open())
            .finish()
    }
}

fn timeout_ms(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
}

/// Poll an open device for input reports until cancelled or closed
///
/// Pending reports are drained back to back; the loop only sleeps when a
/// non-blocking read comes back empty or fails.
fn run_data_read_loop(
    native: NativeSlot,
    descriptor: DeviceDescriptor,
    observer: Weak<dyn DeviceObserver>,
    report_len: usize,
    interval: Duration,
    token: CancelToken,
) {
    debug!("Data reader started for {}", descriptor.path);
    let mut buf = vec![0u8; report_len + 1];
    let interval = interval.max(MIN_READ_INTERVAL);

    while !token.is_cancelled() {
        let result = match native.lock().as_mut() {
            Some(device) => device.read_timeout(&mut buf, 0),
            None => break,
        };
        let Some(observer) = observer.upgrade() else {
            break;
        };

        match result {
            Ok(len) if len > 0 => {
                observer.after_data_read(&descriptor, &buf[..len]);
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("{} read error: {}", descriptor.path, e);
                observer.device_failure(&descriptor);
            }
        }
        drop(observer);

        if token.wait(interval) {
            break;
        }
    }

    debug!("Data reader exiting for {}", descriptor.path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidwatch_transport::mock::MockBackend;

    fn setup() -> (MockBackend, DeviceHandle) {
        let mock = MockBackend::new();
        let desc = DeviceDescriptor::new("/dev/hidraw3", 0x1234, 0x5678).with_serial("S1");
        mock.attach(desc.clone());
        let handle = DeviceHandle::new(desc, Arc::new(mock.clone()));
        (mock, handle)
    }

    #[test]
    fn test_io_on_closed_handle_is_not_open() {
        let (_mock, handle) = setup();
        assert!(!handle.is_open());
        assert!(matches!(handle.read(None), Err(HidError::NotOpen)));
        assert!(matches!(handle.write(&[1], 8, 0, false), Err(HidError::NotOpen)));
        assert!(matches!(handle.get_feature_report(1), Err(HidError::NotOpen)));
        assert!(matches!(
            handle.send_feature_report(&[1], 1),
            Err(HidError::NotOpen)
        ));
        assert!(matches!(handle.set_non_blocking(true), Err(HidError::NotOpen)));
        assert!(matches!(handle.indexed_string(1), Err(HidError::NotOpen)));
        assert_eq!(handle.last_error_message(), None);
    }

    #[test]
    fn test_open_and_close_are_idempotent() {
        let (mock, handle) = setup();
        assert!(handle.open());
        assert!(handle.open());
        assert_eq!(mock.open_count(), 1);

        handle.close();
        handle.close();
        assert!(!handle.is_open());
        assert_eq!(mock.close_count(), 1);
    }

    #[test]
    fn test_open_missing_device_fails() {
        let mock = MockBackend::new();
        let handle = DeviceHandle::new(DeviceDescriptor::new("gone", 1, 2), Arc::new(mock));
        assert!(!handle.open());
        assert!(!handle.is_open());
    }

    #[test]
    fn test_write_frames_report() {
        let (mock, handle) = setup();
        handle.open();
        let written = handle.write(&[0x3f, 0x23, 0x23], 64, 0x00, true).unwrap();
        assert_eq!(written, 65);

        let writes = mock.writes("/dev/hidraw3");
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 65);
        assert_eq!(&writes[0][..4], &[0x00, 0x3f, 0x23, 0x23]);
    }

    #[test]
    fn test_read_returns_report_or_empty_on_timeout() {
        let (mock, handle) = setup();
        handle.open();
        mock.queue_input("/dev/hidraw3", vec![0x01, 0x02, 0x03]);
        assert_eq!(
            handle.read(Some(Duration::from_millis(10))).unwrap(),
            vec![0x01, 0x02, 0x03]
        );
        assert!(handle
            .read(Some(Duration::from_millis(10)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_read_keeps_report_id_of_full_report() {
        let (mock, handle) = setup();
        handle.open();
        let report: Vec<u8> = std::iter::once(0x05).chain(1..=64).collect();
        mock.queue_input("/dev/hidraw3", report.clone());
        let read = handle.read(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(read.len(), 65);
        assert_eq!(read, report);
    }

    #[test]
    fn test_indefinite_read_spans_slices() {
        let (mock, handle) = setup();
        mock.set_blocking_reads("/dev/hidraw3", true);
        handle.open();

        let feeder = {
            let mock = mock.clone();
            std::thread::spawn(move || {
                std::thread::sleep(READ_SLICE + Duration::from_millis(50));
                mock.queue_input("/dev/hidraw3", vec![0x02, 0x10]);
            })
        };
        assert_eq!(handle.read(None).unwrap(), vec![0x02, 0x10]);
        feeder.join().unwrap();

        let started = Instant::now();
        assert!(handle.read(Some(READ_SLICE * 2)).unwrap().is_empty());
        assert!(started.elapsed() >= READ_SLICE * 2);
    }

    #[test]
    fn test_close_interrupts_blocking_read() {
        let (mock, handle) = setup();
        mock.set_blocking_reads("/dev/hidraw3", true);
        handle.open();
        let handle = Arc::new(handle);
        let reader = {
            let handle = Arc::clone(&handle);
            std::thread::spawn(move || handle.read(None))
        };
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        assert!(handle.is_open());
        assert!(format!("{handle:?}").contains("open: true"));
        assert_eq!(handle.last_error_message(), None);
        assert!(started.elapsed() < Duration::from_millis(20));

        handle.close();
        assert!(!handle.is_open());
        assert!(started.elapsed() < READ_SLICE * 3);
        assert!(matches!(reader.join().unwrap(), Err(HidError::NotOpen)));
        assert_eq!(mock.close_count(), 1);
    }

    #[test]
    fn test_io_failure_carries_last_error() {
        let (mock, handle) = setup();
        handle.open();
        mock.set_io_failure("/dev/hidraw3", Some("device stalled"));
        match handle.write(&[1, 2], 2, 0, false) {
            Err(HidError::Io { message }) => assert_eq!(message, "device stalled"),
            other => panic!("expected Io error, got {other:?}"),
        }
        assert!(matches!(handle.read(None), Err(HidError::Io { .. })));
        assert_eq!(
            handle.last_error_message().as_deref(),
            Some("device stalled")
        );
    }

    #[test]
    fn test_feature_reports() {
        let (mock, handle) = setup();
        handle.open();
        mock.set_feature_report("/dev/hidraw3", 0x07, vec![0xAA, 0xBB]);
        assert_eq!(handle.get_feature_report(0x07).unwrap(), vec![0xAA, 0xBB]);
        assert!(handle.get_feature_report(0x08).unwrap().is_empty());

        assert_eq!(handle.send_feature_report(&[0x10, 0x20], 0x07).unwrap(), 3);
        assert_eq!(
            mock.sent_feature_reports("/dev/hidraw3"),
            vec![vec![0x07, 0x10, 0x20]]
        );
    }

    #[test]
    fn test_non_blocking_and_strings() {
        let (mock, handle) = setup();
        handle.open();
        handle.set_non_blocking(true).unwrap();
        assert!(mock.is_non_blocking("/dev/hidraw3"));
        mock.set_indexed_string("/dev/hidraw3", 2, "Vendor");
        assert_eq!(handle.indexed_string(2).unwrap().as_deref(), Some("Vendor"));
        assert_eq!(handle.indexed_string(9).unwrap(), None);
    }

    #[test]
    fn test_drop_closes_native_handle() {
        let (mock, handle) = setup();
        handle.open();
        drop(handle);
        assert_eq!(mock.close_count(), 1);
    }

    #[test]
    fn test_match_delegates_to_descriptor() {
        let (_mock, handle) = setup();
        assert!(handle.is_vid_pid_serial_match(0, 0, None));
        assert!(handle.is_vid_pid_serial_match(0x1234, 0x5678, Some("S1")));
        assert!(!handle.is_vid_pid_serial_match(0x1234, 0x5678, Some("S2")));
    }
}
