//! In-memory HID backend for tests
//!
//! [`MockBackend`] keeps a list of "attached" descriptors plus per-path
//! device state (queued input reports, recorded writes, feature reports).
//! Clones share state, so a test can keep one clone to drive attach/detach
//! while the session owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::protocol;
use crate::types::DeviceDescriptor;
use crate::{HidBackend, NativeDevice};

#[derive(Default)]
struct MockDeviceState {
    input: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    feature_reports: HashMap<u8, Vec<u8>>,
    sent_features: Vec<Vec<u8>>,
    /// String descriptors as the native layer returns them: wide-char buffers
    strings: HashMap<i32, Vec<u8>>,
    io_failure: Option<String>,
    non_blocking: bool,
    blocking_reads: bool,
}

#[derive(Default)]
struct MockState {
    attached: Vec<DeviceDescriptor>,
    devices: HashMap<String, MockDeviceState>,
    enumeration_failure: Option<String>,
    init_failure: Option<String>,
    enumerations: usize,
    inits: usize,
    exits: usize,
    opens: usize,
    closes: usize,
}

impl MockState {
    fn device(&mut self, path: &str) -> &mut MockDeviceState {
        self.devices.entry(path.to_string()).or_default()
    }
}

/// Shared-state mock implementing [`HidBackend`]
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a device visible to subsequent enumerations
    pub fn attach(&self, descriptor: DeviceDescriptor) {
        let mut state = self.state.lock();
        state.attached.retain(|d| d.path != descriptor.path);
        state.attached.push(descriptor);
    }

    /// Remove a device from subsequent enumerations
    pub fn detach(&self, path: &str) {
        self.state.lock().attached.retain(|d| d.path != path);
    }

    /// Make enumeration fail with `message` (or succeed again with `None`)
    pub fn set_enumeration_failure(&self, message: Option<&str>) {
        self.state.lock().enumeration_failure = message.map(str::to_string);
    }

    /// Make `init` fail with `message`
    pub fn set_init_failure(&self, message: Option<&str>) {
        self.state.lock().init_failure = message.map(str::to_string);
    }

    /// Make every transfer on `path` fail with `message`
    pub fn set_io_failure(&self, path: &str, message: Option<&str>) {
        self.state.lock().device(path).io_failure = message.map(str::to_string);
    }

    /// Make timed reads on `path` wait out their timeout while no report is
    /// queued, as a real device does. A negative timeout waits for input.
    pub fn set_blocking_reads(&self, path: &str, blocking: bool) {
        self.state.lock().device(path).blocking_reads = blocking;
    }

    /// Queue an input report for `path`
    pub fn queue_input(&self, path: &str, report: Vec<u8>) {
        self.state.lock().device(path).input.push_back(report);
    }

    /// Set the feature report returned for `report_id` (payload only)
    pub fn set_feature_report(&self, path: &str, report_id: u8, payload: Vec<u8>) {
        self.state
            .lock()
            .device(path)
            .feature_reports
            .insert(report_id, payload);
    }

    /// Set a string descriptor returned by `indexed_string`
    pub fn set_indexed_string(&self, path: &str, index: i32, value: &str) {
        self.state
            .lock()
            .device(path)
            .strings
            .insert(index, protocol::encode_wide_string(value));
    }

    /// Output reports written to `path`, report ID included
    pub fn writes(&self, path: &str) -> Vec<Vec<u8>> {
        self.state.lock().device(path).writes.clone()
    }

    /// Feature reports sent to `path`, report ID included
    pub fn sent_feature_reports(&self, path: &str) -> Vec<Vec<u8>> {
        self.state.lock().device(path).sent_features.clone()
    }

    /// Whether `path` was last switched to non-blocking
    pub fn is_non_blocking(&self, path: &str) -> bool {
        self.state.lock().device(path).non_blocking
    }

    pub fn enumeration_count(&self) -> usize {
        self.state.lock().enumerations
    }

    pub fn init_count(&self) -> usize {
        self.state.lock().inits
    }

    pub fn exit_count(&self) -> usize {
        self.state.lock().exits
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    fn open_device(&self, state: &mut MockState, path: String) -> Box<dyn NativeDevice> {
        state.opens += 1;
        Box::new(MockDevice {
            path,
            state: Arc::clone(&self.state),
            last_error: None,
        })
    }
}

impl HidBackend for MockBackend {
    fn init(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.init_failure {
            return Err(TransportError::InitFailed(message.clone()));
        }
        state.inits += 1;
        Ok(())
    }

    fn exit(&self) -> Result<(), TransportError> {
        self.state.lock().exits += 1;
        Ok(())
    }

    fn enumerate(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let mut state = self.state.lock();
        state.enumerations += 1;
        if let Some(message) = &state.enumeration_failure {
            return Err(TransportError::HidError(message.clone()));
        }
        Ok(state
            .attached
            .iter()
            .filter(|d| d.is_vid_pid_serial_match(vendor_id, product_id, None))
            .cloned()
            .collect())
    }

    fn open_path(&self, path: &str) -> Result<Box<dyn NativeDevice>, TransportError> {
        let mut state = self.state.lock();
        if !state.attached.iter().any(|d| d.path == path) {
            return Err(TransportError::DeviceNotFound(path.to_string()));
        }
        Ok(self.open_device(&mut state, path.to_string()))
    }

    fn open_by_ids(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
    ) -> Result<Box<dyn NativeDevice>, TransportError> {
        let mut state = self.state.lock();
        let path = state
            .attached
            .iter()
            .find(|d| d.is_vid_pid_serial_match(vendor_id, product_id, serial_number))
            .map(|d| d.path.clone())
            .ok_or_else(|| {
                TransportError::DeviceNotFound(format!("{vendor_id:04X}:{product_id:04X}"))
            })?;
        Ok(self.open_device(&mut state, path))
    }

    fn close(&self, device: Box<dyn NativeDevice>) {
        self.state.lock().closes += 1;
        drop(device);
    }
}

struct MockDevice {
    path: String,
    state: Arc<Mutex<MockState>>,
    last_error: Option<String>,
}

impl MockDevice {
    /// Run `f` against this device's state unless an I/O failure is armed
    fn with_device<T>(
        &mut self,
        f: impl FnOnce(&mut MockDeviceState) -> T,
    ) -> Result<T, TransportError> {
        let mut state = self.state.lock();
        let device = state.device(&self.path);
        if let Some(message) = &device.io_failure {
            let message = message.clone();
            drop(state);
            self.last_error = Some(message.clone());
            return Err(TransportError::HidError(message));
        }
        Ok(f(device))
    }
}

impl NativeDevice for MockDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.read_timeout(buf, -1)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError> {
        let deadline = u64::try_from(timeout_ms)
            .ok()
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        loop {
            let (len, blocking) = self.with_device(|device| match device.input.pop_front() {
                Some(report) => {
                    let len = report.len().min(buf.len());
                    buf[..len].copy_from_slice(&report[..len]);
                    (len, device.blocking_reads)
                }
                None => (0, device.blocking_reads),
            })?;
            if len > 0 || !blocking || deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(len);
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn write(&mut self, report: &[u8]) -> Result<usize, TransportError> {
        self.with_device(|device| {
            device.writes.push(report.to_vec());
            report.len()
        })
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.with_device(|device| {
            let report_id = buf.first().copied().unwrap_or(0);
            match device.feature_reports.get(&report_id) {
                Some(payload) => {
                    let len = payload.len().min(buf.len().saturating_sub(1));
                    buf[1..1 + len].copy_from_slice(&payload[..len]);
                    len + 1
                }
                None => 1,
            }
        })
    }

    fn send_feature_report(&mut self, report: &[u8]) -> Result<usize, TransportError> {
        self.with_device(|device| {
            device.sent_features.push(report.to_vec());
            report.len()
        })
    }

    fn set_non_blocking(&mut self, non_blocking: bool) -> Result<(), TransportError> {
        self.with_device(|device| device.non_blocking = non_blocking)
    }

    fn indexed_string(&mut self, index: i32) -> Result<Option<String>, TransportError> {
        self.with_device(|device| {
            device.strings.get(&index).map(|wide| {
                let len = wide.len().min(protocol::WSTR_LEN * 2);
                protocol::decode_wide_string(&wide[..len])
            })
        })
    }

    fn last_error_message(&self) -> Option<String> {
        self.last_error.clone()
    }
}
