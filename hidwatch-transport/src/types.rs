//! Common types for the native boundary
//!
//! A [`DeviceDescriptor`] is an immutable snapshot of one enumerated device.
//! Descriptors are created fresh on every enumeration and compared by
//! `path` alone: the path is the one identifier that is stable across
//! enumeration calls for the same physical device on every platform.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Widen a vendor/product id surfaced as a signed 16-bit value.
///
/// Native layers that expose `unsigned short` through a signed type hand out
/// negative ids for anything above `0x7FFF`; masking restores the original.
#[inline]
pub fn widen_id(raw: i32) -> u16 {
    (raw & 0xFFFF) as u16
}

/// Identity of a device: vendor/product/serial plus the path used as its key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Serial number if the device reports one
    pub serial_number: Option<String>,
    /// Platform-specific device path (unique key)
    pub path: String,
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Snapshot of one enumerated HID device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Platform-specific device path (unique key)
    pub path: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Serial number if the device reports one
    pub serial_number: Option<String>,
    /// Device release number (bcdDevice)
    pub release_number: u16,
    /// Manufacturer string
    pub manufacturer: Option<String>,
    /// Product string
    pub product: Option<String>,
    /// HID usage page of the top-level collection
    pub usage_page: u16,
    /// HID usage of the top-level collection
    pub usage: u16,
    /// USB interface number (-1 when not applicable)
    pub interface_number: i32,
}

impl DeviceDescriptor {
    pub fn new(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            path: path.into(),
            vendor_id,
            product_id,
            interface_number: -1,
            ..Default::default()
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_release_number(mut self, release_number: u16) -> Self {
        self.release_number = release_number;
        self
    }

    pub fn with_usage(mut self, usage_page: u16, usage: u16) -> Self {
        self.usage_page = usage_page;
        self.usage = usage;
        self
    }

    pub fn with_interface_number(mut self, interface_number: i32) -> Self {
        self.interface_number = interface_number;
        self
    }

    /// The identity portion of this descriptor
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial_number: self.serial_number.clone(),
            path: self.path.clone(),
        }
    }

    /// Check whether this device matches a vendor/product/serial combination
    ///
    /// A vendor or product id of 0 matches anything, as does a `None` serial.
    /// A `Some` serial requires exact equality with the reported serial.
    pub fn is_vid_pid_serial_match(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
    ) -> bool {
        let ids_match = (vendor_id == 0 || self.vendor_id == vendor_id)
            && (product_id == 0 || self.product_id == product_id);
        match serial_number {
            None => ids_match,
            Some(serial) => ids_match && self.serial_number.as_deref() == Some(serial),
        }
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for DeviceDescriptor {}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}:{:04X} rel {:04X} [{} / {}] serial={} usage={:04X}:{:04X} if={} at {}",
            self.vendor_id,
            self.product_id,
            self.release_number,
            self.manufacturer.as_deref().unwrap_or("-"),
            self.product.as_deref().unwrap_or("-"),
            self.serial_number.as_deref().unwrap_or("-"),
            self.usage_page,
            self.usage,
            self.interface_number,
            self.path,
        )
    }
}

/// Device information as a native layer surfaces it
///
/// Vendor and product ids may arrive sign-extended; converting into a
/// [`DeviceDescriptor`] widens them through [`widen_id`].
#[derive(Debug, Clone, Default)]
pub struct RawDeviceInfo {
    pub path: String,
    pub vendor_id: i32,
    pub product_id: i32,
    pub serial_number: Option<String>,
    pub release_number: i32,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub usage_page: i32,
    pub usage: i32,
    pub interface_number: i32,
}

impl From<RawDeviceInfo> for DeviceDescriptor {
    fn from(raw: RawDeviceInfo) -> Self {
        Self {
            path: raw.path,
            vendor_id: widen_id(raw.vendor_id),
            product_id: widen_id(raw.product_id),
            serial_number: raw.serial_number,
            release_number: widen_id(raw.release_number),
            manufacturer: raw.manufacturer,
            product: raw.product,
            usage_page: widen_id(raw.usage_page),
            usage: widen_id(raw.usage),
            interface_number: raw.interface_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widen_negative_ids() {
        assert_eq!(widen_id(-32767), 32769);
        assert_eq!(widen_id(-1), 0xFFFF);
        assert_eq!(widen_id(0x1234), 0x1234);
        assert_eq!(widen_id(0xffff8001_u32 as i32), 0x8001);
    }

    #[test]
    fn test_raw_info_is_widened() {
        let raw = RawDeviceInfo {
            path: "path".into(),
            vendor_id: 0xffff8001_u32 as i32,
            product_id: 0xffff8002_u32 as i32,
            serial_number: Some("1234".into()),
            ..Default::default()
        };
        let desc = DeviceDescriptor::from(raw);
        assert_eq!(desc.vendor_id, 0x8001);
        assert_eq!(desc.product_id, 0x8002);
        assert!(desc.is_vid_pid_serial_match(0x8001, 0x8002, Some("1234")));
    }

    #[test]
    fn test_raw_info_fields_carried() {
        let raw = RawDeviceInfo {
            path: "path".into(),
            vendor_id: 1,
            product_id: 2,
            serial_number: Some("serial".into()),
            release_number: 3,
            manufacturer: Some("manufacturer".into()),
            product: Some("product".into()),
            usage_page: 4,
            usage: 5,
            interface_number: 6,
        };
        let desc = DeviceDescriptor::from(raw);
        assert_eq!(desc.path, "path");
        assert_eq!(desc.vendor_id, 1);
        assert_eq!(desc.product_id, 2);
        assert_eq!(desc.serial_number.as_deref(), Some("serial"));
        assert_eq!(desc.release_number, 3);
        assert_eq!(desc.manufacturer.as_deref(), Some("manufacturer"));
        assert_eq!(desc.product.as_deref(), Some("product"));
        assert_eq!(desc.usage_page, 4);
        assert_eq!(desc.usage, 5);
        assert_eq!(desc.interface_number, 6);
    }

    #[test]
    fn test_full_wildcard_matches_anything() {
        let desc = DeviceDescriptor::new("/dev/hidraw0", 0x3151, 0x5030);
        assert!(desc.is_vid_pid_serial_match(0, 0, None));
        let with_serial = desc.clone().with_serial("abc");
        assert!(with_serial.is_vid_pid_serial_match(0, 0, None));
    }

    #[test]
    fn test_serial_must_match_exactly() {
        let desc = DeviceDescriptor::new("/dev/hidraw0", 0x01, 0x02).with_serial("1234");
        assert!(desc.is_vid_pid_serial_match(0x01, 0x02, Some("1234")));
        assert!(!desc.is_vid_pid_serial_match(0x01, 0x02, Some("12345")));
        assert!(!desc.is_vid_pid_serial_match(0x01, 0x03, Some("1234")));
        assert!(desc.is_vid_pid_serial_match(0x01, 0, Some("1234")));
    }

    #[test]
    fn test_serial_filter_against_device_without_serial() {
        let desc = DeviceDescriptor::new("/dev/hidraw0", 0x01, 0x02);
        assert!(!desc.is_vid_pid_serial_match(0x01, 0x02, Some("1234")));
        assert!(desc.is_vid_pid_serial_match(0x01, 0x02, None));
    }

    #[test]
    fn test_equality_is_by_path() {
        let a = DeviceDescriptor::new("same", 0x01, 0x02).with_product("first");
        let b = DeviceDescriptor::new("same", 0x03, 0x04).with_product("second");
        let c = DeviceDescriptor::new("other", 0x01, 0x02);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn test_display_uses_hex_ids() {
        let desc = DeviceDescriptor::new("p", 0x3151, 0x5030).with_product("Keyboard");
        let text = desc.to_string();
        assert_eq!(
            text,
            "3151:5030 rel 0000 [- / Keyboard] serial=- usage=0000:0000 if=-1 at p"
        );
    }

    #[test]
    fn test_descriptor_serializes() {
        let desc = DeviceDescriptor::new("p", 1, 2).with_serial("s");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["vendor_id"], 1);
        assert_eq!(json["serial_number"], "s");
    }
}
