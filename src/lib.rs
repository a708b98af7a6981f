//! HID device lifecycle management
//!
//! This crate tracks attached HID devices by polling enumeration, tells
//! listeners when devices come and go, and performs framed report I/O:
//!
//! - [`HidServices`] - session facade: start/stop scanning, find and open devices
//! - [`DeviceHandle`] - read, write and feature reports on one device
//! - [`HidEvent`] / [`HidServicesListener`] - attach, detach, failure and data events
//! - [`HidServicesConfig`] - scan mode and intervals, loadable from TOML
//!
//! The native layer sits behind [`hidwatch_transport::HidBackend`]; with the
//! default `hidapi` feature the session uses hidapi.

pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod services;

#[cfg(feature = "hidapi")]
pub mod global;

mod manager;
mod registry;
mod scanner;
mod worker;

pub use config::{HidServicesConfig, ScanMode, ScanModeKind};
pub use device::DeviceHandle;
pub use error::HidError;
pub use event::{HidEvent, HidServicesListener, ListenerList};
pub use services::HidServices;

pub use hidwatch_transport::{protocol, DeviceDescriptor, DeviceIdentity, HidBackend, TransportError};
