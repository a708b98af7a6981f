//! Session error types

use hidwatch_transport::TransportError;
use thiserror::Error;

/// Errors from HID session and device operations
#[derive(Error, Debug)]
pub enum HidError {
    /// The native library failed to link or initialise
    #[error("HID library did not initialise: {0}")]
    NativeInit(#[source] TransportError),

    /// Device enumeration failed; the scan was abandoned and scanning stopped
    #[error("Unable to enumerate HID devices: {0}")]
    Enumeration(#[source] TransportError),

    /// Operation attempted on a device that has not been opened
    #[error("Device has not been opened")]
    NotOpen,

    /// A native read/write/feature report call failed
    #[error("HID I/O error: {message}")]
    Io {
        /// The native layer's last error message for the device
        message: String,
    },

    /// A configuration value was out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HidError {
    /// Whether this error stopped the scan scheduler
    pub fn is_fatal(&self) -> bool {
        matches!(self, HidError::NativeInit(_) | HidError::Enumeration(_))
    }
}

impl From<toml::de::Error> for HidError {
    fn from(e: toml::de::Error) -> Self {
        HidError::Config(e.to_string())
    }
}
