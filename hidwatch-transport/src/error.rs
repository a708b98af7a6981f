//! Native boundary error types

use thiserror::Error;

/// Errors surfaced by a [`HidBackend`](crate::HidBackend) or
/// [`NativeDevice`](crate::NativeDevice) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The native library could not be loaded or initialised
    #[error("HID library initialisation failed: {0}")]
    InitFailed(String),

    /// The native library has not been initialised (or has already exited)
    #[error("HID library not initialised")]
    NotInitialised,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    Disconnected,

    // HID-specific errors
    #[error("HID error: {0}")]
    HidError(String),

    #[error("HID permission denied: {0}")]
    HidPermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "hidapi")]
impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") {
            TransportError::HidPermissionDenied(msg)
        } else {
            TransportError::HidError(msg)
        }
    }
}
