//! Lazily created process-wide session
//!
//! Convenience for applications that want a single shared [`HidServices`]
//! with default configuration. Nothing else in the crate uses it.

use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::config::HidServicesConfig;
use crate::error::HidError;
use crate::services::HidServices;

static SERVICES: OnceLock<HidServices> = OnceLock::new();
static INIT: Mutex<()> = parking_lot::const_mutex(());

/// The shared session, created on first use
///
/// Creation is retried on the next call if it failed.
pub fn hid_services() -> Result<&'static HidServices, HidError> {
    if let Some(services) = SERVICES.get() {
        return Ok(services);
    }

    let _guard = INIT.lock();
    if let Some(services) = SERVICES.get() {
        return Ok(services);
    }
    let services = HidServices::with_config(HidServicesConfig::default())?;
    Ok(SERVICES.get_or_init(|| services))
}
