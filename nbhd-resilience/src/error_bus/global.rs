//! Process-wide error bus instance

use super::signals::install_global_handlers;
use super::ErrorBus;
use nbhd_common::config::ErrorBusConfig;
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

static GLOBAL_BUS: Lazy<RwLock<Arc<ErrorBus>>> = Lazy::new(|| {
    install_global_handlers();
    RwLock::new(Arc::new(ErrorBus::new(ErrorBusConfig::default())))
});

/// The shared error bus
///
/// First access builds a bus from default configuration and installs the
/// process-wide panic handler, which reports into whichever bus is current.
pub fn global() -> Arc<ErrorBus> {
    Arc::clone(&GLOBAL_BUS.read().unwrap())
}

/// Replace the shared bus, returning the previous one
pub fn install(bus: Arc<ErrorBus>) -> Arc<ErrorBus> {
    std::mem::replace(&mut *GLOBAL_BUS.write().unwrap(), bus)
}

/// Clear the shared bus and drop its listeners
pub fn reset_global() {
    global().reset();
}
