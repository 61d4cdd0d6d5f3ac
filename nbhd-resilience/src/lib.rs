//! Neighborhood production resilience layer
//!
//! Keeps the client usable when deployment artifacts are broken or the
//! platform lacks a capability:
//!
//! - [`error_bus`]: categorised error collection, listener fan-out, and
//!   throttled user-facing notifications
//! - [`service_worker`]: validated, retrying registration of the offline worker
//! - [`audio`]: notification sounds degrading to synthetic tones
//! - [`manifest`]: manifest validation with an in-memory fallback
//!
//! Components talk to the platform only through the traits in [`host`].

pub mod audio;
pub mod error_bus;
pub mod host;
pub mod manifest;
pub mod service_worker;
pub mod startup;

pub use audio::AudioNotifier;
pub use error_bus::{ErrorBus, ErrorRecord, ReportedError};
pub use manifest::ManifestGuard;
pub use service_worker::ServiceWorkerLifecycle;
pub use startup::{Hosts, ResilienceLayer, StartupReport};
