//! Host platform seams
//!
//! Every capability the resilience components need from the browser is a
//! trait here. Components receive `Arc<dyn ...>` handles at construction and
//! never reach for ambient platform state.
//!
//! Implementations shipped with the crate:
//! - [`native`]: reqwest fetcher and symphonia-backed audio context for the
//!   preflight command-line tool
//! - [`headless`]: inert worker/document hosts and PCM sinks
//! - [`memory`]: scriptable in-memory hosts used by tests and demos

mod audio;
mod document;
mod fetch;
pub mod headless;
pub mod memory;
pub mod native;
mod worker;

pub use audio::{
    AudioContext, AudioHostError, AudioPlatform, ContextState, GestureSource, MediaElementHost,
    MediaHandle, PcmBuffer, PcmSink,
};
pub use document::DocumentHost;
pub use fetch::{CacheMode, FetchError, FetchMethod, FetchRequest, FetchResponse, HttpFetcher};
pub use worker::{
    HostError, HostWorkerEvent, InstallingState, RegistrationHandle, RegistrationOptions,
    ServiceWorkerHost, UpdateViaCache, WorkerState,
};
