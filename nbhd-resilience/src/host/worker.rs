//! Service worker container seam
//!
//! Mirrors the platform's `navigator.serviceWorker` surface closely enough for
//! the lifecycle to validate, register, update, and observe a worker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

pub use nbhd_common::events::WorkerRegistrationInfo as RegistrationHandle;

/// `updateViaCache` registration option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateViaCache {
    Imports,
    All,
    None,
}

/// Options passed to the platform registration call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub scope: String,
    pub update_via_cache: UpdateViaCache,
}

/// Most advanced worker slot currently occupied on a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    Waiting,
    Active,
    None,
}

/// State of a worker that appeared through `updatefound`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallingState {
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// Events surfaced by the container after registration
#[derive(Debug, Clone, PartialEq)]
pub enum HostWorkerEvent {
    /// `updatefound` fired on a registration
    UpdateFound { registration_id: u64 },
    /// `statechange` fired on the worker reported by `updatefound`
    InstallingStateChanged { registration_id: u64, state: InstallingState },
    /// `controllerchange` fired on the container
    ControllerChange,
    /// `message` received from a worker
    Message(serde_json::Value),
}

/// Rejection raised by the platform (a DOMException: name plus message)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct HostError {
    pub name: String,
    pub message: String,
}

impl HostError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into() }
    }

    /// The platform could not reach the script
    pub fn is_network(&self) -> bool {
        let message = self.message.to_ascii_lowercase();
        self.name == "NetworkError"
            || message.contains("failed to fetch")
            || message.contains("network error")
    }

    /// The platform rejected the script because of its media type
    pub fn is_mime_type(&self) -> bool {
        let message = self.message.to_ascii_lowercase();
        message.contains("mime type") || message.contains("mime-type")
    }
}

/// Platform service worker container
#[async_trait]
pub trait ServiceWorkerHost: Send + Sync {
    /// `navigator.serviceWorker` exists
    fn has_container(&self) -> bool;

    /// `PushManager` constructor exists
    fn has_push_manager(&self) -> bool;

    async fn register(
        &self,
        script_url: &str,
        options: &RegistrationOptions,
    ) -> Result<RegistrationHandle, HostError>;

    /// Ask the registration to check for a new script
    async fn update(&self, registration: &RegistrationHandle) -> Result<(), HostError>;

    /// Returns the platform's boolean result
    async fn unregister(&self, registration: &RegistrationHandle) -> Result<bool, HostError>;

    fn worker_state(&self, registration: &RegistrationHandle) -> WorkerState;

    /// Post `message` to the waiting worker; `Ok(false)` when none is waiting
    fn post_to_waiting(
        &self,
        registration: &RegistrationHandle,
        message: serde_json::Value,
    ) -> Result<bool, HostError>;

    /// A controller is currently active for this page
    fn has_controller(&self) -> bool;

    /// Stream of post-registration events
    fn subscribe(&self) -> broadcast::Receiver<HostWorkerEvent>;

    /// Top-level page reload
    fn reload(&self);
}
