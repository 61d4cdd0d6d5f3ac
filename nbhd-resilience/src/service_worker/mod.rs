//! Background worker lifecycle
//!
//! Validates, registers, updates, and unregisters the offline worker script.
//! Transient network failures are retried with exponential backoff; every
//! other failure is classified and surfaced once. All failures are reported
//! to the error bus with category `service-worker`.
//!
//! # Post-registration wiring
//!
//! A background task follows the container's event stream once a
//! registration exists:
//! - a worker reported by `updatefound` that reaches `installed` while a
//!   controller is active emits `sw-update-available`
//! - `controllerchange` applies the [`ControllerChangePolicy`]
//! - worker messages are forwarded to [`ServiceWorkerLifecycle::subscribe_messages`]

mod preflight;

pub use preflight::{
    is_javascript_mime, looks_like_html, preflight, PreflightFailure, JAVASCRIPT_MIME_TYPES,
};

use crate::context;
use crate::error_bus::{ErrorBus, ReportedError, SwFailureKind};
use crate::host::{
    HostError, HostWorkerEvent, HttpFetcher, InstallingState, RegistrationHandle,
    RegistrationOptions, ServiceWorkerHost, UpdateViaCache, WorkerState,
};
use nbhd_common::config::ServiceWorkerConfig;
use nbhd_common::events::{ErrorCategory, ResilienceEvent};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Message posted to a waiting worker to make it activate
pub const SKIP_WAITING_MESSAGE: &str = "SKIP_WAITING";

/// Operation stage a failure occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Support,
    Preflight,
    Registration,
    Update,
    Unregister,
    SkipWaiting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Support => "support",
            Phase::Preflight => "preflight",
            Phase::Registration => "registration",
            Phase::Update => "update",
            Phase::Unregister => "unregister",
            Phase::SkipWaiting => "skip-waiting",
        }
    }
}

/// Failed lifecycle operation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind} during {phase:?}: {details}")]
pub struct SwFailure {
    #[serde(rename = "error")]
    pub kind: SwFailureKind,
    pub phase: Phase,
    pub details: String,
    /// Failure is transient; the caller may try again later
    pub can_retry: bool,
    /// Retries performed before giving up
    pub retries: u32,
}

/// Successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    pub registration: RegistrationHandle,
    pub scope: String,
    /// Retries performed before success
    pub retries: u32,
}

/// Discriminated `register` outcome in its wire shape
/// (`{success, scope?, error?, details?, canRetry?}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SwFailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_retry: Option<bool>,
}

impl From<&Result<Registered, SwFailure>> for RegisterOutcome {
    fn from(result: &Result<Registered, SwFailure>) -> Self {
        match result {
            Ok(registered) => RegisterOutcome {
                success: true,
                scope: Some(registered.scope.clone()),
                error: None,
                details: None,
                can_retry: None,
            },
            Err(failure) => RegisterOutcome {
                success: false,
                scope: None,
                error: Some(failure.kind),
                details: Some(failure.details.clone()),
                can_retry: Some(failure.can_retry),
            },
        }
    }
}

/// Snapshot returned by [`ServiceWorkerLifecycle::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatus {
    pub supported: bool,
    pub registered: bool,
    pub scope: Option<String>,
    pub state: WorkerState,
    /// Retry attempt of the `register` call in flight (0 when idle)
    pub retry_count: u32,
}

/// Reaction to `controllerchange`
#[derive(Clone, Default)]
pub enum ControllerChangePolicy {
    /// Reload the page once
    #[default]
    Reload,
    Ignore,
    /// Hand the decision to the host (e.g. ask the user first)
    Callback(Arc<dyn Fn() + Send + Sync>),
}

impl fmt::Debug for ControllerChangePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerChangePolicy::Reload => f.write_str("Reload"),
            ControllerChangePolicy::Ignore => f.write_str("Ignore"),
            ControllerChangePolicy::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

struct LifecycleState {
    registration: Option<RegistrationHandle>,
    retry_count: u32,
    wiring: Option<JoinHandle<()>>,
    reloading: bool,
}

struct Inner {
    host: Arc<dyn ServiceWorkerHost>,
    fetcher: Arc<dyn HttpFetcher>,
    bus: Arc<ErrorBus>,
    config: ServiceWorkerConfig,
    supported: bool,
    state: Mutex<LifecycleState>,
    policy: Mutex<ControllerChangePolicy>,
    messages: broadcast::Sender<serde_json::Value>,
}

/// Offline worker lifecycle manager
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ServiceWorkerLifecycle {
    inner: Arc<Inner>,
}

impl ServiceWorkerLifecycle {
    /// Detects platform support immediately
    pub fn new(
        host: Arc<dyn ServiceWorkerHost>,
        fetcher: Arc<dyn HttpFetcher>,
        bus: Arc<ErrorBus>,
        config: ServiceWorkerConfig,
    ) -> Self {
        let supported = host.has_container() && host.has_push_manager();
        if !supported {
            info!(
                container = host.has_container(),
                push_manager = host.has_push_manager(),
                "Background worker not supported on this platform"
            );
        }
        let (messages, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                host,
                fetcher,
                bus,
                config,
                supported,
                state: Mutex::new(LifecycleState {
                    registration: None,
                    retry_count: 0,
                    wiring: None,
                    reloading: false,
                }),
                policy: Mutex::new(ControllerChangePolicy::default()),
                messages,
            }),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.inner.supported
    }

    /// Set the `controllerchange` reaction; applies to events delivered from now on
    pub fn set_controller_change_policy(&self, policy: ControllerChangePolicy) {
        *self.inner.policy.lock().unwrap() = policy;
    }

    /// Inbound worker messages, forwarded verbatim
    pub fn subscribe_messages(&self) -> broadcast::Receiver<serde_json::Value> {
        self.inner.messages.subscribe()
    }

    /// Register the configured script at the configured scope
    pub async fn register_default(&self) -> Result<Registered, SwFailure> {
        let script = self.inner.config.script_path.clone();
        let scope = self.inner.config.scope.clone();
        self.register(&script, &scope).await
    }

    /// Validate and register `script_url` at `scope`
    ///
    /// Idempotent on success: when `script_url` is already registered the
    /// stored registration is returned without touching the platform.
    ///
    /// **Retry policy:** only network failures are retried, waiting
    /// `initial_retry_delay_ms * 2^attempt` between attempts, for at most
    /// `max_retries` retries. Each failed attempt is reported.
    pub async fn register(&self, script_url: &str, scope: &str) -> Result<Registered, SwFailure> {
        if !self.inner.supported {
            let failure = SwFailure {
                kind: SwFailureKind::Unsupported,
                phase: Phase::Support,
                details: "Platform has no background worker container or push manager".to_string(),
                can_retry: false,
                retries: 0,
            };
            self.inner.report(&failure);
            return Err(failure);
        }

        if let Some(existing) = self.existing_registration(script_url) {
            debug!(script = script_url, id = existing.id, "Script already registered");
            return Ok(Registered {
                scope: existing.scope.clone(),
                registration: existing,
                retries: 0,
            });
        }

        let max_retries = self.inner.config.max_retries;
        let mut attempt: u32 = 0;

        loop {
            self.inner.state.lock().unwrap().retry_count = attempt;

            match self.attempt(script_url, scope).await {
                Ok(registration) => {
                    info!(
                        script = script_url,
                        scope = %registration.scope,
                        id = registration.id,
                        retries = attempt,
                        "Background worker registered"
                    );
                    self.store_registration(registration.clone());
                    return Ok(Registered {
                        scope: registration.scope.clone(),
                        registration,
                        retries: attempt,
                    });
                }
                Err((kind, phase, details)) => {
                    let will_retry = kind == SwFailureKind::Network && attempt < max_retries;
                    let failure = SwFailure {
                        kind,
                        phase,
                        details,
                        can_retry: kind == SwFailureKind::Network,
                        retries: attempt,
                    };
                    self.inner.report(&failure);

                    if !will_retry {
                        self.inner.state.lock().unwrap().retry_count = 0;
                        warn!(
                            script = script_url,
                            error = %failure.kind,
                            retries = attempt,
                            "Background worker registration failed: {}",
                            failure.details
                        );
                        return Err(failure);
                    }

                    let delay = self.backoff_delay(attempt);
                    warn!(
                        script = script_url,
                        attempt = attempt + 1,
                        backoff_ms = delay.as_millis() as u64,
                        "Background worker script unreachable, will retry after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Delay before retry number `attempt + 1`
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(20);
        let delay_ms = self.inner.config.initial_retry_delay_ms.saturating_mul(factor);
        nbhd_common::time::millis_to_duration(delay_ms)
    }

    fn existing_registration(&self, script_url: &str) -> Option<RegistrationHandle> {
        self.inner
            .state
            .lock()
            .unwrap()
            .registration
            .as_ref()
            .filter(|r| r.script_url == script_url)
            .cloned()
    }

    /// One pre-flight plus platform registration
    async fn attempt(
        &self,
        script_url: &str,
        scope: &str,
    ) -> Result<RegistrationHandle, (SwFailureKind, Phase, String)> {
        preflight(self.inner.fetcher.as_ref(), script_url)
            .await
            .map_err(|f| (f.kind, Phase::Preflight, f.details))?;

        let options = RegistrationOptions {
            scope: scope.to_string(),
            update_via_cache: UpdateViaCache::None,
        };
        self.inner
            .host
            .register(script_url, &options)
            .await
            .map_err(|e| (classify_host_error(&e), Phase::Registration, e.to_string()))
    }

    fn store_registration(&self, registration: RegistrationHandle) {
        // Subscribe before spawning so no event between here and the task start is lost
        let events = self.inner.host.subscribe();
        let wiring = tokio::spawn(follow_host_events(Arc::downgrade(&self.inner), events));

        let mut state = self.inner.state.lock().unwrap();
        state.registration = Some(registration);
        state.retry_count = 0;
        if let Some(previous) = state.wiring.replace(wiring) {
            previous.abort();
        }
    }

    /// Unregister the stored registration
    ///
    /// Returns the platform's answer; `false` when unsupported, unregistered,
    /// or the platform call failed.
    pub async fn unregister(&self) -> bool {
        let Some(registration) = self.current_registration() else {
            return false;
        };

        let result = self.inner.host.unregister(&registration).await;

        {
            let mut state = self.inner.state.lock().unwrap();
            state.registration = None;
            if let Some(wiring) = state.wiring.take() {
                wiring.abort();
            }
        }

        match result {
            Ok(unregistered) => {
                info!(id = registration.id, unregistered, "Background worker unregistered");
                unregistered
            }
            Err(e) => {
                self.inner.report(&SwFailure {
                    kind: classify_host_error(&e),
                    phase: Phase::Unregister,
                    details: e.to_string(),
                    can_retry: false,
                    retries: 0,
                });
                false
            }
        }
    }

    /// Ask a waiting worker to activate
    ///
    /// Returns whether a waiting worker existed.
    pub fn skip_waiting(&self) -> bool {
        let Some(registration) = self.current_registration() else {
            return false;
        };

        let message = serde_json::json!({ "type": SKIP_WAITING_MESSAGE });
        match self.inner.host.post_to_waiting(&registration, message) {
            Ok(posted) => {
                debug!(id = registration.id, posted, "Skip-waiting requested");
                posted
            }
            Err(e) => {
                self.inner.report(&SwFailure {
                    kind: classify_host_error(&e),
                    phase: Phase::SkipWaiting,
                    details: e.to_string(),
                    can_retry: false,
                    retries: 0,
                });
                false
            }
        }
    }

    /// Ask the stored registration to check for a new script
    pub async fn update(&self) -> Result<(), SwFailure> {
        if !self.inner.supported {
            return Err(SwFailure {
                kind: SwFailureKind::Unsupported,
                phase: Phase::Update,
                details: "Platform has no background worker container or push manager".to_string(),
                can_retry: false,
                retries: 0,
            });
        }

        let Some(registration) = self.current_registration() else {
            return Err(SwFailure {
                kind: SwFailureKind::RegistrationFailed,
                phase: Phase::Update,
                details: "No registration to update".to_string(),
                can_retry: false,
                retries: 0,
            });
        };

        self.inner.host.update(&registration).await.map_err(|e| {
            let kind = classify_host_error(&e);
            let failure = SwFailure {
                kind,
                phase: Phase::Update,
                details: e.to_string(),
                can_retry: kind == SwFailureKind::Network,
                retries: 0,
            };
            self.inner.report(&failure);
            failure
        })
    }

    fn current_registration(&self) -> Option<RegistrationHandle> {
        if !self.inner.supported {
            return None;
        }
        self.inner.state.lock().unwrap().registration.clone()
    }

    pub fn registration(&self) -> Option<RegistrationHandle> {
        self.current_registration()
    }

    pub fn status(&self) -> RegistrationStatus {
        let state = self.inner.state.lock().unwrap();
        let worker_state = state
            .registration
            .as_ref()
            .map(|r| self.inner.host.worker_state(r))
            .unwrap_or(WorkerState::None);
        RegistrationStatus {
            supported: self.inner.supported,
            registered: state.registration.is_some(),
            scope: state.registration.as_ref().map(|r| r.scope.clone()),
            state: worker_state,
            retry_count: state.retry_count,
        }
    }
}

impl Inner {
    fn report(&self, failure: &SwFailure) {
        self.bus.report(
            ErrorCategory::ServiceWorker,
            Some(ReportedError::service_worker(failure.kind, failure.details.clone())),
            Some(context! {
                "phase" => failure.phase.as_str(),
                "details" => failure.details.clone(),
                "canRetry" => failure.can_retry,
            }),
        );
    }

    fn handle_host_event(&self, event: HostWorkerEvent, updating: &mut HashSet<u64>) {
        match event {
            HostWorkerEvent::UpdateFound { registration_id } => {
                debug!(id = registration_id, "Update found");
                updating.insert(registration_id);
            }
            HostWorkerEvent::InstallingStateChanged { registration_id, state } => {
                if !updating.contains(&registration_id) {
                    return;
                }
                match state {
                    InstallingState::Installed => {
                        updating.remove(&registration_id);
                        if !self.host.has_controller() {
                            debug!(id = registration_id, "First worker installed");
                            return;
                        }
                        let registration = self.state.lock().unwrap().registration.clone();
                        if let Some(registration) =
                            registration.filter(|r| r.id == registration_id)
                        {
                            info!(
                                id = registration.id,
                                "New background worker waiting to activate"
                            );
                            self.bus
                                .events()
                                .emit_lossy(ResilienceEvent::SwUpdateAvailable { registration });
                        }
                    }
                    InstallingState::Redundant | InstallingState::Activated => {
                        updating.remove(&registration_id);
                    }
                    InstallingState::Installing | InstallingState::Activating => {}
                }
            }
            HostWorkerEvent::ControllerChange => {
                let policy = self.policy.lock().unwrap().clone();
                match policy {
                    ControllerChangePolicy::Reload => {
                        let first = {
                            let mut state = self.state.lock().unwrap();
                            !std::mem::replace(&mut state.reloading, true)
                        };
                        if first {
                            info!("Controller changed, reloading");
                            self.host.reload();
                        }
                    }
                    ControllerChangePolicy::Ignore => {
                        debug!("Controller changed, ignored by policy")
                    }
                    ControllerChangePolicy::Callback(callback) => callback(),
                }
            }
            HostWorkerEvent::Message(message) => {
                let _ = self.messages.send(message);
            }
        }
    }
}

async fn follow_host_events(inner: Weak<Inner>, mut events: broadcast::Receiver<HostWorkerEvent>) {
    let mut updating = HashSet::new();
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else { break };
                inner.handle_host_event(event, &mut updating);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Background worker event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn classify_host_error(error: &HostError) -> SwFailureKind {
    if error.is_network() {
        SwFailureKind::Network
    } else if error.is_mime_type() {
        SwFailureKind::MimeType
    } else {
        SwFailureKind::RegistrationFailed
    }
}
