//! Service worker lifecycle integration tests
//!
//! **Test Coverage:**
//! - Retry bound and exponential backoff timing (paused clock)
//! - Failure classification for platform rejections
//! - Idempotent registration
//! - Unsupported platforms failing soft
//! - Post-registration wiring: update-available, controller change, messages
//! - skip_waiting / unregister / update / status

mod helpers;

use helpers::{drain_type, javascript, test_bus};
use nbhd_common::config::ServiceWorkerConfig;
use nbhd_common::events::ResilienceEvent;
use nbhd_resilience::error_bus::{ErrorBus, SwFailureKind};
use nbhd_resilience::host::memory::{MemoryWorkerHost, StaticFetcher};
use nbhd_resilience::host::{
    FetchError, FetchMethod, HostError, HostWorkerEvent, InstallingState, WorkerState,
};
use nbhd_resilience::service_worker::{ControllerChangePolicy, ServiceWorkerLifecycle};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

struct Fixture {
    bus: Arc<ErrorBus>,
    host: Arc<MemoryWorkerHost>,
    fetcher: Arc<StaticFetcher>,
    lifecycle: ServiceWorkerLifecycle,
}

fn fixture_with(host: MemoryWorkerHost) -> Fixture {
    let (bus, _) = test_bus(100);
    let host = Arc::new(host);
    let fetcher = Arc::new(StaticFetcher::new());
    fetcher.respond(FetchMethod::Head, "/sw.js", javascript());
    let lifecycle = ServiceWorkerLifecycle::new(
        host.clone(),
        fetcher.clone(),
        bus.clone(),
        ServiceWorkerConfig::default(),
    );
    Fixture { bus, host, fetcher, lifecycle }
}

fn fixture() -> Fixture {
    fixture_with(MemoryWorkerHost::new())
}

/// Wait until the wiring task has processed every event emitted so far
async fn settle(f: &Fixture) {
    let mut messages = f.lifecycle.subscribe_messages();
    f.host.emit(HostWorkerEvent::Message(json!("settle")));
    timeout(Duration::from_secs(5), async {
        while let Ok(message) = messages.recv().await {
            if message == json!("settle") {
                break;
            }
        }
    })
    .await
    .expect("wiring task processed events");
}

#[tokio::test(start_paused = true)]
async fn test_network_failures_are_retried_with_backoff() {
    let f = fixture();
    let fetcher = Arc::new(StaticFetcher::new());
    fetcher.fail(FetchMethod::Head, "/sw.js", FetchError::Network("offline".into()));
    let lifecycle = ServiceWorkerLifecycle::new(
        f.host.clone(),
        fetcher.clone(),
        f.bus.clone(),
        ServiceWorkerConfig::default(),
    );

    let started = Instant::now();
    let failure = lifecycle.register("/sw.js", "/").await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(failure.kind, SwFailureKind::Network);
    assert!(failure.can_retry);
    assert_eq!(failure.retries, 3);

    // maxRetries + 1 attempts, waiting 1s + 2s + 4s between them
    assert_eq!(fetcher.count(FetchMethod::Head, "/sw.js"), 4);
    assert!(elapsed >= Duration::from_millis(7_000), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(8_000), "elapsed {:?}", elapsed);

    assert_eq!(f.host.register_calls(), 0);
    assert_eq!(f.bus.len(), 4);
    assert_eq!(lifecycle.status().retry_count, 0);

    // Every recorded attempt, including the final one, agrees with the returned failure
    let records = f.bus.errors();
    assert!(records.iter().all(|r| r.context["canRetry"] == true));
    assert_eq!(records.last().unwrap().context["canRetry"], failure.can_retry);
    assert_eq!(records.last().unwrap().context["phase"], "preflight");
}

#[tokio::test(start_paused = true)]
async fn test_platform_network_rejection_is_retried() {
    let f = fixture();
    f.host
        .script_register(Err(HostError::new("TypeError", "Failed to fetch")))
        .script_register(Err(HostError::new("NetworkError", "connection lost")))
        .script_register(Ok(()));

    let registered = f.lifecycle.register("/sw.js", "/").await.expect("third attempt succeeds");
    assert_eq!(registered.retries, 2);
    assert_eq!(f.host.register_calls(), 3);
}

#[tokio::test]
async fn test_platform_rejection_is_not_retried() {
    let f = fixture();
    f.host.script_register(Err(HostError::new("SecurityError", "The operation is insecure.")));

    let failure = f.lifecycle.register("/sw.js", "/").await.unwrap_err();
    assert_eq!(failure.kind, SwFailureKind::RegistrationFailed);
    assert!(!failure.can_retry);
    assert_eq!(failure.retries, 0);
    assert_eq!(f.host.register_calls(), 1);
    assert_eq!(f.bus.errors()[0].context["phase"], "registration");
}

#[tokio::test]
async fn test_platform_mime_rejection_is_mime_type() {
    let f = fixture();
    f.host.script_register(Err(HostError::new(
        "SecurityError",
        "The script has an unsupported MIME type ('text/html').",
    )));

    let failure = f.lifecycle.register("/sw.js", "/").await.unwrap_err();
    assert_eq!(failure.kind, SwFailureKind::MimeType);
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let f = fixture();
    let first = f.lifecycle.register("/sw.js", "/").await.unwrap();
    let second = f.lifecycle.register("/sw.js", "/").await.unwrap();

    assert_eq!(first.registration, second.registration);
    assert_eq!(f.host.register_calls(), 1);
    assert_eq!(f.fetcher.count(FetchMethod::Head, "/sw.js"), 1);
}

#[tokio::test]
async fn test_register_default_uses_configuration() {
    let f = fixture();
    let registered = f.lifecycle.register_default().await.unwrap();
    assert_eq!(registered.registration.script_url, "/sw.js");
    assert_eq!(registered.scope, "/");
}

#[tokio::test]
async fn test_unsupported_platform_fails_soft() {
    let f = fixture_with(MemoryWorkerHost::with_features(true, false));
    assert!(!f.lifecycle.is_supported());

    let failure = f.lifecycle.register("/sw.js", "/").await.unwrap_err();
    assert_eq!(failure.kind, SwFailureKind::Unsupported);
    assert_eq!(f.fetcher.requests().len(), 0);

    assert!(!f.lifecycle.unregister().await);
    assert!(!f.lifecycle.skip_waiting());
    assert_eq!(f.lifecycle.update().await.unwrap_err().kind, SwFailureKind::Unsupported);

    let status = f.lifecycle.status();
    assert!(!status.supported);
    assert!(!status.registered);
    assert_eq!(status.state, WorkerState::None);
}

#[tokio::test]
async fn test_update_available_requires_active_controller() {
    let f = fixture();
    let mut events = f.bus.subscribe_events();
    let registered = f.lifecycle.register("/sw.js", "/").await.unwrap();
    let id = registered.registration.id;

    // First install: nothing is in control yet
    f.host.emit(HostWorkerEvent::UpdateFound { registration_id: id });
    f.host.emit(HostWorkerEvent::InstallingStateChanged {
        registration_id: id,
        state: InstallingState::Installed,
    });
    settle(&f).await;
    assert!(drain_type(&mut events, "sw-update-available").is_empty());

    // Later update while a controller is active
    f.host.set_controller(true);
    f.host.emit(HostWorkerEvent::UpdateFound { registration_id: id });
    f.host.emit(HostWorkerEvent::InstallingStateChanged {
        registration_id: id,
        state: InstallingState::Installing,
    });
    f.host.emit(HostWorkerEvent::InstallingStateChanged {
        registration_id: id,
        state: InstallingState::Installed,
    });
    settle(&f).await;

    let updates = drain_type(&mut events, "sw-update-available");
    assert_eq!(updates.len(), 1);
    match &updates[0] {
        ResilienceEvent::SwUpdateAvailable { registration } => {
            assert_eq!(registration, &registered.registration)
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_state_change_without_update_found_is_ignored() {
    let f = fixture();
    let mut events = f.bus.subscribe_events();
    let registered = f.lifecycle.register("/sw.js", "/").await.unwrap();
    f.host.set_controller(true);

    f.host.emit(HostWorkerEvent::InstallingStateChanged {
        registration_id: registered.registration.id,
        state: InstallingState::Installed,
    });
    settle(&f).await;
    assert!(drain_type(&mut events, "sw-update-available").is_empty());
}

#[tokio::test]
async fn test_controller_change_reloads_once() {
    let f = fixture();
    f.lifecycle.register("/sw.js", "/").await.unwrap();

    f.host.emit(HostWorkerEvent::ControllerChange);
    f.host.emit(HostWorkerEvent::ControllerChange);
    settle(&f).await;

    assert_eq!(f.host.reload_count(), 1);
}

#[tokio::test]
async fn test_controller_change_policy_override() {
    let f = fixture();
    f.lifecycle.set_controller_change_policy(ControllerChangePolicy::Ignore);
    f.lifecycle.register("/sw.js", "/").await.unwrap();

    f.host.emit(HostWorkerEvent::ControllerChange);
    settle(&f).await;
    assert_eq!(f.host.reload_count(), 0);

    let asked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&asked);
    f.lifecycle.set_controller_change_policy(ControllerChangePolicy::Callback(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })));
    f.host.emit(HostWorkerEvent::ControllerChange);
    settle(&f).await;

    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(f.host.reload_count(), 0);
}

#[tokio::test]
async fn test_controller_change_before_registration_is_not_observed() {
    let f = fixture();
    f.host.emit(HostWorkerEvent::ControllerChange);
    f.lifecycle.register("/sw.js", "/").await.unwrap();
    settle(&f).await;
    assert_eq!(f.host.reload_count(), 0);
}

#[tokio::test]
async fn test_worker_messages_are_forwarded() {
    let f = fixture();
    f.lifecycle.register("/sw.js", "/").await.unwrap();
    let mut messages = f.lifecycle.subscribe_messages();

    f.host.emit(HostWorkerEvent::Message(json!({ "type": "CACHE_UPDATED", "urls": ["/app.js"] })));

    let message = timeout(Duration::from_secs(5), messages.recv()).await.unwrap().unwrap();
    assert_eq!(message["type"], "CACHE_UPDATED");
    assert_eq!(message["urls"][0], "/app.js");
}

#[tokio::test]
async fn test_skip_waiting_posts_only_to_waiting_worker() {
    let f = fixture();
    assert!(!f.lifecycle.skip_waiting());

    let registered = f.lifecycle.register("/sw.js", "/").await.unwrap();
    assert!(!f.lifecycle.skip_waiting());

    f.host.set_waiting(registered.registration.id, true);
    assert!(f.lifecycle.skip_waiting());
    assert_eq!(
        f.host.posted_messages(),
        vec![(registered.registration.id, json!({ "type": "SKIP_WAITING" }))]
    );
}

#[tokio::test]
async fn test_unregister_clears_registration() {
    let f = fixture();
    assert!(!f.lifecycle.unregister().await);

    f.lifecycle.register("/sw.js", "/").await.unwrap();
    assert!(f.lifecycle.status().registered);

    assert!(f.lifecycle.unregister().await);
    assert!(f.lifecycle.registration().is_none());
    assert!(!f.lifecycle.status().registered);
    assert!(!f.lifecycle.unregister().await);

    // A fresh registration goes back to the platform
    f.lifecycle.register("/sw.js", "/").await.unwrap();
    assert_eq!(f.host.register_calls(), 2);
}

#[tokio::test]
async fn test_update_requires_registration() {
    let f = fixture();
    assert_eq!(f.lifecycle.update().await.unwrap_err().kind, SwFailureKind::RegistrationFailed);

    f.lifecycle.register("/sw.js", "/").await.unwrap();
    f.lifecycle.update().await.expect("update succeeds");
    assert_eq!(f.host.update_calls(), 1);
}

#[tokio::test]
async fn test_status_tracks_worker_state() {
    let f = fixture();
    let registered = f.lifecycle.register("/sw.js", "/app/").await.unwrap();

    let status = f.lifecycle.status();
    assert!(status.supported);
    assert!(status.registered);
    assert_eq!(status.scope.as_deref(), Some("/app/"));
    assert_eq!(status.state, WorkerState::Installing);

    f.host.set_worker_state(registered.registration.id, WorkerState::Active);
    assert_eq!(f.lifecycle.status().state, WorkerState::Active);

    let json = serde_json::to_value(f.lifecycle.status()).unwrap();
    assert_eq!(json["retryCount"], 0);
    assert_eq!(json["state"], "active");
}
