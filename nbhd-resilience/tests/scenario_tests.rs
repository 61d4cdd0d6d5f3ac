//! End-to-end start-up scenarios
//!
//! Each test drives one component through the in-memory hosts and checks the
//! outcome record, the error collection, and the user-facing events together.

mod helpers;

use chrono::Duration;
use helpers::{drain_type, html_page, javascript, test_bus};
use nbhd_common::config::{AudioConfig, ManifestConfig, ServiceWorkerConfig};
use nbhd_common::events::{ErrorCategory, ResilienceEvent, Severity};
use nbhd_resilience::audio::{render_tone, AudioNotifier, LoadOutcome, ToneParams};
use nbhd_resilience::error_bus::{
    AudioFailureKind, ManifestFailureKind, ReportedError, SwFailureKind,
};
use nbhd_resilience::host::headless::HeadlessDocument;
use nbhd_resilience::host::memory::{MemoryAudioPlatform, MemoryWorkerHost, StaticFetcher};
use nbhd_resilience::host::{DocumentHost, FetchError, FetchMethod, FetchResponse};
use nbhd_resilience::manifest::{DisplayMode, ManifestGuard};
use nbhd_resilience::service_worker::{RegisterOutcome, ServiceWorkerLifecycle};
use std::sync::Arc;

#[tokio::test]
async fn test_sw_script_served_as_html_is_mime_type() {
    let (bus, _) = test_bus(100);
    let mut events = bus.subscribe_events();
    let host = Arc::new(MemoryWorkerHost::new());
    let fetcher = Arc::new(StaticFetcher::new());
    fetcher
        .respond(FetchMethod::Head, "/sw.js", FetchResponse::new(200, Some("text/html"), ""))
        .respond(FetchMethod::Get, "/sw.js", html_page());

    let lifecycle = ServiceWorkerLifecycle::new(
        host.clone(),
        fetcher.clone(),
        bus.clone(),
        ServiceWorkerConfig::default(),
    );
    let result = lifecycle.register("/sw.js", "/").await;

    let outcome = serde_json::to_value(RegisterOutcome::from(&result)).unwrap();
    assert_eq!(outcome["success"], false);
    assert_eq!(outcome["error"], "mime-type");
    assert_eq!(outcome["canRetry"], false);

    // Never handed to the platform, never retried
    assert_eq!(host.register_calls(), 0);
    assert_eq!(fetcher.count(FetchMethod::Head, "/sw.js"), 1);

    let records = bus.errors();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, ErrorCategory::ServiceWorker);
    assert_eq!(records[0].severity, Severity::Medium);
    assert_eq!(records[0].context["phase"], "preflight");
    assert_eq!(records[0].context["canRetry"], false);

    let notices = drain_type(&mut events, "production-error");
    assert_eq!(notices.len(), 1);
    match &notices[0] {
        ResilienceEvent::ProductionError(notice) => {
            assert!(notice.message.contains("offline features"))
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_sw_transient_network_then_success() {
    let (bus, _) = test_bus(100);
    let mut events = bus.subscribe_events();
    let host = Arc::new(MemoryWorkerHost::new());
    let fetcher = Arc::new(StaticFetcher::new());
    fetcher
        .fail(FetchMethod::Head, "/sw.js", FetchError::Network("Failed to fetch".into()))
        .respond(FetchMethod::Head, "/sw.js", javascript());

    let lifecycle = ServiceWorkerLifecycle::new(
        host.clone(),
        fetcher,
        bus.clone(),
        ServiceWorkerConfig::default(),
    );
    let result = lifecycle.register("/sw.js", "/").await;

    let registered = result.as_ref().expect("registration succeeds");
    assert_eq!(registered.scope, "/");
    assert_eq!(registered.retries, 1);
    assert_eq!(host.register_calls(), 1);

    let outcome = serde_json::to_value(RegisterOutcome::from(&result)).unwrap();
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["scope"], "/");

    // The failed attempt is recorded but stays below the notification threshold
    let records = bus.errors();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].severity, Severity::Low);
    assert_eq!(records[0].context["canRetry"], true);
    assert!(drain_type(&mut events, "production-error").is_empty());
    assert_eq!(lifecycle.status().retry_count, 0);
}

#[tokio::test]
async fn test_audio_decoding_failure_falls_back_to_tone() {
    let (bus, _) = test_bus(100);
    let mut events = bus.subscribe_events();
    let platform = Arc::new(MemoryAudioPlatform::full());
    let fetcher = Arc::new(StaticFetcher::new());
    fetcher.respond(
        FetchMethod::Get,
        "/sounds/message.mp3",
        FetchResponse::new(200, Some("audio/mpeg"), b"ID3\x04corrupt".to_vec()),
    );

    let notifier = AudioNotifier::new(
        platform.clone(),
        fetcher,
        bus.clone(),
        AudioConfig::default(),
    );
    notifier.initialize();

    let outcome = notifier.load_sound("message", &["/sounds/message.mp3"]).await;
    assert!(matches!(
        outcome,
        LoadOutcome::Fallback { cause: AudioFailureKind::DecodingError, .. }
    ));

    assert!(notifier.play_sound("message").await);

    let played = platform.context.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].0, render_tone(&ToneParams::for_name("message"), 48_000));
    assert!((played[0].1 - 0.7).abs() < f32::EPSILON);

    let records = bus.errors();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, ErrorCategory::Audio);
    assert_eq!(records[0].severity, Severity::Medium);

    let all = helpers::drain(&mut events);
    let notices: Vec<_> = all.iter().filter(|e| e.event_type() == "production-error").collect();
    assert_eq!(notices.len(), 1);
    match notices[0] {
        ResilienceEvent::ProductionError(notice) => {
            assert!(notice.message.contains("notification sounds"))
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(all.iter().any(|e| matches!(
        e,
        ResilienceEvent::SoundFallbackActivated { name, cause, .. }
            if name == "message" && cause == "decoding-error"
    )));
}

#[tokio::test]
async fn test_manifest_syntax_error_is_repaired() {
    let (bus, _) = test_bus(100);
    let fetcher = Arc::new(StaticFetcher::new());
    fetcher.respond(
        FetchMethod::Get,
        "/manifest.json",
        FetchResponse::new(200, Some("application/json"), "{not json"),
    );
    let document = Arc::new(HeadlessDocument::with_manifest_link("/manifest.json"));

    let guard = ManifestGuard::new(
        fetcher,
        document.clone(),
        bus.clone(),
        ManifestConfig::default(),
    );
    let result = guard.validate().await;
    assert!(!result.is_valid);
    assert_eq!(result.error_type, Some(ManifestFailureKind::SyntaxError));

    let repair = guard.repair().expect("repair");
    assert_eq!(repair.descriptor.name, "Application");
    assert_eq!(repair.descriptor.start_url, "/");
    assert_eq!(repair.descriptor.display, DisplayMode::Standalone);
    assert!(repair.descriptor.icons.iter().any(|icon| icon.sizes.as_deref() == Some("192x192")));

    assert_eq!(document.manifest_link().as_deref(), Some(repair.href.as_str()));
    let (mime, bytes) = document.object(&repair.href).expect("object url is live");
    assert_eq!(mime, "application/manifest+json");
    let injected: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(injected["name"], "Application");
    assert_eq!(injected["display"], "standalone");

    assert_eq!(bus.errors()[0].category, ErrorCategory::Manifest);
    assert_eq!(bus.errors()[0].severity, Severity::Medium);
}

#[tokio::test]
async fn test_repeated_notification_is_deduplicated() {
    let (bus, clock) = test_bus(100);
    let mut events = bus.subscribe_events();
    let syntax =
        || Some(ReportedError::manifest(ManifestFailureKind::SyntaxError, "Unexpected token"));

    bus.report(ErrorCategory::Manifest, syntax(), None);
    clock.advance(Duration::seconds(30));
    bus.report(ErrorCategory::Manifest, syntax(), None);

    assert_eq!(drain_type(&mut events, "production-error").len(), 1);
    let recent = bus.summary().recent;
    assert_eq!(recent.len(), 2);
    assert!(recent[0].timestamp > recent[1].timestamp);
}

#[tokio::test]
async fn test_fifo_eviction() {
    let (bus, clock) = test_bus(3);
    for n in 1..=5 {
        bus.report(
            ErrorCategory::ServiceWorker,
            Some(ReportedError::service_worker(SwFailureKind::Network, format!("e{}", n))),
            None,
        );
        clock.advance(Duration::milliseconds(10));
    }

    let summary = bus.summary();
    assert_eq!(summary.total, 3);
    let kept: Vec<String> = bus
        .errors()
        .iter()
        .map(|r| r.error.as_ref().unwrap().to_string())
        .collect();
    assert_eq!(kept, vec!["network: e3", "network: e4", "network: e5"]);
}
