//! Shared fixtures for the resilience integration tests

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use nbhd_common::config::ErrorBusConfig;
use nbhd_common::events::ResilienceEvent;
use nbhd_resilience::error_bus::{ErrorBus, ManualClock};
use nbhd_resilience::host::memory::MEMORY_AUDIO_MAGIC;
use nbhd_resilience::host::FetchResponse;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Bus with a manual clock starting at a fixed instant
pub fn test_bus(max_errors: usize) -> (Arc<ErrorBus>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
    let bus = ErrorBus::new(ErrorBusConfig {
        max_errors,
        notification_cooldown_ms: 300_000,
        is_production: false,
    })
    .with_clock(clock.clone());
    (Arc::new(bus), clock)
}

/// Every event received so far
pub fn drain(rx: &mut broadcast::Receiver<ResilienceEvent>) -> Vec<ResilienceEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Only the events named `event_type`
pub fn drain_type(
    rx: &mut broadcast::Receiver<ResilienceEvent>,
    event_type: &str,
) -> Vec<ResilienceEvent> {
    drain(rx).into_iter().filter(|e| e.event_type() == event_type).collect()
}

pub fn javascript() -> FetchResponse {
    FetchResponse::new(200, Some("application/javascript"), "")
}

pub fn html_page() -> FetchResponse {
    FetchResponse::new(
        200,
        Some("text/html"),
        "<!DOCTYPE html>\n<html><head></head><body></body></html>",
    )
}

/// Bytes the in-memory decoder accepts
pub fn memory_audio() -> FetchResponse {
    let mut body = MEMORY_AUDIO_MAGIC.to_vec();
    body.extend_from_slice(&[10, 200, 30, 180]);
    FetchResponse::new(200, Some("audio/mpeg"), body)
}

pub fn json(body: &serde_json::Value) -> FetchResponse {
    FetchResponse::new(200, Some("application/manifest+json"), body.to_string())
}

pub fn valid_manifest() -> serde_json::Value {
    serde_json::json!({
        "name": "Neighborhood",
        "short_name": "Nbhd",
        "start_url": "/home",
        "display": "standalone",
        "icons": [
            { "src": "/icons/small.png", "sizes": "96x96", "type": "image/png" },
            { "src": "icons/large.png", "sizes": "192x192 512x512", "type": "image/png" }
        ]
    })
}

/// One second of a 440 Hz sine as 16-bit PCM WAV
pub fn sine_wav(sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for i in 0..sample_rate {
            let t = i as f32 / sample_rate as f32;
            let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
            writer.write_sample((sample * i16::MAX as f32) as i16).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}
