//! Headless hosts for environments without a browser
//!
//! The preflight tool runs with no worker container and no document; these
//! types give the components something inert but well-behaved to talk to.

use super::{
    AudioHostError, DocumentHost, GestureSource, HostError, HostWorkerEvent, PcmBuffer, PcmSink,
    RegistrationHandle, RegistrationOptions, ServiceWorkerHost, WorkerState,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Worker host with no container: feature detection fails
pub struct HeadlessWorkerHost {
    events: broadcast::Sender<HostWorkerEvent>,
}

impl HeadlessWorkerHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self { events }
    }

    fn unsupported() -> HostError {
        HostError::new("NotSupportedError", "no service worker container in this host")
    }
}

impl Default for HeadlessWorkerHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceWorkerHost for HeadlessWorkerHost {
    fn has_container(&self) -> bool {
        false
    }

    fn has_push_manager(&self) -> bool {
        false
    }

    async fn register(
        &self,
        _script_url: &str,
        _options: &RegistrationOptions,
    ) -> Result<RegistrationHandle, HostError> {
        Err(Self::unsupported())
    }

    async fn update(&self, _registration: &RegistrationHandle) -> Result<(), HostError> {
        Err(Self::unsupported())
    }

    async fn unregister(&self, _registration: &RegistrationHandle) -> Result<bool, HostError> {
        Ok(false)
    }

    fn worker_state(&self, _registration: &RegistrationHandle) -> WorkerState {
        WorkerState::None
    }

    fn post_to_waiting(
        &self,
        _registration: &RegistrationHandle,
        _message: serde_json::Value,
    ) -> Result<bool, HostError> {
        Ok(false)
    }

    fn has_controller(&self) -> bool {
        false
    }

    fn subscribe(&self) -> broadcast::Receiver<HostWorkerEvent> {
        self.events.subscribe()
    }

    fn reload(&self) {
        debug!("Reload requested on headless host; ignoring");
    }
}

/// In-memory document: object URLs and the manifest link
#[derive(Default)]
pub struct HeadlessDocument {
    inner: Mutex<DocumentState>,
}

#[derive(Default)]
struct DocumentState {
    next_object: u64,
    objects: HashMap<String, (String, Vec<u8>)>,
    revoked: Vec<String>,
    manifest_link: Option<String>,
}

impl HeadlessDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Document with an existing `<link rel="manifest">`
    pub fn with_manifest_link(href: &str) -> Self {
        let document = Self::default();
        document.inner.lock().unwrap().manifest_link = Some(href.to_string());
        document
    }

    /// Bytes and media type behind a live object URL
    pub fn object(&self, url: &str) -> Option<(String, Vec<u8>)> {
        self.inner.lock().unwrap().objects.get(url).cloned()
    }

    /// Object URLs revoked so far, oldest first
    pub fn revoked(&self) -> Vec<String> {
        self.inner.lock().unwrap().revoked.clone()
    }
}

impl DocumentHost for HeadlessDocument {
    fn create_object_url(&self, bytes: Vec<u8>, mime_type: &str) -> String {
        let mut state = self.inner.lock().unwrap();
        state.next_object += 1;
        let url = format!("blob:nbhd/{}", state.next_object);
        state.objects.insert(url.clone(), (mime_type.to_string(), bytes));
        url
    }

    fn revoke_object_url(&self, url: &str) {
        let mut state = self.inner.lock().unwrap();
        if state.objects.remove(url).is_some() {
            state.revoked.push(url.to_string());
        }
    }

    fn set_manifest_link(&self, href: &str) {
        self.inner.lock().unwrap().manifest_link = Some(href.to_string());
    }

    fn manifest_link(&self) -> Option<String> {
        self.inner.lock().unwrap().manifest_link.clone()
    }
}

/// Gesture source that is always satisfied
pub struct ImmediateGestures;

#[async_trait]
impl GestureSource for ImmediateGestures {
    async fn next_gesture(&self) {}
}

/// Discards everything played
pub struct NullSink;

impl PcmSink for NullSink {
    fn play(&self, _buffer: &PcmBuffer, _gain: f32) -> Result<(), AudioHostError> {
        Ok(())
    }
}

/// Records every buffer played, with the gain it was played at
#[derive(Default)]
pub struct CaptureSink {
    played: Mutex<Vec<(PcmBuffer, f32)>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<(PcmBuffer, f32)> {
        self.played.lock().unwrap().clone()
    }

    pub fn play_count(&self) -> usize {
        self.played.lock().unwrap().len()
    }
}

impl PcmSink for CaptureSink {
    fn play(&self, buffer: &PcmBuffer, gain: f32) -> Result<(), AudioHostError> {
        self.played.lock().unwrap().push((buffer.clone(), gain));
        Ok(())
    }
}

/// Writes each played buffer to a WAV file (the last one wins)
pub struct WavSink {
    path: PathBuf,
}

impl WavSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PcmSink for WavSink {
    fn play(&self, buffer: &PcmBuffer, gain: f32) -> Result<(), AudioHostError> {
        let spec = hound::WavSpec {
            channels: buffer.channels,
            sample_rate: buffer.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&self.path, spec).map_err(|e| {
            AudioHostError::Other(format!("Failed to create {}: {}", self.path.display(), e))
        })?;
        for sample in buffer.samples.iter() {
            writer
                .write_sample(sample * gain)
                .map_err(|e| AudioHostError::Other(format!("Failed to write sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| AudioHostError::Other(format!("Failed to finalize WAV: {}", e)))?;
        info!("Wrote {} frames to {}", buffer.frames(), self.path.display());
        Ok(())
    }
}
