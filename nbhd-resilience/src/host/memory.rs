//! Scriptable in-memory hosts
//!
//! Deterministic stand-ins for the browser used by the test suites: each
//! records what the components asked of it and answers from a script.

use super::headless::CaptureSink;
use super::{
    AudioContext, AudioHostError, AudioPlatform, ContextState, FetchError, FetchMethod,
    FetchRequest, FetchResponse, GestureSource, HostError, HostWorkerEvent, HttpFetcher,
    MediaElementHost, MediaHandle, PcmBuffer, PcmSink, RegistrationHandle, RegistrationOptions,
    ServiceWorkerHost, WorkerState,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

/// Byte prefix the in-memory decoder accepts as valid audio
pub const MEMORY_AUDIO_MAGIC: &[u8] = b"PCM:";

type Scripted<T, E> = VecDeque<Result<T, E>>;

/// Pop the next scripted answer; the last one repeats forever
fn next_scripted<T: Clone, E: Clone>(queue: &mut Scripted<T, E>) -> Option<Result<T, E>> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Fetcher answering from per-`(method, url)` response queues
///
/// Unrouted requests answer `404`.
#[derive(Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<(FetchMethod, String), Scripted<FetchResponse, FetchError>>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method url`
    pub fn respond(&self, method: FetchMethod, url: &str, response: FetchResponse) -> &Self {
        self.push(method, url, Ok(response))
    }

    /// Queue a transport failure for `method url`
    pub fn fail(&self, method: FetchMethod, url: &str, error: FetchError) -> &Self {
        self.push(method, url, Err(error))
    }

    fn push(
        &self,
        method: FetchMethod,
        url: &str,
        answer: Result<FetchResponse, FetchError>,
    ) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(answer);
        self
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests received for `method url`
    pub fn count(&self, method: FetchMethod, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }
}

#[async_trait]
impl HttpFetcher for StaticFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        let answer = {
            let mut routes = self.routes.lock().unwrap();
            routes
                .get_mut(&(request.method, request.url.clone()))
                .and_then(|queue| next_scripted(queue))
        };
        answer.unwrap_or_else(|| {
            Ok(FetchResponse::new(
                404,
                Some("text/html"),
                "<!DOCTYPE html><title>Not Found</title>",
            ))
        })
    }
}

/// Worker container with scripted registration results
pub struct MemoryWorkerHost {
    has_container: bool,
    has_push_manager: bool,
    register_script: Mutex<Scripted<(), HostError>>,
    register_calls: AtomicU32,
    update_calls: AtomicU32,
    next_id: AtomicU64,
    registrations: Mutex<HashMap<u64, WorkerState>>,
    waiting: Mutex<HashSet<u64>>,
    posted: Mutex<Vec<(u64, serde_json::Value)>>,
    controller: AtomicBool,
    reloads: AtomicU32,
    events: broadcast::Sender<HostWorkerEvent>,
}

impl MemoryWorkerHost {
    /// Fully featured container whose registrations succeed
    pub fn new() -> Self {
        Self::with_features(true, true)
    }

    pub fn with_features(has_container: bool, has_push_manager: bool) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            has_container,
            has_push_manager,
            register_script: Mutex::new(VecDeque::new()),
            register_calls: AtomicU32::new(0),
            update_calls: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            registrations: Mutex::new(HashMap::new()),
            waiting: Mutex::new(HashSet::new()),
            posted: Mutex::new(Vec::new()),
            controller: AtomicBool::new(false),
            reloads: AtomicU32::new(0),
            events,
        }
    }

    /// Queue the outcome of the next platform registration call
    pub fn script_register(&self, outcome: Result<(), HostError>) -> &Self {
        self.register_script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn register_calls(&self) -> u32 {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u32 {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn set_controller(&self, active: bool) {
        self.controller.store(active, Ordering::SeqCst);
    }

    pub fn set_worker_state(&self, registration_id: u64, state: WorkerState) {
        self.registrations.lock().unwrap().insert(registration_id, state);
    }

    pub fn set_waiting(&self, registration_id: u64, waiting: bool) {
        let mut set = self.waiting.lock().unwrap();
        if waiting {
            set.insert(registration_id);
        } else {
            set.remove(&registration_id);
        }
    }

    pub fn posted_messages(&self) -> Vec<(u64, serde_json::Value)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn reload_count(&self) -> u32 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Deliver a container event to subscribers
    pub fn emit(&self, event: HostWorkerEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for MemoryWorkerHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceWorkerHost for MemoryWorkerHost {
    fn has_container(&self) -> bool {
        self.has_container
    }

    fn has_push_manager(&self) -> bool {
        self.has_push_manager
    }

    async fn register(
        &self,
        script_url: &str,
        options: &RegistrationOptions,
    ) -> Result<RegistrationHandle, HostError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = {
            let mut script = self.register_script.lock().unwrap();
            next_scripted(&mut *script)
        };
        if let Some(Err(e)) = scripted {
            return Err(e);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registrations.lock().unwrap().insert(id, WorkerState::Installing);
        Ok(RegistrationHandle {
            id,
            scope: options.scope.clone(),
            script_url: script_url.to_string(),
        })
    }

    async fn update(&self, registration: &RegistrationHandle) -> Result<(), HostError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.registrations.lock().unwrap().contains_key(&registration.id) {
            Ok(())
        } else {
            Err(HostError::new("InvalidStateError", "registration is gone"))
        }
    }

    async fn unregister(&self, registration: &RegistrationHandle) -> Result<bool, HostError> {
        Ok(self.registrations.lock().unwrap().remove(&registration.id).is_some())
    }

    fn worker_state(&self, registration: &RegistrationHandle) -> WorkerState {
        self.registrations
            .lock()
            .unwrap()
            .get(&registration.id)
            .copied()
            .unwrap_or(WorkerState::None)
    }

    fn post_to_waiting(
        &self,
        registration: &RegistrationHandle,
        message: serde_json::Value,
    ) -> Result<bool, HostError> {
        if !self.waiting.lock().unwrap().contains(&registration.id) {
            return Ok(false);
        }
        self.posted.lock().unwrap().push((registration.id, message));
        Ok(true)
    }

    fn has_controller(&self) -> bool {
        self.controller.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<HostWorkerEvent> {
        self.events.subscribe()
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Web-Audio context whose decoder accepts [`MEMORY_AUDIO_MAGIC`]-prefixed bytes
pub struct MemoryContext {
    state: Mutex<ContextState>,
    fail_playback: AtomicBool,
    decode_calls: AtomicUsize,
    played: Mutex<Vec<(PcmBuffer, f32)>>,
}

impl MemoryContext {
    pub fn new(state: ContextState) -> Self {
        Self {
            state: Mutex::new(state),
            fail_playback: AtomicBool::new(false),
            decode_calls: AtomicUsize::new(0),
            played: Mutex::new(Vec::new()),
        }
    }

    pub fn set_state(&self, state: ContextState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn fail_playback(&self, fail: bool) {
        self.fail_playback.store(fail, Ordering::SeqCst);
    }

    pub fn decode_calls(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }

    pub fn played(&self) -> Vec<(PcmBuffer, f32)> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioContext for MemoryContext {
    fn state(&self) -> ContextState {
        *self.state.lock().unwrap()
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    async fn resume(&self) -> Result<(), AudioHostError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            ContextState::Closed => Err(AudioHostError::Other("context is closed".to_string())),
            _ => {
                *state = ContextState::Running;
                Ok(())
            }
        }
    }

    async fn decode(&self, bytes: Vec<u8>) -> Result<PcmBuffer, AudioHostError> {
        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        match bytes.strip_prefix(MEMORY_AUDIO_MAGIC) {
            Some(payload) => Ok(PcmBuffer::new(
                48_000,
                1,
                payload.iter().map(|b| *b as f32 / 255.0).collect(),
            )),
            None => Err(AudioHostError::Encoding("Unable to decode audio data".to_string())),
        }
    }

    fn play(&self, buffer: &PcmBuffer, gain: f32) -> Result<(), AudioHostError> {
        if self.state() != ContextState::Running {
            return Err(AudioHostError::NotAllowed("context is not running".to_string()));
        }
        if self.fail_playback.load(Ordering::SeqCst) {
            return Err(AudioHostError::Other("buffer source failed to start".to_string()));
        }
        self.played.lock().unwrap().push((buffer.clone(), gain));
        Ok(())
    }
}

/// Media elements that can load the sources they were told about
#[derive(Default)]
pub struct MemoryMediaHost {
    loadable: Mutex<HashSet<String>>,
    require_gesture: AtomicBool,
    next_id: AtomicU64,
    played: Mutex<Vec<(MediaHandle, f32)>>,
}

impl MemoryMediaHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, src: &str) -> &Self {
        self.loadable.lock().unwrap().insert(src.to_string());
        self
    }

    /// While set, `play` rejects with `NotAllowed`
    pub fn require_gesture(&self, required: bool) {
        self.require_gesture.store(required, Ordering::SeqCst);
    }

    pub fn played(&self) -> Vec<(MediaHandle, f32)> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaElementHost for MemoryMediaHost {
    async fn load(&self, src: &str) -> Result<MediaHandle, AudioHostError> {
        if !self.loadable.lock().unwrap().contains(src) {
            return Err(AudioHostError::Media(format!("MEDIA_ERR_SRC_NOT_SUPPORTED: {}", src)));
        }
        Ok(MediaHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            src: src.to_string(),
        })
    }

    async fn play(&self, handle: &MediaHandle, volume: f32) -> Result<(), AudioHostError> {
        if self.require_gesture.load(Ordering::SeqCst) {
            return Err(AudioHostError::NotAllowed("play() requires a user gesture".to_string()));
        }
        self.played.lock().unwrap().push((handle.clone(), volume));
        Ok(())
    }
}

/// Gesture source driven by the test
#[derive(Default)]
pub struct ManualGestures {
    notify: Notify,
    waits: AtomicUsize,
}

impl ManualGestures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a click; wakes one pending (or the next) waiter
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Number of times playback waited for a gesture
    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GestureSource for ManualGestures {
    async fn next_gesture(&self) {
        self.waits.fetch_add(1, Ordering::SeqCst);
        self.notify.notified().await;
    }
}

/// Audio platform assembled from the in-memory pieces
pub struct MemoryAudioPlatform {
    pub web_audio: bool,
    pub context_fails: bool,
    pub context: Arc<MemoryContext>,
    pub media: Option<Arc<MemoryMediaHost>>,
    pub sink: Arc<CaptureSink>,
    pub gestures: Arc<ManualGestures>,
}

impl MemoryAudioPlatform {
    /// Web-Audio available, running context, media elements available
    pub fn full() -> Self {
        Self {
            web_audio: true,
            context_fails: false,
            context: Arc::new(MemoryContext::new(ContextState::Running)),
            media: Some(Arc::new(MemoryMediaHost::new())),
            sink: Arc::new(CaptureSink::new()),
            gestures: Arc::new(ManualGestures::new()),
        }
    }

    /// No Web-Audio, media elements only
    pub fn html5_only() -> Self {
        Self { web_audio: false, ..Self::full() }
    }

    /// Neither Web-Audio nor media elements
    pub fn bare() -> Self {
        Self { web_audio: false, media: None, ..Self::full() }
    }
}

impl AudioPlatform for MemoryAudioPlatform {
    fn has_web_audio(&self) -> bool {
        self.web_audio
    }

    fn create_context(&self) -> Result<Arc<dyn AudioContext>, AudioHostError> {
        if self.context_fails {
            return Err(AudioHostError::NotSupported(
                "AudioContext construction failed".to_string(),
            ));
        }
        Ok(Arc::clone(&self.context) as Arc<dyn AudioContext>)
    }

    fn media_elements(&self) -> Option<Arc<dyn MediaElementHost>> {
        self.media.as_ref().map(|m| Arc::clone(m) as Arc<dyn MediaElementHost>)
    }

    fn tone_sink(&self) -> Arc<dyn PcmSink> {
        Arc::clone(&self.sink) as Arc<dyn PcmSink>
    }

    fn gestures(&self) -> Arc<dyn GestureSource> {
        Arc::clone(&self.gestures) as Arc<dyn GestureSource>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_fetcher_last_answer_repeats() {
        let fetcher = StaticFetcher::new();
        fetcher
            .fail(FetchMethod::Head, "/sw.js", FetchError::Network("offline".to_string()))
            .respond(
                FetchMethod::Head,
                "/sw.js",
                FetchResponse::new(200, Some("text/javascript"), ""),
            );

        assert!(fetcher.fetch(FetchRequest::head("/sw.js")).await.is_err());
        assert_eq!(fetcher.fetch(FetchRequest::head("/sw.js")).await.unwrap().status, 200);
        assert_eq!(fetcher.fetch(FetchRequest::head("/sw.js")).await.unwrap().status, 200);
        assert_eq!(fetcher.count(FetchMethod::Head, "/sw.js"), 3);
    }

    #[tokio::test]
    async fn test_static_fetcher_unrouted_is_404() {
        let fetcher = StaticFetcher::new();
        let response = fetcher.fetch(FetchRequest::get("/missing")).await.unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_manual_gesture_permit_is_stored() {
        let gestures = ManualGestures::new();
        gestures.trigger();
        // Permit from the earlier trigger satisfies this wait immediately
        gestures.next_gesture().await;
        assert_eq!(gestures.waits(), 1);
    }
}
