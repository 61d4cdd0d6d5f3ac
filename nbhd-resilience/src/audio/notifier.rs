//! Audio notifier state machine
//!
//! Per sound name:
//!
//! ```text
//! absent ──load_sound──► loading ──► playable (web-audio / html5)
//!                              └───► synthetic
//! ```
//!
//! `unload`/`clear` return a sound to absent. Overlapping loads of one name
//! are resolved by generation: only the most recently started load binds.

use super::tone::{render_tone, ToneParams, DEFAULT_TONE_SAMPLE_RATE};
use crate::context;
use crate::error_bus::{AudioFailureKind, ErrorBus, ReportedError};
use crate::host::{
    AudioContext, AudioHostError, AudioPlatform, ContextState, FetchRequest, HttpFetcher,
    MediaElementHost, MediaHandle, PcmBuffer,
};
use nbhd_common::config::AudioConfig;
use nbhd_common::events::{ErrorCategory, ResilienceEvent};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Selected output path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    WebAudio,
    Html5,
    Synthetic,
}

#[derive(Clone)]
enum Backend {
    WebAudio(Arc<dyn AudioContext>),
    Html5(Arc<dyn MediaElementHost>),
    Synthetic,
}

impl Backend {
    fn kind(&self) -> BackendKind {
        match self {
            Backend::WebAudio(_) => BackendKind::WebAudio,
            Backend::Html5(_) => BackendKind::Html5,
            Backend::Synthetic => BackendKind::Synthetic,
        }
    }
}

/// The one representation a sound holds
#[derive(Debug, Clone)]
enum SoundBinding {
    Buffer(PcmBuffer),
    Media(MediaHandle),
    Synthetic(ToneParams),
}

enum SoundSlot {
    Loading { generation: u64 },
    Ready { generation: u64, binding: SoundBinding },
}

impl SoundSlot {
    fn generation(&self) -> u64 {
        match self {
            SoundSlot::Loading { generation } | SoundSlot::Ready { generation, .. } => *generation,
        }
    }
}

/// Observable state of one sound name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "backend", rename_all = "kebab-case")]
pub enum SoundState {
    Absent,
    Loading,
    Playable(BackendKind),
    Synthetic,
}

/// Result of [`AudioNotifier::load_sound`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum LoadOutcome {
    /// Bound to a decoded buffer or media element
    Loaded { backend: BackendKind },
    /// Every source failed; bound to the synthetic tone
    Fallback { cause: AudioFailureKind, details: String },
    /// A newer load of the same name started before this one finished
    Superseded,
}

/// Snapshot returned by [`AudioNotifier::status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStatus {
    pub initialized: bool,
    pub backend: Option<BackendKind>,
    pub context_state: Option<ContextState>,
    pub volume: f32,
    pub sounds: BTreeMap<String, SoundState>,
}

/// Loads and plays notification sounds
pub struct AudioNotifier {
    platform: Arc<dyn AudioPlatform>,
    fetcher: Arc<dyn HttpFetcher>,
    bus: Arc<ErrorBus>,
    config: AudioConfig,
    backend: Mutex<Option<Backend>>,
    sounds: Mutex<HashMap<String, SoundSlot>>,
    volume: Mutex<f32>,
    generation: AtomicU64,
}

impl AudioNotifier {
    pub fn new(
        platform: Arc<dyn AudioPlatform>,
        fetcher: Arc<dyn HttpFetcher>,
        bus: Arc<ErrorBus>,
        config: AudioConfig,
    ) -> Self {
        let volume = config.default_volume.clamp(0.0, 1.0);
        Self {
            platform,
            fetcher,
            bus,
            config,
            backend: Mutex::new(None),
            sounds: Mutex::new(HashMap::new()),
            volume: Mutex::new(volume),
            generation: AtomicU64::new(0),
        }
    }

    /// Select the output path; later calls return the first selection
    ///
    /// Web-Audio is tried first unless `prefer_web_audio` is off, in which
    /// case media elements are tried first. A context that cannot be
    /// constructed falls through to the next path. With neither available
    /// every sound is synthesized.
    pub fn initialize(&self) -> BackendKind {
        self.backend().kind()
    }

    fn backend(&self) -> Backend {
        let backend = {
            let mut slot = self.backend.lock().unwrap();
            if let Some(backend) = slot.as_ref() {
                return backend.clone();
            }

            let selected = if self.config.prefer_web_audio {
                self.try_web_audio().or_else(|| self.try_html5())
            } else {
                self.try_html5().or_else(|| self.try_web_audio())
            };
            let backend = selected.unwrap_or(Backend::Synthetic);
            *slot = Some(backend.clone());
            backend
        };

        info!(backend = ?backend.kind(), "Audio notifier initialized");
        if backend.kind() == BackendKind::Synthetic {
            self.bus.report(
                ErrorCategory::Audio,
                Some(ReportedError::audio(
                    AudioFailureKind::Unsupported,
                    "Neither Web Audio nor media elements are available",
                )),
                Some(context! { "phase" => "initialize" }),
            );
        }
        backend
    }

    fn try_web_audio(&self) -> Option<Backend> {
        if !self.platform.has_web_audio() {
            return None;
        }
        match self.platform.create_context() {
            Ok(context) => Some(Backend::WebAudio(context)),
            Err(e) => {
                warn!(error = %e, "Audio context construction failed, falling back");
                None
            }
        }
    }

    fn try_html5(&self) -> Option<Backend> {
        self.platform.media_elements().map(Backend::Html5)
    }

    /// Load `name` from the first usable source in `sources`
    ///
    /// On the Web-Audio path each source is fetched and decoded in order until
    /// one decodes; on the HTML5 path each is handed to a media element until
    /// one can play through. When all fail, the name is bound to its synthetic
    /// tone and the failure is reported as `decoding-error` (a decoder
    /// rejected some source) or `load-failed` (nothing could be fetched).
    pub async fn load_sound<S: AsRef<str>>(&self, name: &str, sources: &[S]) -> LoadOutcome {
        let backend = self.backend();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.sounds
            .lock()
            .unwrap()
            .insert(name.to_string(), SoundSlot::Loading { generation });

        let sources: Vec<&str> = sources.iter().map(|s| s.as_ref()).collect();
        debug!(sound = name, sources = ?sources, generation, "Loading sound");

        let result = match &backend {
            Backend::WebAudio(context) => self.load_buffer(context.as_ref(), &sources).await,
            Backend::Html5(media) => load_media(media.as_ref(), &sources).await,
            Backend::Synthetic => Ok(SoundBinding::Synthetic(ToneParams::for_name(name))),
        };

        let (binding, outcome) = match result {
            Ok(binding) => {
                let outcome = match binding {
                    SoundBinding::Synthetic(_) => LoadOutcome::Fallback {
                        cause: AudioFailureKind::Unsupported,
                        details: "No audio output available".to_string(),
                    },
                    _ => LoadOutcome::Loaded { backend: backend.kind() },
                };
                (binding, outcome)
            }
            Err((cause, details)) => (
                SoundBinding::Synthetic(ToneParams::for_name(name)),
                LoadOutcome::Fallback { cause, details },
            ),
        };

        if !self.bind(name, generation, binding) {
            debug!(sound = name, generation, "Load superseded by a newer load");
            return LoadOutcome::Superseded;
        }

        match &outcome {
            LoadOutcome::Loaded { backend: kind } => {
                info!(sound = name, backend = ?kind, "Sound loaded")
            }
            LoadOutcome::Fallback { cause, details }
                if backend.kind() != BackendKind::Synthetic =>
            {
                warn!(
                    sound = name,
                    cause = %cause,
                    "Sound unavailable, using synthetic tone: {}",
                    details
                );
                self.bus.report(
                    ErrorCategory::Audio,
                    Some(ReportedError::audio(*cause, details.clone())),
                    Some(context! {
                        "sound" => name,
                        "sources" => sources,
                        "backend" => backend.kind(),
                    }),
                );
                self.bus.events().emit_lossy(ResilienceEvent::SoundFallbackActivated {
                    name: name.to_string(),
                    cause: cause.as_str().to_string(),
                    timestamp: nbhd_common::time::now(),
                });
            }
            _ => {}
        }

        outcome
    }

    /// Load every sound listed in configuration
    pub async fn load_configured(&self) -> Vec<(String, LoadOutcome)> {
        let mut outcomes = Vec::with_capacity(self.config.sounds.len());
        for (name, sources) in &self.config.sounds {
            outcomes.push((name.clone(), self.load_sound(name, sources).await));
        }
        outcomes
    }

    async fn load_buffer(
        &self,
        context: &dyn AudioContext,
        sources: &[&str],
    ) -> Result<SoundBinding, (AudioFailureKind, String)> {
        let mut fetch_errors = Vec::new();
        let mut decode_error = None;

        for src in sources {
            let response = match self.fetcher.fetch(FetchRequest::get(*src)).await {
                Ok(response) if response.is_success() => response,
                Ok(response) => {
                    fetch_errors.push(format!("{}: HTTP {}", src, response.status));
                    continue;
                }
                Err(e) => {
                    fetch_errors.push(format!("{}: {}", src, e));
                    continue;
                }
            };

            match context.decode(response.body).await {
                Ok(buffer) => {
                    debug!(src, frames = buffer.frames(), "Decoded sound");
                    return Ok(SoundBinding::Buffer(buffer));
                }
                Err(e) => {
                    debug!(src, error = %e, "Decoder rejected sound source");
                    decode_error = Some(format!("{}: {}", src, e));
                }
            }
        }

        match decode_error {
            Some(details) => Err((AudioFailureKind::DecodingError, details)),
            None if sources.is_empty() => {
                Err((AudioFailureKind::LoadFailed, "No sources given".to_string()))
            }
            None => Err((AudioFailureKind::LoadFailed, fetch_errors.join("; "))),
        }
    }

    /// Store `binding` unless a newer load of `name` started meanwhile
    fn bind(&self, name: &str, generation: u64, binding: SoundBinding) -> bool {
        let mut sounds = self.sounds.lock().unwrap();
        match sounds.get(name) {
            Some(slot) if slot.generation() == generation => {
                sounds.insert(name.to_string(), SoundSlot::Ready { generation, binding });
                true
            }
            _ => false,
        }
    }

    /// Bind `name` to its synthetic tone, superseding any load in flight
    pub fn register_synthetic_fallback(&self, name: &str) -> ToneParams {
        let params = ToneParams::for_name(name);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.sounds.lock().unwrap().insert(
            name.to_string(),
            SoundSlot::Ready { generation, binding: SoundBinding::Synthetic(params) },
        );
        debug!(sound = name, frequency_hz = params.frequency_hz, "Synthetic fallback registered");
        params
    }

    /// Play `name` at the current volume
    ///
    /// Returns `false` for absent or still-loading sounds and for playback
    /// failures (which are reported). When output is blocked pending a user
    /// gesture, waits for the next gesture and retries once.
    pub async fn play_sound(&self, name: &str) -> bool {
        let binding = match self.sounds.lock().unwrap().get(name) {
            Some(SoundSlot::Ready { binding, .. }) => binding.clone(),
            Some(SoundSlot::Loading { .. }) => {
                debug!(sound = name, "Sound still loading");
                return false;
            }
            None => {
                debug!(sound = name, "Sound not loaded");
                return false;
            }
        };

        let backend = self.backend();
        let volume = self.volume();

        let result = match (&binding, &backend) {
            (SoundBinding::Buffer(buffer), Backend::WebAudio(context)) => {
                self.play_in_context(context.as_ref(), buffer, volume).await
            }
            (SoundBinding::Synthetic(params), Backend::WebAudio(context)) => {
                let buffer = render_tone(params, context.sample_rate());
                self.play_in_context(context.as_ref(), &buffer, volume).await
            }
            (SoundBinding::Media(handle), Backend::Html5(media)) => {
                self.play_media(media.as_ref(), handle, volume).await
            }
            (SoundBinding::Synthetic(params), _) => {
                let buffer = render_tone(params, DEFAULT_TONE_SAMPLE_RATE);
                self.platform.tone_sink().play(&buffer, volume)
            }
            (_, _) => Err(AudioHostError::Other("sound bound to an inactive output".to_string())),
        };

        match result {
            Ok(()) => {
                debug!(sound = name, volume, "Sound played");
                true
            }
            Err(e) => {
                warn!(sound = name, error = %e, "Sound playback failed");
                self.bus.report(
                    ErrorCategory::Audio,
                    Some(ReportedError::audio(AudioFailureKind::PlaybackFailed, e.to_string())),
                    Some(context! { "sound" => name, "backend" => backend.kind() }),
                );
                false
            }
        }
    }

    async fn play_in_context(
        &self,
        context: &dyn AudioContext,
        buffer: &PcmBuffer,
        volume: f32,
    ) -> Result<(), AudioHostError> {
        let mut deferred = false;
        if context.state() == ContextState::Suspended {
            self.await_gesture().await;
            context.resume().await?;
            deferred = true;
        }

        match context.play(buffer, volume) {
            Err(AudioHostError::NotAllowed(_)) if !deferred => {
                self.await_gesture().await;
                context.resume().await?;
                context.play(buffer, volume)
            }
            other => other,
        }
    }

    async fn play_media(
        &self,
        media: &dyn MediaElementHost,
        handle: &MediaHandle,
        volume: f32,
    ) -> Result<(), AudioHostError> {
        match media.play(handle, volume).await {
            Err(AudioHostError::NotAllowed(_)) => {
                self.await_gesture().await;
                media.play(handle, volume).await
            }
            other => other,
        }
    }

    async fn await_gesture(&self) {
        debug!("Playback blocked until the next user gesture");
        self.platform.gestures().next_gesture().await;
    }

    /// Forget `name`; returns whether it was known
    pub fn unload(&self, name: &str) -> bool {
        self.sounds.lock().unwrap().remove(name).is_some()
    }

    /// Forget every sound
    pub fn clear(&self) {
        self.sounds.lock().unwrap().clear();
    }

    pub fn sound_state(&self, name: &str) -> SoundState {
        match self.sounds.lock().unwrap().get(name) {
            None => SoundState::Absent,
            Some(slot) => slot_state(slot),
        }
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    /// Set playback volume, clamped to `0.0..=1.0`
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        *self.volume.lock().unwrap() = volume;
    }

    pub fn status(&self) -> AudioStatus {
        let backend = self.backend.lock().unwrap().clone();
        let context_state = match &backend {
            Some(Backend::WebAudio(context)) => Some(context.state()),
            _ => None,
        };
        let sounds = self
            .sounds
            .lock()
            .unwrap()
            .iter()
            .map(|(name, slot)| (name.clone(), slot_state(slot)))
            .collect();

        AudioStatus {
            initialized: backend.is_some(),
            backend: backend.map(|b| b.kind()),
            context_state,
            volume: self.volume(),
            sounds,
        }
    }
}

fn slot_state(slot: &SoundSlot) -> SoundState {
    match slot {
        SoundSlot::Loading { .. } => SoundState::Loading,
        SoundSlot::Ready { binding: SoundBinding::Buffer(_), .. } => {
            SoundState::Playable(BackendKind::WebAudio)
        }
        SoundSlot::Ready { binding: SoundBinding::Media(_), .. } => {
            SoundState::Playable(BackendKind::Html5)
        }
        SoundSlot::Ready { binding: SoundBinding::Synthetic(_), .. } => SoundState::Synthetic,
    }
}

async fn load_media(
    media: &dyn MediaElementHost,
    sources: &[&str],
) -> Result<SoundBinding, (AudioFailureKind, String)> {
    let mut errors = Vec::new();
    for src in sources {
        match media.load(src).await {
            Ok(handle) => return Ok(SoundBinding::Media(handle)),
            Err(e) => errors.push(format!("{}: {}", src, e)),
        }
    }
    if errors.is_empty() {
        errors.push("No sources given".to_string());
    }
    Err((AudioFailureKind::LoadFailed, errors.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sound_state_serializes_tagged() {
        let json = serde_json::to_value(SoundState::Playable(BackendKind::WebAudio)).unwrap();
        assert_eq!(json["state"], "playable");
        assert_eq!(json["backend"], "web-audio");
        let json = serde_json::to_value(SoundState::Absent).unwrap();
        assert_eq!(json["state"], "absent");
    }

    #[test]
    fn test_slot_generation() {
        assert_eq!(SoundSlot::Loading { generation: 4 }.generation(), 4);
        let ready = SoundSlot::Ready {
            generation: 9,
            binding: SoundBinding::Synthetic(ToneParams::for_name("message")),
        };
        assert_eq!(ready.generation(), 9);
        assert_eq!(slot_state(&ready), SoundState::Synthetic);
    }
}
