//! Notification sounds with graceful degradation
//!
//! Sounds play through the best output the platform offers:
//!
//! ```text
//! Web-Audio context ──► HTML5 media elements ──► synthetic tones
//! ```
//!
//! A sound whose every source fails to load or decode is bound to its
//! synthetic tone instead, so playback never depends on asset delivery.

mod notifier;
mod tone;

pub use notifier::{AudioNotifier, AudioStatus, BackendKind, LoadOutcome, SoundState};
pub use tone::{render_tone, GainEnvelope, ToneParams, Waveform, DEFAULT_TONE_SAMPLE_RATE};
