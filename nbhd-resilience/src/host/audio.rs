//! Audio platform seam
//!
//! Three output paths exist on the platform: a Web-Audio context (decode +
//! buffer playback), HTML5 media elements, and a raw PCM sink used for
//! synthetic tones when neither carries them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Decoded or synthesized audio, interleaved f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Arc<Vec<f32>>,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self { sample_rate, channels, samples: Arc::new(samples) }
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }
}

/// `AudioContext.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Running,
    /// Waiting for a user gesture before output is allowed
    Suspended,
    Closed,
}

/// Platform audio rejection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioHostError {
    /// Decoder rejected the bytes (`EncodingError`)
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Autoplay policy blocked playback (`NotAllowedError`)
    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    /// Media element `error` event
    #[error("media error: {0}")]
    Media(String),

    #[error("{0}")]
    Other(String),
}

/// Web-Audio context
#[async_trait]
pub trait AudioContext: Send + Sync {
    fn state(&self) -> ContextState;

    fn sample_rate(&self) -> u32;

    async fn resume(&self) -> Result<(), AudioHostError>;

    /// `decodeAudioData`
    async fn decode(&self, bytes: Vec<u8>) -> Result<PcmBuffer, AudioHostError>;

    /// Start a one-shot buffer source at `gain`
    fn play(&self, buffer: &PcmBuffer, gain: f32) -> Result<(), AudioHostError>;
}

/// Loaded media element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    pub id: u64,
    pub src: String,
}

/// HTML5 media element factory
#[async_trait]
pub trait MediaElementHost: Send + Sync {
    /// Create an element for `src`; resolves on `canplaythrough`, rejects on `error`
    async fn load(&self, src: &str) -> Result<MediaHandle, AudioHostError>;

    async fn play(&self, handle: &MediaHandle, volume: f32) -> Result<(), AudioHostError>;
}

/// Raw PCM output for synthetic tones
pub trait PcmSink: Send + Sync {
    fn play(&self, buffer: &PcmBuffer, gain: f32) -> Result<(), AudioHostError>;
}

/// Source of user-gesture notifications (click, tap, key)
#[async_trait]
pub trait GestureSource: Send + Sync {
    /// Resolves at the next user gesture
    async fn next_gesture(&self);
}

/// Feature detection and construction of the audio paths
pub trait AudioPlatform: Send + Sync {
    /// The Web-Audio constructor is present
    fn has_web_audio(&self) -> bool;

    fn create_context(&self) -> Result<Arc<dyn AudioContext>, AudioHostError>;

    /// `None` when HTML5 media elements are unavailable
    fn media_elements(&self) -> Option<Arc<dyn MediaElementHost>>;

    /// Output for synthetic tones outside the Web-Audio path
    fn tone_sink(&self) -> Arc<dyn PcmSink>;

    fn gestures(&self) -> Arc<dyn GestureSource>;
}
