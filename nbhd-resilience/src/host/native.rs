//! Native host adapters
//!
//! Used by the preflight tool to exercise the resilience components against a
//! real deployment: reqwest stands in for the browser's fetch, symphonia for
//! `decodeAudioData`.

use super::headless::ImmediateGestures;
use super::{
    AudioContext, AudioHostError, AudioPlatform, CacheMode, ContextState, FetchError, FetchMethod,
    FetchRequest, FetchResponse, GestureSource, HttpFetcher, MediaElementHost, PcmBuffer, PcmSink,
};
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use reqwest::Client;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};
use url::Url;

/// Default timeout for preflight requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sample rate reported by the headless decoding context
pub const NATIVE_SAMPLE_RATE: u32 = 44_100;

/// reqwest-backed fetch
///
/// Relative request URLs (`/sw.js`) resolve against `base_url`, the way a
/// browser resolves them against the document.
pub struct ReqwestFetcher {
    /// HTTP client for all requests
    http_client: Client,
    /// Document base for relative URLs
    base_url: Option<Url>,
}

impl ReqwestFetcher {
    pub fn new(base_url: Option<Url>) -> Result<Self, FetchError> {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client, base_url })
    }

    fn resolve(&self, reference: &str) -> Result<Url, FetchError> {
        match Url::parse(reference) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .as_ref()
                .ok_or_else(|| {
                    FetchError::InvalidUrl(format!("relative URL without base: {}", reference))
                })?
                .join(reference)
                .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", reference, e))),
            Err(e) => Err(FetchError::InvalidUrl(format!("{}: {}", reference, e))),
        }
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = self.resolve(&request.url)?;
        debug!(method = ?request.method, %url, "Fetching");

        let mut builder = match request.method {
            FetchMethod::Head => self.http_client.head(url),
            FetchMethod::Get => self.http_client.get(url),
        };
        if request.cache == CacheMode::NoStore {
            builder = builder.header(CACHE_CONTROL, "no-store").header(PRAGMA, "no-cache");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match request.method {
            FetchMethod::Head => Vec::new(),
            FetchMethod::Get => response
                .bytes()
                .await
                .map_err(|e| FetchError::Network(format!("Failed to read body: {}", e)))?
                .to_vec(),
        };

        Ok(FetchResponse { status, content_type, body })
    }
}

/// Decode an in-memory audio file to interleaved f32 samples
pub fn decode_audio_bytes(bytes: Vec<u8>) -> Result<PcmBuffer, AudioHostError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&Hint::new(), mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioHostError::Encoding(format!("Failed to probe format: {}", e)))?;
    let mut format = probed.format;

    let (track_id, codec_params) = {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioHostError::Encoding("No audio track found".to_string()))?;
        (track.id, track.codec_params.clone())
    };

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| AudioHostError::Encoding("Sample rate not found".to_string()))?;
    let channels = codec_params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| AudioHostError::Encoding("Channel count not found".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AudioHostError::Encoding(format!("Failed to create decoder: {}", e)))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioHostError::Encoding(format!("Error reading packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let mut buffer =
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(AudioHostError::Encoding(format!("Decode error: {}", e))),
        }
    }

    if samples.is_empty() {
        return Err(AudioHostError::Encoding("No audio frames decoded".to_string()));
    }

    debug!(sample_rate, channels, samples = samples.len(), "Decoded audio asset");
    Ok(PcmBuffer::new(sample_rate, channels, samples))
}

/// Web-Audio stand-in: symphonia decoding, playback into a PCM sink
pub struct SymphoniaContext {
    sink: Arc<dyn PcmSink>,
}

impl SymphoniaContext {
    pub fn new(sink: Arc<dyn PcmSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl AudioContext for SymphoniaContext {
    fn state(&self) -> ContextState {
        ContextState::Running
    }

    fn sample_rate(&self) -> u32 {
        NATIVE_SAMPLE_RATE
    }

    async fn resume(&self) -> Result<(), AudioHostError> {
        Ok(())
    }

    async fn decode(&self, bytes: Vec<u8>) -> Result<PcmBuffer, AudioHostError> {
        tokio::task::spawn_blocking(move || decode_audio_bytes(bytes))
            .await
            .map_err(|e| AudioHostError::Other(format!("Decoder task failed: {}", e)))?
    }

    fn play(&self, buffer: &PcmBuffer, gain: f32) -> Result<(), AudioHostError> {
        self.sink.play(buffer, gain)
    }
}

/// Audio platform for the native host: symphonia context, no media elements
pub struct NativeAudioPlatform {
    sink: Arc<dyn PcmSink>,
}

impl NativeAudioPlatform {
    pub fn new(sink: Arc<dyn PcmSink>) -> Self {
        Self { sink }
    }
}

impl AudioPlatform for NativeAudioPlatform {
    fn has_web_audio(&self) -> bool {
        true
    }

    fn create_context(&self) -> Result<Arc<dyn AudioContext>, AudioHostError> {
        Ok(Arc::new(SymphoniaContext::new(Arc::clone(&self.sink))))
    }

    fn media_elements(&self) -> Option<Arc<dyn MediaElementHost>> {
        None
    }

    fn tone_sink(&self) -> Arc<dyn PcmSink> {
        Arc::clone(&self.sink)
    }

    fn gestures(&self) -> Arc<dyn GestureSource> {
        Arc::new(ImmediateGestures)
    }
}
