//! Synthetic notification tones
//!
//! A tone is a single-frequency waveform shaped by a short linear attack and
//! an exponential release. Parameters come from a fixed per-name table so a
//! sound name always produces the same tone.

use crate::host::PcmBuffer;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Sample rate used when no output context dictates one
pub const DEFAULT_TONE_SAMPLE_RATE: u32 = 44_100;

/// Oscillator shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    /// v(p) = sin(2πp)
    Sine,
    /// v(p) = 1 - 4|p - 0.5|, shifted to start at zero
    Triangle,
    /// v(p) = +1 for p < 0.5, -1 otherwise
    Square,
    /// v(p) = 2p - 1, shifted to start at zero
    Sawtooth,
}

impl Waveform {
    /// Sample value at `phase` (cycles, 0.0..1.0)
    pub fn sample(&self, phase: f32) -> f32 {
        let p = phase.rem_euclid(1.0);
        match self {
            Waveform::Sine => (2.0 * PI * p).sin(),
            Waveform::Triangle => {
                let q = (p + 0.25).rem_euclid(1.0);
                1.0 - 4.0 * (q - 0.5).abs()
            }
            Waveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => {
                let q = (p + 0.5).rem_euclid(1.0);
                2.0 * q - 1.0
            }
        }
    }
}

/// Gain over the life of a tone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GainEnvelope {
    /// Gain reached at the end of the attack
    pub peak: f32,
    /// Linear ramp from silence to `peak`
    pub attack_ms: u32,
    /// Time constants elapsed over the release; 5.0 ends below 1% of peak
    pub release_constants: f32,
}

impl Default for GainEnvelope {
    fn default() -> Self {
        Self { peak: 0.8, attack_ms: 10, release_constants: 5.0 }
    }
}

impl GainEnvelope {
    /// Gain at `t_ms` into a tone lasting `duration_ms`
    pub fn gain_at(&self, t_ms: f32, duration_ms: u32) -> f32 {
        let attack = self.attack_ms.min(duration_ms) as f32;
        if t_ms < 0.0 || t_ms >= duration_ms as f32 {
            return 0.0;
        }
        if t_ms < attack {
            return self.peak * t_ms / attack;
        }
        let release = duration_ms as f32 - attack;
        if release <= 0.0 {
            return self.peak;
        }
        let position = (t_ms - attack) / release;
        self.peak * (-self.release_constants * position).exp()
    }
}

/// Synthetic sound parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToneParams {
    pub waveform: Waveform,
    pub frequency_hz: f32,
    pub duration_ms: u32,
    pub gain_envelope: GainEnvelope,
}

impl ToneParams {
    fn new(waveform: Waveform, frequency_hz: f32, duration_ms: u32, peak: f32) -> Self {
        Self {
            waveform,
            frequency_hz,
            duration_ms,
            gain_envelope: GainEnvelope { peak, ..GainEnvelope::default() },
        }
    }

    /// Deterministic parameters for a sound name
    ///
    /// Well-known names have hand-picked tones; any other name maps to a sine
    /// between 440 and 880 Hz chosen by an FNV-1a hash of the name.
    pub fn for_name(name: &str) -> Self {
        match name {
            "message" => Self::new(Waveform::Sine, 880.0, 150, 0.8),
            "notification" => Self::new(Waveform::Sine, 660.0, 250, 0.8),
            "alert" => Self::new(Waveform::Square, 440.0, 300, 0.5),
            "mention" => Self::new(Waveform::Triangle, 1046.5, 180, 0.8),
            "success" => Self::new(Waveform::Sine, 1318.5, 200, 0.7),
            "error" => Self::new(Waveform::Sawtooth, 220.0, 350, 0.5),
            other => {
                let offset = fnv1a(other.as_bytes()) % 441;
                Self::new(Waveform::Sine, 440.0 + offset as f32, 200, 0.7)
            }
        }
    }
}

/// 32-bit FNV-1a
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5_u32, |hash, b| (hash ^ *b as u32).wrapping_mul(0x0100_0193))
}

/// Render a mono tone at `sample_rate`
pub fn render_tone(params: &ToneParams, sample_rate: u32) -> PcmBuffer {
    let frames = (params.duration_ms as u64 * sample_rate as u64 / 1000) as usize;
    let rate = sample_rate.max(1) as f32;

    let samples = (0..frames)
        .map(|i| {
            let t = i as f32 / rate;
            let gain = params.gain_envelope.gain_at(t * 1000.0, params.duration_ms);
            params.waveform.sample(params.frequency_hz * t) * gain
        })
        .collect();

    PcmBuffer::new(sample_rate, 1, samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveforms_start_at_zero_or_edge() {
        assert!(Waveform::Sine.sample(0.0).abs() < 1e-6);
        assert!(Waveform::Triangle.sample(0.0).abs() < 1e-6);
        assert!(Waveform::Sawtooth.sample(0.0).abs() < 1e-6);
        assert_eq!(Waveform::Square.sample(0.25), 1.0);
        assert_eq!(Waveform::Square.sample(0.75), -1.0);
        assert!((Waveform::Sine.sample(0.25) - 1.0).abs() < 1e-6);
        assert!((Waveform::Triangle.sample(0.25) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = GainEnvelope::default();
        assert_eq!(envelope.gain_at(0.0, 200), 0.0);
        assert!((envelope.gain_at(5.0, 200) - 0.4).abs() < 1e-6);
        assert!((envelope.gain_at(10.0, 200) - 0.8).abs() < 1e-6);
        assert!(envelope.gain_at(150.0, 200) < envelope.gain_at(50.0, 200));
        assert!(envelope.gain_at(199.9, 200) < 0.8 * 0.01);
        assert_eq!(envelope.gain_at(200.0, 200), 0.0);
    }

    #[test]
    fn test_for_name_is_deterministic() {
        assert_eq!(ToneParams::for_name("message"), ToneParams::for_name("message"));
        assert_eq!(ToneParams::for_name("doorbell"), ToneParams::for_name("doorbell"));
        assert_ne!(
            ToneParams::for_name("message").frequency_hz,
            ToneParams::for_name("alert").frequency_hz
        );

        let custom = ToneParams::for_name("doorbell");
        assert!((440.0..=880.0).contains(&custom.frequency_hz));
        assert_eq!(custom.waveform, Waveform::Sine);
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
    }

    #[test]
    fn test_render_tone_length_and_bounds() {
        let params = ToneParams::for_name("message");
        let buffer = render_tone(&params, 48_000);

        assert_eq!(buffer.channels, 1);
        assert_eq!(buffer.frames(), 7_200);
        assert_eq!(buffer.duration_ms(), 150);
        assert!(buffer.peak() <= params.gain_envelope.peak + 1e-6);
        assert!(buffer.peak() > 0.5);
        assert_eq!(buffer.samples[0], 0.0);
    }

    #[test]
    fn test_params_serialize_camel_case() {
        let json = serde_json::to_value(ToneParams::for_name("alert")).unwrap();
        assert_eq!(json["waveform"], "square");
        assert_eq!(json["durationMs"], 300);
        assert_eq!(json["gainEnvelope"]["attackMs"], 10);
    }
}
