use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample rate expected by whisper models.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Allowed deviation between the buffer's and the engine's sample rate.
const SAMPLE_RATE_TOLERANCE_HZ: f64 = 0.01;

/// Reasons an audio buffer is rejected before reaching the engine.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Audio buffer is empty")]
    EmptyAudio,

    #[error("Invalid sample rate: expected {expected}Hz, got {actual}Hz")]
    InvalidSampleRate { expected: f64, actual: f64 },

    #[error("Audio too short: {duration_secs:.2}s (minimum {min_secs}s)")]
    DurationTooShort { duration_secs: f64, min_secs: f64 },

    #[error("Audio too long: {duration_secs:.2}s (maximum {max_secs}s)")]
    DurationTooLong { duration_secs: f64, max_secs: f64 },

    #[error("Samples out of range: min {min}, max {max}")]
    SamplesOutOfRange { min: f32, max: f32 },
}

/// Constraints a buffer must satisfy before inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioLimits {
    /// Sample rate required by the engine in Hz.
    pub sample_rate: u32,
    /// Shortest accepted recording in seconds.
    pub min_duration_secs: f64,
    /// Longest accepted recording in seconds.
    pub max_duration_secs: f64,
    /// Largest accepted absolute sample value (10% headroom over unit range).
    pub max_amplitude: f32,
    /// Peaks below this are treated as silence and never amplified.
    pub silence_floor: f32,
}

impl Default for AudioLimits {
    fn default() -> Self {
        Self {
            sample_rate: WHISPER_SAMPLE_RATE,
            min_duration_secs: 0.5,
            max_duration_secs: 120.0,
            max_amplitude: 1.1,
            silence_floor: 1e-4,
        }
    }
}

/// Amplitude statistics gathered in one pass over a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioStats {
    pub min: f32,
    pub max: f32,
    /// Largest absolute sample value.
    pub peak: f32,
}

impl AudioStats {
    /// Scan `samples` once. NaN samples count as infinitely loud.
    pub fn scan(samples: &[f32]) -> Self {
        let (min, max) = samples.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY),
            |(min, max), &s| {
                let s = if s.is_nan() { f32::INFINITY } else { s };
                (min.min(s), max.max(s))
            },
        );

        if samples.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                peak: 0.0,
            };
        }

        Self {
            min,
            max,
            peak: min.abs().max(max.abs()),
        }
    }
}

/// Check `samples` against `limits`. The first failing check wins:
/// emptiness, sample rate, duration, amplitude.
///
/// Returns the amplitude statistics so callers can normalize without a
/// second scan.
pub fn validate(
    samples: &[f32],
    sample_rate: f64,
    limits: &AudioLimits,
) -> Result<AudioStats, ValidationError> {
    if samples.is_empty() {
        return Err(ValidationError::EmptyAudio);
    }

    let expected = f64::from(limits.sample_rate);
    if !sample_rate.is_finite() || (sample_rate - expected).abs() > SAMPLE_RATE_TOLERANCE_HZ {
        return Err(ValidationError::InvalidSampleRate {
            expected,
            actual: sample_rate,
        });
    }

    let duration_secs = samples.len() as f64 / sample_rate;
    if duration_secs < limits.min_duration_secs {
        return Err(ValidationError::DurationTooShort {
            duration_secs,
            min_secs: limits.min_duration_secs,
        });
    }
    if duration_secs > limits.max_duration_secs {
        return Err(ValidationError::DurationTooLong {
            duration_secs,
            max_secs: limits.max_duration_secs,
        });
    }

    let stats = AudioStats::scan(samples);
    if stats.min < -limits.max_amplitude || stats.max > limits.max_amplitude {
        return Err(ValidationError::SamplesOutOfRange {
            min: stats.min,
            max: stats.max,
        });
    }

    Ok(stats)
}

/// Rescale so the peak amplitude is exactly 1.0.
///
/// Buffers already within unit range, or quieter than `silence_floor`,
/// are returned untouched.
pub fn normalize(samples: &[f32], silence_floor: f32) -> Cow<'_, [f32]> {
    let peak = AudioStats::scan(samples).peak;
    normalize_with_peak(samples, peak, silence_floor)
}

/// [`normalize`] with a peak computed earlier, e.g. by [`validate`].
pub fn normalize_with_peak(samples: &[f32], peak: f32, silence_floor: f32) -> Cow<'_, [f32]> {
    if !peak.is_finite() || peak <= 1.0 || peak < silence_floor {
        return Cow::Borrowed(samples);
    }
    // Divide rather than multiply by the reciprocal so the peak lands on 1.0 exactly.
    Cow::Owned(samples.iter().map(|&s| s / peak).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tone;

    #[test]
    fn test_rejects_empty_buffer() {
        let limits = AudioLimits::default();
        assert_eq!(
            validate(&[], 16_000.0, &limits),
            Err(ValidationError::EmptyAudio)
        );
    }

    #[test]
    fn test_rejects_wrong_sample_rate() {
        let limits = AudioLimits::default();
        let samples = tone(1.0, 0.5);
        match validate(&samples, 44_100.0, &limits) {
            Err(ValidationError::InvalidSampleRate { expected, actual }) => {
                assert_eq!(expected, 16_000.0);
                assert_eq!(actual, 44_100.0);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(validate(&samples, 16_000.005, &limits).is_ok());
    }

    #[test]
    fn test_rejects_short_and_long_audio() {
        let limits = AudioLimits::default();
        assert!(matches!(
            validate(&tone(0.3, 0.5), 16_000.0, &limits),
            Err(ValidationError::DurationTooShort { .. })
        ));
        assert!(matches!(
            validate(&tone(130.0, 0.5), 16_000.0, &limits),
            Err(ValidationError::DurationTooLong { .. })
        ));
        assert!(validate(&tone(0.5, 0.5), 16_000.0, &limits).is_ok());
        assert!(validate(&tone(120.0, 0.5), 16_000.0, &limits).is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_samples() {
        let limits = AudioLimits::default();
        let mut samples = tone(1.0, 0.5);
        samples[100] = 1.5;
        match validate(&samples, 16_000.0, &limits) {
            Err(ValidationError::SamplesOutOfRange { max, .. }) => assert_eq!(max, 1.5),
            other => panic!("unexpected result: {:?}", other),
        }

        // Within the 10% headroom
        samples[100] = 1.05;
        assert!(validate(&samples, 16_000.0, &limits).is_ok());

        samples[100] = f32::NAN;
        assert!(matches!(
            validate(&samples, 16_000.0, &limits),
            Err(ValidationError::SamplesOutOfRange { .. })
        ));
    }

    #[test]
    fn test_first_failing_check_wins() {
        let limits = AudioLimits::default();
        // Wrong rate and too short: the rate check comes first.
        let samples = vec![2.0f32; 100];
        assert!(matches!(
            validate(&samples, 8_000.0, &limits),
            Err(ValidationError::InvalidSampleRate { .. })
        ));
    }

    #[test]
    fn test_stats_single_pass() {
        let stats = AudioStats::scan(&[0.2, -0.7, 0.4]);
        assert_eq!(stats.min, -0.7);
        assert_eq!(stats.max, 0.4);
        assert_eq!(stats.peak, 0.7);
    }

    #[test]
    fn test_normalize_loud_buffer() {
        let samples = vec![0.5, -2.0, 1.0, 0.25];
        let normalized = normalize(&samples, 1e-4);
        assert!(matches!(normalized, Cow::Owned(_)));
        assert_eq!(normalized.as_ref(), &[0.25, -1.0, 0.5, 0.125]);

        let peak = AudioStats::scan(&normalized).peak;
        assert_eq!(peak, 1.0);
    }

    #[test]
    fn test_normalize_peak_lands_on_one() {
        let samples = vec![0.3, 1.3, -0.9];
        let normalized = normalize(&samples, 1e-4);
        assert_eq!(AudioStats::scan(&normalized).peak, 1.0);
        // Ratios preserved
        assert!((normalized[0] / normalized[2] - samples[0] / samples[2]).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_leaves_quiet_buffers() {
        let samples = vec![0.5, -0.25, 0.1];
        assert!(matches!(normalize(&samples, 1e-4), Cow::Borrowed(_)));

        let silence = vec![0.00001, -0.00001];
        let normalized = normalize(&silence, 1e-4);
        assert_eq!(normalized.as_ref(), silence.as_slice());
    }
}
