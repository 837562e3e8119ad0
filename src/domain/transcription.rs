use serde::Serialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::audio::ValidationError;
use crate::domain::error::EngineError;

/// Tokens whisper emits instead of text when it hears no speech.
const BLANK_SENTINELS: [&str; 6] = [
    "[blank_audio]",
    "(blank_audio)",
    "[silence]",
    "(silence)",
    "[no speech]",
    "[ silence ]",
];

/// Audio submitted for transcription.
///
/// Samples are 32-bit float mono PCM and are zeroed when the request is
/// dropped.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct TranscriptionRequest {
    samples: Vec<f32>,
    #[zeroize(skip)]
    sample_rate: f64,
    #[zeroize(skip)]
    language_hint: Option<String>,
}

impl TranscriptionRequest {
    pub fn new(samples: Vec<f32>, sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
            language_hint: None,
        }
    }

    /// Set the language hint. `None`, empty strings and `"auto"` mean auto-detect.
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language_hint = language.and_then(|l| normalize_language(&l));
        self
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn language_hint(&self) -> Option<&str> {
        self.language_hint.as_deref()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.samples.len() as f64 / self.sample_rate
        } else {
            0.0
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Lower-cased language code, or `None` for auto-detection.
pub fn normalize_language(code: &str) -> Option<String> {
    let code = code.trim().to_lowercase();
    if code.is_empty() || code == "auto" {
        None
    } else {
        Some(code)
    }
}

/// Result of one transcription request. Always returned, never raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TranscriptionOutcome {
    /// Recognized text, trimmed.
    Text(String),
    /// The engine heard nothing worth transcribing. Not a failure.
    EmptySpeech,
    /// The audio was rejected before reaching the engine.
    ValidationError(ValidationError),
    /// The engine failed; the same audio may be submitted again.
    EngineError(EngineError),
    /// No model is loaded yet.
    NotReady,
}

impl TranscriptionOutcome {
    /// Classify raw engine output.
    pub fn from_engine_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || is_blank_sentinel(trimmed) {
            TranscriptionOutcome::EmptySpeech
        } else {
            TranscriptionOutcome::Text(trimmed.to_string())
        }
    }

    /// Only engine failures are worth retrying with the same audio.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TranscriptionOutcome::EngineError(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TranscriptionOutcome::ValidationError(_)
                | TranscriptionOutcome::EngineError(_)
                | TranscriptionOutcome::NotReady
        )
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            TranscriptionOutcome::Text(text) => Some(text),
            _ => None,
        }
    }
}

fn is_blank_sentinel(text: &str) -> bool {
    let lowered = text.to_lowercase();
    BLANK_SENTINELS.iter().any(|s| lowered == *s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_sentinel_is_empty_speech() {
        for raw in ["[BLANK_AUDIO]", " [blank_audio]\n", "[Blank_Audio]", "(silence)"] {
            assert_eq!(
                TranscriptionOutcome::from_engine_text(raw),
                TranscriptionOutcome::EmptySpeech
            );
        }
    }

    #[test]
    fn test_whitespace_is_empty_speech() {
        assert_eq!(
            TranscriptionOutcome::from_engine_text("  \n\t"),
            TranscriptionOutcome::EmptySpeech
        );
    }

    #[test]
    fn test_text_is_trimmed() {
        let outcome = TranscriptionOutcome::from_engine_text("  Hello world. ");
        assert_eq!(outcome.text(), Some("Hello world."));
        assert!(!outcome.is_failure());
    }

    #[test]
    fn test_only_engine_errors_are_retryable() {
        assert!(TranscriptionOutcome::EngineError(EngineError::Inference("x".into())).is_retryable());
        assert!(!TranscriptionOutcome::NotReady.is_retryable());
        assert!(!TranscriptionOutcome::EmptySpeech.is_retryable());
        assert!(!TranscriptionOutcome::EmptySpeech.is_failure());
        assert!(
            !TranscriptionOutcome::ValidationError(ValidationError::EmptyAudio).is_retryable()
        );
    }

    #[test]
    fn test_language_hint_normalization() {
        let request = TranscriptionRequest::new(vec![0.0; 4], 16_000.0)
            .with_language(Some(" EN ".to_string()));
        assert_eq!(request.language_hint(), Some("en"));

        let auto = TranscriptionRequest::new(vec![0.0; 4], 16_000.0)
            .with_language(Some("auto".to_string()));
        assert_eq!(auto.language_hint(), None);
    }

    #[test]
    fn test_request_duration() {
        let request = TranscriptionRequest::new(vec![0.0; 16_000], 16_000.0);
        assert!((request.duration_secs() - 1.0).abs() < 1e-9);
        assert_eq!(request.len(), 16_000);
    }
}
