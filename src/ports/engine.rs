use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::config::TranscriptionConfig;
use crate::domain::{DomainError, EngineError, ModelDescriptor};

/// Decoding parameters passed to the engine on every call.
///
/// Sampling is always greedy with a single candidate so results are
/// reproducible and latency stays low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeOptions {
    /// Target language (ISO 639-1 code, e.g., "en", "fr").
    /// None for auto-detection.
    pub language: Option<String>,
    /// Number of threads to use (0 = engine default).
    pub threads: u32,
    /// Suppress non-speech tokens and apply the thresholds below.
    pub suppress_non_speech: bool,
    pub no_speech_threshold: f32,
    pub entropy_threshold: f32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions::from(&TranscriptionConfig::default())
    }
}

impl From<&TranscriptionConfig> for DecodeOptions {
    fn from(config: &TranscriptionConfig) -> Self {
        Self {
            language: None,
            threads: config.threads,
            suppress_non_speech: config.suppress_non_speech,
            no_speech_threshold: config.no_speech_threshold,
            entropy_threshold: config.entropy_threshold,
        }
    }
}

impl DecodeOptions {
    pub fn with_language(mut self, language: Option<&str>) -> Self {
        self.language = language.map(str::to_string);
        self
    }
}

/// A loaded speech-to-text engine bound to one model.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Transcribe one buffer of 16kHz mono samples in [-1, 1].
    ///
    /// Returns the raw text; classification happens in the pipeline.
    async fn transcribe(&self, samples: &[f32], options: &DecodeOptions)
        -> Result<String, EngineError>;
}

/// Builds engines from model files on disk.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Load the model at `model_path` into a new engine.
    ///
    /// May take seconds for large models.
    async fn construct(
        &self,
        descriptor: &ModelDescriptor,
        model_path: &Path,
    ) -> Result<Arc<dyn InferenceEngine>, DomainError>;

    /// Backend name for logs and diagnostics.
    fn name(&self) -> &'static str;
}
