use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::audio::AudioLimits;
use crate::domain::model::{ModelTier, DEFAULT_MODEL_BASE_URL};

/// Where model files live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides `<data dir>/models` when set.
    pub models_dir: Option<PathBuf>,
}

/// Model download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Base URL the model files are fetched from.
    pub base_url: String,
    /// Hosts downloads may reach (subdomains included).
    pub allowed_domains: Vec<String>,
    /// Upper bound for a single model download.
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            allowed_domains: Self::default_allowed_domains(),
            timeout_secs: 3600,
        }
    }
}

impl DownloadConfig {
    /// Default allowed domains for model downloads.
    pub fn default_allowed_domains() -> Vec<String> {
        vec![
            "huggingface.co".to_string(),
            "cdn-lfs.huggingface.co".to_string(),
            "cdn-lfs-us-1.huggingface.co".to_string(),
        ]
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
    /// Maximum number of log files to keep.
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            max_files: 7,
        }
    }
}

/// Transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Tier used when no preference has been saved yet.
    pub default_tier: ModelTier,
    /// Language code (e.g., "en", "fr", "auto").
    pub language: String,
    /// Inference threads (0 = auto).
    pub threads: u32,
    /// Skip non-speech tokens and apply the thresholds below.
    pub suppress_non_speech: bool,
    /// No-speech probability threshold (0.0-1.0).
    /// Default 0.6 from whisper.cpp recommendations.
    pub no_speech_threshold: f32,
    /// Entropy threshold for detecting non-speech.
    /// Default 2.4 from whisper.cpp recommendations.
    pub entropy_threshold: f32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            default_tier: ModelTier::Base,
            language: "auto".to_string(),
            threads: 0,
            suppress_non_speech: true,
            // Defaults from whisper.cpp:
            // https://github.com/ggerganov/whisper.cpp/blob/master/whisper.h
            no_speech_threshold: 0.6,
            entropy_threshold: 2.4,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub download: DownloadConfig,
    pub transcription: TranscriptionConfig,
    pub audio: AudioLimits,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }
}
