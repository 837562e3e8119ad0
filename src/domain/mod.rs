pub mod audio;
pub mod config;
pub mod error;
pub mod model;
pub mod transcription;

pub use audio::{AudioLimits, AudioStats, ValidationError, WHISPER_SAMPLE_RATE};
pub use config::AppConfig;
pub use error::{DomainError, EngineError};
pub use model::{
    DownloadProgress, InstallManifest, ManagerSnapshot, ModelDescriptor, ModelStatus, ModelTier,
    Progress,
};
pub use transcription::{TranscriptionOutcome, TranscriptionRequest};
