//! Local speech-to-text model lifecycle and transcription.
//!
//! [`ModelLifecycleManager`] downloads, loads and hot-swaps whisper models;
//! [`TranscriptionPipeline`] validates audio and runs it through whichever
//! engine is active. [`AppController`] wires both to the on-disk adapters.

#![forbid(unsafe_code)]

pub mod adapters;
pub mod app;
pub mod domain;
pub mod infrastructure;
pub mod ports;

#[cfg(test)]
mod test_support;

pub use app::{
    AppController, LifecycleEvent, ModelLifecycleManager, TranscriptionEvent,
    TranscriptionPipeline,
};
pub use domain::{
    AppConfig, DomainError, EngineError, ManagerSnapshot, ModelStatus, ModelTier, Progress,
    TranscriptionOutcome, TranscriptionRequest, ValidationError,
};
