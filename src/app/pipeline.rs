use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::app::lifecycle::ModelLifecycleManager;
use crate::domain::audio::{normalize_with_peak, validate};
use crate::domain::{AudioLimits, TranscriptionOutcome, TranscriptionRequest};
use crate::ports::DecodeOptions;

const EVENT_CAPACITY: usize = 64;

/// Notification sent after every transcription request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum TranscriptionEvent {
    Transcribed { text: String },
    /// Nothing to transcribe. Not a failure.
    NoSpeech,
    /// The request failed. `request` holds the original audio so callers
    /// can resubmit it through [`TranscriptionPipeline::retry`].
    Failed {
        outcome: TranscriptionOutcome,
        retryable: bool,
        #[serde(skip)]
        request: Arc<TranscriptionRequest>,
    },
}

/// Validates, normalizes and transcribes audio with the active engine.
///
/// Never changes model status. Requests may overlap each other and an
/// in-flight hot-swap; each one keeps the engine it started with.
pub struct TranscriptionPipeline {
    manager: ModelLifecycleManager,
    limits: AudioLimits,
    decode: DecodeOptions,
    events: broadcast::Sender<TranscriptionEvent>,
}

impl TranscriptionPipeline {
    pub fn new(manager: ModelLifecycleManager, limits: AudioLimits, decode: DecodeOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            manager,
            limits,
            decode,
            events,
        }
    }

    /// Subscribe to transcription notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptionEvent> {
        self.events.subscribe()
    }

    pub async fn transcribe(&self, request: TranscriptionRequest) -> TranscriptionOutcome {
        self.retry(Arc::new(request)).await
    }

    /// Transcribe a request that may already have been submitted.
    pub async fn retry(&self, request: Arc<TranscriptionRequest>) -> TranscriptionOutcome {
        let outcome = self.run(&request).await;
        self.notify(&outcome, request);
        outcome
    }

    async fn run(&self, request: &TranscriptionRequest) -> TranscriptionOutcome {
        let Some(active) = self.manager.active_engine() else {
            debug!("Transcription requested before a model is ready");
            return TranscriptionOutcome::NotReady;
        };

        let stats = match validate(request.samples(), request.sample_rate(), &self.limits) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, samples = request.len(), "Audio rejected");
                return TranscriptionOutcome::ValidationError(e);
            }
        };

        let samples = normalize_with_peak(request.samples(), stats.peak, self.limits.silence_floor);
        let options = self.decode.clone().with_language(request.language_hint());

        debug!(
            tier = %active.tier,
            duration_secs = request.duration_secs(),
            peak = stats.peak,
            language = ?options.language,
            "Transcribing audio"
        );

        let start = Instant::now();
        match active.engine.transcribe(&samples, &options).await {
            Ok(raw) => {
                let outcome = TranscriptionOutcome::from_engine_text(&raw);
                info!(
                    tier = %active.tier,
                    duration_ms = start.elapsed().as_millis() as u64,
                    empty = outcome.text().is_none(),
                    "Transcription finished"
                );
                outcome
            }
            Err(e) => {
                warn!(tier = %active.tier, error = %e, "Transcription failed");
                TranscriptionOutcome::EngineError(e)
            }
        }
    }

    fn notify(&self, outcome: &TranscriptionOutcome, request: Arc<TranscriptionRequest>) {
        let event = match outcome {
            TranscriptionOutcome::Text(text) => TranscriptionEvent::Transcribed { text: text.clone() },
            TranscriptionOutcome::EmptySpeech => TranscriptionEvent::NoSpeech,
            failure => TranscriptionEvent::Failed {
                outcome: failure.clone(),
                retryable: failure.is_retryable(),
                request,
            },
        };
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
