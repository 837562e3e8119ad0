use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::domain::{DomainError, EngineError, ModelDescriptor, ModelTier};
use crate::ports::{DecodeOptions, EngineFactory, InferenceEngine};

/// Resolve a thread count, 0 meaning cores - 1.
fn resolve_threads(threads: u32) -> u32 {
    if threads == 0 {
        std::thread::available_parallelism()
            .map(|p| std::cmp::max(1, p.get() as u32 - 1))
            .unwrap_or(1)
    } else {
        threads
    }
}

/// Builds whisper.cpp engines via whisper-rs.
pub struct WhisperCppEngineFactory {
    threads: u32,
}

impl WhisperCppEngineFactory {
    /// `threads` is the default inference thread count; 0 means auto-detect.
    pub fn new(threads: u32) -> Self {
        let threads = resolve_threads(threads);
        info!(threads = threads, "WhisperCppEngineFactory created");
        Self { threads }
    }
}

#[async_trait]
impl EngineFactory for WhisperCppEngineFactory {
    async fn construct(
        &self,
        descriptor: &ModelDescriptor,
        model_path: &Path,
    ) -> Result<Arc<dyn InferenceEngine>, DomainError> {
        if !model_path.exists() {
            return Err(DomainError::ModelNotFound(
                model_path.to_string_lossy().to_string(),
            ));
        }

        info!(tier = %descriptor.tier, path = ?model_path, "Loading whisper model");

        let path_str = model_path.to_string_lossy().to_string();
        let start = Instant::now();

        // Model loading is blocking file I/O plus allocation
        let context = tokio::task::spawn_blocking(move || {
            WhisperContext::new_with_params(&path_str, WhisperContextParameters::default())
                .map_err(|e| DomainError::EngineConstruction(format!("Failed to load model: {}", e)))
        })
        .await
        .map_err(|e| DomainError::EngineConstruction(format!("Task join error: {}", e)))??;

        info!(
            tier = %descriptor.tier,
            load_ms = start.elapsed().as_millis() as u64,
            "Whisper model loaded successfully"
        );

        Ok(Arc::new(WhisperCppEngine {
            tier: descriptor.tier,
            context: Arc::new(context),
            threads: self.threads,
        }))
    }

    fn name(&self) -> &'static str {
        "whisper.cpp"
    }
}

/// One loaded whisper.cpp model.
pub struct WhisperCppEngine {
    tier: ModelTier,
    context: Arc<WhisperContext>,
    threads: u32,
}

#[async_trait]
impl InferenceEngine for WhisperCppEngine {
    async fn transcribe(
        &self,
        samples: &[f32],
        options: &DecodeOptions,
    ) -> Result<String, EngineError> {
        let ctx = Arc::clone(&self.context);
        let samples = samples.to_vec();
        let threads = if options.threads > 0 {
            options.threads
        } else {
            self.threads
        };
        let options = options.clone();

        debug!(
            tier = %self.tier,
            samples = samples.len(),
            threads = threads,
            language = ?options.language,
            "Starting transcription"
        );

        let start = Instant::now();

        // Inference is CPU-bound
        let text = tokio::task::spawn_blocking(move || {
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

            params.set_n_threads(threads as i32);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_single_segment(false);

            // Set language if specified, otherwise auto-detect
            params.set_language(Some(options.language.as_deref().unwrap_or("auto")));

            if options.suppress_non_speech {
                params.set_no_speech_thold(options.no_speech_threshold);
                params.set_entropy_thold(options.entropy_threshold);
                params.set_suppress_non_speech_tokens(true);
            }

            let mut state = ctx
                .create_state()
                .map_err(|e| EngineError::State(format!("Failed to create whisper state: {}", e)))?;

            state
                .full(params, &samples)
                .map_err(|e| EngineError::Inference(format!("Transcription failed: {}", e)))?;

            let num_segments = state
                .full_n_segments()
                .map_err(|e| EngineError::Inference(format!("Failed to get segment count: {}", e)))?;

            let mut text = String::new();
            for i in 0..num_segments {
                let segment = state.full_get_segment_text(i).map_err(|e| {
                    EngineError::Inference(format!("Failed to read segment {}: {}", i, e))
                })?;
                text.push_str(&segment);
            }

            Ok::<String, EngineError>(text)
        })
        .await
        .map_err(|e| EngineError::Task(format!("Task join error: {}", e)))??;

        info!(
            tier = %self.tier,
            text_len = text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Transcription complete"
        );

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_threads() {
        assert_eq!(resolve_threads(4), 4);
        assert!(resolve_threads(0) >= 1);
    }

    #[tokio::test]
    async fn test_missing_model_file() {
        let factory = WhisperCppEngineFactory::new(2);
        let result = factory
            .construct(
                &ModelTier::Tiny.descriptor(),
                Path::new("/nonexistent/ggml-tiny.bin"),
            )
            .await;
        assert!(matches!(result, Err(DomainError::ModelNotFound(_))));
        assert_eq!(factory.name(), "whisper.cpp");
    }
}
