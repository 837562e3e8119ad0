use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use crate::adapters::{GuardedHttpClient, JsonPreferenceStore, LocalModelStore};
use crate::app::lifecycle::{LifecycleEvent, ModelLifecycleManager};
use crate::app::pipeline::{TranscriptionEvent, TranscriptionPipeline};
use crate::domain::transcription::normalize_language;
use crate::domain::{
    AppConfig, DomainError, ManagerSnapshot, ModelStatus, ModelTier, TranscriptionOutcome,
    TranscriptionRequest,
};
use crate::infrastructure::{init_logging, StorageAccountant};
use crate::ports::{
    ConfigStore, DecodeOptions, EngineFactory, ModelStore, PreferenceStore, LANGUAGE_KEY,
};

/// Application controller that wires the adapters together and exposes
/// the commands and queries a UI layer needs.
pub struct AppController {
    config: RwLock<AppConfig>,
    config_store: Arc<dyn ConfigStore>,
    http: Arc<GuardedHttpClient>,
    store: Arc<dyn ModelStore>,
    preferences: Arc<dyn PreferenceStore>,
    manager: ModelLifecycleManager,
    pipeline: TranscriptionPipeline,
    storage: StorageAccountant,
    _log_guard: Option<WorkerGuard>,
}

impl AppController {
    /// Initialize with the whisper.cpp backend and the default data directory.
    #[cfg(feature = "whisper")]
    pub fn new() -> Result<Self, DomainError> {
        use crate::adapters::{TomlConfigStore, WhisperCppEngineFactory};

        let config_store = Arc::new(TomlConfigStore::new()?);
        let threads = config_store.load()?.transcription.threads;
        Self::with_engine_factory(config_store, Arc::new(WhisperCppEngineFactory::new(threads)))
    }

    /// Initialize with an explicit config store and engine backend.
    /// Must be called within a tokio runtime.
    pub fn with_engine_factory(
        config_store: Arc<dyn ConfigStore>,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self, DomainError> {
        // Step 1: Load configuration
        let config = config_store.load()?;

        // Step 2: Initialize logging
        let log_guard = init_logging(&config_store.logs_dir(), &config.logging)?;

        info!(version = env!("CARGO_PKG_VERSION"), "Murmur starting up");

        // Step 3: Storage and network
        let http = Arc::new(GuardedHttpClient::new(&config.download)?);
        let models_dir = config
            .storage
            .models_dir
            .clone()
            .unwrap_or_else(|| config_store.models_dir());
        let store: Arc<dyn ModelStore> = Arc::new(LocalModelStore::new(
            models_dir,
            config.download.base_url.clone(),
            http.clone(),
        ));
        let preferences: Arc<dyn PreferenceStore> =
            Arc::new(JsonPreferenceStore::open(config_store.preferences_path()));

        // Step 4: Model lifecycle and transcription
        let manager = ModelLifecycleManager::spawn(
            Arc::clone(&store),
            factory,
            Arc::clone(&preferences),
            config.transcription.default_tier,
        );
        let pipeline = TranscriptionPipeline::new(
            manager.clone(),
            config.audio.clone(),
            DecodeOptions::from(&config.transcription),
        );
        let storage = StorageAccountant::new(Arc::clone(&store));

        info!(
            models_dir = ?store.models_dir(),
            tier = %manager.selected_tier(),
            "AppController initialized"
        );

        Ok(Self {
            config: RwLock::new(config),
            config_store,
            http,
            store,
            preferences,
            manager,
            pipeline,
            storage,
            _log_guard: log_guard,
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Update the configuration.
    ///
    /// Allowed download domains apply immediately; storage, audio and
    /// decoding settings apply on the next start.
    pub fn update_config(&self, config: AppConfig) -> Result<(), DomainError> {
        self.http
            .set_allowed_domains(config.download.allowed_domains.clone());

        // Save to disk
        self.config_store.save(&config)?;

        // Update in-memory config
        *self.config.write() = config;

        info!("Configuration updated");
        Ok(())
    }

    pub async fn select(&self, tier: ModelTier) -> Result<(), DomainError> {
        self.manager.select(tier).await
    }

    pub async fn load(&self) -> Result<(), DomainError> {
        self.manager.load().await
    }

    pub async fn cancel_download(&self) -> Result<(), DomainError> {
        self.manager.cancel_download().await
    }

    pub async fn cancel_switch(&self) -> Result<(), DomainError> {
        self.manager.cancel_switch().await
    }

    pub async fn delete(&self, tier: ModelTier) -> Result<(), DomainError> {
        self.manager.delete(tier).await
    }

    pub fn status(&self) -> ModelStatus {
        self.manager.status()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.manager.snapshot()
    }

    pub fn watch_status(&self) -> watch::Receiver<ManagerSnapshot> {
        self.manager.watch()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.manager.subscribe()
    }

    pub fn subscribe_transcriptions(&self) -> broadcast::Receiver<TranscriptionEvent> {
        self.pipeline.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.manager.is_ready()
    }

    pub fn storage_size(&self, tier: ModelTier) -> u64 {
        self.storage.storage_size(tier)
    }

    pub fn total_storage_used(&self) -> u64 {
        self.storage.total_storage_used()
    }

    pub fn downloaded_tiers(&self) -> Vec<ModelTier> {
        self.storage.downloaded_tiers()
    }

    /// Re-hash an installed model against its install manifest.
    ///
    /// A digest mismatch is reported as `ModelVerification`.
    pub async fn verify_model(&self, tier: ModelTier) -> Result<(), DomainError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.verify(tier))
            .await
            .map_err(|e| DomainError::Io(format!("Verification task failed: {}", e)))?
    }

    /// Saved language code, `None` meaning auto-detect.
    pub fn language(&self) -> Option<String> {
        match self.preferences.get(LANGUAGE_KEY) {
            Some(code) => normalize_language(&code),
            None => normalize_language(&self.config.read().transcription.language),
        }
    }

    /// Save the language used when a request carries no hint.
    /// `"auto"` is stored as-is so it overrides the configured default.
    pub fn set_language(&self, code: &str) -> Result<(), DomainError> {
        let value = normalize_language(code).unwrap_or_else(|| "auto".to_string());
        self.preferences.set(LANGUAGE_KEY, &value)?;
        info!(language = %value, "Language preference saved");
        Ok(())
    }

    /// Transcribe 32-bit float mono samples.
    ///
    /// Without a `language_hint` the saved language is used.
    pub async fn transcribe(
        &self,
        samples: Vec<f32>,
        sample_rate: f64,
        language_hint: Option<String>,
    ) -> TranscriptionOutcome {
        let language = language_hint.or_else(|| self.language());
        let request = TranscriptionRequest::new(samples, sample_rate).with_language(language);
        self.pipeline.transcribe(request).await
    }

    /// Resubmit a request received in a failure notification.
    pub async fn retry(&self, request: Arc<TranscriptionRequest>) -> TranscriptionOutcome {
        self.pipeline.retry(request).await
    }

    pub fn models_dir(&self) -> PathBuf {
        self.store.models_dir()
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        self.config_store.data_dir()
    }

    /// Get the logs directory path.
    pub fn logs_dir(&self) -> PathBuf {
        self.config_store.logs_dir()
    }

    /// Get the config file path.
    pub fn config_path(&self) -> PathBuf {
        self.config_store.config_path()
    }
}
