//! Scripted adapters shared by the unit tests.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::adapters::{LocalModelStore, MemoryPreferenceStore};
use crate::app::ModelLifecycleManager;
use crate::domain::{DomainError, EngineError, ModelDescriptor, ModelStatus, ModelTier};
use crate::ports::{
    ByteProgressCallback, DecodeOptions, EngineFactory, HttpClient, InferenceEngine, ModelStore,
    PreferenceStore,
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

async fn wait_for_count(counter: &watch::Sender<usize>, at_least: usize) {
    let mut rx = counter.subscribe();
    tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|n| *n >= at_least))
        .await
        .expect("timed out waiting for counter")
        .expect("counter dropped");
}

/// Where a gated transfer pauses.
#[derive(Clone, Copy, PartialEq, Eq)]
enum GatePoint {
    FirstChunk,
    AfterCommit,
}

/// HTTP client that serves a fixed payload in eight chunks.
///
/// A gated client pauses until `release` is called or the transfer is
/// cancelled: after the first chunk, or with `gated_after_commit` once the
/// file is already renamed into place.
pub struct ScriptedHttpClient {
    payload_len: usize,
    gate: Option<(Arc<Semaphore>, GatePoint)>,
    failure: Mutex<Option<String>>,
    urls: Mutex<Vec<String>>,
    started: watch::Sender<usize>,
    committed: watch::Sender<usize>,
}

impl ScriptedHttpClient {
    pub fn new(payload_len: usize) -> Self {
        Self {
            payload_len,
            gate: None,
            failure: Mutex::new(None),
            urls: Mutex::new(Vec::new()),
            started: watch::Sender::new(0),
            committed: watch::Sender::new(0),
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some((Arc::new(Semaphore::new(0)), GatePoint::FirstChunk));
        self
    }

    /// Write and rename the whole file, then hold the transfer open.
    pub fn gated_after_commit(mut self) -> Self {
        self.gate = Some((Arc::new(Semaphore::new(0)), GatePoint::AfterCommit));
        self
    }

    pub fn release(&self) {
        if let Some((gate, _)) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    pub fn succeed(&self) {
        *self.failure.lock() = None;
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub fn download_count(&self) -> usize {
        self.urls.lock().len()
    }

    /// Wait until a transfer has written its first chunk.
    pub async fn wait_until_started(&self) {
        wait_for_count(&self.started, 1).await;
    }

    /// Wait until `transfers` files have been renamed into place.
    pub async fn wait_until_committed(&self, transfers: usize) {
        wait_for_count(&self.committed, transfers).await;
    }

    async fn pass_gate(&self, at: GatePoint, cancel: &CancellationToken) {
        let Some((gate, point)) = &self.gate else {
            return;
        };
        if *point != at {
            return;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            permit = gate.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
            }
        }
    }

    async fn write_payload(
        &self,
        temp_path: &Path,
        progress: Option<&ByteProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<u64, DomainError> {
        let total = self.payload_len;
        let chunk = (total / 8).max(1);
        let mut file = File::create(temp_path)?;
        let mut written = 0usize;

        while written < total {
            let n = chunk.min(total - written);
            file.write_all(&vec![0xA5u8; n])?;
            written += n;

            if let Some(callback) = progress {
                callback(written as u64, total as u64);
            }

            if written == n {
                self.started.send_modify(|count| *count += 1);
                self.pass_gate(GatePoint::FirstChunk, cancel).await;
            }

            if cancel.is_cancelled() {
                return Err(DomainError::HttpRequest("Download cancelled".to_string()));
            }
            tokio::task::yield_now().await;
        }

        file.flush()?;
        Ok(written as u64)
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn download_file(
        &self,
        url: &str,
        path: &Path,
        progress_callback: Option<ByteProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<u64, DomainError> {
        self.urls.lock().push(url.to_string());

        let failure = self.failure.lock().clone();
        if let Some(message) = failure {
            return Err(DomainError::HttpRequest(message));
        }

        let temp_path = path.with_extension("download");
        match self
            .write_payload(&temp_path, progress_callback.as_ref(), &cancel)
            .await
        {
            Ok(written) => {
                fs::rename(&temp_path, path)?;
                self.committed.send_modify(|count| *count += 1);
                // The transfer is complete; a cancel here is left to the caller
                self.pass_gate(GatePoint::AfterCommit, &cancel).await;
                Ok(written)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    fn allowed_domains(&self) -> Vec<String> {
        vec!["huggingface.co".to_string()]
    }
}

/// One call observed by a scripted engine.
#[derive(Debug, Clone)]
pub struct EngineCall {
    pub tier: ModelTier,
    pub samples: usize,
    pub peak: f32,
    pub language: Option<String>,
}

/// Behaviour shared by every engine a scripted factory builds.
#[derive(Default)]
pub struct EngineScript {
    reply: Mutex<Option<String>>,
    failure: Mutex<Option<EngineError>>,
    calls: Mutex<Vec<EngineCall>>,
}

impl EngineScript {
    pub fn reply_with(&self, text: &str) {
        *self.reply.lock() = Some(text.to_string());
    }

    pub fn fail_with(&self, error: EngineError) {
        *self.failure.lock() = Some(error);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }
}

pub struct ScriptedEngine {
    tier: ModelTier,
    script: Arc<EngineScript>,
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn transcribe(
        &self,
        samples: &[f32],
        options: &DecodeOptions,
    ) -> Result<String, EngineError> {
        let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        self.script.calls.lock().push(EngineCall {
            tier: self.tier,
            samples: samples.len(),
            peak,
            language: options.language.clone(),
        });

        if let Some(error) = self.script.failure.lock().clone() {
            return Err(error);
        }

        let reply = self.script.reply.lock().clone();
        Ok(reply.unwrap_or_else(|| format!(" transcribed by {} ", self.tier)))
    }
}

/// Engine factory whose constructions can be held, failed and counted.
pub struct ScriptedEngineFactory {
    script: Arc<EngineScript>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    failing: Mutex<Vec<ModelTier>>,
    constructions: watch::Sender<usize>,
}

impl Default for ScriptedEngineFactory {
    fn default() -> Self {
        Self {
            script: Arc::new(EngineScript::default()),
            gate: Mutex::new(None),
            failing: Mutex::new(Vec::new()),
            constructions: watch::Sender::new(0),
        }
    }
}

impl ScriptedEngineFactory {
    pub fn script(&self) -> Arc<EngineScript> {
        Arc::clone(&self.script)
    }

    /// Make subsequent constructions wait for `release`.
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let one held construction proceed.
    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.add_permits(1);
        }
    }

    pub fn fail_tier(&self, tier: ModelTier) {
        self.failing.lock().push(tier);
    }

    /// Constructions started so far, including held and cancelled ones.
    pub fn constructions(&self) -> usize {
        *self.constructions.borrow()
    }

    pub async fn wait_for_constructions(&self, at_least: usize) {
        wait_for_count(&self.constructions, at_least).await;
    }
}

#[async_trait]
impl EngineFactory for ScriptedEngineFactory {
    async fn construct(
        &self,
        descriptor: &ModelDescriptor,
        model_path: &Path,
    ) -> Result<Arc<dyn InferenceEngine>, DomainError> {
        self.constructions.send_modify(|count| *count += 1);

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| DomainError::EngineConstruction(e.to_string()))?
                .forget();
        }

        if self.failing.lock().contains(&descriptor.tier) {
            return Err(DomainError::EngineConstruction(format!(
                "{} weights are corrupt",
                descriptor.tier
            )));
        }

        if !model_path.is_file() {
            return Err(DomainError::ModelNotFound(
                model_path.to_string_lossy().to_string(),
            ));
        }

        Ok(Arc::new(ScriptedEngine {
            tier: descriptor.tier,
            script: Arc::clone(&self.script),
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// In-memory preferences that count writes.
#[derive(Default)]
pub struct CountingPreferences {
    inner: MemoryPreferenceStore,
    writes: AtomicUsize,
}

impl CountingPreferences {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }
}

impl PreferenceStore for CountingPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), DomainError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), DomainError> {
        self.inner.remove(key)
    }
}

/// A model store in a temp directory wired to scripted adapters.
pub struct Harness {
    _dir: TempDir,
    pub http: Arc<ScriptedHttpClient>,
    pub store: Arc<LocalModelStore>,
    pub factory: Arc<ScriptedEngineFactory>,
    pub preferences: Arc<CountingPreferences>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_http(ScriptedHttpClient::new(64 * 1024))
    }

    pub fn with_http(http: ScriptedHttpClient) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let models_dir = dir.path().join("models");
        Self::build(dir, models_dir, http)
    }

    /// Models directory below a regular file, so nothing can be written.
    pub fn unwritable() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-directory");
        fs::write(&blocker, b"x").unwrap();
        Self::build(dir, blocker.join("models"), ScriptedHttpClient::new(1024))
    }

    fn build(dir: TempDir, models_dir: std::path::PathBuf, http: ScriptedHttpClient) -> Self {
        let http = Arc::new(http);
        let store = Arc::new(LocalModelStore::new(
            models_dir,
            "https://huggingface.co/models",
            http.clone(),
        ));

        Self {
            _dir: dir,
            http,
            store,
            factory: Arc::new(ScriptedEngineFactory::default()),
            preferences: Arc::new(CountingPreferences::default()),
        }
    }

    /// Put a model file for `tier` on disk without downloading.
    pub fn install(&self, tier: ModelTier) {
        let path = self.store.model_path(tier);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![7u8; 2048]).unwrap();
    }

    pub fn manager(&self) -> ModelLifecycleManager {
        ModelLifecycleManager::spawn(
            self.store.clone(),
            self.factory.clone(),
            self.preferences.clone(),
            ModelTier::Base,
        )
    }
}

/// Wait until the manager publishes a status matching `predicate`.
pub async fn wait_for_status(
    manager: &ModelLifecycleManager,
    predicate: impl Fn(&ModelStatus) -> bool,
) -> ModelStatus {
    let mut rx = manager.watch();
    let snapshot = tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|s| predicate(&s.status)))
        .await
        .expect("timed out waiting for status")
        .expect("manager stopped");
    snapshot.status.clone()
}

/// `secs` of a 440 Hz tone at 16 kHz with the given peak amplitude.
pub fn tone(secs: f32, amplitude: f32) -> Vec<f32> {
    let len = (secs * 16_000.0) as usize;
    (0..len)
        .map(|i| amplitude * (i as f32 * 440.0 * std::f32::consts::TAU / 16_000.0).sin())
        .collect()
}
