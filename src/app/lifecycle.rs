use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    DomainError, DownloadProgress, ManagerSnapshot, ModelStatus, ModelTier, Progress,
};
use crate::ports::{
    EngineFactory, InferenceEngine, ModelStore, PreferenceStore, ProgressCallback,
    SELECTED_TIER_KEY,
};

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

type Reply = oneshot::Sender<Result<(), DomainError>>;

/// Events emitted by the lifecycle manager.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum LifecycleEvent {
    /// Model status changed.
    StatusChanged { from: ModelStatus, to: ModelStatus },
    /// An engine was promoted to active.
    ModelReady {
        tier: ModelTier,
        replaced: Option<ModelTier>,
    },
    /// A hot-swap failed; the previous engine is still active.
    SwitchFailed { target: ModelTier, message: String },
    /// Stored data for a tier was removed.
    ModelDeleted { tier: ModelTier },
}

/// Engine currently serving transcription requests.
#[derive(Clone)]
pub(crate) struct ActiveEngine {
    pub tier: ModelTier,
    pub engine: Arc<dyn InferenceEngine>,
}

/// Messages processed by the manager task, one at a time.
enum Command {
    Select { tier: ModelTier, reply: Reply },
    Load { reply: Reply },
    CancelSwitch { reply: Reply },
    CancelDownload { reply: Reply },
    Delete { tier: ModelTier, reply: Reply },
    Progress { operation: u64, progress: Progress },
    Constructing { operation: u64 },
    Finished {
        operation: u64,
        result: Result<Arc<dyn InferenceEngine>, DomainError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    /// No engine is active; the selected tier is being loaded.
    Load,
    /// An engine is active and keeps serving while the target loads.
    Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Downloading,
    Constructing,
}

/// The single in-flight download/construction. At most one exists.
struct PendingOperation {
    id: u64,
    tier: ModelTier,
    kind: OperationKind,
    phase: Phase,
    progress: Progress,
    /// Whether the task fetches the model file before constructing.
    downloads: bool,
    cancel: CancellationToken,
    waiters: Vec<Reply>,
}

/// A cancelled operation whose task has not reported back yet.
///
/// Its task may still be writing to or cleaning up the tier directory, so
/// later operations on the same tier wait until `settled` is dropped.
struct Retiring {
    tier: ModelTier,
    /// Drop the tier's files once the task stops.
    discard: bool,
    settled: watch::Sender<()>,
}

/// Owns the active inference engine and every model state transition.
///
/// All transitions run on one task fed by a command channel, so they are
/// totally ordered. Downloads and engine construction run on separate
/// tasks and report back through the same channel; results of operations
/// that were cancelled or superseded in the meantime are discarded.
///
/// While a hot-swap is in flight the previous engine keeps serving
/// requests, and a failed or cancelled swap leaves it in place.
#[derive(Clone)]
pub struct ModelLifecycleManager {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<ManagerSnapshot>,
    events: broadcast::Sender<LifecycleEvent>,
    active: Arc<RwLock<Option<ActiveEngine>>>,
}

impl ModelLifecycleManager {
    /// Start the manager task. Must be called within a tokio runtime.
    ///
    /// The selected tier is restored from `preferences`, falling back to
    /// `default_tier`. No model is loaded until `load` or `select` is called.
    pub fn spawn(
        store: Arc<dyn ModelStore>,
        factory: Arc<dyn EngineFactory>,
        preferences: Arc<dyn PreferenceStore>,
        default_tier: ModelTier,
    ) -> Self {
        let selected = preferences
            .get(SELECTED_TIER_KEY)
            .and_then(|value| match value.parse::<ModelTier>() {
                Ok(tier) => Some(tier),
                Err(_) => {
                    warn!(value = %value, "Ignoring unknown saved model tier");
                    None
                }
            })
            .unwrap_or(default_tier);

        let status = if store.is_downloaded(selected) {
            ModelStatus::Downloaded
        } else {
            ModelStatus::NotDownloaded
        };

        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshot_tx, snapshot) = watch::channel(ManagerSnapshot {
            status: status.clone(),
            selected_tier: selected,
            active_tier: None,
        });
        let active = Arc::new(RwLock::new(None));

        info!(
            tier = %selected,
            status = ?status,
            backend = factory.name(),
            "Model lifecycle manager started"
        );

        let actor = LifecycleActor {
            store,
            factory,
            preferences,
            selected,
            active: Arc::clone(&active),
            pending: None,
            retiring: HashMap::new(),
            failure: None,
            next_operation: 1,
            commands: commands.downgrade(),
            snapshot: snapshot_tx,
            events: events.clone(),
            outbox: Vec::new(),
        };
        tokio::spawn(actor.run(receiver));

        Self {
            commands,
            snapshot,
            events,
            active,
        }
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), DomainError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| DomainError::ManagerUnavailable)?;
        response
            .await
            .unwrap_or(Err(DomainError::ManagerUnavailable))
    }

    /// Make `tier` the active model.
    ///
    /// Resolves once the tier is serving requests. A no-op when it already
    /// is; joins the pending operation when one for `tier` is in flight;
    /// otherwise cancels any other pending operation and either loads
    /// directly (nothing active) or hot-swaps.
    pub async fn select(&self, tier: ModelTier) -> Result<(), DomainError> {
        self.request(|reply| Command::Select { tier, reply }).await
    }

    /// Download if needed and load the selected tier.
    ///
    /// A no-op when a model is ready; joins the in-flight operation when
    /// one is downloading or loading.
    pub async fn load(&self) -> Result<(), DomainError> {
        self.request(|reply| Command::Load { reply }).await
    }

    /// Abandon a hot-swap, keeping the current engine.
    pub async fn cancel_switch(&self) -> Result<(), DomainError> {
        self.request(|reply| Command::CancelSwitch { reply }).await
    }

    /// Abort a first-time download and discard partial data.
    pub async fn cancel_download(&self) -> Result<(), DomainError> {
        self.request(|reply| Command::CancelDownload { reply }).await
    }

    /// Remove stored data for `tier`, unloading it first if it is active.
    pub async fn delete(&self, tier: ModelTier) -> Result<(), DomainError> {
        self.request(|reply| Command::Delete { tier, reply }).await
    }

    pub fn status(&self) -> ModelStatus {
        self.snapshot.borrow().status.clone()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<ManagerSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// True while any engine can serve requests, including during a hot-swap.
    pub fn is_ready(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn active_tier(&self) -> Option<ModelTier> {
        self.active.read().as_ref().map(|a| a.tier)
    }

    pub fn selected_tier(&self) -> ModelTier {
        self.snapshot.borrow().selected_tier
    }

    /// Handle to the active engine for one request.
    pub(crate) fn active_engine(&self) -> Option<ActiveEngine> {
        self.active.read().clone()
    }
}

/// State owned by the manager task.
struct LifecycleActor {
    store: Arc<dyn ModelStore>,
    factory: Arc<dyn EngineFactory>,
    preferences: Arc<dyn PreferenceStore>,
    /// Tier the status refers to. Equals the active tier when one exists.
    selected: ModelTier,
    active: Arc<RwLock<Option<ActiveEngine>>>,
    pending: Option<PendingOperation>,
    /// Cancelled operations keyed by id.
    retiring: HashMap<u64, Retiring>,
    /// Message of the last failed direct load.
    failure: Option<String>,
    next_operation: u64,
    /// Weak so that dropping every manager handle stops the task.
    commands: mpsc::WeakSender<Command>,
    snapshot: watch::Sender<ManagerSnapshot>,
    events: broadcast::Sender<LifecycleEvent>,
    /// Replies held back until the new snapshot is published.
    outbox: Vec<(Reply, Result<(), DomainError>)>,
}

impl LifecycleActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
            self.publish();
            for (reply, result) in self.outbox.drain(..) {
                let _ = reply.send(result);
            }
        }

        if let Some(op) = self.pending.take() {
            op.cancel.cancel();
        }
        debug!("Model lifecycle manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Select { tier, reply } => self.select(tier, reply),
            Command::Load { reply } => self.load(reply),
            Command::CancelSwitch { reply } => {
                let result = self.cancel_switch();
                self.respond(reply, result);
            }
            Command::CancelDownload { reply } => {
                let result = self.cancel_download();
                self.respond(reply, result);
            }
            Command::Delete { tier, reply } => {
                let result = self.delete(tier);
                self.respond(reply, result);
            }
            Command::Progress {
                operation,
                progress,
            } => self.progress(operation, progress),
            Command::Constructing { operation } => self.constructing(operation),
            Command::Finished { operation, result } => self.finish(operation, result),
        }
    }

    fn respond(&mut self, reply: Reply, result: Result<(), DomainError>) {
        self.outbox.push((reply, result));
    }

    fn resolve(&mut self, op: PendingOperation, result: Result<(), DomainError>) {
        for waiter in op.waiters {
            self.outbox.push((waiter, result.clone()));
        }
    }

    fn active_tier(&self) -> Option<ModelTier> {
        self.active.read().as_ref().map(|a| a.tier)
    }

    fn select(&mut self, tier: ModelTier, reply: Reply) {
        if let Some(op) = self.pending.as_mut() {
            if op.tier == tier {
                debug!(tier = %tier, operation = op.id, "Joining pending operation");
                op.waiters.push(reply);
                return;
            }
        }

        // Latest request wins
        self.abort_pending("superseded by a newer selection");

        match self.active_tier() {
            Some(active) if active == tier => {
                debug!(tier = %tier, "Model already active");
                self.respond(reply, Ok(()));
            }
            Some(active) => {
                info!(from = %active, to = %tier, "Starting model hot-swap");
                self.start(OperationKind::Switch, tier, reply);
            }
            None => {
                self.selected = tier;
                self.failure = None;
                self.start(OperationKind::Load, tier, reply);
            }
        }
    }

    fn load(&mut self, reply: Reply) {
        if let Some(op) = self.pending.as_mut() {
            debug!(tier = %op.tier, operation = op.id, "Load already in progress");
            op.waiters.push(reply);
            return;
        }

        if self.active_tier().is_some() {
            self.respond(reply, Ok(()));
            return;
        }

        self.failure = None;
        self.start(OperationKind::Load, self.selected, reply);
    }

    fn start(&mut self, kind: OperationKind, tier: ModelTier, reply: Reply) {
        if let Err(e) = self.store.ensure_writable() {
            warn!(tier = %tier, error = %e, "Model storage is not writable");
            self.fail(kind, tier, &e);
            self.respond(reply, Err(e));
            return;
        }

        let Some(commands) = self.commands.upgrade() else {
            self.respond(reply, Err(DomainError::ManagerUnavailable));
            return;
        };

        let id = self.next_operation;
        self.next_operation += 1;

        let cancel = CancellationToken::new();
        let predecessors: Vec<watch::Receiver<()>> = self
            .retiring
            .values()
            .filter(|r| r.tier == tier)
            .map(|r| r.settled.subscribe())
            .collect();
        let needs_download = !self.store.is_downloaded(tier) || self.discarding(tier);
        let (phase, progress) = if needs_download {
            (Phase::Downloading, Progress::Fraction(0.0))
        } else {
            (Phase::Constructing, Progress::Indeterminate)
        };

        info!(
            tier = %tier,
            operation = id,
            kind = ?kind,
            needs_download = needs_download,
            waits_for = predecessors.len(),
            "Starting model operation"
        );

        tokio::spawn(run_operation(
            id,
            tier,
            needs_download,
            predecessors,
            Arc::clone(&self.store),
            Arc::clone(&self.factory),
            cancel.clone(),
            commands,
        ));

        self.pending = Some(PendingOperation {
            id,
            tier,
            kind,
            phase,
            progress,
            downloads: needs_download,
            cancel,
            waiters: vec![reply],
        });
    }

    /// Record a failed operation. A failed hot-swap leaves the status on
    /// the still-active engine; only direct loads end in `Error`.
    fn fail(&mut self, kind: OperationKind, tier: ModelTier, error: &DomainError) {
        match kind {
            OperationKind::Load => self.failure = Some(error.to_string()),
            OperationKind::Switch => {
                let _ = self.events.send(LifecycleEvent::SwitchFailed {
                    target: tier,
                    message: error.to_string(),
                });
            }
        }
    }

    /// Cancel the pending operation and resolve its waiters.
    ///
    /// An unfinished download is discarded: the tier reads as not
    /// downloaded from here on, and its files are removed once the
    /// cancelled task has stopped.
    fn abort_pending(&mut self, reason: &str) {
        if let Some(op) = self.pending.take() {
            info!(tier = %op.tier, operation = op.id, reason = reason, "Cancelling model operation");
            op.cancel.cancel();
            let tier = op.tier;
            let (settled, _) = watch::channel(());
            self.retiring.insert(
                op.id,
                Retiring {
                    tier,
                    discard: op.downloads && op.phase == Phase::Downloading,
                    settled,
                },
            );
            self.resolve(op, Err(DomainError::Cancelled { tier }));
        }
    }

    fn discarding(&self, tier: ModelTier) -> bool {
        self.retiring.values().any(|r| r.tier == tier && r.discard)
    }

    /// The task of a cancelled operation has stopped. Operations queued
    /// behind it start once `settled` is dropped here.
    fn settle(&mut self, operation: u64, result: &Result<Arc<dyn InferenceEngine>, DomainError>) {
        let Some(retired) = self.retiring.remove(&operation) else {
            return;
        };

        match result {
            Err(e) if e.is_cancellation() => {
                debug!(tier = %retired.tier, operation = operation, "Cancelled operation stopped")
            }
            Ok(_) => {
                debug!(tier = %retired.tier, operation = operation, "Dropping engine of a cancelled operation")
            }
            Err(e) => {
                debug!(tier = %retired.tier, operation = operation, error = %e, "Cancelled operation failed")
            }
        }

        if retired.discard && self.active_tier() != Some(retired.tier) {
            match self.store.delete(retired.tier) {
                Ok(true) => info!(tier = %retired.tier, "Discarded data of a cancelled download"),
                Ok(false) => {}
                Err(e) => {
                    warn!(tier = %retired.tier, error = %e, "Failed to discard cancelled download")
                }
            }
        }
    }

    fn cancel_switch(&mut self) -> Result<(), DomainError> {
        let switching = self
            .pending
            .as_ref()
            .is_some_and(|op| op.kind == OperationKind::Switch);
        if !switching {
            return Err(DomainError::NoSwitchInProgress);
        }

        self.abort_pending("switch cancelled");
        Ok(())
    }

    /// Only a first-time download can be cancelled; a download feeding a
    /// hot-swap is cancelled through `cancel_switch`.
    fn cancel_download(&mut self) -> Result<(), DomainError> {
        let downloading = self
            .pending
            .as_ref()
            .is_some_and(|op| op.kind == OperationKind::Load && op.phase == Phase::Downloading);
        if !downloading {
            return Err(DomainError::NoDownloadInProgress);
        }

        self.abort_pending("download cancelled");
        Ok(())
    }

    fn delete(&mut self, tier: ModelTier) -> Result<(), DomainError> {
        if self.pending.as_ref().is_some_and(|op| op.tier == tier) {
            self.abort_pending("model deleted");
        }

        self.store.delete(tier)?;

        if self.active_tier() == Some(tier) {
            let unloaded = self.active.write().take();
            drop(unloaded);
            info!(tier = %tier, "Active model unloaded");

            // A hot-swap in flight now loads into an empty slot
            if let Some(op) = self.pending.as_mut() {
                op.kind = OperationKind::Load;
                self.selected = op.tier;
            }
        }

        if tier == self.selected {
            self.failure = None;
        }

        let _ = self.events.send(LifecycleEvent::ModelDeleted { tier });
        Ok(())
    }

    fn progress(&mut self, operation: u64, progress: Progress) {
        if let Some(op) = self.pending.as_mut().filter(|op| op.id == operation) {
            if let Some(next) = op.progress.advance(progress) {
                op.progress = next;
            }
        }
    }

    fn constructing(&mut self, operation: u64) {
        if let Some(op) = self.pending.as_mut().filter(|op| op.id == operation) {
            debug!(tier = %op.tier, operation = operation, "Download finished, constructing engine");
            op.phase = Phase::Constructing;
        }
    }

    fn finish(&mut self, operation: u64, result: Result<Arc<dyn InferenceEngine>, DomainError>) {
        let op = match self.pending.take() {
            Some(op) if op.id == operation => op,
            other => {
                self.pending = other;
                self.settle(operation, &result);
                return;
            }
        };

        match result {
            Ok(engine) => {
                let replaced = self
                    .active
                    .write()
                    .replace(ActiveEngine {
                        tier: op.tier,
                        engine,
                    })
                    .map(|previous| previous.tier);

                self.selected = op.tier;
                self.failure = None;

                if let Err(e) = self.preferences.set(SELECTED_TIER_KEY, op.tier.as_str()) {
                    warn!(tier = %op.tier, error = %e, "Failed to save selected model");
                }

                info!(tier = %op.tier, replaced = ?replaced, "Model ready");
                let _ = self.events.send(LifecycleEvent::ModelReady {
                    tier: op.tier,
                    replaced,
                });
                self.resolve(op, Ok(()));
            }
            Err(e) => {
                warn!(tier = %op.tier, kind = ?op.kind, error = %e, "Model operation failed");
                self.fail(op.kind, op.tier, &e);
                self.resolve(op, Err(e));
            }
        }
    }

    fn status(&self) -> ModelStatus {
        if let Some(op) = &self.pending {
            return match (op.kind, op.phase) {
                (OperationKind::Switch, _) => ModelStatus::Switching {
                    target: op.tier,
                    progress: op.progress,
                },
                (OperationKind::Load, Phase::Downloading) => ModelStatus::Downloading {
                    progress: op.progress,
                },
                (OperationKind::Load, Phase::Constructing) => ModelStatus::Loading,
            };
        }

        if self.active.read().is_some() {
            ModelStatus::Ready
        } else if let Some(message) = &self.failure {
            ModelStatus::Error {
                message: message.clone(),
            }
        } else if self.store.is_downloaded(self.selected) && !self.discarding(self.selected) {
            ModelStatus::Downloaded
        } else {
            ModelStatus::NotDownloaded
        }
    }

    fn publish(&mut self) {
        let next = ManagerSnapshot {
            status: self.status(),
            selected_tier: self.selected,
            active_tier: self.active_tier(),
        };

        let previous = self.snapshot.borrow().clone();
        if previous == next {
            return;
        }

        if previous.status != next.status {
            debug!(from = ?previous.status, to = ?next.status, "Model status changed");
            let _ = self.events.send(LifecycleEvent::StatusChanged {
                from: previous.status,
                to: next.status.clone(),
            });
        }

        self.snapshot.send_replace(next);
    }
}

/// Wait for cancelled operations on the same tier to stop, download if
/// needed and construct an engine, then report back.
#[allow(clippy::too_many_arguments)]
async fn run_operation(
    id: u64,
    tier: ModelTier,
    needs_download: bool,
    predecessors: Vec<watch::Receiver<()>>,
    store: Arc<dyn ModelStore>,
    factory: Arc<dyn EngineFactory>,
    cancel: CancellationToken,
    commands: mpsc::Sender<Command>,
) {
    for mut settled in predecessors {
        // Resolves with an error once the sender is dropped
        let _ = settled.changed().await;
    }

    let result = if cancel.is_cancelled() {
        Err(DomainError::Cancelled { tier })
    } else {
        acquire_engine(id, tier, needs_download, &store, &factory, &cancel, &commands).await
    };
    let _ = commands
        .send(Command::Finished {
            operation: id,
            result,
        })
        .await;
}

async fn acquire_engine(
    id: u64,
    tier: ModelTier,
    needs_download: bool,
    store: &Arc<dyn ModelStore>,
    factory: &Arc<dyn EngineFactory>,
    cancel: &CancellationToken,
    commands: &mpsc::Sender<Command>,
) -> Result<Arc<dyn InferenceEngine>, DomainError> {
    if needs_download {
        let progress_tx = commands.clone();
        let callback: ProgressCallback = Box::new(move |p: DownloadProgress| {
            // Advisory; dropped when the manager is busy
            let _ = progress_tx.try_send(Command::Progress {
                operation: id,
                progress: p.progress(),
            });
        });

        store.download(tier, Some(callback), cancel.clone()).await?;
        let _ = commands.send(Command::Constructing { operation: id }).await;
    }

    let descriptor = tier.descriptor();
    let model_path = store.model_path(tier);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DomainError::Cancelled { tier }),
        engine = factory.construct(&descriptor, &model_path) => engine,
    }
}
