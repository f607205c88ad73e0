//! The sync engine: cycle orchestration and scheduling.
//!
//! One cycle is pull-before-push: the client never reports a change as
//! synced before observing the latest remote state it might conflict
//! with. Cycles are serialized; an in-progress cycle suppresses new
//! tick- or enqueue-triggered cycles instead of queuing them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::connectivity::Connectivity;
use crate::error::Result;
use crate::log::MutationLog;
use crate::models::{ChangeAction, PullResponse, PushBatch, PushReceipt};
use crate::notify::{ChangeEvent, ChangeNotifier};
use crate::state::SyncState;
use crate::storage::StateStore;
use crate::transport::SyncTransport;
use crate::util::unix_timestamp_millis;

/// Result of one sync cycle attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Pull and push both completed; the checkpoint advanced.
    Completed {
        /// Entity types present in the pull response
        pulled_types: usize,
        /// Entries submitted by the push (0 when the push was skipped)
        pushed: usize,
    },
    /// The engine was offline; nothing was attempted.
    SkippedOffline,
    /// Another cycle was in progress; this attempt was dropped.
    AlreadyRunning,
}

/// Offline-first sync engine with injected transport, store, and
/// connectivity.
pub struct SyncEngine<T: SyncTransport> {
    inner: Arc<EngineInner<T>>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

struct EngineInner<T> {
    transport: T,
    store: Arc<dyn StateStore>,
    log: Mutex<MutationLog>,
    /// In-memory mirror of the persisted last-sync-timestamp
    checkpoint: Mutex<i64>,
    /// UI-facing cached view of the last pulled server state per type
    read_model: Mutex<BTreeMap<String, Vec<Value>>>,
    notifier: ChangeNotifier,
    connectivity: Connectivity,
    /// Serializes cycles; `try_lock` drops overlapping attempts
    cycle_guard: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<SyncState>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Build an engine, reloading pending changes and the checkpoint
    /// from the store.
    pub fn new(transport: T, store: Arc<dyn StateStore>, connectivity: Connectivity) -> Self {
        let log = MutationLog::load(Arc::clone(&store));
        let checkpoint = store.load_checkpoint().unwrap_or_else(|error| {
            tracing::warn!("failed to load sync checkpoint, starting from 0: {error}");
            0
        });
        let initial_state = if connectivity.is_online() {
            SyncState::Synced
        } else {
            SyncState::Offline
        };
        let (state_tx, _) = watch::channel(initial_state);

        Self {
            inner: Arc::new(EngineInner {
                transport,
                store,
                log: Mutex::new(log),
                checkpoint: Mutex::new(checkpoint),
                read_model: Mutex::new(BTreeMap::new()),
                notifier: ChangeNotifier::new(),
                connectivity,
                cycle_guard: tokio::sync::Mutex::new(()),
                state_tx,
            }),
            worker: None,
        }
    }

    /// Queue a local mutation and return its id.
    ///
    /// While online, a sync cycle is triggered immediately
    /// (write-through eagerness) subject to the non-overlap rule; a
    /// failed cycle leaves the entry queued for the next tick.
    pub async fn queue_change(
        &self,
        entity_type: &str,
        action: ChangeAction,
        data: Value,
    ) -> Result<String> {
        let id = self.inner.log.lock().enqueue(entity_type, action, data)?;

        if self.inner.connectivity.is_online() {
            if let Err(error) = self.inner.sync_cycle().await {
                tracing::warn!("eager sync after enqueue failed: {error}");
            }
        }

        Ok(id)
    }

    /// Run one sync cycle now.
    pub async fn sync_cycle(&self) -> Result<CycleOutcome> {
        self.inner.sync_cycle().await
    }

    /// Current coarse sync state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.inner.state_tx.borrow()
    }

    /// Watch channel for sync state transitions (spinner/error badges).
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to applied remote changes. No replay for late
    /// subscribers; full state arrives with the next pull.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent> {
        self.inner.notifier.subscribe()
    }

    /// Last pulled server state for one entity type, if any.
    #[must_use]
    pub fn read_model(&self, entity_type: &str) -> Option<Vec<Value>> {
        self.inner.read_model.lock().get(entity_type).cloned()
    }

    /// Snapshot of the full pending changes store.
    #[must_use]
    pub fn pending_changes(&self) -> PushBatch {
        self.inner.log.lock().entries().clone()
    }

    /// Unsynced entries grouped by type.
    #[must_use]
    pub fn unsynced(&self) -> PushBatch {
        self.inner.log.lock().unsynced()
    }

    /// Entries awaiting a server acknowledgement.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.log.lock().pending_count()
    }

    /// Entries carrying a terminal server rejection.
    #[must_use]
    pub fn errored_count(&self) -> usize {
        self.inner.log.lock().errored_count()
    }

    /// Current checkpoint (unix ms; 0 if never synced).
    #[must_use]
    pub fn checkpoint(&self) -> i64 {
        *self.inner.checkpoint.lock()
    }

    /// Drop an errored entry the UI has chosen to abandon.
    pub fn discard_errored(&self, entity_type: &str, id: &str) -> bool {
        self.inner.log.lock().discard_errored(entity_type, id)
    }
}

impl<T: SyncTransport + Send + Sync + 'static> SyncEngine<T> {
    /// Arm the recurring scheduler.
    ///
    /// Each tick triggers one cycle when online; an offline-to-online
    /// transition triggers an immediate cycle without waiting for the
    /// next tick. Calling `start` on a running engine is a no-op.
    pub fn start(&mut self, interval: Duration) {
        if self.worker.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.worker = Some(tokio::spawn(run_scheduler(inner, interval)));
    }

    /// Disarm the scheduler. An in-flight cycle is not aborted by a
    /// connectivity loss, but stopping the engine cancels the worker.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl<T: SyncTransport> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_scheduler<T: SyncTransport>(inner: Arc<EngineInner<T>>, interval: Duration) {
    let mut connectivity = inner.connectivity.clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if inner.connectivity.is_online() {
                    run_cycle_silently(&inner).await;
                } else {
                    inner.set_state(SyncState::Offline);
                }
            }
            transition = connectivity.changed() => {
                match transition {
                    Some(true) => run_cycle_silently(&inner).await,
                    Some(false) => inner.set_state(SyncState::Offline),
                    // Handle dropped: keep the last observed state and
                    // fall back to timer-only scheduling.
                    None => break,
                }
            }
        }
    }

    loop {
        ticker.tick().await;
        if inner.connectivity.is_online() {
            run_cycle_silently(&inner).await;
        }
    }
}

/// A failed cycle is silent by default; the state channel carries the
/// error signal for UIs that want a badge.
async fn run_cycle_silently<T: SyncTransport>(inner: &EngineInner<T>) {
    if let Err(error) = inner.sync_cycle().await {
        tracing::warn!("sync cycle failed: {error}");
    }
}

impl<T: SyncTransport> EngineInner<T> {
    async fn sync_cycle(&self) -> Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            return Ok(CycleOutcome::AlreadyRunning);
        };
        if !self.connectivity.is_online() {
            self.set_state(SyncState::Offline);
            return Ok(CycleOutcome::SkippedOffline);
        }

        self.set_state(SyncState::Syncing);
        // The checkpoint advances to this fixed pre-cycle time, not the
        // completion time, so changes written mid-cycle are re-pulled.
        let cycle_start = unix_timestamp_millis();
        let since = *self.checkpoint.lock();

        let pulled = match self.transport.pull(since).await {
            Ok(pulled) => pulled,
            Err(error) => {
                self.set_state(SyncState::Error);
                return Err(error);
            }
        };
        let pulled_types = pulled.len();
        self.apply_pulled(pulled);

        let batch = self.log.lock().unsynced();
        let pushed = batch.values().map(Vec::len).sum();
        if !batch.is_empty() {
            let receipt = match self.transport.push(&batch).await {
                Ok(receipt) => receipt,
                Err(error) => {
                    self.set_state(SyncState::Error);
                    return Err(error);
                }
            };
            self.process_receipt(&receipt);
        }

        *self.checkpoint.lock() = cycle_start;
        if let Err(error) = self.store.save_checkpoint(cycle_start) {
            tracing::warn!("failed to persist sync checkpoint: {error}");
        }

        self.set_state(SyncState::Synced);
        tracing::debug!(pulled_types, pushed, "sync cycle completed");
        Ok(CycleOutcome::Completed {
            pulled_types,
            pushed,
        })
    }

    /// Replace the read-model state per pulled entity type and broadcast
    /// the new data. The pending changes store is never touched here.
    fn apply_pulled(&self, pulled: PullResponse) {
        for (entity_type, entities) in pulled {
            let payload = Value::Array(entities.clone());
            self.read_model.lock().insert(entity_type.clone(), entities);
            self.notifier.notify(&entity_type, payload);
        }
    }

    /// Process a push receipt deterministically: conflicts, then errors,
    /// then synced ids, so resolution wins over a stale synced marking
    /// when the server reports an id in more than one list.
    fn process_receipt(&self, receipt: &PushReceipt) {
        let resolved = self.log.lock().resolve_conflicts(&receipt.conflicts);
        for (entity_type, payload) in resolved {
            self.notifier.notify(&entity_type, payload);
        }

        let mut log = self.log.lock();
        log.attach_errors(&receipt.errors);
        log.mark_synced(&receipt.synced_ids);
    }

    fn set_state(&self, state: SyncState) {
        self.state_tx.send_replace(state);
    }
}
