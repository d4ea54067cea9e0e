//! Drains the sync queue against the backend.
//!
//! Only the orchestrator moves queue items between statuses. A drain is
//! exclusive per orchestrator: a request that arrives while one is running
//! returns [`DrainOutcome::AlreadyRunning`] instead of starting a second pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{DrainOutcome, SyncEvent, SyncItemError, SyncProgress, SyncReport, SyncState};
use crate::backend::{Backend, CreateRecord};
use crate::config::EngineConfig;
use crate::error::{BackendError, Error, Result};
use crate::models::{NoteId, SyncMutation, SyncQueueItem, SyncStatus, TempId};
use crate::network::{NetworkEvent, NetworkMonitor};
use crate::services::LocalStore;
use crate::util::SharedClock;

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Inner<B> {
    owner_id: String,
    backend: Arc<B>,
    store: LocalStore,
    network: NetworkMonitor,
    clock: SharedClock,
    config: EngineConfig,
    syncing: AtomicBool,
    last_result: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Clears the drain flag when a drain ends, including on early return.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sync queue owner for one signed-in user.
pub struct SyncOrchestrator<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for SyncOrchestrator<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend + 'static> SyncOrchestrator<B> {
    pub fn new(
        owner_id: impl Into<String>,
        backend: Arc<B>,
        store: LocalStore,
        network: NetworkMonitor,
        clock: SharedClock,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (last_result, _) = watch::channel(SyncState::Synced);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                owner_id: owner_id.into(),
                backend,
                store,
                network,
                clock,
                config,
                syncing: AtomicBool::new(false),
                last_result,
                events,
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.inner.owner_id
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.inner.backend
    }

    /// Receive status, progress and completion events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Indicator state: syncing wins, then offline, then the last drain result.
    pub fn state(&self) -> SyncState {
        if self.is_syncing() {
            SyncState::Syncing
        } else if !self.inner.network.is_online() {
            SyncState::Offline
        } else {
            *self.inner.last_result.borrow()
        }
    }

    fn emit(&self, event: SyncEvent) {
        if self.inner.events.send(event).is_err() {
            tracing::trace!("No subscribers for sync event");
        }
    }

    /// Append a mutation for the next drain.
    pub async fn add_to_sync_queue(&self, mutation: SyncMutation) -> Result<SyncQueueItem> {
        let item = self
            .inner
            .store
            .enqueue(
                &self.inner.owner_id,
                &mutation,
                self.inner.clock.now_ms(),
                self.inner.config.max_retries,
            )
            .await?;
        tracing::debug!("Queued {} as item {}", mutation.describe(), item.id);
        Ok(item)
    }

    /// Drain pending and retryable items, oldest first.
    pub async fn sync_all(&self) -> Result<DrainOutcome> {
        if self.is_shutting_down() {
            return Ok(DrainOutcome::Stopped);
        }
        if self
            .inner
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in progress, skipping");
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.inner.syncing);

        self.emit(SyncEvent::Status {
            syncing: true,
            error: None,
        });

        match self.drain().await {
            Ok(report) => {
                let error = (!report.errors.is_empty())
                    .then(|| format!("{} item(s) failed to sync", report.errors.len()));
                self.inner.last_result.send_replace(if error.is_some() {
                    SyncState::Error
                } else {
                    SyncState::Synced
                });
                tracing::info!(
                    "Sync finished: {} synced, {} failed, {} terminal",
                    report.synced,
                    report.errors.len(),
                    report.terminal_failures
                );
                self.emit(SyncEvent::Complete(report.clone()));
                self.emit(SyncEvent::Status {
                    syncing: false,
                    error,
                });
                Ok(DrainOutcome::Completed(report))
            }
            Err(error) => {
                tracing::warn!("Sync aborted: {}", error);
                self.inner.last_result.send_replace(SyncState::Error);
                self.emit(SyncEvent::Status {
                    syncing: false,
                    error: Some(error.to_string()),
                });
                Err(error)
            }
        }
    }

    async fn drain(&self) -> Result<SyncReport> {
        let store = &self.inner.store;
        let owner_id = self.inner.owner_id.as_str();

        let requeued = store.requeue_interrupted(owner_id).await?;
        if requeued > 0 {
            tracing::info!("Requeued {} items from an interrupted sync", requeued);
        }

        let items = store.drainable_items(owner_id).await?;
        let total = items.len();
        let mut report = SyncReport::default();
        let mut remapped: HashMap<TempId, NoteId> = HashMap::new();

        if total > 0 {
            tracing::info!("Syncing {} queued mutations", total);
        }

        for (index, mut item) in items.into_iter().enumerate() {
            if self.is_shutting_down() {
                tracing::info!("Shutdown requested, leaving {} items queued", total - index);
                break;
            }

            for (temp_id, real_id) in &remapped {
                item.mutation.remap(temp_id, real_id);
            }

            store.set_item_status(item.id, SyncStatus::Syncing).await?;
            match self.apply(&item.mutation, &mut remapped).await {
                Ok(()) => {
                    store.set_item_status(item.id, SyncStatus::Success).await?;
                    report.synced += 1;
                    self.emit(SyncEvent::Progress(SyncProgress {
                        current: index + 1,
                        total,
                        message: item.mutation.describe(),
                    }));
                }
                Err(Error::Backend(error)) => {
                    let message = error.to_string();
                    let failed = store
                        .record_item_failure(item.id, &message, !error.is_transient())
                        .await?;
                    tracing::warn!(
                        "Sync item {} ({}) failed, attempt {}/{}: {}",
                        item.id,
                        item.operation(),
                        failed.retries,
                        failed.max_retries,
                        message
                    );
                    report.errors.push(SyncItemError {
                        item_id: item.id,
                        operation: item.operation(),
                        message,
                        terminal: failed.is_terminal(),
                    });
                }
                Err(error) => return Err(error),
            }
        }

        let swept = store.sweep_succeeded(owner_id).await?;
        let collected = store.collect_synced_records(owner_id).await?;
        tracing::debug!(
            "Removed {} synced queue items and {} synced offline records",
            swept,
            collected
        );

        report.terminal_failures = store.terminal_items(owner_id).await?.len();
        Ok(report)
    }

    async fn apply(
        &self,
        mutation: &SyncMutation,
        remapped: &mut HashMap<TempId, NoteId>,
    ) -> Result<()> {
        let backend = &self.inner.backend;
        match mutation {
            SyncMutation::Create { client_id, fields } => {
                let request = CreateRecord {
                    client_id: client_id.clone(),
                    fields: fields.clone(),
                };
                let note = backend.create_record(&request).await?;

                let store = &self.inner.store;
                if !store
                    .mark_offline_record_synced(&self.inner.owner_id, client_id, &note.id)
                    .await?
                {
                    tracing::debug!("No provisional record left for {}", client_id);
                }
                let rewritten = store
                    .remap_queue_note_id(&self.inner.owner_id, client_id, &note.id)
                    .await?;
                tracing::debug!(
                    "{} is now {} ({} queued items rewritten)",
                    client_id,
                    note.id,
                    rewritten
                );
                remapped.insert(client_id.clone(), note.id);
            }
            SyncMutation::Update { note_id, fields } => {
                let note_id = self.durable_id(note_id).await?;
                backend.update_record(&note_id, fields).await?;
            }
            SyncMutation::Delete { note_id } => {
                let note_id = self.durable_id(note_id).await?;
                backend.delete_record(&note_id).await?;
            }
        }
        Ok(())
    }

    /// Backend id for a queued update or delete.
    ///
    /// Mutations queued under a temporary id after its create landed resolve
    /// through the stored resolution; the rest wait for their create.
    async fn durable_id(&self, note_id: &NoteId) -> Result<NoteId> {
        if !note_id.is_temporary() {
            return Ok(note_id.clone());
        }
        let temp_id = TempId::from_raw(note_id.as_str());
        match self.inner.store.resolved_id(&self.inner.owner_id, &temp_id).await? {
            Some(real_id) => Ok(real_id),
            None => Err(BackendError::Transient(format!(
                "note {note_id} has not been created on the backend yet"
            ))
            .into()),
        }
    }

    async fn owned_item(&self, id: i64) -> Result<Option<SyncQueueItem>> {
        let item = self.inner.store.get_queue_item(id).await?;
        Ok(item.filter(|item| item.owner_id == self.inner.owner_id))
    }

    /// Drop a queue item on user request.
    ///
    /// Discarding a create also drops its provisional record, since it can
    /// no longer reach the backend.
    pub async fn discard_sync_item(&self, id: i64) -> Result<bool> {
        let Some(item) = self.owned_item(id).await? else {
            return Ok(false);
        };
        if item.status == SyncStatus::Syncing {
            return Err(Error::InvalidInput(format!(
                "sync item {id} is being synced"
            )));
        }

        if let SyncMutation::Create { client_id, .. } = &item.mutation {
            self.inner.store.delete_offline_record(client_id).await?;
        }
        let removed = self.inner.store.delete_queue_item(id).await?;
        tracing::info!("Discarded sync item {} ({})", id, item.mutation.describe());
        Ok(removed)
    }

    pub async fn list_terminal_failures(&self) -> Result<Vec<SyncQueueItem>> {
        self.inner.store.terminal_items(&self.inner.owner_id).await
    }

    /// Give a terminal item a fresh retry budget.
    pub async fn retry_terminal(&self, id: i64) -> Result<bool> {
        let Some(item) = self.owned_item(id).await? else {
            return Ok(false);
        };
        if !item.is_terminal() {
            return Ok(false);
        }
        let reset = self.inner.store.reset_queue_item(id).await?;
        if reset {
            tracing::info!("Retrying sync item {} ({})", id, item.mutation.describe());
        }
        Ok(reset)
    }

    /// Start the reconnect and periodic drain triggers.
    ///
    /// Drains once right away when online. Calling `start` twice is a no-op.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() || self.is_shutting_down() {
            return;
        }
        tasks.push(self.spawn_reconnect_trigger());
        tasks.push(self.spawn_periodic_trigger());
        tracing::info!("Auto sync started for {}", self.inner.owner_id);
    }

    fn spawn_reconnect_trigger(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let mut network_events = self.inner.network.subscribe();
        let mut shutdown = self.inner.shutdown.subscribe();
        let delay = self.inner.config.reconnect_delay();
        let online_at_start = self.inner.network.is_online();

        tokio::spawn(async move {
            if online_at_start {
                orchestrator.run_triggered("startup").await;
            }

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    event = network_events.recv() => match event {
                        Ok(NetworkEvent::Reconnected) => {
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                _ = shutdown.changed() => break,
                            }
                            let folded = Self::fold_pending_reconnects(&mut network_events);
                            if folded > 0 {
                                tracing::debug!("Folded {} reconnects into one sync", folded);
                            }
                            if orchestrator.inner.network.is_online() {
                                orchestrator.run_triggered("reconnect").await;
                            } else {
                                tracing::debug!("Connection dropped during the reconnect delay");
                            }
                        }
                        Ok(NetworkEvent::Online | NetworkEvent::Offline) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!("Reconnect trigger skipped {} network events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Reconnect trigger stopped");
        })
    }

    /// Consume reconnects already waiting in the channel.
    fn fold_pending_reconnects(events: &mut broadcast::Receiver<NetworkEvent>) -> usize {
        let mut folded = 0;
        loop {
            match events.try_recv() {
                Ok(NetworkEvent::Reconnected) => folded += 1,
                Ok(NetworkEvent::Online | NetworkEvent::Offline)
                | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                    break
                }
            }
        }
        folded
    }

    fn spawn_periodic_trigger(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let period = self.inner.config.periodic_sync_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if orchestrator.inner.network.is_online() && !orchestrator.is_syncing() {
                            orchestrator.run_triggered("periodic").await;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Periodic sync trigger stopped");
        })
    }

    async fn run_triggered(&self, trigger: &str) {
        match self.sync_all().await {
            Ok(DrainOutcome::Completed(report)) => {
                tracing::debug!("{} sync synced {} items", trigger, report.synced);
            }
            Ok(DrainOutcome::AlreadyRunning | DrainOutcome::Stopped) => {}
            Err(error) => tracing::warn!("{} sync failed: {}", trigger, error),
        }
    }

    /// Stop the triggers and wait for them to finish.
    ///
    /// A backend call already in flight completes; no further item starts.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for task in tasks {
            if let Err(error) = task.await {
                tracing::warn!("Sync trigger task ended abnormally: {}", error);
            }
        }
        tracing::info!("Auto sync stopped for {}", self.inner.owner_id);
    }
}
