//! Engine facade wiring the store, connectivity, drafts, sync queue and
//! read cache for one signed-in user.
//!
//! Writes go straight to the backend while online and fall back to the
//! durable queue otherwise. Reads prefer the backend, cache what they get and
//! fall back to the cache, always merged with notes created offline.

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::backend::{Backend, CreateRecord};
use crate::cache::ReadCache;
use crate::config::EngineConfig;
use crate::db::SyncedFilter;
use crate::drafts::DraftManager;
use crate::error::Result;
use crate::merge::merge_notes;
use crate::models::{
    CacheStats, Draft, DraftKey, DraftSnapshot, Note, NoteFields, NoteFilter, NoteId,
    OfflineRecord, OfflineStats, ServerState, SyncMutation, SyncQueueItem, SyncStatus, TempId,
};
use crate::network::{ConnectivityProbe, NetworkEvent, NetworkMonitor};
use crate::services::LocalStore;
use crate::sync::{DrainOutcome, SyncEvent, SyncOrchestrator, SyncState};
use crate::util::SharedClock;

/// Result of a read, flagged when it was served from the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome<T> {
    pub data: T,
    pub from_cache: bool,
}

/// Where a write ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    /// Accepted by the backend, or resolved locally without a backend call
    Applied(T),
    /// Durably queued for the next drain
    Queued(SyncQueueItem),
}

impl<T> WriteOutcome<T> {
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

struct Inner<B> {
    owner_id: String,
    backend: Arc<B>,
    store: LocalStore,
    network: NetworkMonitor,
    drafts: DraftManager,
    orchestrator: SyncOrchestrator<B>,
    cache: ReadCache,
    clock: SharedClock,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Offline-first note engine for one owner.
pub struct SyncEngine<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for SyncEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn matches_filter(note: &Note, filter: &NoteFilter) -> bool {
    filter.tag.as_ref().map_or(true, |tag| note.tags.contains(tag))
        && filter
            .category
            .as_ref()
            .map_or(true, |category| note.category.as_ref() == Some(category))
}

impl<B: Backend + 'static> SyncEngine<B> {
    pub fn new(
        owner_id: impl Into<String>,
        backend: Arc<B>,
        store: LocalStore,
        clock: SharedClock,
        config: EngineConfig,
        initially_online: bool,
    ) -> Result<Self> {
        config.validate()?;
        let owner_id = owner_id.into();

        let network = NetworkMonitor::new(initially_online, clock.clone());
        let drafts = DraftManager::new(store.clone(), clock.clone(), config.autosave_debounce());
        let cache = ReadCache::new(store.clone(), clock.clone(), config.cache_ttl_millis());
        let orchestrator = SyncOrchestrator::new(
            owner_id.clone(),
            Arc::clone(&backend),
            store.clone(),
            network.clone(),
            clock.clone(),
            config,
        );
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                owner_id,
                backend,
                store,
                network,
                drafts,
                orchestrator,
                cache,
                clock,
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.inner.owner_id
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub fn drafts(&self) -> &DraftManager {
        &self.inner.drafts
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator<B> {
        &self.inner.orchestrator
    }

    pub fn cache(&self) -> &ReadCache {
        &self.inner.cache
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn is_online(&self) -> bool {
        self.inner.network.is_online()
    }

    pub fn subscribe_network(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.network.subscribe()
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.orchestrator.subscribe()
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.orchestrator.state()
    }

    // Editing

    /// Record an editor change; persisted after the autosave debounce.
    pub async fn edit_note(&self, key: DraftKey, snapshot: DraftSnapshot) {
        self.inner
            .drafts
            .save_draft(key, &self.inner.owner_id, snapshot)
            .await;
    }

    /// Explicit save: persist the draft, then write through or queue.
    ///
    /// A key for a new note creates it; a key for an existing note updates
    /// it. The draft is cleared once the change is accepted or queued.
    pub async fn save_note(&self, key: DraftKey, snapshot: DraftSnapshot) -> Result<WriteOutcome<Note>> {
        if let Err(error) = self
            .inner
            .drafts
            .persist(key.clone(), &self.inner.owner_id, snapshot.clone())
            .await
        {
            tracing::warn!("Could not persist draft {} before saving: {}", key, error);
        }

        let fields = snapshot.into_fields(self.inner.owner_id.clone());
        match key.note_id() {
            Some(note_id) => self.push_update(&key, note_id, fields).await,
            None => self.push_create(&key, fields).await,
        }
    }

    async fn push_create(&self, key: &DraftKey, fields: NoteFields) -> Result<WriteOutcome<Note>> {
        let client_id = TempId::generate(self.inner.clock.now_ms());

        if self.is_online() {
            let request = CreateRecord {
                client_id: client_id.clone(),
                fields: fields.clone(),
            };
            match self.inner.backend.create_record(&request).await {
                Ok(note) => {
                    self.cache_note(&note).await;
                    self.forget_draft(key).await;
                    return Ok(WriteOutcome::Applied(note));
                }
                Err(error) => {
                    tracing::warn!("Create failed, saving offline: {}", error);
                }
            }
        }

        let (_, item) = self.create_offline_with_id(client_id, fields).await?;
        self.forget_draft(key).await;
        Ok(WriteOutcome::Queued(item))
    }

    async fn push_update(
        &self,
        key: &DraftKey,
        note_id: NoteId,
        fields: NoteFields,
    ) -> Result<WriteOutcome<Note>> {
        let note_id = self.resolve_note_id(note_id).await?;
        if note_id.is_temporary() {
            let temp_id = TempId::from_raw(note_id.as_str());
            if let Some(mut record) = self.inner.store.get_offline_record(&temp_id).await? {
                record.title.clone_from(&fields.title);
                record.content.clone_from(&fields.content);
                record.tags.clone_from(&fields.tags);
                record.category.clone_from(&fields.category);
                self.inner.store.put_offline_record(&record).await?;
            }
        }

        if !note_id.is_temporary() && self.is_online() {
            match self.inner.backend.update_record(&note_id, &fields).await {
                Ok(note) => {
                    self.cache_note(&note).await;
                    self.forget_draft(key).await;
                    return Ok(WriteOutcome::Applied(note));
                }
                Err(error) => {
                    tracing::warn!("Update of {} failed, queueing: {}", note_id, error);
                }
            }
        }

        let item = self
            .inner
            .orchestrator
            .add_to_sync_queue(SyncMutation::Update { note_id, fields })
            .await?;
        self.forget_draft(key).await;
        Ok(WriteOutcome::Queued(item))
    }

    /// Create a note locally with a temporary id and queue its creation.
    pub async fn create_note_offline(&self, fields: NoteFields) -> Result<OfflineRecord> {
        let client_id = TempId::generate(self.inner.clock.now_ms());
        let (record, _) = self.create_offline_with_id(client_id, fields).await?;
        Ok(record)
    }

    async fn create_offline_with_id(
        &self,
        client_id: TempId,
        fields: NoteFields,
    ) -> Result<(OfflineRecord, SyncQueueItem)> {
        let mut record = OfflineRecord::new(fields, self.inner.clock.now_ms());
        record.temp_id = client_id;
        self.inner.store.put_offline_record(&record).await?;

        let item = self
            .inner
            .orchestrator
            .add_to_sync_queue(SyncMutation::Create {
                client_id: record.temp_id.clone(),
                fields: record.fields(),
            })
            .await?;
        tracing::info!("Created note {} offline", record.temp_id);
        Ok((record, item))
    }

    /// Delete a note.
    ///
    /// A note that only exists offline is dropped together with its queued
    /// mutations, unless its creation is being synced right now.
    pub async fn delete_note(&self, note_id: &NoteId) -> Result<WriteOutcome<()>> {
        self.forget_draft(&DraftKey::for_note(note_id)).await;
        let note_id = &self.resolve_note_id(note_id.clone()).await?;

        if note_id.is_temporary() {
            let queued = self
                .inner
                .store
                .list_queue(&self.inner.owner_id, &[])
                .await?
                .into_iter()
                .filter(|item| item.mutation.note_id() == *note_id)
                .collect::<Vec<_>>();

            if !queued.iter().any(|item| item.status == SyncStatus::Syncing) {
                for item in &queued {
                    self.inner.store.delete_queue_item(item.id).await?;
                }
                self.inner
                    .store
                    .delete_offline_record(&TempId::from_raw(note_id.as_str()))
                    .await?;
                tracing::info!("Dropped offline note {} and {} queued items", note_id, queued.len());
                return Ok(WriteOutcome::Applied(()));
            }
        } else if self.is_online() {
            match self.inner.backend.delete_record(note_id).await {
                Ok(()) => {
                    self.evict_note(note_id).await;
                    return Ok(WriteOutcome::Applied(()));
                }
                Err(error) => {
                    tracing::warn!("Delete of {} failed, queueing: {}", note_id, error);
                }
            }
        }

        self.evict_note(note_id).await;
        let item = self
            .inner
            .orchestrator
            .add_to_sync_queue(SyncMutation::Delete {
                note_id: note_id.clone(),
            })
            .await?;
        Ok(WriteOutcome::Queued(item))
    }

    /// Backend id of a note still addressed by its temporary id, once its
    /// create has landed.
    async fn resolve_note_id(&self, note_id: NoteId) -> Result<NoteId> {
        if !note_id.is_temporary() {
            return Ok(note_id);
        }
        let temp_id = TempId::from_raw(note_id.as_str());
        let resolved = self
            .inner
            .store
            .resolved_id(&self.inner.owner_id, &temp_id)
            .await?;
        Ok(resolved.unwrap_or(note_id))
    }

    async fn forget_draft(&self, key: &DraftKey) {
        if let Err(error) = self.inner.drafts.forget(key).await {
            tracing::warn!("Could not clear draft {}: {}", key, error);
        }
    }

    async fn cache_note(&self, note: &Note) {
        if let Err(error) = self.inner.cache.cache_note(&self.inner.owner_id, note).await {
            tracing::warn!("Could not cache note {}: {}", note.id, error);
        }
    }

    async fn evict_note(&self, note_id: &NoteId) {
        if let Err(error) = self.inner.cache.evict_note(&self.inner.owner_id, note_id).await {
            tracing::warn!("Could not evict cached note {}: {}", note_id, error);
        }
    }

    // Reads

    async fn unsynced_records(&self) -> Result<Vec<OfflineRecord>> {
        self.inner
            .store
            .list_offline_records(&self.inner.owner_id, SyncedFilter::Unsynced)
            .await
    }

    /// Notes for the list view: backend (or cache) merged with unsynced
    /// local records.
    pub async fn list_notes(&self, filter: &NoteFilter) -> Result<QueryOutcome<Vec<Note>>> {
        let owner_id = self.inner.owner_id.as_str();
        let local = self
            .unsynced_records()
            .await?
            .into_iter()
            .filter(|record| matches_filter(&record.to_note(), filter))
            .collect::<Vec<_>>();

        if self.is_online() {
            match self.inner.backend.list_records(owner_id, filter).await {
                Ok(notes) => {
                    if let Err(error) = self.inner.cache.cache_notes_list(owner_id, filter, &notes).await {
                        tracing::warn!("Could not cache notes list: {}", error);
                    }
                    return Ok(QueryOutcome {
                        data: merge_notes(Some(&notes), &local),
                        from_cache: false,
                    });
                }
                Err(error) => tracing::warn!("Listing notes failed, using cache: {}", error),
            }
        }

        let cached = match self.inner.cache.get_cached_notes_list(owner_id, filter).await {
            Ok(cached) => cached,
            Err(error) => {
                tracing::warn!("Could not read cached notes list: {}", error);
                None
            }
        };
        Ok(QueryOutcome {
            data: merge_notes(cached.as_deref(), &local),
            from_cache: true,
        })
    }

    /// A single note; offline-created notes are served from the local store.
    pub async fn get_note(&self, note_id: &NoteId) -> Result<QueryOutcome<Option<Note>>> {
        let note_id = &self.resolve_note_id(note_id.clone()).await?;
        if note_id.is_temporary() {
            let record = self
                .inner
                .store
                .get_offline_record(&TempId::from_raw(note_id.as_str()))
                .await?;
            return Ok(QueryOutcome {
                data: record.filter(|record| !record.synced).map(|record| record.to_note()),
                from_cache: false,
            });
        }

        if self.is_online() {
            match self.inner.backend.get_record(note_id).await {
                Ok(Some(note)) => {
                    self.cache_note(&note).await;
                    return Ok(QueryOutcome {
                        data: Some(note),
                        from_cache: false,
                    });
                }
                Ok(None) => {
                    self.evict_note(note_id).await;
                    return Ok(QueryOutcome {
                        data: None,
                        from_cache: false,
                    });
                }
                Err(error) => tracing::warn!("Fetching {} failed, using cache: {}", note_id, error),
            }
        }

        let cached = self
            .inner
            .cache
            .get_cached_note(&self.inner.owner_id, note_id)
            .await
            .unwrap_or_else(|error| {
                tracing::warn!("Could not read cached note {}: {}", note_id, error);
                None
            });
        Ok(QueryOutcome {
            data: cached,
            from_cache: true,
        })
    }

    pub async fn list_tags(&self) -> Result<QueryOutcome<Vec<String>>> {
        let owner_id = self.inner.owner_id.as_str();
        if self.is_online() {
            match self.inner.backend.list_tags(owner_id).await {
                Ok(tags) => {
                    if let Err(error) = self.inner.cache.cache_tags(owner_id, &tags).await {
                        tracing::warn!("Could not cache tags: {}", error);
                    }
                    return Ok(QueryOutcome {
                        data: tags,
                        from_cache: false,
                    });
                }
                Err(error) => tracing::warn!("Listing tags failed, using cache: {}", error),
            }
        }

        let cached = self.inner.cache.get_cached_tags(owner_id).await.unwrap_or_else(|error| {
            tracing::warn!("Could not read cached tags: {}", error);
            None
        });
        Ok(QueryOutcome {
            data: cached.unwrap_or_default(),
            from_cache: true,
        })
    }

    pub async fn list_categories(&self) -> Result<QueryOutcome<Vec<String>>> {
        let owner_id = self.inner.owner_id.as_str();
        if self.is_online() {
            match self.inner.backend.list_categories(owner_id).await {
                Ok(categories) => {
                    if let Err(error) = self.inner.cache.cache_categories(owner_id, &categories).await {
                        tracing::warn!("Could not cache categories: {}", error);
                    }
                    return Ok(QueryOutcome {
                        data: categories,
                        from_cache: false,
                    });
                }
                Err(error) => tracing::warn!("Listing categories failed, using cache: {}", error),
            }
        }

        let cached = self
            .inner
            .cache
            .get_cached_categories(owner_id)
            .await
            .unwrap_or_else(|error| {
                tracing::warn!("Could not read cached categories: {}", error);
                None
            });
        Ok(QueryOutcome {
            data: cached.unwrap_or_default(),
            from_cache: true,
        })
    }

    // Maintenance

    pub async fn get_offline_stats(&self) -> Result<OfflineStats> {
        self.inner.store.offline_stats(&self.inner.owner_id).await
    }

    pub async fn has_pending_sync(&self) -> Result<bool> {
        Ok(self.get_offline_stats().await?.total_pending() > 0)
    }

    pub async fn clear_all_cache(&self) -> Result<usize> {
        let cleared = self.inner.cache.clear_all(Some(&self.inner.owner_id)).await?;
        tracing::info!("Cleared {} cached entries", cleared);
        Ok(cleared)
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.inner.cache.stats(&self.inner.owner_id).await
    }

    pub async fn list_drafts(&self) -> Result<Vec<Draft>> {
        self.inner.drafts.list_drafts(Some(&self.inner.owner_id)).await
    }

    pub async fn check_for_recoverable_draft(
        &self,
        key: &DraftKey,
        server: &ServerState,
    ) -> Result<Option<Draft>> {
        self.inner.drafts.check_for_recoverable_draft(key, server).await
    }

    pub async fn restore_draft(&self, key: &DraftKey) -> Result<Option<DraftSnapshot>> {
        self.inner.drafts.restore_draft(key).await
    }

    pub async fn discard_draft(&self, key: &DraftKey, server: &ServerState) -> Result<String> {
        self.inner.drafts.discard_draft(key, server).await
    }

    pub async fn list_sync_queue(&self, statuses: &[SyncStatus]) -> Result<Vec<SyncQueueItem>> {
        self.inner.store.list_queue(&self.inner.owner_id, statuses).await
    }

    pub async fn list_terminal_failures(&self) -> Result<Vec<SyncQueueItem>> {
        self.inner.orchestrator.list_terminal_failures().await
    }

    pub async fn retry_terminal(&self, id: i64) -> Result<bool> {
        self.inner.orchestrator.retry_terminal(id).await
    }

    pub async fn discard_sync_item(&self, id: i64) -> Result<bool> {
        self.inner.orchestrator.discard_sync_item(id).await
    }

    /// Manual drain.
    pub async fn sync_now(&self) -> Result<DrainOutcome> {
        self.inner.orchestrator.sync_all().await
    }

    // Lifecycle

    /// Start the sync triggers and the autosave push.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        self.inner.orchestrator.start().await;
        tasks.push(self.spawn_autosave_push());
    }

    /// Feed the network monitor from an HTTP health probe until shutdown.
    pub async fn attach_probe(&self, probe: ConnectivityProbe) {
        let handle = probe.spawn(self.inner.network.clone(), self.inner.shutdown.subscribe());
        self.inner.tasks.lock().await.push(handle);
    }

    /// Drafts saved by the debounce timer are pushed like an explicit save.
    /// Drafts of notes that were never saved stay local.
    fn spawn_autosave_push(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let mut saved = self.inner.drafts.subscribe();
        let mut shutdown = self.inner.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    draft = saved.recv() => match draft {
                        Ok(draft) => engine.push_autosaved(draft).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Autosave push skipped {} drafts", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    async fn push_autosaved(&self, draft: Draft) {
        let Some(note_id) = draft.key.note_id() else {
            return;
        };
        if draft.owner_id != self.inner.owner_id {
            return;
        }
        let key = draft.key.clone();
        let fields = draft.snapshot().into_fields(self.inner.owner_id.clone());
        if let Err(error) = self.push_update(&key, note_id, fields).await {
            tracing::warn!("Autosave push for {} failed, draft kept: {}", key, error);
        }
    }

    /// Stop timers and background tasks. Pending debounced edits are dropped;
    /// persisted drafts survive for recovery.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.drafts.shutdown().await;
        self.inner.orchestrator.shutdown().await;

        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for task in tasks {
            if let Err(error) = task.await {
                tracing::warn!("Engine task ended abnormally: {}", error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeFailure};
    use crate::util::{Clock, ManualClock};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Harness {
        engine: SyncEngine<FakeBackend>,
        backend: Arc<FakeBackend>,
        clock: Arc<ManualClock>,
    }

    async fn harness_with_store(store: LocalStore, online: bool) -> Harness {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(FakeBackend::new());
        let engine = SyncEngine::new(
            "u1",
            backend.clone(),
            store,
            clock.clone(),
            EngineConfig::default(),
            online,
        )
        .unwrap();
        Harness {
            engine,
            backend,
            clock,
        }
    }

    async fn harness(online: bool) -> Harness {
        harness_with_store(LocalStore::open_in_memory().await.unwrap(), online).await
    }

    fn server_note(id: &str, title: &str, updated_at: i64) -> Note {
        Note {
            id: NoteId::new(id),
            owner_id: "u1".to_string(),
            title: title.to_string(),
            content: format!("{title} body"),
            tags: vec![],
            category: None,
            created_at: updated_at,
            updated_at: Some(updated_at),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn offline_note_syncs_after_reconnect_under_real_id() {
        let h = harness(false).await;
        h.engine.start().await;

        let key = DraftKey::new_note(h.clock.now_ms());
        let outcome = h
            .engine
            .save_note(key.clone(), DraftSnapshot::new("Trip Plan", "flights"))
            .await
            .unwrap();
        let WriteOutcome::Queued(item) = outcome else {
            panic!("expected the create to be queued");
        };
        let temp_id = item.mutation.note_id();
        assert!(temp_id.is_temporary());
        assert!(h.engine.list_drafts().await.unwrap().is_empty());

        // edit the provisional note while still offline
        h.engine
            .save_note(
                DraftKey::for_note(&temp_id),
                DraftSnapshot::new("Trip Plan", "flights and hotel"),
            )
            .await
            .unwrap();

        let listed = h.engine.list_notes(&NoteFilter::default()).await.unwrap();
        assert!(listed.from_cache);
        assert_eq!(listed.data.len(), 1);
        assert_eq!(listed.data[0].id, temp_id);
        assert_eq!(listed.data[0].content, "flights and hotel");
        assert_eq!(h.engine.get_offline_stats().await.unwrap().total_pending(), 3);

        h.engine.network().set_online(true);
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let notes = h.backend.notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Trip Plan");
        assert_eq!(notes[0].content, "flights and hotel");
        assert!(!h.engine.has_pending_sync().await.unwrap());

        let listed = h.engine.list_notes(&NoteFilter::default()).await.unwrap();
        assert!(!listed.from_cache);
        assert_eq!(listed.data.len(), 1);
        assert_eq!(listed.data[0].id, notes[0].id);

        h.engine.shutdown().await;
    }

    async fn synced_offline_note(h: &Harness) -> (NoteId, NoteId) {
        let record = h
            .engine
            .create_note_offline(NoteFields::new("u1", "Trip Plan").with_content("flights"))
            .await
            .unwrap();
        h.engine.network().set_online(true);
        h.engine.sync_now().await.unwrap();

        let notes = h.backend.notes();
        assert_eq!(notes.len(), 1);
        assert!(h.engine.store().get_offline_record(&record.temp_id).await.unwrap().is_none());
        (record.to_note().id, notes[0].id.clone())
    }

    #[tokio::test]
    async fn edit_under_temp_id_after_sync_reaches_backend() {
        let h = harness(false).await;
        let (temp_id, real_id) = synced_offline_note(&h).await;

        h.engine.network().set_online(false);
        let outcome = h
            .engine
            .save_note(
                DraftKey::for_note(&temp_id),
                DraftSnapshot::new("Trip Plan", "edited after sync"),
            )
            .await
            .unwrap();
        let WriteOutcome::Queued(item) = outcome else {
            panic!("expected the edit to be queued offline");
        };
        assert_eq!(item.mutation.note_id(), real_id);

        h.engine.network().set_online(true);
        h.engine.sync_now().await.unwrap();
        assert_eq!(h.backend.note(&real_id).unwrap().content, "edited after sync");
        assert!(h.engine.list_terminal_failures().await.unwrap().is_empty());

        let outcome = h
            .engine
            .save_note(
                DraftKey::for_note(&temp_id),
                DraftSnapshot::new("Trip Plan", "edited online"),
            )
            .await
            .unwrap();
        assert!(!outcome.is_queued());
        assert_eq!(h.backend.note(&real_id).unwrap().content, "edited online");

        let fetched = h.engine.get_note(&temp_id).await.unwrap();
        assert_eq!(fetched.data.map(|note| note.id), Some(real_id));
    }

    #[tokio::test]
    async fn delete_under_temp_id_after_sync_deletes_on_backend() {
        let h = harness(false).await;
        let (temp_id, _) = synced_offline_note(&h).await;

        let outcome = h.engine.delete_note(&temp_id).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Applied(()));
        assert!(h.backend.notes().is_empty());
    }

    #[tokio::test]
    async fn mutation_queued_under_temp_id_after_sync_resolves_on_drain() {
        let h = harness(false).await;
        let (temp_id, _) = synced_offline_note(&h).await;

        h.engine
            .orchestrator()
            .add_to_sync_queue(SyncMutation::Delete { note_id: temp_id })
            .await
            .unwrap();
        let DrainOutcome::Completed(report) = h.engine.sync_now().await.unwrap() else {
            panic!("expected a completed drain");
        };
        assert_eq!(report.synced, 1);
        assert!(report.errors.is_empty());
        assert!(h.backend.notes().is_empty());
    }

    #[tokio::test]
    async fn online_save_writes_through_and_clears_draft() {
        let h = harness(true).await;
        h.backend.seed(server_note("n7", "Groceries", 500));

        let key = DraftKey::for_note(&NoteId::new("n7"));
        let outcome = h
            .engine
            .save_note(key.clone(), DraftSnapshot::new("Groceries", "milk"))
            .await
            .unwrap();

        let WriteOutcome::Applied(note) = outcome else {
            panic!("expected a direct write");
        };
        assert_eq!(note.content, "milk");
        assert!(h.engine.drafts().get_draft(&key).await.unwrap().is_none());
        assert!(h.engine.list_sync_queue(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_is_queued() {
        let h = harness(true).await;
        h.backend.seed(server_note("n7", "Groceries", 500));
        h.backend.fail_next(1, FakeFailure::Transient);

        let outcome = h
            .engine
            .save_note(
                DraftKey::for_note(&NoteId::new("n7")),
                DraftSnapshot::new("Groceries", "eggs"),
            )
            .await
            .unwrap();
        assert!(outcome.is_queued());

        let report = match h.engine.sync_now().await.unwrap() {
            DrainOutcome::Completed(report) => report,
            other => panic!("unexpected drain outcome {other:?}"),
        };
        assert_eq!(report.synced, 1);
        assert_eq!(h.backend.note(&NoteId::new("n7")).unwrap().content, "eggs");
    }

    #[tokio::test]
    async fn failed_create_reuses_client_id_for_dedup() {
        let h = harness(true).await;
        h.backend.fail_next(1, FakeFailure::Transient);

        let outcome = h
            .engine
            .save_note(DraftKey::new_note(1), DraftSnapshot::new("Idea", ""))
            .await
            .unwrap();
        let WriteOutcome::Queued(item) = outcome else {
            panic!("expected the create to be queued");
        };

        let calls = h.backend.calls();
        assert_eq!(calls, vec![format!("create {}", item.mutation.note_id())]);

        h.engine.sync_now().await.unwrap();
        assert_eq!(h.backend.notes().len(), 1);
    }

    #[tokio::test]
    async fn deleting_offline_note_drops_it_locally() {
        let h = harness(false).await;
        let record = h
            .engine
            .create_note_offline(NoteFields::new("u1", "scratch"))
            .await
            .unwrap();

        let outcome = h.engine.delete_note(&record.temp_id.as_note_id()).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Applied(()));
        assert!(h.engine.list_sync_queue(&[]).await.unwrap().is_empty());
        assert_eq!(h.engine.get_offline_stats().await.unwrap(), OfflineStats::default());
    }

    #[tokio::test]
    async fn offline_delete_of_server_note_is_queued() {
        let h = harness(false).await;
        let outcome = h.engine.delete_note(&NoteId::new("n3")).await.unwrap();
        assert!(outcome.is_queued());

        h.engine.network().set_online(true);
        h.engine.sync_now().await.unwrap();
        assert_eq!(h.backend.calls(), vec!["delete n3".to_string()]);
    }

    #[tokio::test]
    async fn reads_fall_back_to_cache_until_ttl() {
        let h = harness(true).await;
        h.backend.seed(server_note("n1", "cached", 100));
        h.backend.set_taxonomy(&["work"], &["inbox"]);

        assert!(!h.engine.list_notes(&NoteFilter::default()).await.unwrap().from_cache);
        h.engine.list_tags().await.unwrap();
        h.engine.get_note(&NoteId::new("n1")).await.unwrap();

        h.engine.network().set_online(false);
        let listed = h.engine.list_notes(&NoteFilter::default()).await.unwrap();
        assert!(listed.from_cache);
        assert_eq!(listed.data.len(), 1);
        assert_eq!(h.engine.list_tags().await.unwrap().data, vec!["work".to_string()]);
        assert_eq!(
            h.engine.get_note(&NoteId::new("n1")).await.unwrap().data.unwrap().title,
            "cached"
        );
        // never fetched, never cached
        assert!(h.engine.list_categories().await.unwrap().data.is_empty());

        h.clock.advance(EngineConfig::default().cache_ttl_millis() + 1);
        let listed = h.engine.list_notes(&NoteFilter::default()).await.unwrap();
        assert!(listed.from_cache);
        assert!(listed.data.is_empty());
    }

    #[tokio::test]
    async fn backend_failure_serves_cache_merged_with_local() {
        let h = harness(true).await;
        h.backend.seed(server_note("n1", "older", 100));
        h.engine.list_notes(&NoteFilter::default()).await.unwrap();

        h.clock.set(5_000);
        h.engine
            .create_note_offline(NoteFields::new("u1", "newer"))
            .await
            .unwrap();
        h.backend.fail_next(1, FakeFailure::Transient);

        let listed = h.engine.list_notes(&NoteFilter::default()).await.unwrap();
        assert!(listed.from_cache);
        let titles = listed.data.iter().map(|note| note.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn filtered_list_applies_filter_to_local_records() {
        let h = harness(false).await;
        h.engine
            .create_note_offline(NoteFields::new("u1", "tagged").with_tags(["travel"]))
            .await
            .unwrap();
        h.engine
            .create_note_offline(NoteFields::new("u1", "plain"))
            .await
            .unwrap();

        let filter = NoteFilter {
            tag: Some("travel".to_string()),
            category: None,
        };
        let listed = h.engine.list_notes(&filter).await.unwrap();
        assert_eq!(listed.data.len(), 1);
        assert_eq!(listed.data[0].title, "tagged");
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_pushes_existing_note_after_debounce() {
        let h = harness(true).await;
        h.backend.seed(server_note("n2", "Journal", 100));
        h.engine.start().await;

        let key = DraftKey::for_note(&NoteId::new("n2"));
        h.engine
            .edit_note(key.clone(), DraftSnapshot::new("Journal", "day one"))
            .await;
        h.engine
            .edit_note(key.clone(), DraftSnapshot::new("Journal", "day one, rain"))
            .await;

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(h.backend.call_count("update"), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.backend.call_count("update"), 1);
        assert_eq!(h.backend.note(&NoteId::new("n2")).unwrap().content, "day one, rain");
        assert!(h.engine.drafts().get_draft(&key).await.unwrap().is_none());

        h.engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn new_note_drafts_stay_local_until_saved() {
        let h = harness(true).await;
        h.engine.start().await;

        let key = DraftKey::new_note(h.clock.now_ms());
        h.engine
            .edit_note(key.clone(), DraftSnapshot::new("Unsaved", "thoughts"))
            .await;
        tokio::time::sleep(Duration::from_millis(2_100)).await;

        assert!(h.backend.calls().is_empty());
        assert!(h.engine.drafts().get_draft(&key).await.unwrap().is_some());
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn draft_survives_restart_and_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("margin.db");
        let key = DraftKey::for_note(&NoteId::new("n4"));

        {
            let store = LocalStore::open_path(&path).await.unwrap();
            let h = harness_with_store(store, false).await;
            h.clock.set(10_000);
            h.engine
                .drafts()
                .persist(key.clone(), "u1", DraftSnapshot::new("Essay", "second paragraph"))
                .await
                .unwrap();
            h.engine.shutdown().await;
        }

        let store = LocalStore::open_path(&path).await.unwrap();
        let h = harness_with_store(store, true).await;
        let server = ServerState::new(5_000, "first paragraph");
        let draft = h
            .engine
            .check_for_recoverable_draft(&key, &server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(draft.content, "second paragraph");

        let restored = h.engine.restore_draft(&key).await.unwrap().unwrap();
        assert_eq!(restored.content, "second paragraph");
        assert!(h.engine.list_drafts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_all_cache_empties_stats() {
        let h = harness(true).await;
        h.backend.seed(server_note("n1", "a", 1));
        h.engine.list_notes(&NoteFilter::default()).await.unwrap();
        assert!(h.engine.cache_stats().await.unwrap().has_notes_list);

        h.engine.clear_all_cache().await.unwrap();
        let stats = h.engine.cache_stats().await.unwrap();
        assert!(!stats.has_notes_list);
        assert_eq!(stats.notes_count, 0);
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = EngineConfig {
            max_retries: 0,
            ..EngineConfig::default()
        };
        let store = LocalStore::open_in_memory().await.unwrap();
        let result = SyncEngine::new(
            "u1",
            Arc::new(FakeBackend::new()),
            store,
            Arc::new(ManualClock::new(0)),
            config,
            true,
        );
        assert!(result.is_err());
    }
}
