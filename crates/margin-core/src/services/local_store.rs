//! Shared local store handle used by the engine components.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{
    Database, DraftRepository, OfflineRecordRepository, SqliteCacheRepository,
    SqliteDraftRepository, SqliteOfflineRecordRepository, SqliteSyncQueueRepository,
    SyncQueueRepository, SyncedFilter,
};
use crate::models::{
    CacheShape, CacheStats, CachedEntity, Draft, DraftKey, NoteId, OfflineRecord, OfflineStats,
    SyncMutation, SyncQueueItem, SyncStatus, TempId,
};
use crate::Result;

/// Thread-safe handle over the local store and its repositories.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh store is created.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable: {}. Starting from an empty store.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Run raw SQL against the store, for tests that need to damage it.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<usize> {
        let db = self.db.lock().await;
        Ok(db.connection().execute(sql, [])?)
    }

    /// Filesystem location, if the store is on disk.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        error.is_storage()
            && error
                .to_string()
                .to_ascii_lowercase()
                .contains("file is not a database")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("margin.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let wal_suffixes = [format!("{base_name}-wal"), format!("{base_name}-shm")];

        for sidecar in wal_suffixes {
            let path = parent.join(sidecar);
            if path.exists() {
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale journal file {}", path.display());
            }
        }

        Ok(())
    }

    // Drafts

    /// Insert or replace a draft.
    pub async fn put_draft(&self, draft: &Draft) -> Result<()> {
        let db = self.db.lock().await;
        SqliteDraftRepository::new(db.connection()).put(draft)
    }

    /// Fetch a draft by key.
    pub async fn get_draft(&self, key: &DraftKey) -> Result<Option<Draft>> {
        let db = self.db.lock().await;
        SqliteDraftRepository::new(db.connection()).get(key)
    }

    /// List drafts newest-first.
    pub async fn list_drafts(&self, owner_id: Option<&str>) -> Result<Vec<Draft>> {
        let db = self.db.lock().await;
        SqliteDraftRepository::new(db.connection()).get_all(owner_id)
    }

    /// Delete a draft.
    pub async fn delete_draft(&self, key: &DraftKey) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteDraftRepository::new(db.connection()).delete(key)
    }

    // Offline-created records

    /// Insert or replace an offline-created record.
    pub async fn put_offline_record(&self, record: &OfflineRecord) -> Result<()> {
        let db = self.db.lock().await;
        SqliteOfflineRecordRepository::new(db.connection()).put(record)
    }

    /// Fetch an offline-created record.
    pub async fn get_offline_record(&self, temp_id: &TempId) -> Result<Option<OfflineRecord>> {
        let db = self.db.lock().await;
        SqliteOfflineRecordRepository::new(db.connection()).get(temp_id)
    }

    /// List an owner's offline-created records.
    pub async fn list_offline_records(
        &self,
        owner_id: &str,
        filter: SyncedFilter,
    ) -> Result<Vec<OfflineRecord>> {
        let db = self.db.lock().await;
        SqliteOfflineRecordRepository::new(db.connection()).get_all(owner_id, filter)
    }

    /// Delete an offline-created record.
    pub async fn delete_offline_record(&self, temp_id: &TempId) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteOfflineRecordRepository::new(db.connection()).delete(temp_id)
    }

    /// Attach the backend id to an offline-created record.
    pub async fn mark_offline_record_synced(
        &self,
        owner_id: &str,
        temp_id: &TempId,
        real_id: &NoteId,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteOfflineRecordRepository::new(db.connection()).mark_synced(owner_id, temp_id, real_id)
    }

    /// Backend id a temporary id was resolved to.
    pub async fn resolved_id(&self, owner_id: &str, temp_id: &TempId) -> Result<Option<NoteId>> {
        let db = self.db.lock().await;
        SqliteOfflineRecordRepository::new(db.connection()).resolved_id(owner_id, temp_id)
    }

    /// Delete an owner's records that already have a backend id.
    pub async fn collect_synced_records(&self, owner_id: &str) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteOfflineRecordRepository::new(db.connection()).delete_synced(owner_id)
    }

    // Sync queue

    /// Append a pending queue item.
    pub async fn enqueue(
        &self,
        owner_id: &str,
        mutation: &SyncMutation,
        enqueued_at: i64,
        max_retries: u32,
    ) -> Result<SyncQueueItem> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).enqueue(
            owner_id,
            mutation,
            enqueued_at,
            max_retries,
        )
    }

    /// Fetch a queue item.
    pub async fn get_queue_item(&self, id: i64) -> Result<Option<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).get(id)
    }

    /// List an owner's queue items, oldest first.
    pub async fn list_queue(
        &self,
        owner_id: &str,
        statuses: &[SyncStatus],
    ) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).get_all(owner_id, statuses)
    }

    /// Items a drain should attempt, oldest first.
    pub async fn drainable_items(&self, owner_id: &str) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).drainable(owner_id)
    }

    /// Items that exhausted their retry budget.
    pub async fn terminal_items(&self, owner_id: &str) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).terminal(owner_id)
    }

    /// Move a queue item to a new status.
    pub async fn set_item_status(&self, id: i64, status: SyncStatus) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).set_status(id, status)
    }

    /// Record a failed attempt.
    pub async fn record_item_failure(
        &self,
        id: i64,
        error: &str,
        exhaust: bool,
    ) -> Result<SyncQueueItem> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).record_failure(id, error, exhaust)
    }

    /// Reset a failed item to pending with a fresh budget.
    pub async fn reset_queue_item(&self, id: i64) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).reset(id)
    }

    /// Requeue items left in `syncing` by an interrupted drain.
    pub async fn requeue_interrupted(&self, owner_id: &str) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).requeue_interrupted(owner_id)
    }

    /// Point queued items at the backend id of a synced offline record.
    pub async fn remap_queue_note_id(
        &self,
        owner_id: &str,
        temp_id: &TempId,
        real_id: &NoteId,
    ) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).remap_note_id(owner_id, temp_id, real_id)
    }

    /// Delete a queue item.
    pub async fn delete_queue_item(&self, id: i64) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).delete(id)
    }

    /// Delete an owner's succeeded items.
    pub async fn sweep_succeeded(&self, owner_id: &str) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteSyncQueueRepository::new(db.connection()).delete_succeeded(owner_id)
    }

    // Read cache

    /// Store a cache entry for one query shape.
    pub async fn put_cached<T: Serialize + Sync>(
        &self,
        shape: CacheShape,
        entity: &CachedEntity<T>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).put(shape, entity)
    }

    /// Read a cache entry regardless of age.
    pub async fn get_cached<T: DeserializeOwned>(
        &self,
        shape: CacheShape,
        key: &str,
    ) -> Result<Option<CachedEntity<T>>> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).get(shape, key)
    }

    /// Remove a single cache entry.
    pub async fn delete_cached(&self, shape: CacheShape, key: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).delete(shape, key)
    }

    /// Remove cached reads for one owner, or all owners.
    pub async fn clear_cache(&self, owner_id: Option<&str>) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).clear(owner_id)
    }

    /// Summarize what is cached for an owner.
    pub async fn cache_stats(&self, owner_id: &str) -> Result<CacheStats> {
        let db = self.db.lock().await;
        let repo = SqliteCacheRepository::new(db.connection());
        Ok(CacheStats {
            notes_count: repo.count(CacheShape::Note, owner_id)?,
            has_notes_list: repo.count(CacheShape::NotesList, owner_id)? > 0,
            has_tags: repo.count(CacheShape::Tags, owner_id)? > 0,
            has_categories: repo.count(CacheShape::Categories, owner_id)? > 0,
            last_cached: repo.last_cached(CacheShape::NotesList, owner_id)?,
        })
    }

    /// Count work that has not reached the backend yet.
    pub async fn offline_stats(&self, owner_id: &str) -> Result<OfflineStats> {
        let db = self.db.lock().await;
        let records = SqliteOfflineRecordRepository::new(db.connection());
        let queue = SqliteSyncQueueRepository::new(db.connection());
        let drafts = SqliteDraftRepository::new(db.connection());

        Ok(OfflineStats {
            offline_records: records.get_all(owner_id, SyncedFilter::Unsynced)?.len(),
            pending_queue: queue.drainable(owner_id)?.len(),
            terminal_failures: queue.terminal(owner_id)?.len(),
            drafts: drafts.get_all(Some(owner_id))?.len(),
        })
    }
}
