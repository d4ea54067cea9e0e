//! Time-bounded cache of authoritative reads.
//!
//! Entries are written only after a successful backend read and are served
//! while `now - cached_at <= ttl`. Expired entries read as misses.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::models::{CacheShape, CacheStats, CachedEntity, Note, NoteFilter, NoteId};
use crate::services::LocalStore;
use crate::util::SharedClock;

#[derive(Clone)]
pub struct ReadCache {
    store: LocalStore,
    clock: SharedClock,
    ttl_ms: i64,
}

impl ReadCache {
    pub fn new(store: LocalStore, clock: SharedClock, ttl_ms: i64) -> Self {
        Self {
            store,
            clock,
            ttl_ms,
        }
    }

    /// Cache key of a notes list query.
    fn list_key(owner_id: &str, filter: &NoteFilter) -> String {
        if filter.is_empty() {
            return owner_id.to_string();
        }
        format!(
            "{owner_id}?tag={}&category={}",
            filter.tag.as_deref().unwrap_or_default(),
            filter.category.as_deref().unwrap_or_default()
        )
    }

    /// Cache key of a note detail.
    fn note_key(owner_id: &str, id: &NoteId) -> String {
        format!("{owner_id}/{id}")
    }

    async fn put<T: Serialize + Sync>(
        &self,
        shape: CacheShape,
        key: String,
        owner_id: &str,
        payload: T,
    ) -> Result<()> {
        let entity = CachedEntity {
            key,
            owner_id: owner_id.to_string(),
            payload,
            cached_at: self.clock.now_ms(),
        };
        self.store.put_cached(shape, &entity).await
    }

    async fn get<T: DeserializeOwned>(&self, shape: CacheShape, key: &str) -> Result<Option<T>> {
        let Some(entity) = self.store.get_cached::<T>(shape, key).await? else {
            return Ok(None);
        };
        if entity.is_expired(self.clock.now_ms(), self.ttl_ms) {
            tracing::debug!("Cache entry {:?}/{} expired", shape, key);
            return Ok(None);
        }
        Ok(Some(entity.payload))
    }

    pub async fn cache_notes_list(
        &self,
        owner_id: &str,
        filter: &NoteFilter,
        notes: &[Note],
    ) -> Result<()> {
        self.put(
            CacheShape::NotesList,
            Self::list_key(owner_id, filter),
            owner_id,
            notes,
        )
        .await
    }

    pub async fn get_cached_notes_list(
        &self,
        owner_id: &str,
        filter: &NoteFilter,
    ) -> Result<Option<Vec<Note>>> {
        self.get(CacheShape::NotesList, &Self::list_key(owner_id, filter))
            .await
    }

    pub async fn cache_note(&self, owner_id: &str, note: &Note) -> Result<()> {
        self.put(
            CacheShape::Note,
            Self::note_key(owner_id, &note.id),
            owner_id,
            note,
        )
        .await
    }

    pub async fn get_cached_note(&self, owner_id: &str, id: &NoteId) -> Result<Option<Note>> {
        self.get(CacheShape::Note, &Self::note_key(owner_id, id)).await
    }

    /// Drop the cached detail of a note that no longer exists upstream.
    pub async fn evict_note(&self, owner_id: &str, id: &NoteId) -> Result<bool> {
        self.store
            .delete_cached(CacheShape::Note, &Self::note_key(owner_id, id))
            .await
    }

    pub async fn cache_tags(&self, owner_id: &str, tags: &[String]) -> Result<()> {
        self.put(CacheShape::Tags, owner_id.to_string(), owner_id, tags)
            .await
    }

    pub async fn get_cached_tags(&self, owner_id: &str) -> Result<Option<Vec<String>>> {
        self.get(CacheShape::Tags, owner_id).await
    }

    pub async fn cache_categories(&self, owner_id: &str, categories: &[String]) -> Result<()> {
        self.put(CacheShape::Categories, owner_id.to_string(), owner_id, categories)
            .await
    }

    pub async fn get_cached_categories(&self, owner_id: &str) -> Result<Option<Vec<String>>> {
        self.get(CacheShape::Categories, owner_id).await
    }

    /// Remove all cached reads for an owner, or for everyone.
    pub async fn clear_all(&self, owner_id: Option<&str>) -> Result<usize> {
        let removed = self.store.clear_cache(owner_id).await?;
        tracing::info!("Cleared {} cached reads", removed);
        Ok(removed)
    }

    pub async fn stats(&self, owner_id: &str) -> Result<CacheStats> {
        self.store.cache_stats(owner_id).await
    }
}
