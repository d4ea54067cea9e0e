//! Debounced draft persistence and crash recovery.
//!
//! Every editor change goes through [`DraftManager::save_draft`]. The latest
//! snapshot per key is persisted once the editor has been idle for the
//! debounce period, using the same version tracking as an idle autosave: a
//! newer snapshot supersedes the timer of the previous one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::{normalize_content, Draft, DraftKey, DraftSnapshot, ServerState};
use crate::services::LocalStore;
use crate::util::SharedClock;

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct PendingSave {
    version: u64,
    owner_id: String,
    snapshot: DraftSnapshot,
    handle: JoinHandle<()>,
}

struct Inner {
    store: LocalStore,
    clock: SharedClock,
    debounce: Duration,
    next_version: AtomicU64,
    pending: Mutex<HashMap<DraftKey, PendingSave>>,
    closed: AtomicBool,
    last_persisted: Mutex<HashMap<DraftKey, DraftSnapshot>>,
    saved: broadcast::Sender<Draft>,
}

/// Buffers in-progress edits locally.
#[derive(Clone)]
pub struct DraftManager {
    inner: Arc<Inner>,
}

impl DraftManager {
    pub fn new(store: LocalStore, clock: SharedClock, debounce: Duration) -> Self {
        let (saved, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                debounce,
                next_version: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                last_persisted: Mutex::new(HashMap::new()),
                saved,
            }),
        }
    }

    /// Drafts written by the debounce timer.
    pub fn subscribe(&self) -> broadcast::Receiver<Draft> {
        self.inner.saved.subscribe()
    }

    /// Schedule a snapshot to be persisted after the debounce period.
    ///
    /// A later call for the same key restarts the timer with the newer
    /// snapshot, so rapid edits produce a single write. Ignored after
    /// [`DraftManager::shutdown`].
    pub async fn save_draft(&self, key: DraftKey, owner_id: &str, snapshot: DraftSnapshot) {
        let mut pending = self.inner.pending.lock().await;
        if self.inner.closed.load(Ordering::Acquire) {
            tracing::debug!("Draft manager shut down, ignoring edit of {}", key);
            return;
        }

        let version = self.inner.next_version.fetch_add(1, Ordering::Relaxed);
        let manager = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(manager.inner.debounce).await;
            manager.fire(task_key, version).await;
        });

        let previous = pending.insert(
            key,
            PendingSave {
                version,
                owner_id: owner_id.to_string(),
                snapshot,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    async fn fire(&self, key: DraftKey, version: u64) {
        let pending = {
            let mut pending = self.inner.pending.lock().await;
            let current = pending
                .get(&key)
                .is_some_and(|entry| entry.version == version);
            // A newer snapshot owns the slot otherwise
            if current {
                pending.remove(&key)
            } else {
                None
            }
        };
        let Some(pending) = pending else {
            return;
        };

        match self
            .write(key.clone(), &pending.owner_id, pending.snapshot)
            .await
        {
            Ok(Some(draft)) => {
                if self.inner.saved.send(draft).is_err() {
                    tracing::trace!("No subscribers for autosaved draft {}", key);
                }
            }
            Ok(None) => {}
            Err(error) => tracing::warn!("Failed to autosave draft {}: {}", key, error),
        }
    }

    /// Persist the pending snapshot of `key` immediately.
    ///
    /// Returns the stored draft, or `None` when nothing was pending or the
    /// snapshot matched what is already stored.
    pub async fn flush(&self, key: &DraftKey) -> Result<Option<Draft>> {
        let pending = self.inner.pending.lock().await.remove(key);
        let Some(pending) = pending else {
            return Ok(None);
        };
        pending.handle.abort();
        self.write(key.clone(), &pending.owner_id, pending.snapshot)
            .await
    }

    /// Persist a snapshot now, superseding any pending one for the same key.
    pub async fn persist(
        &self,
        key: DraftKey,
        owner_id: &str,
        snapshot: DraftSnapshot,
    ) -> Result<Option<Draft>> {
        if let Some(pending) = self.inner.pending.lock().await.remove(&key) {
            pending.handle.abort();
        }
        self.write(key, owner_id, snapshot).await
    }

    async fn write(
        &self,
        key: DraftKey,
        owner_id: &str,
        snapshot: DraftSnapshot,
    ) -> Result<Option<Draft>> {
        let mut last_persisted = self.inner.last_persisted.lock().await;

        let unchanged = match last_persisted.get(&key) {
            Some(last) => last.same_as(&snapshot),
            None => self
                .inner
                .store
                .get_draft(&key)
                .await?
                .is_some_and(|stored| stored.snapshot().same_as(&snapshot)),
        };
        if unchanged {
            tracing::trace!("Draft {} unchanged, skipping write", key);
            return Ok(None);
        }

        let draft = Draft::new(key.clone(), owner_id, snapshot.clone(), self.inner.clock.now_ms());
        self.inner.store.put_draft(&draft).await?;
        last_persisted.insert(key, snapshot);
        drop(last_persisted);

        tracing::debug!("Saved draft {}", draft.key);
        Ok(Some(draft))
    }

    pub async fn get_draft(&self, key: &DraftKey) -> Result<Option<Draft>> {
        self.inner.store.get_draft(key).await
    }

    pub async fn list_drafts(&self, owner_id: Option<&str>) -> Result<Vec<Draft>> {
        self.inner.store.list_drafts(owner_id).await
    }

    /// Decide whether a stored draft should be offered back to the user.
    ///
    /// A draft is recoverable when it was saved after the server's last
    /// modification and its content differs from the server's. Without a
    /// server timestamp any draft is recoverable. A draft that is not
    /// recoverable is stale and gets deleted.
    pub async fn check_for_recoverable_draft(
        &self,
        key: &DraftKey,
        server: &ServerState,
    ) -> Result<Option<Draft>> {
        let Some(draft) = self.inner.store.get_draft(key).await? else {
            return Ok(None);
        };

        let Some(server_updated_at) = server.updated_at else {
            return Ok(Some(draft));
        };

        let newer = draft.last_saved > server_updated_at;
        let differs = normalize_content(&draft.content)
            != normalize_content(server.content.as_deref().unwrap_or_default());
        if newer && differs {
            return Ok(Some(draft));
        }

        tracing::debug!("Deleting stale draft {}", key);
        self.forget(key).await?;
        Ok(None)
    }

    /// Accept a recovered draft: it is deleted and its snapshot returned so
    /// the caller can apply it to the editor.
    pub async fn restore_draft(&self, key: &DraftKey) -> Result<Option<DraftSnapshot>> {
        let draft = self.inner.store.get_draft(key).await?;
        self.forget(key).await?;
        Ok(draft.map(|draft| draft.snapshot()))
    }

    /// Reject a recovered draft and return the server content to keep.
    pub async fn discard_draft(&self, key: &DraftKey, server: &ServerState) -> Result<String> {
        self.forget(key).await?;
        Ok(server.content.clone().unwrap_or_default())
    }

    /// Delete the stored draft for `key`. Pending edits are left alone.
    pub async fn forget(&self, key: &DraftKey) -> Result<bool> {
        let mut last_persisted = self.inner.last_persisted.lock().await;
        last_persisted.remove(key);
        self.inner.store.delete_draft(key).await
    }

    /// Number of snapshots waiting for their debounce timer.
    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Cancel all pending debounce timers without writing. Later edits are
    /// ignored.
    pub async fn shutdown(&self) {
        let mut pending = self.inner.pending.lock().await;
        self.inner.closed.store(true, Ordering::Release);
        let cancelled = pending.len();
        for (_, entry) in pending.drain() {
            entry.handle.abort();
        }
        if cancelled > 0 {
            tracing::info!("Cancelled {} pending draft saves", cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteId;
    use crate::util::ManualClock;
    use pretty_assertions::assert_eq;

    const DEBOUNCE: Duration = Duration::from_millis(2_000);

    async fn setup() -> (DraftManager, LocalStore, Arc<ManualClock>) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(10_000));
        let manager = DraftManager::new(store.clone(), clock.clone(), DEBOUNCE);
        (manager, store, clock)
    }

    fn key() -> DraftKey {
        DraftKey::for_note(&NoteId::new("n1"))
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_produce_single_write() {
        let (manager, store, _) = setup().await;
        let mut saved = manager.subscribe();

        for content in ["a", "ab", "abc"] {
            manager
                .save_draft(key(), "u1", DraftSnapshot::new("T", content))
                .await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(store.get_draft(&key()).await.unwrap().is_none());

        tokio::time::sleep(DEBOUNCE).await;
        let draft = saved.recv().await.unwrap();
        assert_eq!(draft.content, "abc");
        assert!(saved.try_recv().is_err());
        assert_eq!(store.get_draft(&key()).await.unwrap().unwrap().content, "abc");
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test]
    async fn unchanged_snapshot_is_not_rewritten() {
        let (manager, _, clock) = setup().await;

        let first = manager
            .persist(key(), "u1", DraftSnapshot::new("T", "hello"))
            .await
            .unwrap()
            .unwrap();
        clock.advance(5_000);
        let again = manager
            .persist(key(), "u1", DraftSnapshot::new("T", "hello  \r\n"))
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(
            manager.get_draft(&key()).await.unwrap().unwrap().last_saved,
            first.last_saved
        );
    }

    #[tokio::test]
    async fn unchanged_check_survives_restart() {
        let (manager, store, clock) = setup().await;
        manager
            .persist(key(), "u1", DraftSnapshot::new("T", "hello"))
            .await
            .unwrap();

        let restarted = DraftManager::new(store, clock, DEBOUNCE);
        assert!(restarted
            .persist(key(), "u1", DraftSnapshot::new("T", "hello"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn flush_writes_pending_snapshot_now() {
        let (manager, store, _) = setup().await;
        manager
            .save_draft(key(), "u1", DraftSnapshot::new("T", "typed"))
            .await;

        let draft = manager.flush(&key()).await.unwrap().unwrap();
        assert_eq!(draft.content, "typed");
        assert_eq!(store.get_draft(&key()).await.unwrap(), Some(draft));
        assert!(manager.flush(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn draft_newer_than_server_with_different_content_is_recoverable() {
        let (manager, _, clock) = setup().await;
        clock.set(2_000);
        manager
            .persist(key(), "u1", DraftSnapshot::new("T", "draft text"))
            .await
            .unwrap();

        let recovered = manager
            .check_for_recoverable_draft(&key(), &ServerState::new(1_000, "server text"))
            .await
            .unwrap();
        assert_eq!(recovered.unwrap().content, "draft text");
    }

    #[tokio::test]
    async fn stale_or_identical_drafts_are_deleted() {
        let (manager, store, clock) = setup().await;

        clock.set(500);
        manager
            .persist(key(), "u1", DraftSnapshot::new("T", "old"))
            .await
            .unwrap();
        assert!(manager
            .check_for_recoverable_draft(&key(), &ServerState::new(1_000, "server"))
            .await
            .unwrap()
            .is_none());
        assert!(store.get_draft(&key()).await.unwrap().is_none());

        clock.set(2_000);
        manager
            .persist(key(), "u1", DraftSnapshot::new("T", r#"{"b":1,"a":2}"#))
            .await
            .unwrap();
        assert!(manager
            .check_for_recoverable_draft(&key(), &ServerState::new(1_000, r#"{"a":2, "b":1}"#))
            .await
            .unwrap()
            .is_none());
        assert!(store.get_draft(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn any_draft_is_recoverable_without_server_timestamp() {
        let (manager, _, _) = setup().await;
        let new_key = DraftKey::new_note(1);
        manager
            .persist(new_key.clone(), "u1", DraftSnapshot::new("T", "x"))
            .await
            .unwrap();
        assert!(manager
            .check_for_recoverable_draft(&new_key, &ServerState::absent())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn restore_and_discard_delete_the_draft() {
        let (manager, store, _) = setup().await;
        manager
            .persist(key(), "u1", DraftSnapshot::new("T", "mine"))
            .await
            .unwrap();
        let restored = manager.restore_draft(&key()).await.unwrap().unwrap();
        assert_eq!(restored.content, "mine");
        assert!(store.get_draft(&key()).await.unwrap().is_none());

        manager
            .persist(key(), "u1", DraftSnapshot::new("T", "mine again"))
            .await
            .unwrap();
        let kept = manager
            .discard_draft(&key(), &ServerState::new(1, "theirs"))
            .await
            .unwrap();
        assert_eq!(kept, "theirs");
        assert!(store.get_draft(&key()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_timers() {
        let (manager, store, _) = setup().await;
        manager
            .save_draft(key(), "u1", DraftSnapshot::new("T", "unsaved"))
            .await;
        manager.shutdown().await;

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(store.get_draft(&key()).await.unwrap().is_none());
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_after_shutdown_are_ignored() {
        let (manager, store, _) = setup().await;
        manager.shutdown().await;
        manager
            .save_draft(key(), "u1", DraftSnapshot::new("T", "too late"))
            .await;

        assert_eq!(manager.pending_count().await, 0);
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(store.get_draft(&key()).await.unwrap().is_none());
    }
}
