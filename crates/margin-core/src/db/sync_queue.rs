//! Sync queue repository implementation

use crate::error::{Error, Result};
use crate::models::{NoteId, SyncMutation, SyncQueueItem, SyncStatus, TempId};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for sync queue storage operations
pub trait SyncQueueRepository {
    /// Append a new `pending` item with `retries = 0`
    fn enqueue(
        &self,
        owner_id: &str,
        mutation: &SyncMutation,
        enqueued_at: i64,
        max_retries: u32,
    ) -> Result<SyncQueueItem>;

    /// Get an item by id
    fn get(&self, id: i64) -> Result<Option<SyncQueueItem>>;

    /// List an owner's items, oldest first; an empty status slice means all
    fn get_all(&self, owner_id: &str, statuses: &[SyncStatus]) -> Result<Vec<SyncQueueItem>>;

    /// Items a drain should pick up: pending, or failed with retries left
    fn drainable(&self, owner_id: &str) -> Result<Vec<SyncQueueItem>>;

    /// Items that failed with no retries left
    fn terminal(&self, owner_id: &str) -> Result<Vec<SyncQueueItem>>;

    /// Move an item to `status`, clearing the last error on success
    fn set_status(&self, id: i64, status: SyncStatus) -> Result<()>;

    /// Mark an item failed, consuming one retry or (when `exhaust`) the whole budget
    fn record_failure(&self, id: i64, error: &str, exhaust: bool) -> Result<SyncQueueItem>;

    /// Put a terminal item back to `pending` with a fresh retry budget
    fn reset(&self, id: i64) -> Result<bool>;

    /// Return items stuck in `syncing` by an interrupted drain to `pending`
    fn requeue_interrupted(&self, owner_id: &str) -> Result<usize>;

    /// Point queued updates/deletes at a backend id once the temp id is resolved
    fn remap_note_id(&self, owner_id: &str, temp_id: &TempId, real_id: &NoteId) -> Result<usize>;

    /// Delete an item; returns whether a row was removed
    fn delete(&self, id: i64) -> Result<bool>;

    /// Sweep an owner's `success` items
    fn delete_succeeded(&self, owner_id: &str) -> Result<usize>;
}

/// `SQLite` implementation of `SyncQueueRepository`
pub struct SqliteSyncQueueRepository<'a> {
    conn: &'a Connection,
}

const ITEM_COLUMNS: &str =
    "id, owner_id, payload, enqueued_at, retries, max_retries, status, last_error";

impl<'a> SqliteSyncQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_items(&self, sql: &str, owner_id: &str) -> Result<Vec<SyncQueueItem>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![owner_id], ItemRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().filter_map(ItemRow::decode).collect())
    }
}

/// Raw queue row; the payload and status are decoded separately so one
/// unreadable row does not fail the whole query.
struct ItemRow {
    id: i64,
    owner_id: String,
    payload: String,
    enqueued_at: i64,
    retries: u32,
    max_retries: u32,
    status: String,
    last_error: Option<String>,
}

impl ItemRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            payload: row.get(2)?,
            enqueued_at: row.get(3)?,
            retries: row.get(4)?,
            max_retries: row.get(5)?,
            status: row.get(6)?,
            last_error: row.get(7)?,
        })
    }

    fn decode(self) -> Option<SyncQueueItem> {
        let mutation = match serde_json::from_str::<SyncMutation>(&self.payload) {
            Ok(mutation) => mutation,
            Err(error) => {
                tracing::warn!("Ignoring unreadable sync queue item {}: {}", self.id, error);
                return None;
            }
        };
        let status = match self.status.parse::<SyncStatus>() {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!("Ignoring sync queue item {} with bad status: {}", self.id, error);
                return None;
            }
        };

        Some(SyncQueueItem {
            id: self.id,
            owner_id: self.owner_id,
            mutation,
            enqueued_at: self.enqueued_at,
            retries: self.retries,
            max_retries: self.max_retries,
            status,
            last_error: self.last_error,
        })
    }
}

impl SyncQueueRepository for SqliteSyncQueueRepository<'_> {
    fn enqueue(
        &self,
        owner_id: &str,
        mutation: &SyncMutation,
        enqueued_at: i64,
        max_retries: u32,
    ) -> Result<SyncQueueItem> {
        let payload = serde_json::to_string(mutation)?;
        self.conn.execute(
            "INSERT INTO sync_queue (owner_id, operation, payload, enqueued_at, retries, max_retries, status)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, 'pending')",
            params![
                owner_id,
                mutation.operation().as_str(),
                payload,
                enqueued_at,
                max_retries
            ],
        )?;

        Ok(SyncQueueItem {
            id: self.conn.last_insert_rowid(),
            owner_id: owner_id.to_string(),
            mutation: mutation.clone(),
            enqueued_at,
            retries: 0,
            max_retries,
            status: SyncStatus::Pending,
            last_error: None,
        })
    }

    fn get(&self, id: i64) -> Result<Option<SyncQueueItem>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE id = ?1"),
                params![id],
                ItemRow::from_row,
            )
            .optional()?;
        Ok(row.and_then(ItemRow::decode))
    }

    fn get_all(&self, owner_id: &str, statuses: &[SyncStatus]) -> Result<Vec<SyncQueueItem>> {
        let items = self.query_items(
            &format!(
                "SELECT {ITEM_COLUMNS} FROM sync_queue WHERE owner_id = ?1
                 ORDER BY enqueued_at ASC, id ASC"
            ),
            owner_id,
        )?;

        if statuses.is_empty() {
            return Ok(items);
        }
        Ok(items
            .into_iter()
            .filter(|item| statuses.contains(&item.status))
            .collect())
    }

    fn drainable(&self, owner_id: &str) -> Result<Vec<SyncQueueItem>> {
        self.query_items(
            &format!(
                "SELECT {ITEM_COLUMNS} FROM sync_queue
                 WHERE owner_id = ?1
                   AND (status = 'pending' OR (status = 'failed' AND retries < max_retries))
                 ORDER BY enqueued_at ASC, id ASC"
            ),
            owner_id,
        )
    }

    fn terminal(&self, owner_id: &str) -> Result<Vec<SyncQueueItem>> {
        self.query_items(
            &format!(
                "SELECT {ITEM_COLUMNS} FROM sync_queue
                 WHERE owner_id = ?1 AND status = 'failed' AND retries >= max_retries
                 ORDER BY enqueued_at ASC, id ASC"
            ),
            owner_id,
        )
    }

    fn set_status(&self, id: i64, status: SyncStatus) -> Result<()> {
        let rows = if status == SyncStatus::Success {
            self.conn.execute(
                "UPDATE sync_queue SET status = ?2, last_error = NULL WHERE id = ?1",
                params![id, status.as_str()],
            )?
        } else {
            self.conn.execute(
                "UPDATE sync_queue SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )?
        };

        if rows == 0 {
            return Err(Error::NotFound(format!("sync queue item {id}")));
        }
        Ok(())
    }

    fn record_failure(&self, id: i64, error: &str, exhaust: bool) -> Result<SyncQueueItem> {
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(
            "UPDATE sync_queue SET
                status = 'failed',
                last_error = ?2,
                retries = CASE WHEN ?3 THEN max_retries ELSE MIN(retries + 1, max_retries) END
             WHERE id = ?1",
            params![id, error, exhaust],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("sync queue item {id}")));
        }
        let item = tx
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE id = ?1"),
                params![id],
                ItemRow::from_row,
            )?
            .decode()
            .ok_or_else(|| Error::NotFound(format!("sync queue item {id}")))?;
        tx.commit()?;
        Ok(item)
    }

    fn reset(&self, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET status = 'pending', retries = 0, last_error = NULL
             WHERE id = ?1 AND status = 'failed'",
            params![id],
        )?;
        Ok(rows > 0)
    }

    fn requeue_interrupted(&self, owner_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET status = 'pending' WHERE owner_id = ?1 AND status = 'syncing'",
            params![owner_id],
        )?;
        Ok(rows)
    }

    fn remap_note_id(&self, owner_id: &str, temp_id: &TempId, real_id: &NoteId) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let items = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM sync_queue
                 WHERE owner_id = ?1 AND status != 'success' AND operation != 'create'"
            ))?;
            let rows = stmt
                .query_map(params![owner_id], ItemRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().filter_map(ItemRow::decode).collect::<Vec<_>>()
        };

        let mut remapped = 0;
        for mut item in items {
            if item.mutation.remap(temp_id, real_id) {
                let payload = serde_json::to_string(&item.mutation)?;
                tx.execute(
                    "UPDATE sync_queue SET payload = ?2 WHERE id = ?1",
                    params![item.id, payload],
                )?;
                remapped += 1;
            }
        }

        tx.commit()?;
        Ok(remapped)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_succeeded(&self, owner_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sync_queue WHERE owner_id = ?1 AND status = 'success'",
            params![owner_id],
        )?;
        Ok(rows)
    }
}
