//! Read cache repository implementation

use crate::error::Result;
use crate::models::{CacheShape, CachedEntity};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// `SQLite` storage for cached authoritative reads.
///
/// Payloads are stored as JSON; a payload that no longer decodes is treated
/// as a miss.
pub struct SqliteCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Overwrite the entry stored under `entity.key`
    pub fn put<T: Serialize>(&self, shape: CacheShape, entity: &CachedEntity<T>) -> Result<()> {
        let payload = serde_json::to_string(&entity.payload)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {} (key, owner_id, payload, cached_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    payload = excluded.payload,
                    cached_at = excluded.cached_at",
                shape.table()
            ),
            params![entity.key, entity.owner_id, payload, entity.cached_at],
        )?;
        Ok(())
    }

    /// Read an entry regardless of age
    pub fn get<T: DeserializeOwned>(
        &self,
        shape: CacheShape,
        key: &str,
    ) -> Result<Option<CachedEntity<T>>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT key, owner_id, payload, cached_at FROM {} WHERE key = ?1",
                    shape.table()
                ),
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((key, owner_id, payload, cached_at)) = row else {
            return Ok(None);
        };

        match serde_json::from_str(&payload) {
            Ok(payload) => Ok(Some(CachedEntity {
                key,
                owner_id,
                payload,
                cached_at,
            })),
            Err(error) => {
                tracing::warn!("Ignoring unreadable {:?} cache entry {}: {}", shape, key, error);
                Ok(None)
            }
        }
    }

    /// Remove one entry
    pub fn delete(&self, shape: CacheShape, key: &str) -> Result<bool> {
        let rows = self.conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", shape.table()),
            params![key],
        )?;
        Ok(rows > 0)
    }

    /// Remove every entry of every shape; `None` clears all owners
    pub fn clear(&self, owner_id: Option<&str>) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        for shape in CacheShape::ALL {
            removed += tx.execute(
                &format!(
                    "DELETE FROM {} WHERE ?1 IS NULL OR owner_id = ?1",
                    shape.table()
                ),
                params![owner_id],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Count an owner's entries of one shape
    pub fn count(&self, shape: CacheShape, owner_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE owner_id = ?1", shape.table()),
            params![owner_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Most recent write of one shape for an owner
    pub fn last_cached(&self, shape: CacheShape, owner_id: &str) -> Result<Option<i64>> {
        let last = self.conn.query_row(
            &format!(
                "SELECT MAX(cached_at) FROM {} WHERE owner_id = ?1",
                shape.table()
            ),
            params![owner_id],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(last)
    }
}
