//! Offline-created record repository implementation

use crate::error::Result;
use crate::models::{NoteId, OfflineRecord, TempId};
use rusqlite::{params, Connection, OptionalExtension};

/// Which records a listing should return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncedFilter {
    All,
    Unsynced,
    Synced,
}

impl SyncedFilter {
    const fn as_flag(self) -> Option<i32> {
        match self {
            Self::All => None,
            Self::Unsynced => Some(0),
            Self::Synced => Some(1),
        }
    }
}

/// Trait for offline-created record storage operations
pub trait OfflineRecordRepository {
    /// Insert or replace the record stored under `record.temp_id`
    fn put(&self, record: &OfflineRecord) -> Result<()>;

    /// Get a record by temporary id
    fn get(&self, temp_id: &TempId) -> Result<Option<OfflineRecord>>;

    /// List an owner's records, oldest first
    fn get_all(&self, owner_id: &str, filter: SyncedFilter) -> Result<Vec<OfflineRecord>>;

    /// Delete a record; returns whether a row was removed
    fn delete(&self, temp_id: &TempId) -> Result<bool>;

    /// Attach the backend id, flip `synced` and remember the resolution, in
    /// one transaction.
    ///
    /// Returns `false` when the record is missing or already synced. The
    /// resolution is remembered either way.
    fn mark_synced(&self, owner_id: &str, temp_id: &TempId, real_id: &NoteId) -> Result<bool>;

    /// Backend id a temporary id was resolved to, if its create has landed
    fn resolved_id(&self, owner_id: &str, temp_id: &TempId) -> Result<Option<NoteId>>;

    /// Garbage-collect an owner's synced records
    fn delete_synced(&self, owner_id: &str) -> Result<usize>;
}

/// `SQLite` implementation of `OfflineRecordRepository`
pub struct SqliteOfflineRecordRepository<'a> {
    conn: &'a Connection,
}

const RECORD_COLUMNS: &str =
    "temp_id, owner_id, title, content, tags, category, created_at, synced, real_id";

impl<'a> SqliteOfflineRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<OfflineRecord> {
        let tags: String = row.get(4)?;
        Ok(OfflineRecord {
            temp_id: TempId::from_raw(row.get::<_, String>(0)?),
            owner_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
            category: row.get(5)?,
            created_at: row.get(6)?,
            synced: row.get::<_, i32>(7)? != 0,
            real_id: row.get::<_, Option<String>>(8)?.map(NoteId::new),
        })
    }
}

impl OfflineRecordRepository for SqliteOfflineRecordRepository<'_> {
    fn put(&self, record: &OfflineRecord) -> Result<()> {
        let tags = serde_json::to_string(&record.tags)?;
        self.conn.execute(
            "INSERT INTO offline_records (temp_id, owner_id, title, content, tags, category, created_at, synced, real_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(temp_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                title = excluded.title,
                content = excluded.content,
                tags = excluded.tags,
                category = excluded.category,
                created_at = excluded.created_at,
                synced = excluded.synced,
                real_id = excluded.real_id",
            params![
                record.temp_id.as_str(),
                record.owner_id,
                record.title,
                record.content,
                tags,
                record.category,
                record.created_at,
                i32::from(record.synced),
                record.real_id.as_ref().map(NoteId::as_str)
            ],
        )?;
        Ok(())
    }

    fn get(&self, temp_id: &TempId) -> Result<Option<OfflineRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM offline_records WHERE temp_id = ?1"),
                params![temp_id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn get_all(&self, owner_id: &str, filter: SyncedFilter) -> Result<Vec<OfflineRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM offline_records
             WHERE owner_id = ?1 AND (?2 IS NULL OR synced = ?2)
             ORDER BY created_at ASC, temp_id ASC"
        ))?;

        let records = stmt
            .query_map(params![owner_id, filter.as_flag()], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn delete(&self, temp_id: &TempId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM offline_records WHERE temp_id = ?1",
            params![temp_id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn mark_synced(&self, owner_id: &str, temp_id: &TempId, real_id: &NoteId) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(
            "UPDATE offline_records SET synced = 1, real_id = ?2
             WHERE temp_id = ?1 AND synced = 0",
            params![temp_id.as_str(), real_id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO resolved_ids (temp_id, owner_id, real_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(temp_id) DO NOTHING",
            params![temp_id.as_str(), owner_id, real_id.as_str()],
        )?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn resolved_id(&self, owner_id: &str, temp_id: &TempId) -> Result<Option<NoteId>> {
        let real_id = self
            .conn
            .query_row(
                "SELECT real_id FROM resolved_ids WHERE temp_id = ?1 AND owner_id = ?2",
                params![temp_id.as_str(), owner_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(real_id.map(NoteId::new))
    }

    fn delete_synced(&self, owner_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM offline_records WHERE owner_id = ?1 AND synced = 1 AND real_id IS NOT NULL",
            params![owner_id],
        )?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::NoteFields;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn record(owner: &str, title: &str, created_at: i64) -> OfflineRecord {
        OfflineRecord::new(
            NoteFields::new(owner, title).with_tags(["travel"]),
            created_at,
        )
    }

    #[test]
    fn test_put_and_get() {
        let db = setup();
        let repo = SqliteOfflineRecordRepository::new(db.connection());

        let stored = record("u1", "Trip Plan", 1_000);
        repo.put(&stored).unwrap();

        let fetched = repo.get(&stored.temp_id).unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[test]
    fn test_mark_synced_happens_once() {
        let db = setup();
        let repo = SqliteOfflineRecordRepository::new(db.connection());

        let stored = record("u1", "Trip Plan", 1_000);
        repo.put(&stored).unwrap();

        assert!(repo.mark_synced("u1", &stored.temp_id, &NoteId::new("n42")).unwrap());
        assert!(!repo.mark_synced("u1", &stored.temp_id, &NoteId::new("n43")).unwrap());

        let fetched = repo.get(&stored.temp_id).unwrap().unwrap();
        assert!(fetched.synced);
        assert_eq!(fetched.real_id, Some(NoteId::new("n42")));
    }

    #[test]
    fn test_get_all_filters() {
        let db = setup();
        let repo = SqliteOfflineRecordRepository::new(db.connection());

        let first = record("u1", "one", 1);
        let second = record("u1", "two", 2);
        let other_owner = record("u2", "three", 3);
        for r in [&first, &second, &other_owner] {
            repo.put(r).unwrap();
        }
        repo.mark_synced("u1", &first.temp_id, &NoteId::new("n1")).unwrap();

        let unsynced = repo.get_all("u1", SyncedFilter::Unsynced).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].temp_id, second.temp_id);

        let synced = repo.get_all("u1", SyncedFilter::Synced).unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(repo.get_all("u1", SyncedFilter::All).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_synced_keeps_provisional_records() {
        let db = setup();
        let repo = SqliteOfflineRecordRepository::new(db.connection());

        let done = record("u1", "done", 1);
        let pending = record("u1", "pending", 2);
        repo.put(&done).unwrap();
        repo.put(&pending).unwrap();
        repo.mark_synced("u1", &done.temp_id, &NoteId::new("n1")).unwrap();

        assert_eq!(repo.delete_synced("u1").unwrap(), 1);
        assert!(repo.get(&done.temp_id).unwrap().is_none());
        assert!(repo.get(&pending.temp_id).unwrap().is_some());
    }

    #[test]
    fn test_resolved_id_outlives_collected_record() {
        let db = setup();
        let repo = SqliteOfflineRecordRepository::new(db.connection());

        let done = record("u1", "done", 1);
        repo.put(&done).unwrap();
        assert_eq!(repo.resolved_id("u1", &done.temp_id).unwrap(), None);

        repo.mark_synced("u1", &done.temp_id, &NoteId::new("n1")).unwrap();
        repo.delete_synced("u1").unwrap();

        assert_eq!(
            repo.resolved_id("u1", &done.temp_id).unwrap(),
            Some(NoteId::new("n1"))
        );
        assert_eq!(repo.resolved_id("u2", &done.temp_id).unwrap(), None);
    }

    #[test]
    fn test_delete() {
        let db = setup();
        let repo = SqliteOfflineRecordRepository::new(db.connection());

        let stored = record("u1", "x", 1);
        repo.put(&stored).unwrap();
        assert!(repo.delete(&stored.temp_id).unwrap());
        assert!(!repo.delete(&stored.temp_id).unwrap());
    }
}
