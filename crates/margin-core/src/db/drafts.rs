//! Draft repository implementation

use crate::error::Result;
use crate::models::{Draft, DraftKey, NoteId};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for draft storage operations
pub trait DraftRepository {
    /// Insert or replace the draft stored under `draft.key`
    fn put(&self, draft: &Draft) -> Result<()>;

    /// Get a draft by key; unreadable rows are reported as missing
    fn get(&self, key: &DraftKey) -> Result<Option<Draft>>;

    /// List drafts, newest first, optionally restricted to one owner
    fn get_all(&self, owner_id: Option<&str>) -> Result<Vec<Draft>>;

    /// Delete a draft; returns whether a row was removed
    fn delete(&self, key: &DraftKey) -> Result<bool>;
}

/// `SQLite` implementation of `DraftRepository`
pub struct SqliteDraftRepository<'a> {
    conn: &'a Connection,
}

const DRAFT_COLUMNS: &str =
    "key, id, note_id, owner_id, title, content, tags, category, last_saved";

/// Raw draft row before the JSON columns are decoded
struct DraftRow {
    key: String,
    id: String,
    note_id: Option<String>,
    owner_id: String,
    title: String,
    content: String,
    tags: String,
    category: Option<String>,
    last_saved: i64,
}

impl DraftRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            id: row.get(1)?,
            note_id: row.get(2)?,
            owner_id: row.get(3)?,
            title: row.get(4)?,
            content: row.get(5)?,
            tags: row.get(6)?,
            category: row.get(7)?,
            last_saved: row.get(8)?,
        })
    }

    fn decode(self) -> Option<Draft> {
        let tags = match serde_json::from_str::<Vec<String>>(&self.tags) {
            Ok(tags) => tags,
            Err(error) => {
                tracing::warn!("Ignoring unreadable draft {}: {}", self.key, error);
                return None;
            }
        };

        Some(Draft {
            id: self.id,
            key: DraftKey::from_raw(self.key),
            note_id: self.note_id.map(NoteId::new),
            owner_id: self.owner_id,
            title: self.title,
            content: self.content,
            tags,
            category: self.category,
            last_saved: self.last_saved,
        })
    }
}

impl<'a> SqliteDraftRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl DraftRepository for SqliteDraftRepository<'_> {
    fn put(&self, draft: &Draft) -> Result<()> {
        let tags = serde_json::to_string(&draft.tags)?;
        self.conn.execute(
            "INSERT INTO drafts (key, id, note_id, owner_id, title, content, tags, category, last_saved)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(key) DO UPDATE SET
                id = excluded.id,
                note_id = excluded.note_id,
                owner_id = excluded.owner_id,
                title = excluded.title,
                content = excluded.content,
                tags = excluded.tags,
                category = excluded.category,
                last_saved = excluded.last_saved",
            params![
                draft.key.as_str(),
                draft.id,
                draft.note_id.as_ref().map(NoteId::as_str),
                draft.owner_id,
                draft.title,
                draft.content,
                tags,
                draft.category,
                draft.last_saved
            ],
        )?;
        Ok(())
    }

    fn get(&self, key: &DraftKey) -> Result<Option<Draft>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE key = ?1"),
                params![key.as_str()],
                DraftRow::from_row,
            )
            .optional()?;

        Ok(row.and_then(DraftRow::decode))
    }

    fn get_all(&self, owner_id: Option<&str>) -> Result<Vec<Draft>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DRAFT_COLUMNS} FROM drafts
             WHERE ?1 IS NULL OR owner_id = ?1
             ORDER BY last_saved DESC"
        ))?;

        let rows = stmt
            .query_map(params![owner_id], DraftRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows.into_iter().filter_map(DraftRow::decode).collect())
    }

    fn delete(&self, key: &DraftKey) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM drafts WHERE key = ?1", params![key.as_str()])?;
        Ok(rows > 0)
    }
}
