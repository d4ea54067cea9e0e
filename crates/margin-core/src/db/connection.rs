//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use super::migrations;

/// Local persistent store backed by a single `SQLite` file
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the local store at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let database = Self { conn };
        database.configure(true)?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure(false)?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for a single-writer client store
    fn configure(&self, on_disk: bool) -> Result<()> {
        if on_disk {
            // WAL is unavailable for some filesystems; fall back to the default journal
            let mode = self
                .conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                });
            if let Err(error) = mode {
                tracing::debug!("WAL journal mode unavailable: {}", error);
            }
        }
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_open_on_disk_persists_between_opens() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("margin.db");

        {
            let db = Database::open(&path).unwrap();
            db.connection()
                .execute(
                    "INSERT INTO drafts (key, id, owner_id, title, content, last_saved)
                     VALUES ('n1', 'd1', 'u1', 't', 'c', 1)",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM drafts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
