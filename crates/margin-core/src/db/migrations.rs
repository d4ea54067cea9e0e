//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Migration to version 1: drafts, offline-created records and the sync queue
fn migrate_v1(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS drafts (
            key TEXT PRIMARY KEY,
            id TEXT NOT NULL,
            note_id TEXT,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            category TEXT,
            last_saved INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_drafts_owner ON drafts(owner_id);
        CREATE INDEX IF NOT EXISTS idx_drafts_last_saved ON drafts(last_saved DESC);
        CREATE TABLE IF NOT EXISTS offline_records (
            temp_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            category TEXT,
            created_at INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            real_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_offline_records_owner ON offline_records(owner_id, synced);
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            retries INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            last_error TEXT,
            CHECK (retries <= max_retries)
        );
        CREATE INDEX IF NOT EXISTS idx_sync_queue_owner_status ON sync_queue(owner_id, status);
        CREATE INDEX IF NOT EXISTS idx_sync_queue_enqueued ON sync_queue(enqueued_at ASC);
        INSERT INTO schema_version (version) VALUES (1);",
    )?;

    tx.commit()?;
    tracing::info!("Migrated local store to version 1");
    Ok(())
}

/// Migration to version 2: read cache tables, one per query shape
fn migrate_v2(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS cached_notes_list (
            key TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS cached_notes (
            key TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cached_notes_owner ON cached_notes(owner_id);
        CREATE TABLE IF NOT EXISTS cached_tags (
            key TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS cached_categories (
            key TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (2);",
    )?;

    tx.commit()?;
    tracing::info!("Migrated local store to version 2");
    Ok(())
}

/// Migration to version 3: temporary ids resolved to backend ids, and
/// owner-scoped note detail keys.
///
/// Outlives the offline record so editors and queued mutations still holding
/// a temporary id can reach the backend note.
fn migrate_v3(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS resolved_ids (
            temp_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            real_id TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_resolved_ids_owner ON resolved_ids(owner_id);
        INSERT OR IGNORE INTO resolved_ids (temp_id, owner_id, real_id)
            SELECT temp_id, owner_id, real_id FROM offline_records WHERE real_id IS NOT NULL;
        DELETE FROM cached_notes;
        INSERT INTO schema_version (version) VALUES (3);",
    )?;

    tx.commit()?;
    tracing::info!("Migrated local store to version {CURRENT_VERSION}");
    Ok(())
}
