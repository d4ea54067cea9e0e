//! Local persistent store for Margin

mod cache;
mod connection;
mod drafts;
mod migrations;
mod offline_records;
mod sync_queue;

pub use cache::SqliteCacheRepository;
pub use connection::Database;
pub use drafts::{DraftRepository, SqliteDraftRepository};
pub use offline_records::{OfflineRecordRepository, SqliteOfflineRecordRepository, SyncedFilter};
pub use sync_queue::{SqliteSyncQueueRepository, SyncQueueRepository};
