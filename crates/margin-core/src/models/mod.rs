//! Data models for Margin

mod cache;
mod draft;
mod note;
mod offline;
mod sync_queue;

pub use cache::{CacheShape, CacheStats, CachedEntity};
pub use draft::{normalize_content, Draft, DraftKey, DraftSnapshot, ServerState};
pub use note::{Note, NoteFields, NoteFilter, NoteId};
pub use offline::{OfflineRecord, OfflineStats, TempId};
pub use sync_queue::{SyncMutation, SyncOperation, SyncQueueItem, SyncStatus};
