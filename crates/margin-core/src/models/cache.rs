//! Read cache model

use serde::{Deserialize, Serialize};

/// Query shapes cached for offline reads, one table each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheShape {
    NotesList,
    Note,
    Tags,
    Categories,
}

impl CacheShape {
    pub const ALL: [Self; 4] = [Self::NotesList, Self::Note, Self::Tags, Self::Categories];

    pub(crate) const fn table(self) -> &'static str {
        match self {
            Self::NotesList => "cached_notes_list",
            Self::Note => "cached_notes",
            Self::Tags => "cached_tags",
            Self::Categories => "cached_categories",
        }
    }
}

/// A cached authoritative read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntity<T> {
    /// Owner id, note id, or a composite key
    pub key: String,
    pub owner_id: String,
    pub payload: T,
    /// Write timestamp (Unix ms)
    pub cached_at: i64,
}

impl<T> CachedEntity<T> {
    /// A read at `now_ms` is a miss once the entry is older than `ttl_ms`
    pub const fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.cached_at > ttl_ms
    }
}

/// Summary of what the cache holds for one owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub notes_count: usize,
    pub has_notes_list: bool,
    pub has_tags: bool,
    pub has_categories: bool,
    /// When the notes list was last cached (Unix ms)
    pub last_cached: Option<i64>,
}
