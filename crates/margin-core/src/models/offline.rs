//! Offline-created record model

use serde::{Deserialize, Serialize};
use std::fmt;

use super::note::{Note, NoteFields, NoteId};

pub(crate) const TEMP_ID_PREFIX: &str = "offline_";

/// Temporary identifier of a note created while offline
/// (`offline_<timestamp>_<random>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    /// Generate a fresh temporary id
    pub fn generate(now_ms: i64) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{TEMP_ID_PREFIX}{now_ms}_{}", &random[..9]))
    }

    /// Rebuild a temp id from its stored representation
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The temp id viewed as a note id (used before the backend assigns one)
    pub fn as_note_id(&self) -> NoteId {
        NoteId::new(self.0.clone())
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A note created while disconnected, provisional until the backend assigns
/// a durable id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRecord {
    pub temp_id: TempId,
    pub owner_id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Set exactly once, together with `real_id`
    pub synced: bool,
    /// Backend-assigned id once synced
    pub real_id: Option<NoteId>,
}

impl OfflineRecord {
    pub fn new(fields: NoteFields, now_ms: i64) -> Self {
        Self {
            temp_id: TempId::generate(now_ms),
            owner_id: fields.owner_id,
            title: fields.title,
            content: fields.content,
            tags: fields.tags,
            category: fields.category,
            created_at: now_ms,
            synced: false,
            real_id: None,
        }
    }

    pub fn fields(&self) -> NoteFields {
        NoteFields {
            owner_id: self.owner_id.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            tags: self.tags.clone(),
            category: self.category.clone(),
        }
    }

    /// Display form of the pending record, keyed by its temporary id
    pub fn to_note(&self) -> Note {
        Note {
            id: self.temp_id.as_note_id(),
            owner_id: self.owner_id.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            tags: self.tags.clone(),
            category: self.category.clone(),
            created_at: self.created_at,
            updated_at: None,
        }
    }
}

/// Aggregate counts of local data that still has to reach the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineStats {
    /// Offline-created records not yet synced
    pub offline_records: usize,
    /// Queue items waiting for a drain (pending or retryable)
    pub pending_queue: usize,
    /// Queue items that exhausted their retries
    pub terminal_failures: usize,
    /// Stored drafts
    pub drafts: usize,
}

impl OfflineStats {
    /// Items the user should see as "N pending"
    pub const fn total_pending(&self) -> usize {
        self.offline_records + self.pending_queue
    }
}
