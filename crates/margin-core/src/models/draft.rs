//! Draft model

use serde::{Deserialize, Serialize};
use std::fmt;

use super::note::{Note, NoteFields, NoteId};

const NEW_DRAFT_PREFIX: &str = "new_";

/// Key of a draft: the note id when editing an existing note, otherwise a
/// `new_<timestamp>` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftKey(String);

impl DraftKey {
    /// Draft key for an existing note
    pub fn for_note(note_id: &NoteId) -> Self {
        Self(note_id.as_str().to_string())
    }

    /// Draft key for a note that does not exist yet
    pub fn new_note(now_ms: i64) -> Self {
        Self(format!("{NEW_DRAFT_PREFIX}{now_ms}"))
    }

    /// Rebuild a key from its stored representation
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key belongs to a note that has no backend id yet
    pub fn is_new_note(&self) -> bool {
        self.0.starts_with(NEW_DRAFT_PREFIX)
    }

    /// Note id this key refers to, if any
    pub fn note_id(&self) -> Option<NoteId> {
        if self.is_new_note() {
            None
        } else {
            Some(NoteId::new(self.0.clone()))
        }
    }
}

impl fmt::Display for DraftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-progress editor state handed to the draft manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl DraftSnapshot {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Snapshot in normalized form, used for change detection
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut tags = self
            .tags
            .iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect::<Vec<_>>();
        tags.sort();
        tags.dedup();

        Self {
            title: self.title.trim().to_string(),
            content: normalize_content(&self.content),
            tags,
            category: crate::util::normalize_text_option(self.category.clone()),
        }
    }

    /// Compare two snapshots after normalization
    pub fn same_as(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }

    pub fn into_fields(self, owner_id: impl Into<String>) -> NoteFields {
        NoteFields {
            owner_id: owner_id.into(),
            title: self.title,
            content: self.content,
            tags: self.tags,
            category: self.category,
        }
    }
}

impl From<&Note> for DraftSnapshot {
    fn from(note: &Note) -> Self {
        Self {
            title: note.title.clone(),
            content: note.content.clone(),
            tags: note.tags.clone(),
            category: note.category.clone(),
        }
    }
}

/// A locally buffered snapshot of in-progress edits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// Row identifier (UUID v7)
    pub id: String,
    /// Upsert key
    pub key: DraftKey,
    /// Note being edited, `None` for new notes
    pub note_id: Option<NoteId>,
    /// Owner (user) of the draft
    pub owner_id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    /// Last autosave timestamp (Unix ms)
    pub last_saved: i64,
}

impl Draft {
    pub fn new(key: DraftKey, owner_id: impl Into<String>, snapshot: DraftSnapshot, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            note_id: key.note_id(),
            key,
            owner_id: owner_id.into(),
            title: snapshot.title,
            content: snapshot.content,
            tags: snapshot.tags,
            category: snapshot.category,
            last_saved: now_ms,
        }
    }

    pub fn snapshot(&self) -> DraftSnapshot {
        DraftSnapshot {
            title: self.title.clone(),
            content: self.content.clone(),
            tags: self.tags.clone(),
            category: self.category.clone(),
        }
    }
}

/// Last known server state of the note a draft belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerState {
    /// Server modification time, `None` when unknown
    pub updated_at: Option<i64>,
    /// Server content, `None` when the note does not exist on the server
    pub content: Option<String>,
}

impl ServerState {
    pub const fn absent() -> Self {
        Self {
            updated_at: None,
            content: None,
        }
    }

    pub fn new(updated_at: i64, content: impl Into<String>) -> Self {
        Self {
            updated_at: Some(updated_at),
            content: Some(content.into()),
        }
    }
}

impl From<&Note> for ServerState {
    fn from(note: &Note) -> Self {
        Self {
            updated_at: note.updated_at,
            content: Some(note.content.clone()),
        }
    }
}

/// Normalize serialized editor content for equality checks.
///
/// JSON documents are compared structurally (key order and whitespace do not
/// matter); anything else is compared with unified line endings and trailing
/// whitespace removed.
pub fn normalize_content(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return value.to_string();
        }
    }

    trimmed
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}
