//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a note as assigned by the backend, or a temporary id for
/// notes created offline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Wrap a backend-assigned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is a locally generated temporary id
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(super::offline::TEMP_ID_PREFIX)
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidInput("note id cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for NoteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Editable fields of a note, as sent to the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFields {
    /// Owner (user) of the note
    pub owner_id: String,
    /// Title
    pub title: String,
    /// Serialized editor content (opaque to the engine)
    pub content: String,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional category
    #[serde(default)]
    pub category: Option<String>,
}

impl NoteFields {
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// A note as known by the authoritative backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Owner (user) of the note
    pub owner_id: String,
    /// Title
    pub title: String,
    /// Serialized editor content
    pub content: String,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional category
    #[serde(default)]
    pub category: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms), absent if never modified
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl Note {
    /// Timestamp used for freshness ordering
    pub fn freshness(&self) -> i64 {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Get first line of the title, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.title
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }

    /// Editable fields of this note
    pub fn fields(&self) -> NoteFields {
        NoteFields {
            owner_id: self.owner_id.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            tags: self.tags.clone(),
            category: self.category.clone(),
        }
    }
}

/// Filters accepted by list queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFilter {
    /// Only notes carrying this tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Only notes in this category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl NoteFilter {
    pub const fn is_empty(&self) -> bool {
        self.tag.is_none() && self.category.is_none()
    }
}
