//! Sync queue model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::note::{NoteFields, NoteId};
use super::offline::TempId;
use crate::error::Error;

/// Kind of mutation carried by a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown sync operation: {other}"))),
        }
    }
}

/// Delivery status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Failed,
    Success,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            "success" => Ok(Self::Success),
            other => Err(Error::InvalidInput(format!("unknown sync status: {other}"))),
        }
    }
}

/// Mutation intent stored in the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncMutation {
    /// Create a note; `client_id` doubles as the backend dedup key
    Create { client_id: TempId, fields: NoteFields },
    /// Replace the fields of an existing note
    Update { note_id: NoteId, fields: NoteFields },
    /// Delete a note
    Delete { note_id: NoteId },
}

impl SyncMutation {
    pub const fn operation(&self) -> SyncOperation {
        match self {
            Self::Create { .. } => SyncOperation::Create,
            Self::Update { .. } => SyncOperation::Update,
            Self::Delete { .. } => SyncOperation::Delete,
        }
    }

    /// Note the mutation applies to (the temp id for creates)
    pub fn note_id(&self) -> NoteId {
        match self {
            Self::Create { client_id, .. } => client_id.as_note_id(),
            Self::Update { note_id, .. } | Self::Delete { note_id } => note_id.clone(),
        }
    }

    /// Point an update/delete that targets `temp_id` at `real_id`.
    ///
    /// Returns whether the mutation changed.
    pub fn remap(&mut self, temp_id: &TempId, real_id: &NoteId) -> bool {
        match self {
            Self::Update { note_id, .. } | Self::Delete { note_id }
                if note_id.as_str() == temp_id.as_str() =>
            {
                *note_id = real_id.clone();
                true
            }
            _ => false,
        }
    }

    /// Short human description used in progress messages
    pub fn describe(&self) -> String {
        match self {
            Self::Create { fields, .. } => format!("Creating note: {}", fields.title),
            Self::Update { fields, .. } => format!("Updating note: {}", fields.title),
            Self::Delete { note_id } => format!("Deleting note: {note_id}"),
        }
    }
}

/// One entry of the durable mutation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Local autoincrement id
    pub id: i64,
    /// Owner whose drain picks the item up
    pub owner_id: String,
    pub mutation: SyncMutation,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    pub retries: u32,
    pub max_retries: u32,
    pub status: SyncStatus,
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    pub const fn operation(&self) -> SyncOperation {
        self.mutation.operation()
    }

    /// Failed with no retries left; only a manual action brings it back
    pub const fn is_terminal(&self) -> bool {
        matches!(self.status, SyncStatus::Failed) && self.retries >= self.max_retries
    }

    /// Eligible for the next drain
    pub const fn is_drainable(&self) -> bool {
        match self.status {
            SyncStatus::Pending => true,
            SyncStatus::Failed => self.retries < self.max_retries,
            SyncStatus::Syncing | SyncStatus::Success => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(status: SyncStatus, retries: u32) -> SyncQueueItem {
        SyncQueueItem {
            id: 1,
            owner_id: "u1".into(),
            mutation: SyncMutation::Delete {
                note_id: NoteId::new("n1"),
            },
            enqueued_at: 0,
            retries,
            max_retries: 3,
            status,
            last_error: None,
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Failed,
            SyncStatus::Success,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_terminal_and_drainable() {
        assert!(item(SyncStatus::Pending, 0).is_drainable());
        assert!(item(SyncStatus::Failed, 2).is_drainable());
        assert!(!item(SyncStatus::Failed, 3).is_drainable());
        assert!(item(SyncStatus::Failed, 3).is_terminal());
        assert!(!item(SyncStatus::Pending, 3).is_terminal());
        assert!(!item(SyncStatus::Success, 0).is_drainable());
    }

    #[test]
    fn test_remap_only_touches_matching_temp_id() {
        let temp = TempId::from_raw("offline_1_abc");
        let real = NoteId::new("n42");

        let mut update = SyncMutation::Update {
            note_id: temp.as_note_id(),
            fields: NoteFields::new("u1", "t"),
        };
        assert!(update.remap(&temp, &real));
        assert_eq!(update.note_id(), real);

        let mut other = SyncMutation::Delete {
            note_id: NoteId::new("n7"),
        };
        assert!(!other.remap(&temp, &real));

        let mut create = SyncMutation::Create {
            client_id: temp.clone(),
            fields: NoteFields::new("u1", "t"),
        };
        assert!(!create.remap(&temp, &real));
    }

    #[test]
    fn test_mutation_json_shape() {
        let mutation = SyncMutation::Delete {
            note_id: NoteId::new("n1"),
        };
        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json, serde_json::json!({"type": "delete", "note_id": "n1"}));
    }
}
