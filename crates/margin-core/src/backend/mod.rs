//! Authoritative backend seam.
//!
//! The engine never talks to a server directly; it goes through [`Backend`].
//! [`HttpBackend`] is the REST implementation used by the CLI.

mod http;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::models::{Note, NoteFields, NoteFilter, NoteId, TempId};

pub use http::HttpBackend;

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Body of a create call.
///
/// `client_id` is the temporary id of the offline record; the backend uses it
/// to deduplicate repeated deliveries of the same create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRecord {
    pub client_id: TempId,
    #[serde(flatten)]
    pub fields: NoteFields,
}

/// Operations the sync engine needs from the authoritative store.
///
/// Updates and deletes must be idempotent: replaying them after an
/// interrupted drain has to converge to the same server state.
pub trait Backend: Send + Sync {
    /// Create a record and return it with its durable id.
    fn create_record(
        &self,
        request: &CreateRecord,
    ) -> impl Future<Output = BackendResult<Note>> + Send;

    /// Replace the editable fields of a record.
    fn update_record(
        &self,
        id: &NoteId,
        fields: &NoteFields,
    ) -> impl Future<Output = BackendResult<Note>> + Send;

    /// Delete a record; a record that is already gone counts as deleted.
    fn delete_record(&self, id: &NoteId) -> impl Future<Output = BackendResult<()>> + Send;

    /// List an owner's records.
    fn list_records(
        &self,
        owner_id: &str,
        filter: &NoteFilter,
    ) -> impl Future<Output = BackendResult<Vec<Note>>> + Send;

    /// Fetch one record.
    fn get_record(&self, id: &NoteId) -> impl Future<Output = BackendResult<Option<Note>>> + Send;

    fn list_tags(&self, owner_id: &str) -> impl Future<Output = BackendResult<Vec<String>>> + Send;

    fn list_categories(
        &self,
        owner_id: &str,
    ) -> impl Future<Output = BackendResult<Vec<String>>> + Send;
}
