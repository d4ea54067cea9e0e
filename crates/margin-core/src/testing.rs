//! In-memory backend used by the engine tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{Backend, BackendResult, CreateRecord};
use crate::error::BackendError;
use crate::models::{Note, NoteFields, NoteFilter, NoteId, TempId};

/// Failure to inject into upcoming backend calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Transient,
    Rejected,
}

impl FakeFailure {
    fn into_error(self, call: &str) -> BackendError {
        match self {
            Self::Transient => BackendError::Transient(format!("{call}: timeout")),
            Self::Rejected => BackendError::Rejected(format!("{call}: validation failed")),
        }
    }
}

#[derive(Default)]
struct FakeState {
    notes: BTreeMap<NoteId, Note>,
    by_client_id: HashMap<TempId, NoteId>,
    next_id: u64,
    queued_failures: VecDeque<FakeFailure>,
    always_fail: Option<FakeFailure>,
    calls: Vec<String>,
    tags: Vec<String>,
    categories: Vec<String>,
}

/// Backend double that keeps records in memory and records every call.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    delay: Mutex<Option<Duration>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, note: Note) {
        let mut state = self.state.lock().unwrap();
        state.notes.insert(note.id.clone(), note);
    }

    pub fn set_taxonomy(&self, tags: &[&str], categories: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.tags = tags.iter().map(ToString::to_string).collect();
        state.categories = categories.iter().map(ToString::to_string).collect();
    }

    /// Fail the next `count` calls.
    pub fn fail_next(&self, count: usize, failure: FakeFailure) {
        let mut state = self.state.lock().unwrap();
        state.queued_failures.extend(std::iter::repeat(failure).take(count));
    }

    /// Fail every call until cleared with `None`.
    pub fn fail_always(&self, failure: Option<FakeFailure>) {
        self.state.lock().unwrap().always_fail = failure;
    }

    /// Hold every call for `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.state.lock().unwrap().notes.values().cloned().collect()
    }

    pub fn note(&self, id: &NoteId) -> Option<Note> {
        self.state.lock().unwrap().notes.get(id).cloned()
    }

    async fn enter(&self, call: String) -> BackendResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        let failure = state.queued_failures.pop_front().or(state.always_fail);
        match failure {
            Some(failure) => Err(failure.into_error(&call)),
            None => Ok(()),
        }
    }

    fn apply_fields(note: &mut Note, fields: &NoteFields) {
        note.title.clone_from(&fields.title);
        note.content.clone_from(&fields.content);
        note.tags.clone_from(&fields.tags);
        note.category.clone_from(&fields.category);
    }
}

impl Backend for FakeBackend {
    async fn create_record(&self, request: &CreateRecord) -> BackendResult<Note> {
        self.enter(format!("create {}", request.client_id)).await?;

        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.by_client_id.get(&request.client_id) {
            if let Some(note) = state.notes.get(existing) {
                return Ok(note.clone());
            }
        }

        state.next_id += 1;
        let timestamp = 1_000_000 + i64::try_from(state.next_id).unwrap();
        let mut note = Note {
            id: NoteId::new(format!("n{}", state.next_id)),
            owner_id: request.fields.owner_id.clone(),
            title: String::new(),
            content: String::new(),
            tags: vec![],
            category: None,
            created_at: timestamp,
            updated_at: Some(timestamp),
        };
        Self::apply_fields(&mut note, &request.fields);
        state
            .by_client_id
            .insert(request.client_id.clone(), note.id.clone());
        state.notes.insert(note.id.clone(), note.clone());
        Ok(note)
    }

    async fn update_record(&self, id: &NoteId, fields: &NoteFields) -> BackendResult<Note> {
        self.enter(format!("update {id}")).await?;

        let mut state = self.state.lock().unwrap();
        let note = state
            .notes
            .get_mut(id)
            .ok_or_else(|| BackendError::Rejected(format!("note {id} not found")))?;
        Self::apply_fields(note, fields);
        note.updated_at = note.updated_at.map(|ts| ts + 1);
        Ok(note.clone())
    }

    async fn delete_record(&self, id: &NoteId) -> BackendResult<()> {
        self.enter(format!("delete {id}")).await?;
        self.state.lock().unwrap().notes.remove(id);
        Ok(())
    }

    async fn list_records(&self, owner_id: &str, filter: &NoteFilter) -> BackendResult<Vec<Note>> {
        self.enter(format!("list {owner_id}")).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .notes
            .values()
            .filter(|note| note.owner_id == owner_id)
            .filter(|note| {
                filter
                    .tag
                    .as_ref()
                    .map_or(true, |tag| note.tags.contains(tag))
            })
            .filter(|note| {
                filter
                    .category
                    .as_ref()
                    .map_or(true, |category| note.category.as_ref() == Some(category))
            })
            .cloned()
            .collect())
    }

    async fn get_record(&self, id: &NoteId) -> BackendResult<Option<Note>> {
        self.enter(format!("get {id}")).await?;
        Ok(self.state.lock().unwrap().notes.get(id).cloned())
    }

    async fn list_tags(&self, owner_id: &str) -> BackendResult<Vec<String>> {
        self.enter(format!("tags {owner_id}")).await?;
        Ok(self.state.lock().unwrap().tags.clone())
    }

    async fn list_categories(&self, owner_id: &str) -> BackendResult<Vec<String>> {
        self.enter(format!("categories {owner_id}")).await?;
        Ok(self.state.lock().unwrap().categories.clone())
    }
}
