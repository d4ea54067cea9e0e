//! Merging authoritative notes with records that only exist locally.

use std::collections::HashMap;

use crate::models::{Note, NoteId, OfflineRecord};

/// Build the list shown to the user.
///
/// Unsynced offline records are laid over the authoritative list (a local
/// record wins on id collision), and the result is ordered newest first by
/// `updated_at`, falling back to `created_at`. Synced records are skipped
/// because their backend copy is already in `authoritative`.
pub fn merge_notes(authoritative: Option<&[Note]>, local: &[OfflineRecord]) -> Vec<Note> {
    let mut by_id: HashMap<NoteId, Note> = HashMap::new();

    for note in authoritative.unwrap_or_default() {
        by_id.insert(note.id.clone(), note.clone());
    }
    for record in local.iter().filter(|record| !record.synced) {
        let note = record.to_note();
        by_id.insert(note.id.clone(), note);
    }

    let mut merged = by_id.into_values().collect::<Vec<_>>();
    merged.sort_by(|a, b| {
        b.freshness()
            .cmp(&a.freshness())
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}
