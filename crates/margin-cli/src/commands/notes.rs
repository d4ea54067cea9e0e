use chrono::Utc;
use margin_core::models::{DraftKey, DraftSnapshot, NoteFilter};
use margin_core::{Backend, Note, SyncEngine, WriteOutcome};

use crate::commands::common::{
    derive_title, format_note_lines, normalize_content, note_to_list_item, open_engine,
    resolve_note_content, CliContext, NoteListItem,
};
use crate::error::CliError;

/// Fields of a note typed on the command line.
#[derive(Debug, Clone, Default)]
pub struct NewNote {
    pub content: String,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
}

impl NewNote {
    fn into_snapshot(self) -> DraftSnapshot {
        let title = self
            .title
            .as_deref()
            .and_then(normalize_content)
            .unwrap_or_else(|| derive_title(&self.content));
        DraftSnapshot {
            title,
            content: self.content,
            tags: self
                .tags
                .iter()
                .filter_map(|tag| normalize_content(tag))
                .collect(),
            category: self.category.as_deref().and_then(normalize_content),
        }
    }
}

pub async fn add_note<B: Backend + 'static>(
    engine: &SyncEngine<B>,
    note: NewNote,
) -> Result<WriteOutcome<Note>, CliError> {
    let key = DraftKey::new_note(Utc::now().timestamp_millis());
    Ok(engine.save_note(key, note.into_snapshot()).await?)
}

pub async fn run_notes_add(
    content_parts: &[String],
    title: Option<String>,
    tags: Vec<String>,
    category: Option<String>,
    context: &CliContext,
) -> Result<(), CliError> {
    let content = resolve_note_content(content_parts)?;
    let engine = open_engine(context).await?;
    let outcome = add_note(
        &engine,
        NewNote {
            content,
            title,
            tags,
            category,
        },
    )
    .await;
    engine.shutdown().await;

    match outcome? {
        WriteOutcome::Applied(note) => println!("{}", note.id),
        WriteOutcome::Queued(item) => {
            println!("{}", item.mutation.note_id());
            eprintln!("Saved offline; it will sync when the backend is reachable");
        }
    }
    Ok(())
}

pub async fn run_notes_list(
    limit: usize,
    tag: Option<String>,
    category: Option<String>,
    as_json: bool,
    context: &CliContext,
) -> Result<(), CliError> {
    let filter = NoteFilter { tag, category };
    let engine = open_engine(context).await?;
    let outcome = engine.list_notes(&filter).await;
    engine.shutdown().await;

    let outcome = outcome?;
    let notes = outcome.data.into_iter().take(limit).collect::<Vec<_>>();
    if outcome.from_cache {
        eprintln!("Showing cached notes; the backend is not reachable");
    }

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(&notes, Utc::now().timestamp_millis()) {
            println!("{line}");
        }
    }
    Ok(())
}
