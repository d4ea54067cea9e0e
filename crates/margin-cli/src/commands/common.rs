use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use margin_core::models::{Draft, SyncQueueItem};
use margin_core::network::ConnectivityProbe;
use margin_core::services::LocalStore;
use margin_core::util::system_clock;
use margin_core::{EngineConfig, HttpBackend, Note, SyncEngine};
use serde::Serialize;

use crate::cli::GlobalArgs;
use crate::error::CliError;

pub const DEFAULT_API_URL: &str = "http://localhost:8787";
pub const DEFAULT_OWNER: &str = "local";

const DB_PATH_ENV: &str = "MARGIN_DB_PATH";
const API_URL_ENV: &str = "MARGIN_API_URL";
const API_TOKEN_ENV: &str = "MARGIN_API_TOKEN";
const CONFIG_ENV: &str = "MARGIN_CONFIG";
const OWNER_ENV: &str = "MARGIN_OWNER";

/// Settings resolved from flags, environment and defaults, in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliContext {
    pub db_path: PathBuf,
    pub api_url: String,
    pub api_token: Option<String>,
    pub owner_id: String,
    pub config_path: PathBuf,
    pub offline: bool,
}

impl CliContext {
    pub fn resolve(args: GlobalArgs) -> Self {
        Self::resolve_with(args, |key| env::var(key).ok())
    }

    pub fn resolve_with(args: GlobalArgs, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).and_then(|value| normalize_content(&value));

        Self {
            db_path: args
                .db_path
                .or_else(|| lookup(DB_PATH_ENV).map(PathBuf::from))
                .unwrap_or_else(default_db_path),
            api_url: args
                .api_url
                .or_else(|| lookup(API_URL_ENV))
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_token: lookup(API_TOKEN_ENV),
            owner_id: args
                .owner
                .or_else(|| lookup(OWNER_ENV))
                .unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            config_path: args
                .config
                .or_else(|| lookup(CONFIG_ENV).map(PathBuf::from))
                .unwrap_or_else(default_config_path),
            offline: args.offline,
        }
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("margin")
        .join("margin.db")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("margin")
        .join("config.json")
}

pub fn load_engine_config(path: &Path) -> Result<EngineConfig, CliError> {
    let config = EngineConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Open the engine, probing the backend once unless `--offline` is set.
pub async fn open_engine(context: &CliContext) -> Result<SyncEngine<HttpBackend>, CliError> {
    open_engine_with(context, !context.offline).await
}

/// Open the engine for commands that only touch local state.
pub async fn open_local_engine(context: &CliContext) -> Result<SyncEngine<HttpBackend>, CliError> {
    open_engine_with(context, false).await
}

async fn open_engine_with(
    context: &CliContext,
    probe: bool,
) -> Result<SyncEngine<HttpBackend>, CliError> {
    let config = load_engine_config(&context.config_path)?;
    let backend = HttpBackend::new(context.api_url.clone(), context.api_token.clone())?;

    let online = if probe {
        ConnectivityProbe::new(backend.health_url(), config.probe_interval())?
            .check()
            .await
    } else {
        false
    };
    if probe && !online {
        tracing::info!("Working offline; backend {} not reachable", backend.base_url());
    }

    let store = LocalStore::open_path(&context.db_path).await?;
    Ok(SyncEngine::new(
        context.owner_id.clone(),
        Arc::new(backend),
        store,
        system_clock(),
        config,
        online,
    )?)
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub relative_time: String,
    /// Created offline and not on the backend yet
    pub pending: bool,
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    let mut tags = note.tags.clone();
    tags.sort();

    NoteListItem {
        id: note.id.to_string(),
        title: note.title.clone(),
        preview: note_preview(note, 80),
        tags,
        category: note.category.clone(),
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.freshness(), now_ms),
        pending: note.id.is_temporary(),
    }
}

pub fn format_note_lines(notes: &[Note], now_ms: i64) -> Vec<String> {
    notes
        .iter()
        .map(|note| {
            let marker = if note.id.is_temporary() { "*" } else { " " };
            let id = note.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let title = truncate(&note.title_preview(40), 30);
            let relative_time = format_relative_time(note.freshness(), now_ms);
            let tags = render_tags(&note.tags);

            if tags.is_empty() {
                format!("{marker}{short_id:<13}  {title:<30}  {relative_time}")
            } else {
                format!("{marker}{short_id:<13}  {title:<30}  {relative_time:<10}  {tags}")
            }
        })
        .collect()
}

pub fn format_queue_lines(items: &[SyncQueueItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let line = format!(
                "{:>5}  {:<7}  {:<7}  {}/{}  {}  {}",
                item.id,
                item.status.as_str(),
                item.operation().as_str(),
                item.retries,
                item.max_retries,
                format_timestamp(item.enqueued_at),
                item.mutation.note_id()
            );
            match item.last_error.as_deref() {
                Some(error) => format!("{line}  error: {error}"),
                None => line,
            }
        })
        .collect()
}

pub fn format_draft_lines(drafts: &[Draft], now_ms: i64) -> Vec<String> {
    drafts
        .iter()
        .map(|draft| {
            let preview = truncate(
                &draft.content.split_whitespace().collect::<Vec<_>>().join(" "),
                40,
            );
            format!(
                "{:<32}  {:<10}  {}",
                draft.key.as_str(),
                format_relative_time(draft.last_saved, now_ms),
                preview
            )
        })
        .collect()
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let first_line = note.content.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&collapsed, max_chars)
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = value.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn render_tags(tags: &[String]) -> String {
    let mut tags = tags.to_vec();
    tags.sort();
    tags.into_iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// First non-empty line of the content, capped at 80 characters.
pub fn derive_title(content: &str) -> String {
    let line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    truncate(line, 80)
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}
