use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "margin")]
#[command(about = "Inspect and drive the Margin offline sync engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Backend API base URL
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Owner whose notes and queue are used
    #[arg(long, global = true, value_name = "ID")]
    pub owner: Option<String>,

    /// Engine config file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Skip the connectivity check and work offline
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show connectivity, pending changes and cache contents
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drain the sync queue now
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read and write notes
    Notes {
        #[command(subcommand)]
        command: NotesCommands,
    },
    /// Inspect the sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Inspect saved drafts
    Drafts {
        #[command(subcommand)]
        command: DraftsCommands,
    },
    /// Manage the offline read cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum NotesCommands {
    /// List notes, including ones not synced yet
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Filter notes by tag
        #[arg(long)]
        tag: Option<String>,
        /// Filter notes by category
        #[arg(long)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a note (queued when the backend is unreachable)
    #[command(alias = "new")]
    Add {
        /// Note content
        content: Vec<String>,
        /// Title (defaults to the first line of the content)
        #[arg(long)]
        title: Option<String>,
        /// Tag to attach, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Category
        #[arg(long)]
        category: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued mutations
    List {
        /// Only show items that exhausted their retries
        #[arg(long)]
        failed: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop a queued mutation
    Discard {
        /// Queue item id
        id: i64,
    },
    /// Give a failed mutation a fresh retry budget
    Retry {
        /// Queue item id
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum DraftsCommands {
    /// List saved drafts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a saved draft
    Discard {
        /// Draft key
        key: String,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Remove every cached read for the owner
    Clear,
    /// Show what the cache holds
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
