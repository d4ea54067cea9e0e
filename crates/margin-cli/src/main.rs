//! Margin CLI - inspect and drive the offline sync engine
//!
//! Notes written here go through the same engine as the editor: straight to
//! the backend when it answers, into the local queue when it does not.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{CacheCommands, Cli, Commands, DraftsCommands, NotesCommands, QueueCommands};
use crate::commands::cache::{run_cache_clear, run_cache_stats};
use crate::commands::common::CliContext;
use crate::commands::drafts::{run_drafts_discard, run_drafts_list};
use crate::commands::notes::{run_notes_add, run_notes_list};
use crate::commands::queue::{run_queue_discard, run_queue_list, run_queue_retry};
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "margin=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let context = CliContext::resolve(cli.global);

    match cli.command {
        Commands::Status { json } => run_status(json, &context).await,
        Commands::Sync { json } => run_sync(json, &context).await,
        Commands::Notes { command } => match command {
            NotesCommands::List {
                limit,
                tag,
                category,
                json,
            } => run_notes_list(limit, tag, category, json, &context).await,
            NotesCommands::Add {
                content,
                title,
                tags,
                category,
            } => run_notes_add(&content, title, tags, category, &context).await,
        },
        Commands::Queue { command } => match command {
            QueueCommands::List { failed, json } => run_queue_list(failed, json, &context).await,
            QueueCommands::Discard { id } => run_queue_discard(id, &context).await,
            QueueCommands::Retry { id } => run_queue_retry(id, &context).await,
        },
        Commands::Drafts { command } => match command {
            DraftsCommands::List { json } => run_drafts_list(json, &context).await,
            DraftsCommands::Discard { key } => run_drafts_discard(&key, &context).await,
        },
        Commands::Cache { command } => match command {
            CacheCommands::Clear => run_cache_clear(&context).await,
            CacheCommands::Stats { json } => run_cache_stats(json, &context).await,
        },
    }
}
