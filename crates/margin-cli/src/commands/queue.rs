use margin_core::models::SyncQueueItem;
use margin_core::{Backend, SyncEngine};

use crate::commands::common::{format_queue_lines, open_local_engine, CliContext};
use crate::error::CliError;

pub async fn list_queue<B: Backend + 'static>(
    engine: &SyncEngine<B>,
    only_failed: bool,
) -> Result<Vec<SyncQueueItem>, CliError> {
    if only_failed {
        Ok(engine.list_terminal_failures().await?)
    } else {
        Ok(engine.list_sync_queue(&[]).await?)
    }
}

pub async fn discard_item<B: Backend + 'static>(
    engine: &SyncEngine<B>,
    id: i64,
) -> Result<(), CliError> {
    if engine.discard_sync_item(id).await? {
        Ok(())
    } else {
        Err(CliError::QueueItemNotFound(id))
    }
}

pub async fn retry_item<B: Backend + 'static>(
    engine: &SyncEngine<B>,
    id: i64,
) -> Result<(), CliError> {
    if engine.retry_terminal(id).await? {
        return Ok(());
    }
    let exists = engine
        .list_sync_queue(&[])
        .await?
        .iter()
        .any(|item| item.id == id);
    if exists {
        Err(CliError::NotTerminal(id))
    } else {
        Err(CliError::QueueItemNotFound(id))
    }
}

pub async fn run_queue_list(
    only_failed: bool,
    as_json: bool,
    context: &CliContext,
) -> Result<(), CliError> {
    let engine = open_local_engine(context).await?;
    let items = list_queue(&engine, only_failed).await;
    engine.shutdown().await;
    let items = items?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Sync queue is empty.");
        return Ok(());
    }

    for line in format_queue_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_discard(id: i64, context: &CliContext) -> Result<(), CliError> {
    let engine = open_local_engine(context).await?;
    let result = discard_item(&engine, id).await;
    engine.shutdown().await;
    result?;
    println!("Discarded {id}");
    Ok(())
}

pub async fn run_queue_retry(id: i64, context: &CliContext) -> Result<(), CliError> {
    let engine = open_local_engine(context).await?;
    let result = retry_item(&engine, id).await;
    engine.shutdown().await;
    result?;
    println!("Queued {id} for the next sync");
    Ok(())
}
