use chrono::Utc;
use margin_core::models::{DraftKey, ServerState};

use crate::commands::common::{format_draft_lines, open_local_engine, CliContext};
use crate::error::CliError;

pub async fn run_drafts_list(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let engine = open_local_engine(context).await?;
    let drafts = engine.list_drafts().await;
    engine.shutdown().await;
    let drafts = drafts?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&drafts)?);
        return Ok(());
    }

    if drafts.is_empty() {
        println!("No drafts saved.");
        return Ok(());
    }

    for line in format_draft_lines(&drafts, Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_drafts_discard(key: &str, context: &CliContext) -> Result<(), CliError> {
    let key = DraftKey::from_raw(key.trim());
    let engine = open_local_engine(context).await?;

    let result = match engine.drafts().get_draft(&key).await {
        Ok(Some(_)) => engine
            .discard_draft(&key, &ServerState::absent())
            .await
            .map(|_| ())
            .map_err(CliError::from),
        Ok(None) => Err(CliError::DraftNotFound(key.to_string())),
        Err(error) => Err(error.into()),
    };
    engine.shutdown().await;
    result?;

    println!("Discarded draft {key}");
    Ok(())
}
