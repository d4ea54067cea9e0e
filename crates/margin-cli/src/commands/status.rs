use margin_core::models::{CacheStats, OfflineStats};
use margin_core::sync::SyncState;
use serde::Serialize;

use crate::commands::cache::format_cache_stats_lines;
use crate::commands::common::{open_engine, CliContext};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub owner_id: String,
    pub api_url: String,
    pub online: bool,
    pub state: SyncState,
    pub offline: OfflineStats,
    pub cache: CacheStats,
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let connectivity = if report.online { "online" } else { "offline" };
    let mut lines = vec![
        format!("Owner:             {}", report.owner_id),
        format!("Backend:           {} ({connectivity})", report.api_url),
        format!("Pending changes:   {}", report.offline.total_pending()),
        format!("  offline notes:   {}", report.offline.offline_records),
        format!("  queued:          {}", report.offline.pending_queue),
        format!("Failed for good:   {}", report.offline.terminal_failures),
        format!("Drafts:            {}", report.offline.drafts),
    ];
    lines.extend(format_cache_stats_lines(&report.cache));
    lines
}

pub async fn run_status(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    let stats = engine.get_offline_stats().await;
    let cache = engine.cache_stats().await;
    let state = engine.sync_state();
    let online = engine.is_online();
    engine.shutdown().await;

    let report = StatusReport {
        owner_id: context.owner_id.clone(),
        api_url: context.api_url.clone(),
        online,
        state,
        offline: stats?,
        cache: cache?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}
