use margin_core::models::CacheStats;

use crate::commands::common::{format_timestamp, open_local_engine, CliContext};
use crate::error::CliError;

pub fn format_cache_stats_lines(stats: &CacheStats) -> Vec<String> {
    let yes_no = |flag: bool| if flag { "yes" } else { "no" };
    vec![
        format!("Cached notes:      {}", stats.notes_count),
        format!("Notes list:        {}", yes_no(stats.has_notes_list)),
        format!("Tags:              {}", yes_no(stats.has_tags)),
        format!("Categories:        {}", yes_no(stats.has_categories)),
        format!(
            "Last cached:       {}",
            stats
                .last_cached
                .map_or_else(|| "never".to_string(), format_timestamp)
        ),
    ]
}

pub async fn run_cache_clear(context: &CliContext) -> Result<(), CliError> {
    let engine = open_local_engine(context).await?;
    let cleared = engine.clear_all_cache().await;
    engine.shutdown().await;
    println!("Cleared {} cached entries", cleared?);
    Ok(())
}

pub async fn run_cache_stats(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let engine = open_local_engine(context).await?;
    let stats = engine.cache_stats().await;
    engine.shutdown().await;
    let stats = stats?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        for line in format_cache_stats_lines(&stats) {
            println!("{line}");
        }
    }
    Ok(())
}
