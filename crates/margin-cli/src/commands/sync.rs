use margin_core::sync::{DrainOutcome, SyncReport};

use crate::commands::common::{open_engine, CliContext};
use crate::error::CliError;

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!("Synced {} item(s)", report.synced)];
    for error in &report.errors {
        let suffix = if error.terminal { " (gave up)" } else { "" };
        lines.push(format!(
            "  #{} {} failed: {}{suffix}",
            error.item_id, error.operation, error.message
        ));
    }
    if report.terminal_failures > 0 {
        lines.push(format!(
            "{} item(s) need attention; see `margin queue list --failed`",
            report.terminal_failures
        ));
    }
    lines
}

pub async fn run_sync(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    if !engine.is_online() {
        engine.shutdown().await;
        return Err(CliError::BackendUnreachable(context.api_url.clone()));
    }

    let outcome = engine.sync_now().await;
    engine.shutdown().await;

    match outcome? {
        DrainOutcome::Completed(report) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in format_report_lines(&report) {
                    println!("{line}");
                }
            }
        }
        DrainOutcome::AlreadyRunning => println!("A sync is already running"),
        DrainOutcome::Stopped => println!("Sync stopped"),
    }
    Ok(())
}
