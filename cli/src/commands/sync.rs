use anyhow::{Context, Result};
use std::sync::Arc;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutriledger_core::sync::FlushReport;

use super::Ledger;
use super::helpers::truncate;

pub(crate) fn cmd_sync_status(ledger: &Ledger, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct PendingRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Attempts")]
        attempts: u32,
        #[tabled(rename = "Next attempt")]
        next_attempt: String,
        #[tabled(rename = "Last error")]
        last_error: String,
    }

    let pending = ledger.pending_sync()?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "configured": ledger.has_remote(), "pending": pending })
        );
        return Ok(());
    }

    if !ledger.has_remote() {
        println!("Sync is not configured (set sync.url in config.yaml or NUTRILEDGER_SYNC_URL)");
    }
    if pending.is_empty() {
        println!("Nothing pending");
        return Ok(());
    }

    let rows: Vec<PendingRow> = pending
        .iter()
        .map(|item| PendingRow {
            date: item.key.clone(),
            attempts: item.attempts,
            next_attempt: item.next_attempt_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            last_error: item
                .last_error
                .as_deref()
                .map(|e| truncate(e, 50))
                .unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

/// Run a flush on a blocking thread; the HTTP client blocks on the runtime.
pub(crate) async fn flush(ledger: Arc<Ledger>) -> Result<FlushReport> {
    let report = tokio::task::spawn_blocking(move || ledger.flush_sync())
        .await
        .context("Sync task failed")??;
    Ok(report)
}

pub(crate) async fn cmd_sync_flush(ledger: Arc<Ledger>, json: bool) -> Result<()> {
    if !ledger.has_remote() {
        anyhow::bail!("Sync is not configured (set sync.url in config.yaml or NUTRILEDGER_SYNC_URL)");
    }
    let report = flush(ledger).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Delivered {} day(s)", report.delivered.len());
    if report.deferred > 0 {
        println!("{} day(s) not yet due for retry", report.deferred);
    }
    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }
    Ok(())
}
