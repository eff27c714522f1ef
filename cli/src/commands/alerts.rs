use anyhow::Result;
use std::process;

use nutriledger_core::alerts::evaluate_for_profile;
use nutriledger_core::models::{HealthAlert, UserProfile};

use super::Ledger;
use super::helpers::{parse_date, print_alerts};

/// Re-check a day's entries against the current profile.
pub(crate) fn cmd_alerts(
    ledger: &Ledger,
    profile: &UserProfile,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let record = ledger.get_record(date)?;
    let alerts: Vec<HealthAlert> = record
        .iter()
        .flat_map(|r| r.entries.iter())
        .flat_map(|e| evaluate_for_profile(&e.food_item, profile))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&alerts)?);
        return Ok(());
    }

    if alerts.is_empty() {
        eprintln!("No alerts for {date}");
        process::exit(2);
    }

    println!("=== Alerts for {date} ===\n");
    print_alerts(&alerts);
    Ok(())
}
