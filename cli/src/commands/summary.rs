use anyhow::{Context, Result};
use std::path::Path;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutriledger_core::export::write_history_csv;

use super::Ledger;
use super::helpers::{no_neg_zero, parse_date};
use super::log::format_entry_line;

pub(crate) fn cmd_summary(ledger: &Ledger, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let record = ledger.get_or_create(date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    if record.entries.is_empty() {
        eprintln!("No entries for {date}");
        process::exit(2);
    }

    println!("=== {date} ===\n");

    for (meal_type, sub_cal) in record.calories_by_meal() {
        let label = meal_type.as_str().to_uppercase();
        println!("  {label} ({sub_cal:.0} kcal)");
        for entry in record.entries_for(meal_type) {
            println!("    {}", format_entry_line(entry));
        }
        println!();
    }

    let total_cal = record.total_calories;
    let total_p = record.total_protein;
    let total_c = record.total_carbs;
    let total_f = record.total_fat;
    println!("  TOTAL: {total_cal:.0} kcal | P:{total_p:.0}g C:{total_c:.0}g F:{total_f:.0}g");
    let goal = record.goal_calories;
    println!("  GOAL: {goal:.0} kcal");
    let remaining = record.remaining_calories;
    println!("  REMAINING: {remaining:.0} kcal");

    Ok(())
}

pub(crate) fn cmd_history(ledger: &Ledger, days: u32, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Goal")]
        goal: String,
        #[tabled(rename = "Remaining")]
        remaining: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
    }

    let records = ledger.get_history_range(days);

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.iter().all(|r| r.entries.is_empty()) {
        eprintln!("No entries in the last {days} days");
        process::exit(2);
    }

    let rows: Vec<HistoryRow> = records
        .iter()
        .map(|r| {
            let cal = no_neg_zero(r.total_calories);
            let remaining = no_neg_zero(r.remaining_calories);
            let p = no_neg_zero(r.total_protein);
            let c = no_neg_zero(r.total_carbs);
            let f = no_neg_zero(r.total_fat);
            HistoryRow {
                date: r.date_key(),
                calories: format!("{cal:.0}"),
                goal: format!("{:.0}", r.goal_calories),
                remaining: format!("{remaining:.0}"),
                protein: format!("{p:.0}g"),
                carbs: format!("{c:.0}g"),
                fat: format!("{f:.0}g"),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_export(ledger: &Ledger, days: u32, output: Option<&Path>) -> Result<()> {
    let records = ledger.get_history_range(days);
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_history_csv(&records, file)?;
            eprintln!("Exported {} days to {}", records.len(), path.display());
        }
        None => write_history_csv(&records, std::io::stdout().lock())?,
    }
    Ok(())
}
