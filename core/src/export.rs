use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::DailyRecord;

#[derive(Debug, Serialize)]
struct HistoryRow {
    date: String,
    goal_calories: f64,
    calories: f64,
    protein_g: f64,
    carbs_g: f64,
    fat_g: f64,
    remaining_calories: f64,
    entries: usize,
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

impl From<&DailyRecord> for HistoryRow {
    fn from(r: &DailyRecord) -> Self {
        Self {
            date: r.date_key(),
            goal_calories: round1(r.goal_calories),
            calories: round1(r.total_calories),
            protein_g: round1(r.total_protein),
            carbs_g: round1(r.total_carbs),
            fat_g: round1(r.total_fat),
            remaining_calories: round1(r.remaining_calories),
            entries: r.entries.len(),
        }
    }
}

/// Write one CSV row per day, with a header row.
pub fn write_history_csv<W: Write>(records: &[DailyRecord], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(HistoryRow::from(record))
            .with_context(|| format!("Failed to write row for {}", record.date_key()))?;
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}
