use anyhow::{Result, bail};

use nutriledger_core::models::{WeeklyGoalSettings, WeeklySummary};

use super::Ledger;
use super::helpers::parse_date;

fn print_weekly(summary: &WeeklySummary) {
    let start = summary.week_start;
    let end = summary.week_end;
    println!("=== Week {start} to {end} ===\n");
    let cal = summary.total_calories;
    let goal = summary.goal_calories;
    let (p, c, f) = (
        summary.total_protein,
        summary.total_carbs,
        summary.total_fat,
    );
    println!("  CONSUMED: {cal:.0} kcal | P:{p:.0}g C:{c:.0}g F:{f:.0}g");
    println!("  GOAL: {goal:.0} kcal");
    let balance = summary.buffer_balance;
    if summary.buffer_enabled {
        let status = if balance >= 0.0 { "headroom" } else { "over budget" };
        println!("  BUFFER: {balance:+.0} kcal ({status})");
    } else {
        println!("  REMAINING: {balance:.0} kcal");
    }
    println!("  DAYS LOGGED: {}/7", summary.days_logged);
}

pub(crate) fn cmd_week(ledger: &Ledger, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let summary = ledger.get_weekly_summary(date)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_weekly(&summary);
    }
    Ok(())
}

pub(crate) fn cmd_weekly_show(ledger: &Ledger, json: bool) -> Result<()> {
    let settings = ledger.weekly_settings()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }
    let on_off = |b: bool| if b { "on" } else { "off" };
    println!("  Weekly goal: {}", on_off(settings.enabled));
    println!("  Buffer: {}", on_off(settings.buffer_enabled));
    match settings.weekly_target_calories {
        Some(t) => println!("  Target: {t:.0} kcal"),
        None => println!("  Target: 7 x daily goal"),
    }
    Ok(())
}

pub(crate) struct WeeklyChanges {
    pub enabled: Option<bool>,
    pub buffer: Option<bool>,
    pub target: Option<f64>,
    pub clear_target: bool,
}

fn apply_changes(mut settings: WeeklyGoalSettings, changes: &WeeklyChanges) -> Result<WeeklyGoalSettings> {
    if changes.target.is_some() && changes.clear_target {
        bail!("--target and --clear-target cannot be combined");
    }
    if let Some(enabled) = changes.enabled {
        settings.enabled = enabled;
    }
    if let Some(buffer) = changes.buffer {
        settings.buffer_enabled = buffer;
    }
    if changes.target.is_some() {
        settings.weekly_target_calories = changes.target;
    }
    if changes.clear_target {
        settings.weekly_target_calories = None;
    }
    Ok(settings)
}

pub(crate) fn cmd_weekly_set(ledger: &Ledger, changes: &WeeklyChanges, json: bool) -> Result<()> {
    let settings = apply_changes(ledger.weekly_settings()?, changes)?;
    let summary = ledger.update_weekly_settings(&settings)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "settings": settings, "summary": summary })
        );
    } else {
        println!("Weekly settings updated\n");
        print_weekly(&summary);
    }
    Ok(())
}
