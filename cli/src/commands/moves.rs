use anyhow::Result;
use chrono::NaiveDate;

use nutriledger_core::models::{DailyRecord, MealType};

use super::Ledger;
use super::helpers::{parse_date, parse_meal};

fn meal_calories(record: &DailyRecord, meal_type: MealType) -> f64 {
    record.meal_totals(meal_type).calories
}

pub(crate) fn cmd_move_meal(
    ledger: &Ledger,
    from: &str,
    to: &str,
    amount: f64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let from = parse_meal(from)?;
    let to = parse_meal(to)?;
    let date = parse_date(date)?;

    let before = ledger.get_or_create(date)?;
    let after = ledger.move_between_meals(date, from, to, amount)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&after)?);
        return Ok(());
    }

    let moved = meal_calories(&before, from) - meal_calories(&after, from);
    println!("Moved {moved:.0} kcal from {from} to {to} on {date}");
    for meal_type in [from, to] {
        let label = meal_type.as_str().to_uppercase();
        let was = meal_calories(&before, meal_type);
        let now = meal_calories(&after, meal_type);
        println!("  {label}: {was:.0} -> {now:.0} kcal");
    }
    if moved + 0.5 < amount && amount.is_finite() {
        println!("  (only {moved:.0} kcal was available)");
    }
    Ok(())
}

pub(crate) fn cmd_move_day(
    ledger: &Ledger,
    from: Option<String>,
    to: Option<String>,
    amount: f64,
    json: bool,
) -> Result<()> {
    let from: NaiveDate = parse_date(from)?;
    let to: NaiveDate = parse_date(to)?;

    let before = ledger.get_or_create(from)?.total_calories;
    let (src, dst) = ledger.move_across_days(from, to, amount)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "from": src, "to": dst })
        );
        return Ok(());
    }

    let moved = before - src.total_calories;
    println!("Moved {moved:.0} kcal from {from} to {to}");
    let (src_total, src_goal) = (src.total_calories, src.goal_calories);
    let (dst_total, dst_goal) = (dst.total_calories, dst.goal_calories);
    println!("  {from}: {src_total:.0} / {src_goal:.0} kcal");
    println!("  {to}: {dst_total:.0} / {dst_goal:.0} kcal");
    Ok(())
}
