use anyhow::Result;
use clap::Args;
use std::process;

use nutriledger_core::models::{FoodItem, MealEntry};

use super::Ledger;
use super::helpers::{json_error, parse_date, parse_meal, print_alerts};

/// Nutrition facts for one serving of a food.
#[derive(Args)]
pub(crate) struct FoodArgs {
    /// Food name
    pub name: String,
    /// Calories per serving
    #[arg(long)]
    pub calories: f64,
    /// Protein per serving (g)
    #[arg(long, default_value = "0")]
    pub protein: f64,
    /// Carbs per serving (g)
    #[arg(long, default_value = "0")]
    pub carbs: f64,
    /// Fat per serving (g)
    #[arg(long, default_value = "0")]
    pub fat: f64,
    /// Sugar per serving (g)
    #[arg(long)]
    pub sugar: Option<f64>,
    /// Sodium per serving (mg)
    #[arg(long)]
    pub sodium: Option<f64>,
    /// Serving description (e.g. "1 cup", "200g")
    #[arg(long)]
    pub serving: Option<String>,
}

impl FoodArgs {
    pub(crate) fn into_food(self) -> FoodItem {
        let mut food = FoodItem::new(self.name, self.calories, self.protein, self.carbs, self.fat);
        if let Some(sugar) = self.sugar {
            food = food.with_sugar(sugar);
        }
        if let Some(sodium) = self.sodium {
            food = food.with_sodium(sodium);
        }
        if let Some(serving) = self.serving {
            food = food.with_serving_size(serving);
        }
        food
    }
}

pub(crate) fn format_entry_line(entry: &MealEntry) -> String {
    let n = entry.nutrients();
    let id = &entry.id[..8.min(entry.id.len())];
    let name = &entry.food_item.name;
    let qty = entry.quantity;
    let serving = &entry.food_item.serving_size;
    format!(
        "[{id}] {name} x{qty:.2} ({serving}): {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
        n.calories, n.protein, n.carbs, n.fat
    )
}

pub(crate) fn cmd_log(
    ledger: &Ledger,
    food: FoodArgs,
    quantity: f64,
    meal: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let meal_type = parse_meal(meal)?;
    let date = parse_date(date)?;

    let logged = ledger.add_meal(date, food.into_food(), quantity, meal_type)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&logged)?);
        return Ok(());
    }

    let line = format_entry_line(&logged.entry);
    println!("Logged to {meal_type} on {date}: {line}");
    let total = logged.record.total_calories;
    let goal = logged.record.goal_calories;
    let remaining = logged.record.remaining_calories;
    println!("  Day: {total:.0} / {goal:.0} kcal ({remaining:.0} remaining)");
    if !logged.alerts.is_empty() {
        println!();
        print_alerts(&logged.alerts);
    }
    Ok(())
}

/// Entries live inside their day, so deletion needs the date as well as the id.
/// A unique id prefix (as shown by `summary`) is accepted.
pub(crate) fn cmd_delete(
    ledger: &Ledger,
    entry_id: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let matches: Vec<String> = ledger
        .get_record(date)?
        .map(|r| {
            r.entries
                .iter()
                .filter(|e| e.id.starts_with(entry_id))
                .map(|e| e.id.clone())
                .collect()
        })
        .unwrap_or_default();

    let [id] = matches.as_slice() else {
        let msg = if matches.is_empty() {
            format!("Entry {entry_id} not found on {date}")
        } else {
            format!("Entry id '{entry_id}' is ambiguous on {date}")
        };
        if json {
            println!("{}", json_error(&msg));
        } else {
            eprintln!("{msg}");
        }
        process::exit(2);
    };

    let record = ledger.remove_meal(date, id)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "deleted": id, "record": record })
        );
    } else {
        let total = record.total_calories;
        println!("Deleted entry {id}");
        println!("  Day: {total:.0} kcal");
    }
    Ok(())
}

pub(crate) fn cmd_goal(
    ledger: &Ledger,
    calories: f64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let record = ledger.update_goal_calories(date, calories)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        let goal = record.goal_calories;
        let remaining = record.remaining_calories;
        println!("Goal for {date} set to {goal:.0} kcal ({remaining:.0} remaining)");
    }
    Ok(())
}
