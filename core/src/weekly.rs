//! Weekly aggregation. Weeks start on Monday.

use chrono::{Datelike, Days, NaiveDate};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{DailyRecord, NutrientTotals, WeeklyGoalSettings, WeeklySummary};

/// Monday of the week containing `date`, if the calendar reaches back that far.
#[must_use]
pub fn week_start_for(date: NaiveDate) -> Option<NaiveDate> {
    let offset = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(offset))
}

/// Monday and Sunday of the week containing `date`.
///
/// Fails for dates whose week runs off either end of the calendar.
pub fn week_bounds(date: NaiveDate) -> LedgerResult<(NaiveDate, NaiveDate)> {
    week_start_for(date)
        .and_then(|start| start.checked_add_days(Days::new(6)).map(|end| (start, end)))
        .ok_or_else(|| {
            LedgerError::validation(format!("Date {date} is outside the supported calendar range"))
        })
}

/// The seven dates of the week containing `date`, Monday first.
pub fn week_dates(date: NaiveDate) -> LedgerResult<Vec<NaiveDate>> {
    let (start, _) = week_bounds(date)?;
    Ok((0..7)
        .filter_map(|i| start.checked_add_days(Days::new(i)))
        .collect())
}

/// Explicit target when weekly goals are enabled and one is set, else seven days of `daily_goal`.
#[must_use]
pub fn resolve_weekly_goal(settings: &WeeklyGoalSettings, daily_goal: f64) -> f64 {
    match settings.weekly_target_calories {
        Some(target) if settings.enabled => target,
        _ => daily_goal * 7.0,
    }
}

/// Summarize the week containing `date`.
///
/// Records outside that week are ignored; missing days count as zero.
pub fn summarize_week(
    date: NaiveDate,
    records: &[DailyRecord],
    settings: &WeeklyGoalSettings,
    daily_goal: f64,
) -> LedgerResult<WeeklySummary> {
    let (week_start, week_end) = week_bounds(date)?;

    let in_week: Vec<&DailyRecord> = records
        .iter()
        .filter(|r| r.date >= week_start && r.date <= week_end)
        .collect();
    let totals: NutrientTotals = in_week.iter().map(|r| r.totals()).sum();
    let goal_calories = resolve_weekly_goal(settings, daily_goal);

    Ok(WeeklySummary {
        week_start,
        week_end,
        total_calories: totals.calories,
        total_protein: totals.protein,
        total_carbs: totals.carbs,
        total_fat: totals.fat,
        goal_calories,
        buffer_balance: (goal_calories - totals.calories).round(),
        buffer_enabled: settings.buffer_enabled,
        days_logged: in_week.iter().filter(|r| !r.entries.is_empty()).count(),
    })
}
