//! Calorie redistribution by greedy proportional splitting.
//!
//! Entries are consumed largest-first. An entry that fits entirely into the
//! remaining amount moves whole; otherwise it is split, the original keeps the
//! unmoved share and a fragment carries the moved share. Totals across source
//! and destination are conserved. Over-requests cap at what is available.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::{DailyRecord, MealEntry, MealType, new_entry_id};

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Entries (whole or fragments) taken out of the source, each with a fresh id.
    pub moved: Vec<MealEntry>,
    pub moved_calories: f64,
}

/// Take up to `amount` kcal out of the entries matching `selects`.
///
/// Whole entries are removed from `entries`; split entries stay with a
/// reduced quantity. Does nothing unless `amount > 0`.
pub fn extract_calories<F>(entries: &mut Vec<MealEntry>, amount: f64, selects: F) -> Extraction
where
    F: Fn(&MealEntry) -> bool,
{
    let mut extraction = Extraction::default();
    if amount.is_nan() || amount <= 0.0 {
        return extraction;
    }

    let mut candidates: Vec<usize> = (0..entries.len())
        .filter(|&i| selects(&entries[i]))
        .collect();
    // Largest first; sort is stable so equal entries keep log order.
    candidates.sort_by(|&a, &b| {
        entries[b]
            .calories()
            .partial_cmp(&entries[a].calories())
            .unwrap_or(Ordering::Equal)
    });

    let mut remaining = amount;
    let mut whole: Vec<usize> = Vec::new();

    for i in candidates {
        if remaining <= 0.0 {
            break;
        }
        let contributed = entries[i].calories();
        if contributed.is_nan() || contributed <= 0.0 {
            continue;
        }

        let take = remaining.min(contributed);
        let fraction = take / contributed;

        if fraction >= 1.0 {
            let mut entry = entries[i].clone();
            entry.id = new_entry_id();
            extraction.moved.push(entry);
            whole.push(i);
        } else {
            let original = entries[i].quantity;
            entries[i].quantity = original * (1.0 - fraction);

            let mut fragment = entries[i].clone();
            fragment.id = new_entry_id();
            fragment.quantity = original * fraction;
            fragment.image_ref = None;
            extraction.moved.push(fragment);
        }

        extraction.moved_calories += take;
        remaining -= take;
    }

    whole.sort_unstable_by(|a, b| b.cmp(a));
    for i in whole {
        entries.remove(i);
    }

    extraction
}

/// Move up to `amount_kcal` from one meal slot to another within a record.
///
/// Returns an unchanged clone when `amount_kcal <= 0` or the slots are equal.
#[must_use]
pub fn move_between_meals(
    record: &DailyRecord,
    from: MealType,
    to: MealType,
    amount_kcal: f64,
) -> DailyRecord {
    let mut updated = record.clone();
    if from == to || amount_kcal.is_nan() || amount_kcal <= 0.0 {
        return updated;
    }

    let extraction = extract_calories(&mut updated.entries, amount_kcal, |e| e.meal_type == from);
    let moved = extraction.moved.len();
    updated.entries.extend(extraction.moved.into_iter().map(|mut e| {
        e.meal_type = to;
        e
    }));
    updated.recompute_totals();

    info!(
        date = %updated.date_key(),
        %from,
        %to,
        requested = amount_kcal,
        moved_kcal = extraction.moved_calories,
        entries = moved,
        "moved calories between meals"
    );
    updated
}

/// Move up to `amount_kcal` from every entry of `from` into `to`.
///
/// Fragments keep their meal type and are stamped with `now`. The caller
/// decides whether same-date moves are meaningful; this function treats the
/// two records independently.
#[must_use]
pub fn move_across_days(
    from: &DailyRecord,
    to: &DailyRecord,
    amount_kcal: f64,
    now: DateTime<Utc>,
) -> (DailyRecord, DailyRecord) {
    let mut source = from.clone();
    let mut target = to.clone();
    if amount_kcal.is_nan() || amount_kcal <= 0.0 {
        return (source, target);
    }

    let extraction = extract_calories(&mut source.entries, amount_kcal, |_| true);
    let moved = extraction.moved.len();
    target
        .entries
        .extend(extraction.moved.into_iter().map(|mut e| {
            e.timestamp = now;
            e
        }));
    source.recompute_totals();
    target.recompute_totals();

    info!(
        from = %source.date_key(),
        to = %target.date_key(),
        requested = amount_kcal,
        moved_kcal = extraction.moved_calories,
        entries = moved,
        "moved calories across days"
    );
    (source, target)
}
