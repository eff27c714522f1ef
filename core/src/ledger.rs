//! The ledger: per-date records, redistribution, weekly summary, alerts and
//! the sync outbox behind one handle.
//!
//! Every mutation of a date runs under that date's lock, recomputes totals,
//! persists, refreshes the weekly summary and queues a sync payload. Store
//! failures abort the mutation before anything else changes. Sync problems
//! are logged and never fail the caller.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::alerts::{AlertQueue, DEFAULT_ALERT_CAPACITY, evaluate_for_profile};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    DailyRecord, FoodItem, HealthAlert, MealEntry, MealType, UserProfile, WeeklyGoalSettings,
    WeeklySummary, date_key, validate_food_item, validate_weekly_settings,
};
use crate::redistribute;
use crate::store::LedgerBackend;
use crate::sync::{FlushReport, OutboxItem, RemoteSync, RetryPolicy, SyncOutbox, SyncPayload};
use crate::weekly::{summarize_week, week_bounds, week_dates};

const WEEKLY_SETTINGS_KEY: &str = "weekly_goal_settings";
const OUTBOX_KEY: &str = "sync_outbox";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    /// The user's current calendar date.
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub now: DateTime<Utc>,
    pub today: NaiveDate,
}

impl FixedClock {
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            today: now.date_naive(),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn today(&self) -> NaiveDate {
        self.today
    }
}

/// Supplies the read-only profile inputs (goal, conditions, allergies, preferences).
pub trait ProfileProvider: Send + Sync {
    fn user_profile(&self) -> anyhow::Result<UserProfile>;
}

impl ProfileProvider for UserProfile {
    fn user_profile(&self) -> anyhow::Result<UserProfile> {
        Ok(self.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub alert_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            alert_capacity: DEFAULT_ALERT_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of [`LedgerStore::add_meal`].
#[derive(Debug, Clone, Serialize)]
pub struct LoggedMeal {
    pub record: DailyRecord,
    pub entry: MealEntry,
    /// Alerts raised by this entry; they are also queued on the ledger.
    pub alerts: Vec<HealthAlert>,
}

/// Set of dates with a mutation in flight.
#[derive(Default)]
struct DateLocks {
    busy: Mutex<HashSet<NaiveDate>>,
    released: Condvar,
}

impl DateLocks {
    /// Blocks until every date in `dates` is free, then claims them all at once.
    fn acquire(&self, dates: &[NaiveDate]) -> DateGuard<'_> {
        let mut busy = self.busy.lock();
        while dates.iter().any(|d| busy.contains(d)) {
            self.released.wait(&mut busy);
        }
        busy.extend(dates.iter().copied());
        DateGuard {
            locks: self,
            dates: dates.to_vec(),
        }
    }
}

struct DateGuard<'a> {
    locks: &'a DateLocks,
    dates: Vec<NaiveDate>,
}

impl Drop for DateGuard<'_> {
    fn drop(&mut self) {
        let mut busy = self.locks.busy.lock();
        for date in &self.dates {
            busy.remove(date);
        }
        drop(busy);
        self.locks.released.notify_all();
    }
}

struct RemoteTarget {
    client: Arc<dyn RemoteSync>,
    user_id: String,
}

fn store_error(key: impl Into<String>, err: anyhow::Error) -> LedgerError {
    match err.downcast::<LedgerError>() {
        Ok(inner) => inner,
        Err(err) => LedgerError::persistence(key, err),
    }
}

/// Days whose week runs off the end of the calendar cannot be summarized, so
/// they are refused before anything is written.
fn check_date(date: NaiveDate) -> LedgerResult<()> {
    week_bounds(date).map(|_| ())
}

pub struct LedgerStore<S: LedgerBackend> {
    store: S,
    profile: Box<dyn ProfileProvider>,
    clock: Box<dyn Clock>,
    locks: DateLocks,
    alerts: Mutex<AlertQueue>,
    weekly: Mutex<Option<WeeklySummary>>,
    outbox: SyncOutbox,
    remote: Option<RemoteTarget>,
}

impl<S: LedgerBackend> LedgerStore<S> {
    pub fn new(store: S) -> Self {
        let config = LedgerConfig::default();
        Self {
            store,
            profile: Box::new(UserProfile::default()),
            clock: Box::new(SystemClock),
            locks: DateLocks::default(),
            alerts: Mutex::new(AlertQueue::new(config.alert_capacity)),
            weekly: Mutex::new(None),
            outbox: SyncOutbox::new(config.retry),
            remote: None,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl ProfileProvider + 'static) -> Self {
        self.profile = Box::new(profile);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.alerts = Mutex::new(AlertQueue::new(config.alert_capacity));
        self.outbox = SyncOutbox::new(config.retry);
        self
    }

    /// Mirror every mutation to `client` under `user_id` through the outbox.
    #[must_use]
    pub fn with_remote(mut self, client: Arc<dyn RemoteSync>, user_id: impl Into<String>) -> Self {
        self.remote = Some(RemoteTarget {
            client,
            user_id: user_id.into(),
        });
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Current profile, or the default one if the provider fails.
    fn profile(&self) -> UserProfile {
        match self.profile.user_profile() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "profile unavailable, using defaults");
                UserProfile::default()
            }
        }
    }

    fn default_goal(&self) -> f64 {
        self.profile().goal_calories()
    }

    fn load(&self, date: NaiveDate) -> LedgerResult<Option<DailyRecord>> {
        self.store
            .read_record(date)
            .map_err(|e| store_error(date_key(date), e))
    }

    fn load_or_new(&self, date: NaiveDate) -> LedgerResult<(DailyRecord, bool)> {
        match self.load(date)? {
            Some(record) => Ok((record, true)),
            None => Ok((DailyRecord::new(date, self.default_goal()), false)),
        }
    }

    fn persist(&self, record: &DailyRecord) -> LedgerResult<()> {
        self.store
            .write_record(record)
            .map_err(|e| LedgerError::persistence(record.date_key(), e))?;
        debug!(
            date = %record.date_key(),
            entries = record.entries.len(),
            total_calories = record.total_calories,
            "persisted daily record"
        );
        Ok(())
    }

    /// Read for history views: unreadable days become `None` with a warning.
    fn load_lenient(&self, date: NaiveDate) -> Option<DailyRecord> {
        match self.store.read_record(date) {
            Ok(record) => record,
            Err(e) => {
                warn!(date = %date_key(date), error = %format!("{e:#}"), "substituting empty day for unreadable record");
                None
            }
        }
    }

    fn compute_weekly(&self, date: NaiveDate) -> LedgerResult<(WeeklySummary, WeeklyGoalSettings)> {
        let settings = self.weekly_settings()?;
        let records: Vec<DailyRecord> = week_dates(date)?
            .into_iter()
            .filter_map(|d| self.load_lenient(d))
            .collect();
        let today_goal = self
            .load_lenient(self.clock.today())
            .map_or_else(|| self.default_goal(), |r| r.goal_calories);
        let summary = summarize_week(date, &records, &settings, today_goal)?;
        Ok((summary, settings))
    }

    /// Refresh the cached weekly summary and queue the record for sync.
    /// Failures here are logged; the mutation has already been committed.
    fn after_mutation(&self, record: &DailyRecord) -> Option<WeeklySummary> {
        let (summary, settings) = match self.compute_weekly(record.date) {
            Ok(v) => v,
            Err(e) => {
                warn!(date = %record.date_key(), error = %e, "weekly summary recompute failed");
                return None;
            }
        };
        *self.weekly.lock() = Some(summary.clone());

        if self.remote.is_some() {
            let payload = SyncPayload {
                daily_record: record.clone(),
                weekly_settings: settings,
                weekly_summary: summary.clone(),
            };
            if let Err(e) = self.outbox.enqueue(&self.store, payload, self.clock.now()) {
                warn!(date = %record.date_key(), error = %format!("{e:#}"), "failed to queue sync payload");
            }
        }
        Some(summary)
    }

    /// The record for `date`, creating and persisting an empty one if needed.
    pub fn get_or_create(&self, date: NaiveDate) -> LedgerResult<DailyRecord> {
        check_date(date)?;
        let _guard = self.locks.acquire(&[date]);
        let (record, existed) = self.load_or_new(date)?;
        if !existed {
            self.persist(&record)?;
        }
        Ok(record)
    }

    /// The persisted record for `date`, without creating one.
    pub fn get_record(&self, date: NaiveDate) -> LedgerResult<Option<DailyRecord>> {
        self.load(date)
    }

    pub fn add_meal(
        &self,
        date: NaiveDate,
        food: FoodItem,
        quantity: f64,
        meal_type: MealType,
    ) -> LedgerResult<LoggedMeal> {
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(LedgerError::validation(format!(
                "quantity must be a non-negative number (got {quantity})"
            )));
        }
        validate_food_item(&food)?;
        check_date(date)?;

        let _guard = self.locks.acquire(&[date]);
        let (mut record, _) = self.load_or_new(date)?;
        let entry = MealEntry::new(food, quantity, meal_type, self.clock.now());
        record.entries.push(entry.clone());
        record.recompute_totals();
        self.persist(&record)?;

        self.after_mutation(&record);

        let alerts = evaluate_for_profile(&entry.food_item, &self.profile());
        if !alerts.is_empty() {
            debug!(count = alerts.len(), food = %entry.food_item.name, "health alerts raised");
            self.alerts.lock().push_all(alerts.iter().cloned());
        }

        Ok(LoggedMeal {
            record,
            entry,
            alerts,
        })
    }

    /// Remove an entry. Unknown ids are a no-op.
    pub fn remove_meal(&self, date: NaiveDate, entry_id: &str) -> LedgerResult<DailyRecord> {
        check_date(date)?;
        let _guard = self.locks.acquire(&[date]);
        let (mut record, existed) = self.load_or_new(date)?;

        let before = record.entries.len();
        record.entries.retain(|e| e.id != entry_id);
        if record.entries.len() == before {
            if !existed {
                self.persist(&record)?;
            }
            return Ok(record);
        }

        record.recompute_totals();
        self.persist(&record)?;
        self.after_mutation(&record);
        Ok(record)
    }

    pub fn update_goal_calories(&self, date: NaiveDate, goal: f64) -> LedgerResult<DailyRecord> {
        if !goal.is_finite() || goal <= 0.0 {
            return Err(LedgerError::validation(format!(
                "goal_calories must be greater than 0 (got {goal})"
            )));
        }
        check_date(date)?;

        let _guard = self.locks.acquire(&[date]);
        let (mut record, _) = self.load_or_new(date)?;
        record.goal_calories = goal;
        record.recompute_totals();
        self.persist(&record)?;
        self.after_mutation(&record);
        Ok(record)
    }

    /// Move up to `amount_kcal` between two meal slots of `date`, capped at what is available.
    pub fn move_between_meals(
        &self,
        date: NaiveDate,
        from: MealType,
        to: MealType,
        amount_kcal: f64,
    ) -> LedgerResult<DailyRecord> {
        if amount_kcal.is_nan() {
            return Err(LedgerError::validation("amount must be a number"));
        }
        check_date(date)?;
        if amount_kcal <= 0.0 || from == to {
            return self.get_or_create(date);
        }

        let _guard = self.locks.acquire(&[date]);
        let (record, existed) = self.load_or_new(date)?;
        let updated = redistribute::move_between_meals(&record, from, to, amount_kcal);

        let changed = updated != record;
        if changed || !existed {
            self.persist(&updated)?;
        }
        if changed {
            self.after_mutation(&updated);
        }
        Ok(updated)
    }

    /// Move up to `amount_kcal` from `from` to `to`, capped at what `from` holds.
    ///
    /// The two records are written independently. If the second write fails
    /// the first is restored before the error is returned.
    pub fn move_across_days(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        amount_kcal: f64,
    ) -> LedgerResult<(DailyRecord, DailyRecord)> {
        if amount_kcal.is_nan() {
            return Err(LedgerError::validation("amount must be a number"));
        }
        check_date(from)?;
        check_date(to)?;
        if from == to {
            let record = self.get_or_create(from)?;
            return Ok((record.clone(), record));
        }
        if amount_kcal <= 0.0 {
            return Ok((self.get_or_create(from)?, self.get_or_create(to)?));
        }

        let _guard = self.locks.acquire(&[from, to]);
        let (source, source_existed) = self.load_or_new(from)?;
        let (target, target_existed) = self.load_or_new(to)?;
        let (new_source, new_target) =
            redistribute::move_across_days(&source, &target, amount_kcal, self.clock.now());

        if new_source == source {
            if !source_existed {
                self.persist(&source)?;
            }
            if !target_existed {
                self.persist(&target)?;
            }
            return Ok((source, target));
        }

        self.persist(&new_source)?;
        if let Err(e) = self.persist(&new_target) {
            if let Err(undo) = self.store.write_record(&source) {
                error!(
                    from = %source.date_key(),
                    to = %target.date_key(),
                    error = %format!("{undo:#}"),
                    "failed to restore source day after aborted move"
                );
            }
            return Err(e);
        }

        self.after_mutation(&new_source);
        self.after_mutation(&new_target);
        Ok((new_source, new_target))
    }

    /// Summary of the Monday-aligned week containing `date`. Also refreshes the cache.
    pub fn get_weekly_summary(&self, date: NaiveDate) -> LedgerResult<WeeklySummary> {
        let (summary, _) = self.compute_weekly(date)?;
        *self.weekly.lock() = Some(summary.clone());
        Ok(summary)
    }

    /// The summary computed after the most recent mutation or query, if any.
    #[must_use]
    pub fn cached_weekly_summary(&self) -> Option<WeeklySummary> {
        self.weekly.lock().clone()
    }

    pub fn weekly_settings(&self) -> LedgerResult<WeeklyGoalSettings> {
        self.store
            .read_weekly_settings()
            .map_err(|e| store_error(WEEKLY_SETTINGS_KEY, e))
    }

    /// Save settings and return this week's summary under them.
    pub fn update_weekly_settings(
        &self,
        settings: &WeeklyGoalSettings,
    ) -> LedgerResult<WeeklySummary> {
        validate_weekly_settings(settings)?;
        self.store
            .write_weekly_settings(settings)
            .map_err(|e| LedgerError::persistence(WEEKLY_SETTINGS_KEY, e))?;
        debug!(?settings, "weekly goal settings updated");

        let today = self.clock.today();
        let record = self
            .load_lenient(today)
            .unwrap_or_else(|| DailyRecord::new(today, self.default_goal()));
        match self.after_mutation(&record) {
            Some(summary) => Ok(summary),
            None => self.get_weekly_summary(today),
        }
    }

    /// The last `n_days` days ending today, newest first.
    ///
    /// Missing or unreadable days are returned as empty records; nothing is persisted.
    #[must_use]
    pub fn get_history_range(&self, n_days: u32) -> Vec<DailyRecord> {
        let today = self.clock.today();
        let goal = self.default_goal();
        (0..u64::from(n_days))
            .map_while(|i| today.checked_sub_days(Days::new(i)))
            .map(|date| {
                self.load_lenient(date)
                    .unwrap_or_else(|| DailyRecord::new(date, goal))
            })
            .collect()
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<HealthAlert> {
        self.alerts.lock().snapshot()
    }

    pub fn drain_alerts(&self) -> Vec<HealthAlert> {
        self.alerts.lock().drain()
    }

    pub fn clear_alerts(&self) {
        self.alerts.lock().clear();
    }

    /// Push due outbox items to the remote. Without a remote this does nothing.
    pub fn flush_sync(&self) -> LedgerResult<FlushReport> {
        let Some(remote) = &self.remote else {
            return Ok(FlushReport::default());
        };
        self.outbox
            .flush(
                &self.store,
                remote.client.as_ref(),
                &remote.user_id,
                self.clock.now(),
            )
            .map_err(|e| store_error(OUTBOX_KEY, e))
    }

    pub fn pending_sync(&self) -> LedgerResult<Vec<OutboxItem>> {
        self.store
            .outbox_items()
            .map_err(|e| store_error(OUTBOX_KEY, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertCondition, AlertSeverity, MedicalCondition, NutritionPreferences};
    use crate::store::{MemoryStore, OutboxStore, RecordStore, SettingsStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn clock() -> FixedClock {
        FixedClock::at(
            DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    fn ledger() -> LedgerStore<MemoryStore> {
        LedgerStore::new(MemoryStore::new()).with_clock(clock())
    }

    fn food(name: &str, kcal: f64) -> FoodItem {
        FoodItem::new(name, kcal, kcal / 25.0, kcal / 8.0, kcal / 30.0)
    }

    /// Memory store whose record writes can be made to fail per date.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: Mutex<HashSet<NaiveDate>>,
    }

    impl FlakyStore {
        fn fail_writes_for(&self, date: NaiveDate) {
            self.failing.lock().insert(date);
        }
    }

    impl RecordStore for FlakyStore {
        fn read_record(&self, date: NaiveDate) -> anyhow::Result<Option<DailyRecord>> {
            self.inner.read_record(date)
        }

        fn write_record(&self, record: &DailyRecord) -> anyhow::Result<()> {
            if self.failing.lock().contains(&record.date) {
                anyhow::bail!("disk full");
            }
            self.inner.write_record(record)
        }
    }

    impl SettingsStore for FlakyStore {
        fn read_weekly_settings(&self) -> anyhow::Result<WeeklyGoalSettings> {
            self.inner.read_weekly_settings()
        }

        fn write_weekly_settings(&self, settings: &WeeklyGoalSettings) -> anyhow::Result<()> {
            self.inner.write_weekly_settings(settings)
        }
    }

    impl OutboxStore for FlakyStore {
        fn put_outbox_item(&self, item: &OutboxItem) -> anyhow::Result<()> {
            self.inner.put_outbox_item(item)
        }

        fn outbox_items(&self) -> anyhow::Result<Vec<OutboxItem>> {
            self.inner.outbox_items()
        }

        fn complete_outbox_item(&self, key: &str, item_id: &str) -> anyhow::Result<bool> {
            self.inner.complete_outbox_item(key, item_id)
        }

        fn reschedule_outbox_item(&self, item: &OutboxItem) -> anyhow::Result<bool> {
            self.inner.reschedule_outbox_item(item)
        }
    }

    #[derive(Default)]
    struct RecordingRemote {
        down: AtomicBool,
        received: Mutex<Vec<(String, SyncPayload)>>,
    }

    impl RemoteSync for RecordingRemote {
        fn upsert(&self, user_id: &str, payload: &SyncPayload) -> anyhow::Result<()> {
            if self.down.load(Ordering::SeqCst) {
                anyhow::bail!("503 Service Unavailable");
            }
            self.received
                .lock()
                .push((user_id.to_string(), payload.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_get_or_create_persists_default_record() {
        let ledger = ledger();
        let record = ledger.get_or_create(d(15)).unwrap();
        assert_eq!(record.goal_calories, 2000.0);
        assert_eq!(record.total_calories, 0.0);
        assert_eq!(ledger.store().read_record(d(15)).unwrap(), Some(record));
    }

    #[test]
    fn test_profile_goal_used_for_new_days() {
        let profile = UserProfile::new(1700.0, vec![], vec![], NutritionPreferences::default())
            .unwrap();
        let ledger = ledger().with_profile(profile);
        assert_eq!(ledger.get_or_create(d(15)).unwrap().goal_calories, 1700.0);
    }

    #[test]
    fn test_add_meal_updates_totals() {
        let ledger = ledger();
        let logged = ledger
            .add_meal(d(15), food("Omelette", 320.0), 1.5, MealType::Breakfast)
            .unwrap();
        assert!((logged.record.total_calories - 480.0).abs() < 0.01);
        assert!((logged.record.remaining_calories - 1520.0).abs() < 0.01);
        assert_eq!(logged.entry.timestamp, clock().now);
        assert_eq!(logged.record.entry(&logged.entry.id), Some(&logged.entry));

        let stored = ledger.get_record(d(15)).unwrap().unwrap();
        assert_eq!(stored, logged.record);
    }

    #[test]
    fn test_add_meal_rejects_bad_quantity() {
        let ledger = ledger();
        for q in [-1.0, f64::NAN, f64::INFINITY] {
            let err = ledger
                .add_meal(d(15), food("Toast", 90.0), q, MealType::Breakfast)
                .unwrap_err();
            assert!(err.is_validation());
        }
        assert!(ledger.get_record(d(15)).unwrap().is_none());
    }

    #[test]
    fn test_add_meal_write_failure_leaves_state_untouched() {
        let store = FlakyStore::default();
        let ledger = LedgerStore::new(store)
            .with_clock(clock())
            .with_profile(
                UserProfile::new(2000.0, vec![], vec!["peanut".to_string()], NutritionPreferences::default())
                    .unwrap(),
            );
        ledger
            .add_meal(d(15), food("Rice", 200.0), 1.0, MealType::Lunch)
            .unwrap();
        ledger.store().fail_writes_for(d(15));

        let err = ledger
            .add_meal(d(15), food("Peanut Bar", 250.0), 1.0, MealType::Snack)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Persistence { .. }));

        let stored = ledger.get_record(d(15)).unwrap().unwrap();
        assert_eq!(stored.entries.len(), 1);
        assert!((stored.total_calories - 200.0).abs() < 0.01);
        assert!(ledger.alerts().is_empty());
    }

    #[test]
    fn test_dates_at_calendar_edge_rejected_before_write() {
        let ledger = ledger();
        for date in [NaiveDate::MAX, NaiveDate::MIN] {
            let err = ledger
                .add_meal(date, food("Toast", 90.0), 1.0, MealType::Breakfast)
                .unwrap_err();
            assert!(err.is_validation());
            assert!(ledger.get_record(date).unwrap().is_none());

            assert!(ledger.get_or_create(date).unwrap_err().is_validation());
            assert!(ledger.update_goal_calories(date, 1800.0).unwrap_err().is_validation());
            assert!(ledger.remove_meal(date, "x").unwrap_err().is_validation());
            assert!(
                ledger
                    .move_between_meals(date, MealType::Breakfast, MealType::Lunch, 10.0)
                    .unwrap_err()
                    .is_validation()
            );
            assert!(ledger.get_record(date).unwrap().is_none());
        }

        ledger
            .add_meal(d(15), food("Rice", 200.0), 1.0, MealType::Lunch)
            .unwrap();
        let before = ledger.get_record(d(15)).unwrap().unwrap();
        let err = ledger.move_across_days(d(15), NaiveDate::MAX, 100.0).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(ledger.get_record(d(15)).unwrap().unwrap(), before);
        assert!(ledger.get_record(NaiveDate::MAX).unwrap().is_none());
    }

    #[test]
    fn test_add_then_remove_restores_totals() {
        let ledger = ledger();
        ledger
            .add_meal(d(15), food("Granola", 240.0), 1.0, MealType::Breakfast)
            .unwrap();
        let before = ledger.get_or_create(d(15)).unwrap();

        let logged = ledger
            .add_meal(d(15), food("Latte", 190.0), 1.0, MealType::Snack)
            .unwrap();
        let after = ledger.remove_meal(d(15), &logged.entry.id).unwrap();

        assert_eq!(after.totals(), before.totals());
        assert_eq!(after.entries, before.entries);
    }

    #[test]
    fn test_remove_unknown_entry_is_noop() {
        let ledger = ledger();
        ledger
            .add_meal(d(15), food("Soup", 150.0), 1.0, MealType::Dinner)
            .unwrap();
        let before = ledger.get_or_create(d(15)).unwrap();
        let after = ledger.remove_meal(d(15), "does-not-exist").unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_update_goal_calories() {
        let ledger = ledger();
        ledger
            .add_meal(d(15), food("Burrito", 700.0), 1.0, MealType::Lunch)
            .unwrap();
        let record = ledger.update_goal_calories(d(15), 1800.0).unwrap();
        assert_eq!(record.goal_calories, 1800.0);
        assert!((record.remaining_calories - 1100.0).abs() < 0.01);

        assert!(ledger.update_goal_calories(d(15), 0.0).unwrap_err().is_validation());
        assert!(ledger.update_goal_calories(d(15), f64::NAN).unwrap_err().is_validation());
    }

    #[test]
    fn test_move_breakfast_to_lunch_scenario() {
        let ledger = ledger();
        ledger
            .add_meal(d(15), food("Pancakes", 500.0), 1.0, MealType::Breakfast)
            .unwrap();
        ledger
            .add_meal(d(15), food("Burrito", 700.0), 1.0, MealType::Lunch)
            .unwrap();

        let record = ledger
            .move_between_meals(d(15), MealType::Breakfast, MealType::Lunch, 200.0)
            .unwrap();
        assert!((record.total_calories - 1200.0).abs() < 0.01);
        assert!((record.meal_totals(MealType::Breakfast).calories - 300.0).abs() < 0.01);
        assert!((record.meal_totals(MealType::Lunch).calories - 900.0).abs() < 0.01);
        assert_eq!(record.entries_for(MealType::Lunch).count(), 2);

        assert_eq!(ledger.get_record(d(15)).unwrap().unwrap(), record);
    }

    #[test]
    fn test_move_between_meals_noops() {
        let ledger = ledger();
        ledger
            .add_meal(d(15), food("Bagel", 280.0), 1.0, MealType::Breakfast)
            .unwrap();
        let before = ledger.get_or_create(d(15)).unwrap();

        for (from, to, amount) in [
            (MealType::Breakfast, MealType::Breakfast, 100.0),
            (MealType::Breakfast, MealType::Lunch, 0.0),
            (MealType::Breakfast, MealType::Lunch, -20.0),
        ] {
            let after = ledger.move_between_meals(d(15), from, to, amount).unwrap();
            assert_eq!(after, before);
        }

        let err = ledger
            .move_between_meals(d(15), MealType::Breakfast, MealType::Lunch, f64::NAN)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_move_across_days_caps_at_available() {
        let ledger = ledger();
        ledger
            .add_meal(d(14), food("Sandwich", 300.0), 1.0, MealType::Lunch)
            .unwrap();
        ledger
            .add_meal(d(15), food("Salad", 250.0), 1.0, MealType::Dinner)
            .unwrap();

        let (src, dst) = ledger.move_across_days(d(14), d(15), 9999.0).unwrap();
        assert_eq!(src.total_calories, 0.0);
        assert!((dst.total_calories - 550.0).abs() < 0.01);

        let moved = dst
            .entries
            .iter()
            .find(|e| e.food_item.name == "Sandwich")
            .unwrap();
        assert_eq!(moved.meal_type, MealType::Lunch);
        assert_eq!(moved.timestamp, clock().now);

        assert_eq!(ledger.get_record(d(14)).unwrap().unwrap(), src);
        assert_eq!(ledger.get_record(d(15)).unwrap().unwrap(), dst);
    }

    #[test]
    fn test_move_across_days_conserves_ledger_totals() {
        let ledger = ledger();
        ledger
            .add_meal(d(10), food("Lasagna", 600.0), 1.25, MealType::Dinner)
            .unwrap();
        ledger
            .add_meal(d(10), food("Garlic Bread", 180.0), 2.0, MealType::Dinner)
            .unwrap();
        ledger
            .add_meal(d(11), food("Smoothie", 310.0), 1.0, MealType::Breakfast)
            .unwrap();
        let before = ledger.get_or_create(d(10)).unwrap().totals()
            + ledger.get_or_create(d(11)).unwrap().totals();

        let (src, dst) = ledger.move_across_days(d(10), d(11), 425.0).unwrap();
        assert!((src.totals() + dst.totals()).approx_eq(&before, 0.001));
    }

    #[test]
    fn test_move_across_same_day_is_noop() {
        let ledger = ledger();
        ledger
            .add_meal(d(15), food("Curry", 650.0), 1.0, MealType::Dinner)
            .unwrap();
        let before = ledger.get_or_create(d(15)).unwrap();
        let (a, b) = ledger.move_across_days(d(15), d(15), 300.0).unwrap();
        assert_eq!(a, before);
        assert_eq!(b, before);
    }

    #[test]
    fn test_move_across_days_restores_source_when_target_write_fails() {
        let ledger = LedgerStore::new(FlakyStore::default()).with_clock(clock());
        ledger
            .add_meal(d(14), food("Pizza", 800.0), 1.0, MealType::Dinner)
            .unwrap();
        let original = ledger.get_record(d(14)).unwrap().unwrap();
        ledger.store().fail_writes_for(d(15));

        let err = ledger.move_across_days(d(14), d(15), 300.0).unwrap_err();
        assert!(matches!(err, LedgerError::Persistence { ref key, .. } if key == "2024-06-15"));
        assert_eq!(ledger.get_record(d(14)).unwrap().unwrap(), original);
        assert!(ledger.get_record(d(15)).unwrap().is_none());
    }

    fn flaky_ledger_with_meals() -> LedgerStore<FlakyStore> {
        let ledger = LedgerStore::new(FlakyStore::default()).with_clock(clock());
        ledger
            .add_meal(d(15), food("Oatmeal", 350.0), 1.0, MealType::Breakfast)
            .unwrap();
        ledger
            .add_meal(d(15), food("Wrap", 550.0), 1.0, MealType::Lunch)
            .unwrap();
        ledger
    }

    #[test]
    fn test_remove_meal_write_failure_keeps_entry() {
        let ledger = flaky_ledger_with_meals();
        let original = ledger.get_record(d(15)).unwrap().unwrap();
        ledger.store().fail_writes_for(d(15));

        let err = ledger
            .remove_meal(d(15), &original.entries[0].id)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Persistence { ref key, .. } if key == "2024-06-15"));
        assert_eq!(ledger.get_record(d(15)).unwrap().unwrap(), original);
    }

    #[test]
    fn test_update_goal_write_failure_keeps_goal() {
        let ledger = flaky_ledger_with_meals();
        let original = ledger.get_record(d(15)).unwrap().unwrap();
        ledger.store().fail_writes_for(d(15));

        let err = ledger.update_goal_calories(d(15), 1600.0).unwrap_err();
        assert!(matches!(err, LedgerError::Persistence { .. }));
        let stored = ledger.get_record(d(15)).unwrap().unwrap();
        assert_eq!(stored, original);
        assert_eq!(stored.goal_calories, 2000.0);
    }

    #[test]
    fn test_move_between_meals_write_failure_keeps_meals() {
        let ledger = flaky_ledger_with_meals();
        let original = ledger.get_record(d(15)).unwrap().unwrap();
        ledger.store().fail_writes_for(d(15));

        let err = ledger
            .move_between_meals(d(15), MealType::Breakfast, MealType::Lunch, 150.0)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Persistence { .. }));
        let stored = ledger.get_record(d(15)).unwrap().unwrap();
        assert_eq!(stored, original);
        assert!((stored.meal_totals(MealType::Breakfast).calories - 350.0).abs() < 0.01);
    }

    #[test]
    fn test_weekly_summary_with_target() {
        let ledger = ledger();
        // Week of Monday 2024-06-10
        ledger
            .add_meal(d(10), food("Day A", 2100.0), 1.0, MealType::Dinner)
            .unwrap();
        ledger
            .add_meal(d(12), food("Day B", 1850.5), 1.0, MealType::Dinner)
            .unwrap();
        ledger
            .add_meal(d(17), food("Next week", 999.0), 1.0, MealType::Dinner)
            .unwrap();

        let summary = ledger
            .update_weekly_settings(&WeeklyGoalSettings {
                enabled: true,
                buffer_enabled: true,
                weekly_target_calories: Some(13_000.0),
            })
            .unwrap();
        assert_eq!(summary.week_start, d(10));
        assert!((summary.total_calories - 3950.5).abs() < 0.01);
        assert_eq!(summary.buffer_balance, (13_000.0_f64 - 3950.5).round());
        assert_eq!(ledger.cached_weekly_summary(), Some(summary.clone()));

        assert_eq!(ledger.get_weekly_summary(d(16)).unwrap(), summary);
    }

    #[test]
    fn test_weekly_goal_falls_back_to_today_goal() {
        let ledger = ledger();
        ledger.update_goal_calories(d(15), 1500.0).unwrap();
        let summary = ledger.get_weekly_summary(d(15)).unwrap();
        assert_eq!(summary.goal_calories, 10_500.0);
        assert_eq!(summary.buffer_balance, 10_500.0);
    }

    #[test]
    fn test_invalid_weekly_settings_rejected() {
        let ledger = ledger();
        let err = ledger
            .update_weekly_settings(&WeeklyGoalSettings {
                enabled: true,
                buffer_enabled: false,
                weekly_target_calories: Some(-1.0),
            })
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(ledger.weekly_settings().unwrap(), WeeklyGoalSettings::default());
    }

    #[test]
    fn test_history_range_newest_first_zero_filled() {
        let ledger = ledger();
        ledger
            .add_meal(d(14), food("Tacos", 540.0), 1.0, MealType::Dinner)
            .unwrap();

        let history = ledger.get_history_range(3);
        let dates: Vec<_> = history.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(15), d(14), d(13)]);
        assert_eq!(history[0].total_calories, 0.0);
        assert!((history[1].total_calories - 540.0).abs() < 0.01);
        assert!(history[2].entries.is_empty());
        // Filler days are not persisted
        assert!(ledger.get_record(d(13)).unwrap().is_none());
    }

    #[test]
    fn test_history_range_substitutes_corrupt_day() {
        let db = crate::db::Database::open_in_memory().unwrap();
        let ledger = LedgerStore::new(db).with_clock(clock());
        ledger
            .add_meal(d(15), food("Noodles", 450.0), 1.0, MealType::Lunch)
            .unwrap();
        ledger.store().write_raw_record("2024-06-14", "not json");

        let history = ledger.get_history_range(2);
        assert_eq!(history.len(), 2);
        assert!((history[0].total_calories - 450.0).abs() < 0.01);
        assert_eq!(history[1].date, d(14));
        assert!(history[1].entries.is_empty());

        let err = ledger.get_or_create(d(14)).unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
    }

    #[test]
    fn test_alerts_queue_and_clear() {
        let profile = UserProfile::new(
            2000.0,
            vec![MedicalCondition::Diabetes],
            vec!["peanut".to_string()],
            NutritionPreferences::default(),
        )
        .unwrap();
        let ledger = ledger().with_profile(profile);

        let logged = ledger
            .add_meal(d(15), food("Peanut Butter Cookie", 210.0), 1.0, MealType::Snack)
            .unwrap();
        assert!(logged
            .alerts
            .iter()
            .any(|a| a.condition == AlertCondition::Allergy && a.severity == AlertSeverity::Critical));
        assert_eq!(ledger.alerts().len(), logged.alerts.len());

        let sugary = food("Fruit Cup", 90.0).with_sugar(15.0);
        let logged = ledger.add_meal(d(15), sugary, 1.0, MealType::Snack).unwrap();
        assert_eq!(logged.alerts.len(), 1);
        assert_eq!(logged.alerts[0].condition, AlertCondition::Diabetes);

        let drained = ledger.drain_alerts();
        assert!(drained.len() >= 2);
        assert!(ledger.alerts().is_empty());

        ledger
            .add_meal(d(15), food("Peanuts", 160.0), 1.0, MealType::Snack)
            .unwrap();
        ledger.clear_alerts();
        assert!(ledger.alerts().is_empty());
    }

    #[test]
    fn test_alert_capacity_from_config() {
        let profile =
            UserProfile::new(2000.0, vec![], vec!["egg".to_string()], NutritionPreferences::default())
                .unwrap();
        let ledger = ledger()
            .with_profile(profile)
            .with_config(LedgerConfig {
                alert_capacity: 2,
                retry: RetryPolicy::default(),
            });
        for _ in 0..5 {
            ledger
                .add_meal(d(15), food("Egg Salad", 300.0), 1.0, MealType::Lunch)
                .unwrap();
        }
        assert_eq!(ledger.alerts().len(), 2);
    }

    #[test]
    fn test_sync_outbox_survives_remote_failure() {
        let remote = Arc::new(RecordingRemote::default());
        remote.down.store(true, Ordering::SeqCst);
        let ledger = ledger().with_remote(remote.clone(), "user-42");

        let logged = ledger
            .add_meal(d(15), food("Ramen", 480.0), 1.0, MealType::Dinner)
            .unwrap();
        assert_eq!(ledger.pending_sync().unwrap().len(), 1);

        let report = ledger.flush_sync().unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(ledger.pending_sync().unwrap().len(), 1);
        // The local mutation is untouched by the failed sync
        assert_eq!(ledger.get_record(d(15)).unwrap().unwrap(), logged.record);

        remote.down.store(false, Ordering::SeqCst);
        let ledger = ledger.with_clock(FixedClock::at(clock().now + chrono::TimeDelta::minutes(5)));
        let report = ledger.flush_sync().unwrap();
        assert_eq!(report.delivered, vec!["2024-06-15".to_string()]);
        assert!(ledger.pending_sync().unwrap().is_empty());

        let received = remote.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "user-42");
        assert_eq!(received[0].1.daily_record, logged.record);
        assert_eq!(received[0].1.weekly_summary.week_start, d(10));
    }

    #[test]
    fn test_no_outbox_without_remote() {
        let ledger = ledger();
        ledger
            .add_meal(d(15), food("Apple", 95.0), 1.0, MealType::Snack)
            .unwrap();
        assert!(ledger.pending_sync().unwrap().is_empty());
        assert!(ledger.flush_sync().unwrap().delivered.is_empty());
    }

    #[test]
    fn test_concurrent_adds_on_same_date_all_land() {
        let ledger = ledger();
        std::thread::scope(|s| {
            for i in 0..8 {
                let ledger = &ledger;
                s.spawn(move || {
                    for j in 0..10 {
                        ledger
                            .add_meal(
                                d(15),
                                food(&format!("Item {i}-{j}"), 10.0),
                                1.0,
                                MealType::Snack,
                            )
                            .unwrap();
                    }
                });
            }
        });
        let record = ledger.get_record(d(15)).unwrap().unwrap();
        assert_eq!(record.entries.len(), 80);
        assert!((record.total_calories - 800.0).abs() < 0.01);
    }

    #[test]
    fn test_concurrent_cross_day_moves_conserve_totals() {
        let ledger = ledger();
        for day in [14, 15] {
            for k in 0..4 {
                ledger
                    .add_meal(d(day), food(&format!("Dish {k}"), 250.0), 1.0, MealType::Dinner)
                    .unwrap();
            }
        }
        std::thread::scope(|s| {
            let ledger = &ledger;
            s.spawn(move || {
                for _ in 0..20 {
                    ledger.move_across_days(d(14), d(15), 75.0).unwrap();
                }
            });
            s.spawn(move || {
                for _ in 0..20 {
                    ledger.move_across_days(d(15), d(14), 60.0).unwrap();
                }
            });
        });
        let total = ledger.get_record(d(14)).unwrap().unwrap().total_calories
            + ledger.get_record(d(15)).unwrap().unwrap().total_calories;
        assert!((total - 2000.0).abs() < 0.01);
    }
}
