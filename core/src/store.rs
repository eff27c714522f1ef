//! Persistence collaborators consumed by the ledger.
//!
//! Records are keyed by calendar date, one independent value per key, with no
//! cross-record transactions. [`crate::db::Database`] is the SQLite
//! implementation; [`MemoryStore`] keeps everything in process.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::models::{DailyRecord, WeeklyGoalSettings};
use crate::sync::OutboxItem;

pub trait RecordStore: Send + Sync {
    /// `Ok(None)` when nothing was ever written for `date`.
    fn read_record(&self, date: NaiveDate) -> Result<Option<DailyRecord>>;
    fn write_record(&self, record: &DailyRecord) -> Result<()>;
}

pub trait SettingsStore: Send + Sync {
    /// Stored settings, or the defaults when none were saved.
    fn read_weekly_settings(&self) -> Result<WeeklyGoalSettings>;
    fn write_weekly_settings(&self, settings: &WeeklyGoalSettings) -> Result<()>;
}

pub trait OutboxStore: Send + Sync {
    /// Insert or replace the pending item for `item.key`.
    fn put_outbox_item(&self, item: &OutboxItem) -> Result<()>;
    /// All pending items, oldest enqueue first.
    fn outbox_items(&self) -> Result<Vec<OutboxItem>>;
    /// Remove the item if it is still the revision identified by `item_id`.
    fn complete_outbox_item(&self, key: &str, item_id: &str) -> Result<bool>;
    /// Store retry bookkeeping if the item was not replaced in the meantime.
    fn reschedule_outbox_item(&self, item: &OutboxItem) -> Result<bool>;
}

/// Everything the ledger needs from its backing store.
pub trait LedgerBackend: RecordStore + SettingsStore + OutboxStore {}

impl<T: RecordStore + SettingsStore + OutboxStore> LedgerBackend for T {}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<NaiveDate, DailyRecord>>,
    settings: Mutex<Option<WeeklyGoalSettings>>,
    outbox: Mutex<BTreeMap<String, OutboxItem>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn read_record(&self, date: NaiveDate) -> Result<Option<DailyRecord>> {
        Ok(self.records.lock().get(&date).cloned())
    }

    fn write_record(&self, record: &DailyRecord) -> Result<()> {
        self.records.lock().insert(record.date, record.clone());
        Ok(())
    }
}

impl SettingsStore for MemoryStore {
    fn read_weekly_settings(&self) -> Result<WeeklyGoalSettings> {
        Ok(self.settings.lock().clone().unwrap_or_default())
    }

    fn write_weekly_settings(&self, settings: &WeeklyGoalSettings) -> Result<()> {
        *self.settings.lock() = Some(settings.clone());
        Ok(())
    }
}

impl OutboxStore for MemoryStore {
    fn put_outbox_item(&self, item: &OutboxItem) -> Result<()> {
        self.outbox.lock().insert(item.key.clone(), item.clone());
        Ok(())
    }

    fn outbox_items(&self) -> Result<Vec<OutboxItem>> {
        let mut items: Vec<OutboxItem> = self.outbox.lock().values().cloned().collect();
        items.sort_by_key(|i| i.enqueued_at);
        Ok(items)
    }

    fn complete_outbox_item(&self, key: &str, item_id: &str) -> Result<bool> {
        let mut outbox = self.outbox.lock();
        if outbox.get(key).is_some_and(|i| i.id == item_id) {
            outbox.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    fn reschedule_outbox_item(&self, item: &OutboxItem) -> Result<bool> {
        let mut outbox = self.outbox.lock();
        match outbox.get_mut(&item.key) {
            Some(current) if current.id == item.id => {
                *current = item.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_record_roundtrip() {
        let store = MemoryStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert!(store.read_record(date).unwrap().is_none());

        let record = DailyRecord::new(date, 1800.0);
        store.write_record(&record).unwrap();
        assert_eq!(store.read_record(date).unwrap(), Some(record));
    }

    #[test]
    fn test_memory_store_settings_default() {
        let store = MemoryStore::new();
        assert_eq!(
            store.read_weekly_settings().unwrap(),
            WeeklyGoalSettings::default()
        );
    }
}
