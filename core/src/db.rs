use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{DailyRecord, WeeklyGoalSettings, date_key};
use crate::store::{OutboxStore, RecordStore, SettingsStore};
use crate::sync::{OutboxItem, SyncPayload};

const WEEKLY_SETTINGS_KEY: &str = "weekly_goal_settings";
const DEVICE_ID_KEY: &str = "device_id";

/// SQLite-backed store for daily records, settings and the sync outbox.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS daily_records (
                    date TEXT PRIMARY KEY NOT NULL,
                    record TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
                );

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sync_outbox (
                    date TEXT PRIMARY KEY NOT NULL,
                    item_id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    enqueued_at TEXT NOT NULL,
                    next_attempt_at TEXT NOT NULL,
                    last_error TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_sync_outbox_next ON sync_outbox(next_attempt_at);

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "INSERT INTO settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Stable id for this installation, used as the default sync user id.
    pub fn get_or_create_device_id(&self) -> Result<String> {
        if let Some(id) = self.get_setting(DEVICE_ID_KEY)? {
            return Ok(id);
        }
        let device_id = Uuid::new_v4().to_string();
        self.set_setting(DEVICE_ID_KEY, &device_id)?;
        Ok(device_id)
    }

    #[cfg(test)]
    pub(crate) fn write_raw_record(&self, key: &str, json: &str) {
        self.conn
            .lock()
            .execute(
                "INSERT INTO daily_records (date, record, updated_at) VALUES (?1, ?2, 'x')",
                params![key, json],
            )
            .unwrap();
    }
}

fn corrupt(key: &str, err: &impl std::fmt::Display) -> anyhow::Error {
    anyhow::Error::new(LedgerError::Corrupt {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

fn parse_timestamp(key: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(key, &e))
}

impl RecordStore for Database {
    fn read_record(&self, date: NaiveDate) -> Result<Option<DailyRecord>> {
        let key = date_key(date);
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT record FROM daily_records WHERE date = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => {
                let record: DailyRecord =
                    serde_json::from_str(&json).map_err(|e| corrupt(&key, &e))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn write_record(&self, record: &DailyRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let now = Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "INSERT INTO daily_records (date, record, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(date) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
            params![record.date_key(), json, now],
        )?;
        Ok(())
    }
}

impl SettingsStore for Database {
    fn read_weekly_settings(&self) -> Result<WeeklyGoalSettings> {
        match self.get_setting(WEEKLY_SETTINGS_KEY)? {
            Some(json) => {
                serde_json::from_str(&json).map_err(|e| corrupt(WEEKLY_SETTINGS_KEY, &e))
            }
            None => Ok(WeeklyGoalSettings::default()),
        }
    }

    fn write_weekly_settings(&self, settings: &WeeklyGoalSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.set_setting(WEEKLY_SETTINGS_KEY, &json)
    }
}

impl OutboxStore for Database {
    fn put_outbox_item(&self, item: &OutboxItem) -> Result<()> {
        let payload = serde_json::to_string(&item.payload)?;
        self.conn.lock().execute(
            "INSERT INTO sync_outbox (date, item_id, payload, attempts, enqueued_at, next_attempt_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(date) DO UPDATE SET
                item_id = excluded.item_id,
                payload = excluded.payload,
                attempts = excluded.attempts,
                enqueued_at = excluded.enqueued_at,
                next_attempt_at = excluded.next_attempt_at,
                last_error = excluded.last_error",
            params![
                item.key,
                item.id,
                payload,
                item.attempts,
                item.enqueued_at.to_rfc3339(),
                item.next_attempt_at.to_rfc3339(),
                item.last_error,
            ],
        )?;
        Ok(())
    }

    fn outbox_items(&self) -> Result<Vec<OutboxItem>> {
        type Row = (String, String, String, u32, String, String, Option<String>);

        let rows: Vec<Row> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT date, item_id, payload, attempts, enqueued_at, next_attempt_at, last_error
                 FROM sync_outbox ORDER BY enqueued_at, date",
            )?;
            stmt.query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(
                |(key, id, payload, attempts, enqueued_at, next_attempt_at, last_error)| {
                    let payload: SyncPayload =
                        serde_json::from_str(&payload).map_err(|e| corrupt(&key, &e))?;
                    Ok(OutboxItem {
                        enqueued_at: parse_timestamp(&key, &enqueued_at)?,
                        next_attempt_at: parse_timestamp(&key, &next_attempt_at)?,
                        id,
                        key,
                        payload,
                        attempts,
                        last_error,
                    })
                },
            )
            .collect()
    }

    fn complete_outbox_item(&self, key: &str, item_id: &str) -> Result<bool> {
        let rows = self.conn.lock().execute(
            "DELETE FROM sync_outbox WHERE date = ?1 AND item_id = ?2",
            params![key, item_id],
        )?;
        Ok(rows > 0)
    }

    fn reschedule_outbox_item(&self, item: &OutboxItem) -> Result<bool> {
        let rows = self.conn.lock().execute(
            "UPDATE sync_outbox SET attempts = ?1, next_attempt_at = ?2, last_error = ?3
             WHERE date = ?4 AND item_id = ?5",
            params![
                item.attempts,
                item.next_attempt_at.to_rfc3339(),
                item.last_error,
                item.key,
                item.id,
            ],
        )?;
        Ok(rows > 0)
    }
}
