//! Remote mirroring through a durable outbox.
//!
//! Mutations enqueue a [`SyncPayload`] per date; [`SyncOutbox::flush`] pushes
//! due items to the [`RemoteSync`] collaborator and backs off on failure.
//! Nothing here ever fails or reverts the local mutation that produced it.

use std::fmt;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{DailyRecord, WeeklyGoalSettings, WeeklySummary};
use crate::store::OutboxStore;

/// Remote synchronization backend.
///
/// Implementations may block (HTTP, disk); callers run flushes off the
/// mutation path. Upserts must be idempotent.
pub trait RemoteSync: Send + Sync {
    fn upsert(&self, user_id: &str, payload: &SyncPayload) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub daily_record: DailyRecord,
    pub weekly_settings: WeeklyGoalSettings,
    pub weekly_summary: WeeklySummary,
}

impl SyncPayload {
    #[must_use]
    pub fn key(&self) -> String {
        self.daily_record.date_key()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    /// Revision id; changes whenever a newer payload replaces this one.
    pub id: String,
    /// Date key of the record carried by the payload.
    pub key: String,
    pub payload: SyncPayload,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: TimeDelta,
    pub max_delay: TimeDelta,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: TimeDelta::seconds(30),
            max_delay: TimeDelta::hours(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` consecutive failures.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> TimeDelta {
        let exponent = attempts.saturating_sub(1).min(20);
        let factor = 1_i32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// A failed remote push. Logged and reported, never propagated as an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncWarning {
    pub key: String,
    pub attempts: u32,
    pub message: String,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl fmt::Display for SyncWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync of {} failed", self.key)?;
        if self.attempts > 0 {
            write!(f, " (attempt {})", self.attempts)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(next) = self.next_attempt_at {
            write!(f, "; retrying after {}", next.to_rfc3339())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    pub delivered: Vec<String>,
    /// Items still waiting for their backoff window.
    pub deferred: usize,
    pub warnings: Vec<SyncWarning>,
}

pub struct SyncOutbox {
    policy: RetryPolicy,
    flushing: Mutex<()>,
}

impl SyncOutbox {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            flushing: Mutex::new(()),
        }
    }

    /// Queue `payload`, replacing any older pending payload for the same date.
    pub fn enqueue(
        &self,
        store: &dyn OutboxStore,
        payload: SyncPayload,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let item = OutboxItem {
            id: Uuid::new_v4().to_string(),
            key: payload.key(),
            payload,
            attempts: 0,
            enqueued_at: now,
            next_attempt_at: now,
            last_error: None,
        };
        debug!(key = %item.key, "queued sync payload");
        store.put_outbox_item(&item)
    }

    /// Push every due item. Only bookkeeping failures of `store` are errors.
    pub fn flush(
        &self,
        store: &dyn OutboxStore,
        remote: &dyn RemoteSync,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FlushReport> {
        let _flushing = self.flushing.lock();
        let mut report = FlushReport::default();

        for mut item in store.outbox_items()? {
            if item.next_attempt_at > now {
                report.deferred += 1;
                continue;
            }

            match remote.upsert(user_id, &item.payload) {
                Ok(()) => {
                    store.complete_outbox_item(&item.key, &item.id)?;
                    debug!(key = %item.key, attempts = item.attempts, "sync delivered");
                    report.delivered.push(item.key);
                }
                Err(e) => {
                    item.attempts = item.attempts.saturating_add(1);
                    item.next_attempt_at = now + self.policy.delay_for(item.attempts);
                    item.last_error = Some(format!("{e:#}"));
                    store.reschedule_outbox_item(&item)?;

                    let warning = SyncWarning {
                        key: item.key.clone(),
                        attempts: item.attempts,
                        message: format!("{e:#}"),
                        next_attempt_at: Some(item.next_attempt_at),
                    };
                    warn!(%warning, "remote sync failed");
                    report.warnings.push(warning);
                }
            }
        }

        Ok(report)
    }
}

impl Default for SyncOutbox {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
