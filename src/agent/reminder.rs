//! Time-keyed reminders with a background poller.
//!
//! Reminders live in a concurrent map keyed by id. A poller thread wakes on
//! an interval, drains everything due, and hands each fired reminder to a
//! callback. Draining removes one-shot reminders and reschedules recurring
//! ones in the same locked step, so a reminder fires exactly once per due
//! time even if the poller ticks twice in quick succession.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ReminderError;

/// Minimum recurrence period. A recurring reminder set for a time already in
/// the past still advances by at least this much.
fn min_period() -> chrono::Duration {
    chrono::Duration::minutes(1)
}

/// One scheduled reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: u64,
    pub fire_at: DateTime<Utc>,
    pub message: String,
    pub set_at: DateTime<Utc>,
    pub recurring: bool,
}

impl Reminder {
    /// The recurrence period: the gap between setting and first firing,
    /// floored at one minute.
    fn period(&self) -> chrono::Duration {
        (self.fire_at - self.set_at).max(min_period())
    }
}

/// Concurrent reminder store.
#[derive(Debug, Default)]
pub struct ReminderStore {
    reminders: DashMap<u64, Reminder>,
    next_id: AtomicU64,
}

impl ReminderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a reminder from a timestamp string.
    ///
    /// Accepts RFC 3339 or `"YYYY-MM-DD HH:MM"` (assumed UTC). Returns the
    /// reminder id. An unparseable timestamp schedules nothing.
    pub fn schedule(
        &self,
        at: &str,
        message: &str,
        recurring: bool,
    ) -> Result<u64, ReminderError> {
        let fire_at = parse_timestamp(at)?;
        Ok(self.schedule_at(fire_at, message, recurring))
    }

    /// Schedule a reminder at an already-parsed instant.
    pub fn schedule_at(&self, fire_at: DateTime<Utc>, message: &str, recurring: bool) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let reminder = Reminder {
            id,
            fire_at,
            message: message.to_string(),
            set_at: Utc::now(),
            recurring,
        };
        info!(id, %fire_at, recurring, "reminder scheduled");
        self.reminders.insert(id, reminder);
        id
    }

    /// Remove a reminder. Returns whether it existed.
    pub fn cancel(&self, id: u64) -> bool {
        self.reminders.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }

    /// Drain every reminder due at or before `now`, sorted by fire time.
    ///
    /// One-shot reminders are removed; recurring ones are rescheduled by
    /// their period, advanced until strictly after `now` so a long stall
    /// does not queue a burst of immediate re-fires.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Reminder> {
        let due_ids: Vec<u64> = self
            .reminders
            .iter()
            .filter(|entry| entry.fire_at <= now)
            .map(|entry| entry.id)
            .collect();

        let mut fired = Vec::new();
        for id in due_ids {
            // remove-then-reinsert keeps the drain atomic per reminder.
            let Some((_, reminder)) = self.reminders.remove(&id) else {
                continue;
            };
            if reminder.recurring {
                let period = reminder.period();
                let mut next = reminder.fire_at + period;
                while next <= now {
                    next += period;
                }
                let mut rescheduled = reminder.clone();
                rescheduled.fire_at = next;
                debug!(id, %next, "recurring reminder rescheduled");
                self.reminders.insert(id, rescheduled);
            }
            fired.push(reminder);
        }
        fired.sort_by_key(|r| r.fire_at);
        fired
    }
}

/// Parse a reminder timestamp: RFC 3339 first, then `"YYYY-MM-DD HH:MM"`
/// taken as UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, ReminderError> {
    let trimmed = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M") {
        return Ok(naive.and_utc());
    }
    Err(ReminderError::InvalidTimestamp {
        input: input.to_string(),
    })
}

/// Spawn the poller thread.
///
/// Wakes every `interval` (or immediately when the shutdown pair is
/// notified), drains due reminders, and passes each to `on_fire`. Setting
/// the shutdown flag and notifying the condvar ends the thread.
pub fn spawn_poller<F>(
    store: Arc<ReminderStore>,
    interval: Duration,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    on_fire: F,
) -> JoinHandle<()>
where
    F: Fn(Reminder) + Send + 'static,
{
    std::thread::spawn(move || {
        let (lock, cvar) = &*shutdown;
        loop {
            for reminder in store.due(Utc::now()) {
                info!(id = reminder.id, message = %reminder.message, "reminder fired");
                on_fire(reminder);
            }
            let guard = lock.lock().expect("shutdown lock poisoned");
            if *guard {
                return;
            }
            let (guard, _timeout) = cvar
                .wait_timeout(guard, interval)
                .expect("shutdown lock poisoned");
            if *guard {
                return;
            }
        }
    })
}
