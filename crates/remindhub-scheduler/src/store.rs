use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use remindhub_core::{OwnerId, Priority, Reminder, ReminderId, ReminderStatus, TimeSpec};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};

/// How a firing attempt ended, as recorded by [`ScheduleStore::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// One-shot delivered, or the recurring series is exhausted.
    Delivered,
    /// Delivered; the series continues at `next`.
    Rescheduled { next: DateTime<Utc> },
    /// Retryable failure; try again at `retry_at`.
    Retry {
        retry_at: DateTime<Utc>,
        error: String,
    },
    /// Terminal failure.
    Failed { error: String },
}

/// Durable, queryable index of reminders.
///
/// This is the persistence boundary: any engine that honours these contracts
/// (in particular the atomic [`claim`](ScheduleStore::claim)) can back the
/// scheduler.
pub trait ScheduleStore: Send + Sync {
    /// Insert a new reminder. Fails with `DuplicateId` if the id exists.
    fn insert(&self, reminder: &Reminder) -> Result<()>;

    fn get(&self, id: &ReminderId) -> Result<Reminder>;

    /// Pending reminders with `next_fire_at <= before`, ascending by
    /// `next_fire_at` then id, at most `limit` of them.
    ///
    /// Pending rows that can no longer be decoded are marked Failed and left
    /// out of the result.
    fn next_due(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<Reminder>>;

    /// Earliest `next_fire_at` among Pending reminders.
    fn earliest_pending(&self) -> Result<Option<DateTime<Utc>>>;

    /// Atomically move a due reminder from Pending to Firing.
    ///
    /// Exactly one concurrent caller wins; the rest see `AlreadyClaimed`.
    fn claim(&self, id: &ReminderId, now: DateTime<Utc>) -> Result<Reminder>;

    /// Record the outcome of a firing attempt. Only valid from Firing.
    fn complete(&self, id: &ReminderId, outcome: Completion, now: DateTime<Utc>)
        -> Result<Reminder>;

    /// Cancel a Pending or Failed reminder.
    fn cancel(&self, id: &ReminderId, now: DateTime<Utc>) -> Result<Reminder>;

    fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<Reminder>>;

    /// Return Firing reminders claimed before `claimed_before` to Pending.
    ///
    /// Used on startup to recover claims left behind by a crashed worker.
    fn requeue_stale(&self, claimed_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize>;
}

const SELECT_COLUMNS: &str = "SELECT id, owner, subject, time_spec, next_fire_at_ms,
        occurrence_at_ms, status, attempts, fired_count, last_error, priority,
        tags, created_at, updated_at, claimed_at_ms
     FROM reminders";

/// SQLite-backed [`ScheduleStore`].
///
/// Wraps a single connection in a `Mutex`. Every state change is a single
/// conditional UPDATE (or an IMMEDIATE transaction), so several processes
/// sharing the same database file still get exactly one claim winner.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) a database file in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ScheduleStore for SqliteStore {
    #[instrument(skip(self, reminder), fields(reminder_id = %reminder.id))]
    fn insert(&self, reminder: &Reminder) -> Result<()> {
        let time_spec = serde_json::to_string(&reminder.time_spec)?;
        let tags = serde_json::to_string(&reminder.tags)?;
        let db = self.conn();
        let res = db.execute(
            "INSERT INTO reminders
             (id, owner, subject, time_spec, next_fire_at_ms, occurrence_at_ms, status,
              attempts, fired_count, last_error, priority, tags, created_at, updated_at,
              claimed_at_ms)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            rusqlite::params![
                reminder.id.as_str(),
                reminder.owner.as_str(),
                reminder.subject,
                time_spec,
                reminder.next_fire_at.timestamp_millis(),
                reminder.occurrence_at.timestamp_millis(),
                reminder.status.to_string(),
                reminder.attempts,
                reminder.fired_count,
                reminder.last_error,
                reminder.priority.to_string(),
                tags,
                reminder.created_at.to_rfc3339(),
                reminder.updated_at.to_rfc3339(),
                reminder.claimed_at.map(|t| t.timestamp_millis()),
            ],
        );
        match res {
            Ok(_) => {
                info!(next_fire_at = %reminder.next_fire_at, "reminder stored");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(SchedulerError::DuplicateId {
                    id: reminder.id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: &ReminderId) -> Result<Reminder> {
        let db = self.conn();
        fetch(&db, id)?.ok_or_else(|| SchedulerError::NotFound { id: id.clone() })
    }

    fn next_due(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<Reminder>> {
        let db = self.conn();
        let rows: Vec<ReminderRow> = {
            let mut stmt = db.prepare_cached(&format!(
                "{SELECT_COLUMNS}
                 WHERE status = 'pending' AND next_fire_at_ms <= ?1
                 ORDER BY next_fire_at_ms, id
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![before.timestamp_millis(), limit as i64],
                    ReminderRow::from_row,
                )?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };

        let mut due = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match row.into_reminder() {
                Ok(r) => due.push(r),
                Err(e) => {
                    // Quarantined as Failed so it stops holding the wake time at "now".
                    error!(reminder_id = %id, "unreadable reminder marked failed: {e}");
                    db.execute(
                        "UPDATE reminders SET status = 'failed', last_error = ?1,
                           claimed_at_ms = NULL, updated_at = ?2
                         WHERE id = ?3 AND status = 'pending'",
                        rusqlite::params![
                            format!("corrupt record: {e}"),
                            before.to_rfc3339(),
                            id
                        ],
                    )?;
                }
            }
        }
        Ok(due)
    }

    fn earliest_pending(&self) -> Result<Option<DateTime<Utc>>> {
        let db = self.conn();
        let ms: Option<i64> = db.query_row(
            "SELECT MIN(next_fire_at_ms) FROM reminders WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(ms.and_then(DateTime::from_timestamp_millis))
    }

    #[instrument(skip(self), fields(reminder_id = %id))]
    fn claim(&self, id: &ReminderId, now: DateTime<Utc>) -> Result<Reminder> {
        let db = self.conn();
        let now_ms = now.timestamp_millis();
        let n = db.execute(
            "UPDATE reminders SET status = 'firing', claimed_at_ms = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending' AND next_fire_at_ms <= ?1",
            rusqlite::params![now_ms, now.to_rfc3339(), id.as_str()],
        )?;
        if n == 0 {
            // Lost the race, or the reminder moved on (rescheduled, cancelled…)
            // after the caller read the due set.
            return match fetch(&db, id)? {
                None => Err(SchedulerError::NotFound { id: id.clone() }),
                Some(_) => Err(SchedulerError::AlreadyClaimed { id: id.clone() }),
            };
        }
        debug!("reminder claimed");
        fetch(&db, id)?.ok_or_else(|| SchedulerError::NotFound { id: id.clone() })
    }

    #[instrument(skip(self), fields(reminder_id = %id))]
    fn complete(
        &self,
        id: &ReminderId,
        outcome: Completion,
        now: DateTime<Utc>,
    ) -> Result<Reminder> {
        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = fetch(&tx, id)?.ok_or_else(|| SchedulerError::NotFound { id: id.clone() })?;
        if current.status != ReminderStatus::Firing {
            return Err(SchedulerError::InvalidStateTransition {
                id: id.clone(),
                from: current.status,
                action: "complete",
            });
        }
        let now_str = now.to_rfc3339();

        match &outcome {
            Completion::Delivered => {
                tx.execute(
                    "UPDATE reminders SET status = 'delivered', fired_count = fired_count + 1,
                       attempts = 0, last_error = NULL, claimed_at_ms = NULL, updated_at = ?1
                     WHERE id = ?2 AND status = 'firing'",
                    rusqlite::params![now_str, id.as_str()],
                )?;
            }
            Completion::Rescheduled { next } => {
                if *next < current.next_fire_at {
                    return Err(SchedulerError::InvalidStateTransition {
                        id: id.clone(),
                        from: current.status,
                        action: "reschedule to an earlier instant",
                    });
                }
                let next_ms = next.timestamp_millis();
                tx.execute(
                    "UPDATE reminders SET status = 'pending', next_fire_at_ms = ?1,
                       occurrence_at_ms = ?1, fired_count = fired_count + 1, attempts = 0,
                       last_error = NULL, claimed_at_ms = NULL, updated_at = ?2
                     WHERE id = ?3 AND status = 'firing'",
                    rusqlite::params![next_ms, now_str, id.as_str()],
                )?;
            }
            Completion::Retry { retry_at, error } => {
                // next_fire_at never moves backwards.
                let retry_ms = retry_at
                    .timestamp_millis()
                    .max(current.next_fire_at.timestamp_millis());
                tx.execute(
                    "UPDATE reminders SET status = 'pending', next_fire_at_ms = ?1,
                       attempts = attempts + 1, last_error = ?2, claimed_at_ms = NULL,
                       updated_at = ?3
                     WHERE id = ?4 AND status = 'firing'",
                    rusqlite::params![retry_ms, error, now_str, id.as_str()],
                )?;
            }
            Completion::Failed { error } => {
                tx.execute(
                    "UPDATE reminders SET status = 'failed', attempts = attempts + 1,
                       last_error = ?1, claimed_at_ms = NULL, updated_at = ?2
                     WHERE id = ?3 AND status = 'firing'",
                    rusqlite::params![error, now_str, id.as_str()],
                )?;
            }
        }

        let updated = fetch(&tx, id)?.ok_or_else(|| SchedulerError::NotFound { id: id.clone() })?;
        tx.commit()?;
        debug!(status = %updated.status, "reminder completed");
        Ok(updated)
    }

    #[instrument(skip(self), fields(reminder_id = %id))]
    fn cancel(&self, id: &ReminderId, now: DateTime<Utc>) -> Result<Reminder> {
        let db = self.conn();
        let n = db.execute(
            "UPDATE reminders SET status = 'cancelled', claimed_at_ms = NULL, updated_at = ?1
             WHERE id = ?2 AND status IN ('pending', 'failed')",
            rusqlite::params![now.to_rfc3339(), id.as_str()],
        )?;
        let current = fetch(&db, id)?.ok_or_else(|| SchedulerError::NotFound { id: id.clone() })?;
        if n == 0 {
            // Firing is authoritative until complete(); terminal states stay put.
            return Err(SchedulerError::InvalidStateTransition {
                id: id.clone(),
                from: current.status,
                action: "cancel",
            });
        }
        info!("reminder cancelled");
        Ok(current)
    }

    fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<Reminder>> {
        let db = self.conn();
        let mut stmt = db.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE owner = ?1 ORDER BY created_at, id"
        ))?;
        let rows: Vec<ReminderRow> = stmt
            .query_map([owner.as_str()], ReminderRow::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        rows.into_iter().map(ReminderRow::into_reminder).collect()
    }

    fn requeue_stale(&self, claimed_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let db = self.conn();
        let n = db.execute(
            "UPDATE reminders SET status = 'pending', claimed_at_ms = NULL, updated_at = ?1
             WHERE status = 'firing' AND claimed_at_ms IS NOT NULL AND claimed_at_ms < ?2",
            rusqlite::params![now.to_rfc3339(), claimed_before.timestamp_millis()],
        )?;
        if n > 0 {
            warn!(count = n, "stale firing claims re-queued");
        }
        Ok(n)
    }
}

// --- private helpers ---------------------------------------------------

fn fetch(conn: &Connection, id: &ReminderId) -> Result<Option<Reminder>> {
    let row = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id.as_str()],
            ReminderRow::from_row,
        )
        .optional()?;
    row.map(ReminderRow::into_reminder).transpose()
}

/// Raw column values, converted into a [`Reminder`] outside the row callback
/// so decoding failures carry the reminder id.
struct ReminderRow {
    id: String,
    owner: String,
    subject: String,
    time_spec: String,
    next_fire_at_ms: i64,
    occurrence_at_ms: i64,
    status: String,
    attempts: u32,
    fired_count: u32,
    last_error: Option<String>,
    priority: String,
    tags: String,
    created_at: String,
    updated_at: String,
    claimed_at_ms: Option<i64>,
}

impl ReminderRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            subject: row.get(2)?,
            time_spec: row.get(3)?,
            next_fire_at_ms: row.get(4)?,
            occurrence_at_ms: row.get(5)?,
            status: row.get(6)?,
            attempts: row.get(7)?,
            fired_count: row.get(8)?,
            last_error: row.get(9)?,
            priority: row.get(10)?,
            tags: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            claimed_at_ms: row.get(14)?,
        })
    }

    fn into_reminder(self) -> Result<Reminder> {
        let corrupt = |reason: String| SchedulerError::CorruptRecord {
            id: self.id.clone(),
            reason,
        };
        let millis = |ms: i64| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| corrupt(format!("timestamp {ms} out of range")))
        };
        let rfc3339 = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp {s:?}: {e}")))
        };

        let time_spec: TimeSpec = serde_json::from_str(&self.time_spec)?;
        let tags: Vec<String> = serde_json::from_str(&self.tags)?;
        let status: ReminderStatus = self.status.parse().map_err(corrupt)?;
        let priority: Priority = self.priority.parse().map_err(corrupt)?;

        Ok(Reminder {
            next_fire_at: millis(self.next_fire_at_ms)?,
            occurrence_at: millis(self.occurrence_at_ms)?,
            created_at: rfc3339(&self.created_at)?,
            updated_at: rfc3339(&self.updated_at)?,
            claimed_at: self.claimed_at_ms.map(millis).transpose()?,
            id: ReminderId(self.id.clone()),
            owner: OwnerId(self.owner.clone()),
            subject: self.subject.clone(),
            time_spec,
            status,
            attempts: self.attempts,
            fired_count: self.fired_count,
            last_error: self.last_error.clone(),
            priority,
            tags,
        })
    }
}
