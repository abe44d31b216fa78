//! Reminder records and time specifications, shared between the parser,
//! the normalizer, the schedule store and the dispatch loop.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OwnerId, Priority, ReminderId};

/// When a reminder should fire.
///
/// Stored as a JSON string in the `reminders.time_spec` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeSpec {
    /// Fire once at the given instant.
    Absolute { at: DateTime<FixedOffset> },

    /// Fire once at `anchor + offset_secs`.
    Relative {
        anchor: DateTime<FixedOffset>,
        offset_secs: i64,
    },

    /// Fire on every occurrence of `rule` at or after `anchor`.
    Recurring {
        rule: RecurrenceRule,
        anchor: DateTime<FixedOffset>,
    },
}

impl TimeSpec {
    pub fn is_recurring(&self) -> bool {
        matches!(self, TimeSpec::Recurring { .. })
    }

    /// The recurrence rule, if this spec repeats.
    pub fn rule(&self) -> Option<&RecurrenceRule> {
        match self {
            TimeSpec::Recurring { rule, .. } => Some(rule),
            _ => None,
        }
    }
}

/// Calendar unit a rule repeats in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Frequency::Minute => "minute",
            Frequency::Hour => "hour",
            Frequency::Day => "day",
            Frequency::Week => "week",
            Frequency::Month => "month",
        };
        write!(f, "{s}")
    }
}

/// When a recurring series stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndCondition {
    /// Total number of occurrences, including the first one.
    Count { count: u32 },
    /// Last instant an occurrence may fall on (inclusive).
    Until { at: DateTime<FixedOffset> },
}

/// A repeating schedule.
///
/// Occurrence `k` is `start + k * interval` units, computed in the UTC offset
/// carried by `start`. `start` pins the time of day and, for weekly rules,
/// the weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Number of `frequency` units between occurrences (>= 1).
    pub interval: u32,
    /// First occurrence of the series.
    pub start: DateTime<FixedOffset>,
    /// Day of month for monthly rules (1..=31); clamped to short months.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month_day: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EndCondition>,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32, start: DateTime<FixedOffset>) -> Self {
        Self {
            frequency,
            interval,
            start,
            month_day: None,
            end: None,
        }
    }

    pub fn with_month_day(mut self, day: u8) -> Self {
        self.month_day = Some(day);
        self
    }

    pub fn with_end(mut self, end: EndCondition) -> Self {
        self.end = Some(end);
        self
    }

    /// Check the structural invariants of the rule.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.interval == 0 {
            return Err("interval must be at least 1".to_string());
        }
        if let Some(day) = self.month_day {
            if !(1..=31).contains(&day) {
                return Err(format!("month day {day} is out of range 1..=31"));
            }
        }
        if let Some(EndCondition::Count { count: 0 }) = self.end {
            return Err("occurrence count must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Lifecycle state of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Waiting for `next_fire_at`.
    Pending,
    /// Claimed by exactly one scheduler worker; delivery in flight.
    Firing,
    /// One-shot delivered, or recurring series exhausted.
    Delivered,
    /// Delivery failed terminally.
    Failed,
    /// Cancelled by the owner.
    Cancelled,
}

impl ReminderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReminderStatus::Delivered | ReminderStatus::Failed | ReminderStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Firing => "firing",
            ReminderStatus::Delivered => "delivered",
            ReminderStatus::Failed => "failed",
            ReminderStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "firing" => Ok(ReminderStatus::Firing),
            "delivered" => Ok(ReminderStatus::Delivered),
            "failed" => Ok(ReminderStatus::Failed),
            "cancelled" => Ok(ReminderStatus::Cancelled),
            other => Err(format!("unknown reminder status: {other}")),
        }
    }
}

/// A persisted reminder record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub owner: OwnerId,
    /// Cleaned, human-readable subject ("call Alex").
    pub subject: String,
    pub time_spec: TimeSpec,
    /// Next instant the scheduler should pick this reminder up.
    pub next_fire_at: DateTime<Utc>,
    /// Scheduled instant of the current occurrence. Differs from
    /// `next_fire_at` only while a retry is backing off.
    pub occurrence_at: DateTime<Utc>,
    pub status: ReminderStatus,
    /// Failed delivery attempts for the current occurrence.
    pub attempts: u32,
    /// Successful deliveries so far.
    pub fired_count: u32,
    pub last_error: Option<String>,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Reminder {
    /// Build a fresh Pending record firing at `next_fire_at`.
    pub fn pending(
        id: ReminderId,
        owner: OwnerId,
        subject: impl Into<String>,
        time_spec: TimeSpec,
        next_fire_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            subject: subject.into(),
            time_spec,
            next_fire_at,
            occurrence_at: next_fire_at,
            status: ReminderStatus::Pending,
            attempts: 0,
            fired_count: 0,
            last_error: None,
            priority: Priority::default(),
            tags: Vec::new(),
            created_at,
            updated_at: created_at,
            claimed_at: None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.time_spec.is_recurring()
    }
}
