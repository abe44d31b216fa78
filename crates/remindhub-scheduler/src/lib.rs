//! `remindhub-scheduler`: durable reminder store and exactly-once dispatch loop.
//!
//! # Overview
//!
//! Reminders are persisted to a SQLite `reminders` table. The
//! [`engine::SchedulerEngine`] sleeps until the earliest pending
//! `next_fire_at` (capped by the configured poll interval), claims every due
//! reminder with a conditional UPDATE, hands it to the [`delivery::Delivery`]
//! collaborator and records the outcome.
//!
//! # Reminder lifecycle
//!
//! | From      | Event                          | To                         |
//! |-----------|--------------------------------|----------------------------|
//! | `Pending` | claim                          | `Firing`                   |
//! | `Firing`  | delivered, one-shot / exhausted| `Delivered`                |
//! | `Firing`  | delivered, recurring           | `Pending` (next occurrence)|
//! | `Firing`  | retryable failure              | `Pending` (backoff)        |
//! | `Firing`  | attempts used / non-retryable  | `Failed`                   |
//! | `Firing`  | claim older than `stale_claim_secs` | `Pending`             |
//! | `Pending`, `Failed` | cancel               | `Cancelled`                |

pub mod db;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod retry;
pub mod schedule;
pub mod store;

pub use delivery::{Delivery, DeliveryFailure};
pub use engine::{DispatchEvent, RunningScheduler, SchedulerEngine, SchedulerHandle, TickReport};
pub use error::{Result, SchedulerError};
pub use retry::RetryPolicy;
pub use schedule::{first_occurrence, next_occurrence, NextOccurrence};
pub use store::{Completion, ScheduleStore, SqliteStore};
