//! `remindhub-core`: domain types shared by the parser, the scheduler and the daemon.

pub mod clock;
pub mod config;
pub mod error;
pub mod reminder;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{HubError, Result};
pub use reminder::{
    EndCondition, Frequency, RecurrenceRule, Reminder, ReminderStatus, TimeSpec,
};
pub use types::{OwnerId, Priority, ReminderId};
