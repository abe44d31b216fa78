use remindhub_core::{ReminderId, ReminderStatus};
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// `DuplicateId`, `AlreadyClaimed` and `InvalidStateTransition` signal races
/// or caller bugs; they are always surfaced, never swallowed.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A time spec could not be (de)serialised.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row holds a value the domain types cannot represent.
    #[error("Corrupt record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    /// An insert used an id that is already present.
    #[error("Duplicate reminder id: {id}")]
    DuplicateId { id: ReminderId },

    /// Another worker won the claim (or the reminder already left Pending).
    #[error("Reminder already claimed: {id}")]
    AlreadyClaimed { id: ReminderId },

    /// The requested transition is not allowed from the current status.
    #[error("Invalid state transition for {id}: cannot {action} from {from}")]
    InvalidStateTransition {
        id: ReminderId,
        from: ReminderStatus,
        action: &'static str,
    },

    /// No reminder with the given id exists in the store.
    #[error("Reminder not found: {id}")]
    NotFound { id: ReminderId },

    /// The recurrence rule violates its invariants.
    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
