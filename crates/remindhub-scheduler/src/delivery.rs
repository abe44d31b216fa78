use async_trait::async_trait;
use remindhub_core::Reminder;

/// Why a delivery attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Transient faults (timeouts, 5xx, rate limits) are worth retrying.
    pub retryable: bool,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            retryable: true,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            retryable: false,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.retryable { "retryable" } else { "permanent" };
        write!(f, "{kind}: {}", self.reason)
    }
}

/// Hands a fired reminder to the notification transport (email, push, chat…).
///
/// The scheduler may call `deliver` more than once for the same occurrence
/// after a crash or a retryable failure, so implementations must be
/// idempotent on their side (e.g. keyed by reminder id + `occurrence_at`).
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, reminder: &Reminder) -> Result<(), DeliveryFailure>;
}
