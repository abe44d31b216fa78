use async_trait::async_trait;
use remindhub_core::Reminder;
use remindhub_scheduler::{Delivery, DeliveryFailure};
use tracing::info;

/// Delivery sink that only writes the fired reminder to the log.
///
/// Stands in for a real transport when the daemon runs on its own.
pub struct LogDelivery;

#[async_trait]
impl Delivery for LogDelivery {
    async fn deliver(&self, reminder: &Reminder) -> Result<(), DeliveryFailure> {
        info!(
            reminder_id = %reminder.id,
            owner = %reminder.owner,
            priority = %reminder.priority,
            occurrence_at = %reminder.occurrence_at,
            "reminder: {}",
            reminder.subject
        );
        Ok(())
    }
}
