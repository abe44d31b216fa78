use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use remindhub_core::config::SchedulerConfig;
use remindhub_core::{Clock, OwnerId, Reminder, ReminderId};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    delivery::{Delivery, DeliveryFailure},
    error::{Result, SchedulerError},
    retry::RetryPolicy,
    schedule::{next_occurrence, NextOccurrence},
    store::{Completion, ScheduleStore},
};

/// Outcome notifications emitted after every completed firing attempt.
///
/// `Failed` is the report surface for reminders that will not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Delivered {
        id: ReminderId,
        occurrence_at: DateTime<Utc>,
    },
    Rescheduled {
        id: ReminderId,
        next_fire_at: DateTime<Utc>,
    },
    Retrying {
        id: ReminderId,
        attempt: u32,
        retry_at: DateTime<Utc>,
        error: String,
    },
    Failed {
        id: ReminderId,
        attempts: u32,
        error: String,
    },
    /// A recurring series delivered its last occurrence.
    Exhausted { id: ReminderId },
}

/// Counters for one pass over the due set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Stale Firing claims returned to Pending before the due set was read.
    pub requeued: usize,
    pub due: usize,
    pub claimed: usize,
    /// Claims lost to another worker.
    pub skipped: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub retried: usize,
    pub failed: usize,
    /// Store errors; the affected reminders are left for a later tick.
    pub errors: usize,
}

enum Fired {
    Delivered,
    Rescheduled,
    Retried,
    Failed,
}

impl TickReport {
    fn record(&mut self, fired: Fired) {
        match fired {
            Fired::Delivered => self.delivered += 1,
            Fired::Rescheduled => self.rescheduled += 1,
            Fired::Retried => self.retried += 1,
            Fired::Failed => self.failed += 1,
        }
    }
}

/// Management surface for the outer layers while the engine loop runs.
///
/// Inserts wake the engine so a reminder due sooner than the current sleep
/// is not held back by the poll interval.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<dyn ScheduleStore>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn schedule(&self, reminder: &Reminder) -> Result<()> {
        if let Some(rule) = reminder.time_spec.rule() {
            rule.validate().map_err(SchedulerError::InvalidRule)?;
        }
        self.store.insert(reminder)?;
        info!(reminder_id = %reminder.id, owner = %reminder.owner, "reminder scheduled");
        self.wake.notify_one();
        Ok(())
    }

    pub fn cancel(&self, id: &ReminderId) -> Result<Reminder> {
        self.store.cancel(id, self.clock.now())
    }

    pub fn get(&self, id: &ReminderId) -> Result<Reminder> {
        self.store.get(id)
    }

    pub fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<Reminder>> {
        self.store.list_for_owner(owner)
    }
}

/// Dispatch loop: wakes at the next due time, claims due reminders exactly
/// once and hands them to the [`Delivery`] collaborator.
///
/// Any number of engines may share one store; the store's atomic claim
/// decides which of them fires a given occurrence.
pub struct SchedulerEngine {
    store: Arc<dyn ScheduleStore>,
    delivery: Arc<dyn Delivery>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    retry: RetryPolicy,
    wake: Arc<Notify>,
    /// If set, every outcome is sent here (non-blocking).
    events: Option<mpsc::Sender<DispatchEvent>>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        delivery: Arc<dyn Delivery>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            delivery,
            clock,
            config: SchedulerConfig::default(),
            retry: RetryPolicy::default(),
            wake: Arc::new(Notify::new()),
            events: None,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Receive a [`DispatchEvent`] for every completed attempt.
    ///
    /// The sender uses `try_send`, so a slow consumer never stalls the loop.
    pub fn with_events(mut self, tx: mpsc::Sender<DispatchEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Fire everything due at the clock's current instant.
    ///
    /// Claims left in Firing for longer than `stale_claim_secs` (a crashed
    /// worker, or an outcome that could not be recorded) are re-queued first.
    /// A failure on one reminder is logged and counted; it never stops the
    /// rest of the batch.
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let requeued = self.recover_stale_claims(now);
        let due = self.store.next_due(now, self.config.batch_size)?;
        let mut report = TickReport {
            requeued,
            due: due.len(),
            ..TickReport::default()
        };

        for candidate in due {
            let reminder = match self.store.claim(&candidate.id, now) {
                Ok(r) => r,
                Err(SchedulerError::AlreadyClaimed { .. } | SchedulerError::NotFound { .. }) => {
                    debug!(reminder_id = %candidate.id, "claim lost; skipping");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(reminder_id = %candidate.id, "claim failed: {e}");
                    report.errors += 1;
                    continue;
                }
            };
            report.claimed += 1;

            match self.fire(&reminder).await {
                Ok(fired) => report.record(fired),
                Err(e) => {
                    // Left in Firing; a later tick re-queues it once the claim is stale.
                    error!(reminder_id = %reminder.id, "recording outcome failed: {e}");
                    report.errors += 1;
                }
            }
        }

        if report.claimed > 0 || report.errors > 0 || report.requeued > 0 {
            info!(
                requeued = report.requeued,
                due = report.due,
                delivered = report.delivered,
                rescheduled = report.rescheduled,
                retried = report.retried,
                failed = report.failed,
                errors = report.errors,
                "tick complete"
            );
        }
        Ok(report)
    }

    /// How long to sleep before the next tick: until the earliest pending
    /// reminder, never longer than the poll interval.
    pub fn next_wake_delay(&self) -> Result<Duration> {
        let cap = Duration::from_secs(self.config.max_poll_interval_secs);
        let Some(at) = self.store.earliest_pending()? else {
            return Ok(cap);
        };
        Ok((at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(cap))
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true` or its sender
    /// is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");

        loop {
            if let Err(e) = self.tick().await {
                error!("scheduler tick error: {e}");
            }
            let delay = self.next_wake_delay().unwrap_or_else(|e| {
                error!("wake time query failed: {e}");
                Duration::from_secs(self.config.max_poll_interval_secs)
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {
                    debug!("woken by newly scheduled reminder");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current tokio runtime.
    pub fn start(self) -> RunningScheduler {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = self.handle();
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });
        RunningScheduler {
            shutdown: shutdown_tx,
            task,
            handle,
        }
    }

    // --- private helpers ---------------------------------------------------

    fn recover_stale_claims(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::seconds(self.config.stale_claim_secs as i64);
        self.store.requeue_stale(cutoff, now).unwrap_or_else(|e| {
            error!("stale claim recovery failed: {e}");
            0
        })
    }

    #[instrument(skip(self, reminder), fields(reminder_id = %reminder.id))]
    async fn fire(&self, reminder: &Reminder) -> Result<Fired> {
        let limit = Duration::from_secs(self.config.delivery_timeout_secs);
        let result = match tokio::time::timeout(limit, self.delivery.deliver(reminder)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryFailure::retryable(format!(
                "delivery timed out after {}s",
                limit.as_secs()
            ))),
        };

        let now = self.clock.now();
        match result {
            Ok(()) => self.after_success(reminder, now),
            Err(failure) => self.after_failure(reminder, failure, now),
        }
    }

    fn after_success(&self, reminder: &Reminder, now: DateTime<Utc>) -> Result<Fired> {
        let id = &reminder.id;
        let Some(rule) = reminder.time_spec.rule() else {
            self.store.complete(id, Completion::Delivered, now)?;
            info!(reminder_id = %id, "reminder delivered");
            self.emit(DispatchEvent::Delivered {
                id: id.clone(),
                occurrence_at: reminder.occurrence_at,
            });
            return Ok(Fired::Delivered);
        };

        // Occurrences missed while nobody was running are skipped, not replayed.
        let after = reminder.occurrence_at.max(now);
        match next_occurrence(rule, after) {
            NextOccurrence::At(next) => {
                self.store
                    .complete(id, Completion::Rescheduled { next }, now)?;
                info!(reminder_id = %id, next_fire_at = %next, "reminder delivered and rescheduled");
                self.emit(DispatchEvent::Delivered {
                    id: id.clone(),
                    occurrence_at: reminder.occurrence_at,
                });
                self.emit(DispatchEvent::Rescheduled {
                    id: id.clone(),
                    next_fire_at: next,
                });
                Ok(Fired::Rescheduled)
            }
            NextOccurrence::Exhausted => {
                self.store.complete(id, Completion::Delivered, now)?;
                info!(reminder_id = %id, "final occurrence delivered; series retired");
                self.emit(DispatchEvent::Delivered {
                    id: id.clone(),
                    occurrence_at: reminder.occurrence_at,
                });
                self.emit(DispatchEvent::Exhausted { id: id.clone() });
                Ok(Fired::Delivered)
            }
        }
    }

    fn after_failure(
        &self,
        reminder: &Reminder,
        failure: DeliveryFailure,
        now: DateTime<Utc>,
    ) -> Result<Fired> {
        let id = &reminder.id;
        let attempt = reminder.attempts + 1;

        if failure.retryable && self.retry.should_retry(attempt) {
            let retry_at = now + self.retry.delay_for(attempt);
            self.store.complete(
                id,
                Completion::Retry {
                    retry_at,
                    error: failure.reason.clone(),
                },
                now,
            )?;
            warn!(reminder_id = %id, attempt, %retry_at, "delivery failed, will retry: {}", failure.reason);
            self.emit(DispatchEvent::Retrying {
                id: id.clone(),
                attempt,
                retry_at,
                error: failure.reason,
            });
            return Ok(Fired::Retried);
        }

        self.store.complete(
            id,
            Completion::Failed {
                error: failure.reason.clone(),
            },
            now,
        )?;
        warn!(reminder_id = %id, attempts = attempt, "reminder failed: {failure}");
        self.emit(DispatchEvent::Failed {
            id: id.clone(),
            attempts: attempt,
            error: failure.reason,
        });
        Ok(Fired::Failed)
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(ref tx) = self.events {
            if tx.try_send(event).is_err() {
                warn!("dispatch event channel full or closed; event dropped");
            }
        }
    }
}

/// A scheduler loop spawned by [`SchedulerEngine::start`].
pub struct RunningScheduler {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    handle: SchedulerHandle,
}

impl RunningScheduler {
    pub fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    /// Signal shutdown and wait for the loop to finish its current tick.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("scheduler task ended abnormally: {e}");
        }
    }
}
